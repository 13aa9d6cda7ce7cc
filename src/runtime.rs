//! Driver loop: read one depth update, decide, act, repeat until stopped.

use std::{
    io::BufRead,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::{
    audit::{AuditSink, JsonArrayAuditLog},
    depth::{aggregate, DepthSnapshot},
    errors::SessionError,
    exchange::{ExchangeSession, SubscriptionAck},
    executor::OrderExecutor,
    lot_size::LotSizeRounder,
    strategy::{CycleOutcome, MachineParams, TraderConfig, TradingStateMachine},
    timings::time_block,
};

// Bounds how long a quiet stream can delay noticing the stop flag.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraderStats {
    pub cycles: u64,
    pub ignored: u64,
    pub insufficient_depth: u64,
    pub buys: u64,
    pub sells: u64,
    pub blocked: u64,
}

impl TraderStats {
    pub fn record(&mut self, outcome: &CycleOutcome) {
        self.cycles += 1;
        match outcome {
            CycleOutcome::Ignored => self.ignored += 1,
            CycleOutcome::InsufficientDepth { .. } => self.insufficient_depth += 1,
            CycleOutcome::Bought { .. } => self.buys += 1,
            CycleOutcome::Sold { .. } => self.sells += 1,
            CycleOutcome::OrderBlocked { .. } => self.blocked += 1,
            CycleOutcome::Cooldown { .. } | CycleOutcome::Held { .. } => {}
        }
    }
}

pub struct Trader {
    session: ExchangeSession,
    executor: OrderExecutor,
    machine: TradingStateMachine,
    stats: TraderStats,
}

impl Trader {
    /// Connect, load lot sizes and subscribe, writing order responses to
    /// `config.audit_log_path`.
    pub async fn connect(config: &TraderConfig) -> Result<Self> {
        let audit = JsonArrayAuditLog::create(&config.audit_log_path).with_context(|| {
            format!(
                "Failed to open audit log {}",
                config.audit_log_path.display()
            )
        })?;
        Self::connect_with_audit(config, Box::new(audit)).await
    }

    pub async fn connect_with_audit(
        config: &TraderConfig,
        audit: Box<dyn AuditSink>,
    ) -> Result<Self> {
        let mut session = ExchangeSession::connect(config.session_config())
            .await
            .context("Failed to connect to exchange")?;

        let mut executor = OrderExecutor::new(
            config.symbol.clone(),
            config.rounding,
            LotSizeRounder::new(),
            audit,
        );
        if let Err(err) = executor.refresh_lot_sizes(&session).await {
            close_quietly(session).await;
            return Err(err).context("Failed to load exchange info");
        }
        match executor.lot_sizes().step_size(&config.symbol) {
            Some(step) if !step.is_zero() => {
                info!(symbol = %config.symbol, %step, "lot step loaded")
            }
            _ => warn!(
                symbol = %config.symbol,
                "no usable lot step, every order for this symbol will be blocked"
            ),
        }

        match session.subscribe_depth(&config.symbol).await {
            Ok(SubscriptionAck::Accepted) => {}
            Ok(SubscriptionAck::Rejected { code, msg }) if config.fail_on_subscribe_error => {
                close_quietly(session).await;
                return Err(SessionError::SubscriptionRejected { code, msg }.into());
            }
            Ok(SubscriptionAck::Rejected { .. }) => {
                warn!("continuing without a confirmed depth subscription")
            }
            Err(err) => {
                close_quietly(session).await;
                return Err(err).context("Failed to subscribe to depth stream");
            }
        }

        let machine = TradingStateMachine::new(MachineParams::from(config), Instant::now());
        info!(
            symbol = %config.symbol,
            target = config.target_amount,
            denomination = %config.denomination,
            buy_delay_secs = config.buy_delay_secs,
            max_sell_delay_secs = config.max_sell_delay_secs,
            threshold = config.activation_threshold,
            "trader connected"
        );
        Ok(Self {
            session,
            executor,
            machine,
            stats: TraderStats::default(),
        })
    }

    pub fn machine(&self) -> &TradingStateMachine {
        &self.machine
    }

    pub fn stats(&self) -> TraderStats {
        self.stats
    }

    /// One read → decode → aggregate → decide → act round.
    pub async fn cycle(&mut self) -> Result<CycleOutcome> {
        let payload = self
            .session
            .read_depth_message()
            .await
            .context("depth stream failed")?;
        self.handle(&payload).await
    }

    /// Like [`Trader::cycle`], but returns `None` when no message arrives
    /// within `bound`. Nothing is consumed or decided in that case.
    pub async fn poll_cycle(&mut self, bound: Duration) -> Result<Option<CycleOutcome>> {
        let read = tokio::time::timeout(bound, self.session.read_depth_message()).await;
        let Ok(payload) = read else {
            return Ok(None);
        };
        let payload = payload.context("depth stream failed")?;
        self.handle(&payload).await.map(Some)
    }

    async fn handle(&mut self, payload: &[u8]) -> Result<CycleOutcome> {
        let outcome = self.process(payload).await?;
        self.stats.record(&outcome);
        Ok(outcome)
    }

    async fn process(&mut self, payload: &[u8]) -> Result<CycleOutcome> {
        let snapshot = match DepthSnapshot::from_slice(payload) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                debug!(error = %err, "skipping non-depth message");
                return Ok(CycleOutcome::Ignored);
            }
        };
        let target = self.machine.params().target_amount;
        let price = time_block("depth_aggregate", || aggregate(&snapshot, target));

        let mut gateway = self.executor.route(&self.session);
        let outcome = self
            .machine
            .on_depth(&price, &mut gateway, Instant::now())
            .await?;
        debug!(?outcome, sell_price = price.sell_price, "cycle complete");
        Ok(outcome)
    }

    /// Terminate the audit log and close the exchange session.
    pub async fn close(mut self) -> Result<()> {
        self.executor.finish_audit();
        self.session
            .close()
            .await
            .context("Failed to close exchange session")
    }
}

async fn close_quietly(session: ExchangeSession) {
    if let Err(err) = session.close().await {
        debug!(error = %err, "close after failed startup");
    }
}

/// Run cycles until `stop` is set or a cycle fails, then close the trader.
///
/// The stop flag is polled between cycles; a cycle in progress (including an
/// order round-trip) always completes.
pub async fn run(mut trader: Trader, stop: Arc<AtomicBool>) -> Result<TraderStats> {
    let mut failure = None;
    while !stop.load(Ordering::SeqCst) {
        if let Err(err) = trader.poll_cycle(STOP_POLL_INTERVAL).await {
            failure = Some(err);
            break;
        }
    }

    let stats = trader.stats();
    info!(?stats, "trading loop finished");
    let closed = trader.close().await;
    if let Some(err) = failure {
        if let Err(close_err) = closed {
            error!(error = %close_err, "close after failure also failed");
        }
        return Err(err);
    }
    closed.map(|_| stats)
}

/// Set `stop` when a line is entered on stdin or Ctrl-C is received.
///
/// Must be called from within a tokio runtime. End of input on stdin does
/// not count as a stop request.
pub fn spawn_stop_watcher(stop: Arc<AtomicBool>) {
    let stdin_flag = stop.clone();
    std::thread::spawn(move || {
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) => debug!("stdin closed, stop watcher idle"),
            Ok(_) => {
                info!("stop requested from stdin");
                stdin_flag.store(true, Ordering::SeqCst);
            }
            Err(err) => warn!(error = %err, "stdin stop watcher failed"),
        }
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stop requested by signal");
            stop.store(true, Ordering::SeqCst);
        }
    });
}
