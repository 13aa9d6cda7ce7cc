use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{
    config::TraderConfig,
    position::{PositionState, TradingPosition},
};
use crate::{
    depth::ExecutablePrice,
    errors::{TradeError, TradeResult},
    executor::{OrderGateway, OrderResult},
    types::{Denomination, OrderSide},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MachineParams {
    pub target_amount: f64,
    pub buy_delay: Duration,
    pub max_sell_delay: Duration,
    pub sell_retry_delay: Duration,
    pub activation_threshold: f64,
    pub denomination: Denomination,
}

impl From<&TraderConfig> for MachineParams {
    fn from(config: &TraderConfig) -> Self {
        Self {
            target_amount: config.target_amount,
            buy_delay: config.buy_delay(),
            max_sell_delay: config.max_sell_delay(),
            sell_retry_delay: config.sell_retry_delay(),
            activation_threshold: config.activation_threshold,
            denomination: config.denomination,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    ThresholdExit,
    MaxHoldExit,
}

/// What one decision cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The message was not a depth update.
    Ignored,
    InsufficientDepth { available: f64 },
    /// Waiting before the next order: the buy delay, or the retry interval
    /// after a blocked sell.
    Cooldown { remaining: Duration },
    Bought { executed: f64, quote: f64 },
    Held { price_change: f64 },
    Sold {
        reason: ExitReason,
        executed: f64,
        quote: f64,
    },
    OrderBlocked { side: OrderSide, reason: String },
}

/// Empty/Holding decision logic. Time is passed in so every transition is
/// reproducible.
#[derive(Debug, Clone)]
pub struct TradingStateMachine {
    params: MachineParams,
    position: TradingPosition,
}

impl TradingStateMachine {
    pub fn new(params: MachineParams, start: Instant) -> Self {
        Self {
            params,
            position: TradingPosition::new(start),
        }
    }

    pub fn params(&self) -> &MachineParams {
        &self.params
    }

    pub fn position(&self) -> &TradingPosition {
        &self.position
    }

    pub fn state(&self) -> PositionState {
        self.position.state()
    }

    pub async fn on_depth<G>(
        &mut self,
        price: &ExecutablePrice,
        gateway: &mut G,
        now: Instant,
    ) -> TradeResult<CycleOutcome>
    where
        G: OrderGateway + ?Sized,
    {
        if !price.sell_side_filled(self.params.target_amount) {
            debug!(
                available = price.sell_amount,
                target = self.params.target_amount,
                "insufficient depth"
            );
            return Ok(CycleOutcome::InsufficientDepth {
                available: price.sell_amount,
            });
        }

        self.position.record_price(price.sell_price);

        match self.position.state() {
            PositionState::Empty => self.try_buy(gateway, now).await,
            PositionState::Holding => {
                let price_change = self.position.price_change();
                let threshold = self.params.activation_threshold;
                let exit = if price_change < -threshold || price_change >= threshold {
                    Some(ExitReason::ThresholdExit)
                } else if self.position.held_for(now) >= self.params.max_sell_delay {
                    Some(ExitReason::MaxHoldExit)
                } else {
                    None
                };
                let Some(reason) = exit else {
                    debug!(price_change, "holding");
                    return Ok(CycleOutcome::Held { price_change });
                };
                if let Some(remaining) = self
                    .position
                    .sell_retry_remaining(now, self.params.sell_retry_delay)
                {
                    debug!(?reason, ?remaining, "sell retry pending");
                    return Ok(CycleOutcome::Cooldown { remaining });
                }
                self.sell(gateway, reason, now).await
            }
        }
    }

    async fn try_buy<G>(&mut self, gateway: &mut G, now: Instant) -> TradeResult<CycleOutcome>
    where
        G: OrderGateway + ?Sized,
    {
        let waited = self.position.since_exit(now);
        if waited < self.params.buy_delay {
            return Ok(CycleOutcome::Cooldown {
                remaining: self.params.buy_delay - waited,
            });
        }

        let order = gateway
            .place_market_order(
                OrderSide::Buy,
                self.params.target_amount,
                self.params.denomination,
            )
            .await;
        let fill = match order {
            Ok(fill) => fill,
            Err(err) => {
                let outcome = blocked(OrderSide::Buy, err)?;
                self.position.restart_cooldown(now);
                return Ok(outcome);
            }
        };

        let executed = fill.executed_base();
        if executed <= 0.0 {
            warn!(raw = %fill.raw, "buy executed nothing");
            self.position.restart_cooldown(now);
            return Ok(CycleOutcome::OrderBlocked {
                side: OrderSide::Buy,
                reason: "buy executed nothing".to_string(),
            });
        }
        self.position.open(executed, now);
        info!(
            executed,
            quote = fill.executed_quote(),
            reference_price = self.position.current_price,
            "position opened"
        );
        Ok(bought(&fill))
    }

    async fn sell<G>(
        &mut self,
        gateway: &mut G,
        reason: ExitReason,
        now: Instant,
    ) -> TradeResult<CycleOutcome>
    where
        G: OrderGateway + ?Sized,
    {
        let held = self.position.held_amount;
        let order = gateway
            .place_market_order(OrderSide::Sell, held, Denomination::Base)
            .await;
        match order {
            Ok(fill) => {
                self.position.close(now);
                info!(
                    ?reason,
                    held,
                    executed = fill.executed_base(),
                    quote = fill.executed_quote(),
                    "position closed"
                );
                Ok(CycleOutcome::Sold {
                    reason,
                    executed: fill.executed_base(),
                    quote: fill.executed_quote(),
                })
            }
            Err(TradeError::QuantityBelowStep { symbol, quantity }) => {
                warn!(%symbol, %quantity, "held amount is below one lot step, abandoning it");
                self.position.close(now);
                Ok(CycleOutcome::OrderBlocked {
                    side: OrderSide::Sell,
                    reason: format!("dust {quantity} abandoned"),
                })
            }
            Err(err) => {
                let outcome = blocked(OrderSide::Sell, err)?;
                self.position.block_sell(now);
                Ok(outcome)
            }
        }
    }
}

fn bought(fill: &OrderResult) -> CycleOutcome {
    CycleOutcome::Bought {
        executed: fill.executed_base(),
        quote: fill.executed_quote(),
    }
}

// Order-scoped failures become an outcome; anything else ends the run.
fn blocked(side: OrderSide, err: TradeError) -> TradeResult<CycleOutcome> {
    if !err.is_order_scoped() {
        return Err(err);
    }
    warn!(%side, error = %err, "order blocked");
    Ok(CycleOutcome::OrderBlocked {
        side,
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::errors::SessionError;

    #[derive(Default)]
    struct ScriptedGateway {
        replies: VecDeque<TradeResult<OrderResult>>,
        calls: Vec<(OrderSide, f64, Denomination)>,
    }

    impl ScriptedGateway {
        fn with(replies: Vec<TradeResult<OrderResult>>) -> Self {
            Self {
                replies: replies.into(),
                calls: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl OrderGateway for ScriptedGateway {
        async fn place_market_order(
            &mut self,
            side: OrderSide,
            quantity: f64,
            denomination: Denomination,
        ) -> TradeResult<OrderResult> {
            self.calls.push((side, quantity, denomination));
            self.replies.pop_front().expect("unscripted order")
        }
    }

    fn fill(executed: Decimal, quote: Decimal) -> TradeResult<OrderResult> {
        Ok(OrderResult {
            requested_quantity: executed,
            executed_quantity: executed,
            cumulative_quote_quantity: quote,
            raw: "{}".to_string(),
        })
    }

    fn params() -> MachineParams {
        MachineParams {
            target_amount: 50.0,
            buy_delay: Duration::from_secs(30),
            max_sell_delay: Duration::from_secs(300),
            sell_retry_delay: Duration::from_secs(1),
            activation_threshold: 0.0001,
            denomination: Denomination::Quote,
        }
    }

    fn depth(sell_price: f64) -> ExecutablePrice {
        ExecutablePrice {
            buy_price: sell_price,
            buy_amount: 50.0,
            sell_price,
            sell_amount: 50.0,
        }
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    /// Machine holding `0.001` bought at `start + 30s`, with one price sample.
    async fn holding(start: Instant, first_price: f64) -> TradingStateMachine {
        let mut machine = TradingStateMachine::new(params(), start);
        let mut gateway = ScriptedGateway::with(vec![fill(dec!(0.001), dec!(50))]);
        let outcome = machine
            .on_depth(&depth(first_price), &mut gateway, start + secs(30))
            .await
            .unwrap();
        assert!(matches!(outcome, CycleOutcome::Bought { .. }));
        machine
    }

    #[tokio::test]
    async fn waits_for_buy_delay_after_start() {
        let start = Instant::now();
        let mut machine = TradingStateMachine::new(params(), start);
        let mut gateway = ScriptedGateway::default();

        let outcome = machine
            .on_depth(&depth(0.5), &mut gateway, start + secs(10))
            .await
            .unwrap();

        assert_eq!(outcome, CycleOutcome::Cooldown { remaining: secs(20) });
        assert_eq!(machine.state(), PositionState::Empty);
        assert!(gateway.calls.is_empty());
    }

    #[tokio::test]
    async fn buys_target_once_delay_elapsed() {
        let start = Instant::now();
        let mut machine = TradingStateMachine::new(params(), start);
        let mut gateway = ScriptedGateway::with(vec![fill(dec!(0.00075), dec!(49.98))]);

        let outcome = machine
            .on_depth(&depth(0.5), &mut gateway, start + secs(30))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Bought {
                executed: 0.00075,
                quote: 49.98
            }
        );
        assert_eq!(gateway.calls, vec![(OrderSide::Buy, 50.0, Denomination::Quote)]);
        assert_eq!(machine.state(), PositionState::Holding);
        assert_eq!(machine.position().held_amount, 0.00075);
        assert_eq!(machine.position().buy_timestamp, Some(start + secs(30)));
    }

    #[tokio::test]
    async fn sells_when_change_reaches_threshold() {
        let start = Instant::now();
        let mut machine = holding(start, 100.0).await;
        let mut gateway = ScriptedGateway::with(vec![fill(dec!(0.001), dec!(50.01))]);

        let outcome = machine
            .on_depth(&depth(100.02), &mut gateway, start + secs(31))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            CycleOutcome::Sold {
                reason: ExitReason::ThresholdExit,
                ..
            }
        ));
        assert_eq!(gateway.calls, vec![(OrderSide::Sell, 0.001, Denomination::Base)]);
        assert_eq!(machine.state(), PositionState::Empty);
        assert_eq!(machine.position().last_exit_at, start + secs(31));
    }

    #[tokio::test]
    async fn sells_on_drop_below_negative_threshold() {
        let start = Instant::now();
        let mut machine = holding(start, 100.0).await;
        let mut gateway = ScriptedGateway::with(vec![fill(dec!(0.001), dec!(49.9))]);

        let outcome = machine
            .on_depth(&depth(99.98), &mut gateway, start + secs(31))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            CycleOutcome::Sold {
                reason: ExitReason::ThresholdExit,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn forced_sell_after_max_hold() {
        let start = Instant::now();
        let mut machine = holding(start, 100.0).await;
        let mut gateway = ScriptedGateway::with(vec![fill(dec!(0.001), dec!(50))]);

        let outcome = machine
            .on_depth(&depth(100.0), &mut gateway, start + secs(100))
            .await
            .unwrap();
        assert!(matches!(outcome, CycleOutcome::Held { .. }));
        assert!(gateway.calls.is_empty());

        let outcome = machine
            .on_depth(&depth(100.005), &mut gateway, start + secs(330))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            CycleOutcome::Sold {
                reason: ExitReason::MaxHoldExit,
                ..
            }
        ));
        assert_eq!(machine.state(), PositionState::Empty);
    }

    #[tokio::test]
    async fn cooldown_restarts_from_last_sell() {
        let start = Instant::now();
        let mut machine = holding(start, 100.0).await;
        let mut gateway = ScriptedGateway::with(vec![fill(dec!(0.001), dec!(50.2))]);
        machine
            .on_depth(&depth(100.5), &mut gateway, start + secs(40))
            .await
            .unwrap();

        let outcome = machine
            .on_depth(&depth(100.5), &mut gateway, start + secs(60))
            .await
            .unwrap();
        assert_eq!(outcome, CycleOutcome::Cooldown { remaining: secs(10) });
    }

    #[tokio::test]
    async fn insufficient_depth_leaves_position_untouched() {
        let start = Instant::now();
        let mut machine = holding(start, 100.0).await;
        let before = machine.position().clone();
        let mut gateway = ScriptedGateway::default();

        let thin = ExecutablePrice {
            sell_price: 0.4,
            sell_amount: 40.0,
            ..ExecutablePrice::default()
        };
        let outcome = machine
            .on_depth(&thin, &mut gateway, start + secs(1_000))
            .await
            .unwrap();

        assert_eq!(outcome, CycleOutcome::InsufficientDepth { available: 40.0 });
        assert_eq!(machine.position(), &before);
        assert!(gateway.calls.is_empty());
    }

    #[tokio::test]
    async fn rejected_buy_blocks_and_restarts_cooldown() {
        let start = Instant::now();
        let mut machine = TradingStateMachine::new(params(), start);
        let mut gateway = ScriptedGateway::with(vec![Err(TradeError::ExchangeRejected {
            status: 400,
            code: -2010,
            msg: "Account has insufficient balance".to_string(),
        })]);

        let outcome = machine
            .on_depth(&depth(0.5), &mut gateway, start + secs(45))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            CycleOutcome::OrderBlocked {
                side: OrderSide::Buy,
                ..
            }
        ));
        assert_eq!(machine.state(), PositionState::Empty);
        assert_eq!(machine.position().last_exit_at, start + secs(45));
    }

    #[tokio::test]
    async fn rejected_sell_keeps_holding() {
        let start = Instant::now();
        let mut machine = holding(start, 100.0).await;
        let mut gateway = ScriptedGateway::with(vec![Err(TradeError::OrderParse(
            "missing executedQty".to_string(),
        ))]);

        let outcome = machine
            .on_depth(&depth(101.0), &mut gateway, start + secs(31))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            CycleOutcome::OrderBlocked {
                side: OrderSide::Sell,
                ..
            }
        ));
        assert_eq!(machine.state(), PositionState::Holding);
        assert_eq!(machine.position().held_amount, 0.001);
    }

    #[tokio::test]
    async fn blocked_sell_waits_for_retry_interval() {
        let start = Instant::now();
        let mut machine = holding(start, 100.0).await;
        let mut gateway = ScriptedGateway::with(vec![
            Err(TradeError::ExchangeRejected {
                status: 429,
                code: -1003,
                msg: "Too many requests".to_string(),
            }),
            fill(dec!(0.001), dec!(51)),
        ]);
        let blocked_at = start + secs(31);

        let outcome = machine
            .on_depth(&depth(101.0), &mut gateway, blocked_at)
            .await
            .unwrap();
        assert!(matches!(outcome, CycleOutcome::OrderBlocked { .. }));

        let outcome = machine
            .on_depth(&depth(102.0), &mut gateway, blocked_at + Duration::from_millis(400))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Cooldown {
                remaining: Duration::from_millis(600)
            }
        );
        assert_eq!(gateway.calls.len(), 1);

        let outcome = machine
            .on_depth(&depth(103.0), &mut gateway, blocked_at + secs(1))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            CycleOutcome::Sold {
                reason: ExitReason::ThresholdExit,
                ..
            }
        ));
        assert_eq!(gateway.calls.len(), 2);
        assert_eq!(machine.state(), PositionState::Empty);
        assert_eq!(machine.position().sell_blocked_at, None);
    }

    #[tokio::test]
    async fn dust_sell_returns_to_empty() {
        let start = Instant::now();
        let mut machine = holding(start, 100.0).await;
        let mut gateway = ScriptedGateway::with(vec![Err(TradeError::QuantityBelowStep {
            symbol: "BTCUSDT".to_string(),
            quantity: "0.001".to_string(),
        })]);

        let outcome = machine
            .on_depth(&depth(101.0), &mut gateway, start + secs(31))
            .await
            .unwrap();

        assert!(matches!(outcome, CycleOutcome::OrderBlocked { .. }));
        assert_eq!(machine.state(), PositionState::Empty);
    }

    #[tokio::test]
    async fn session_failure_propagates() {
        let start = Instant::now();
        let mut machine = TradingStateMachine::new(params(), start);
        let mut gateway = ScriptedGateway::with(vec![Err(TradeError::Session(
            SessionError::Connection("reset by peer".to_string()),
        ))]);

        let result = machine
            .on_depth(&depth(0.5), &mut gateway, start + secs(30))
            .await;

        assert!(matches!(result, Err(TradeError::Session(_))));
    }

    #[tokio::test]
    async fn empty_fill_restarts_cooldown() {
        let start = Instant::now();
        let mut machine = TradingStateMachine::new(params(), start);
        let mut gateway = ScriptedGateway::with(vec![fill(Decimal::ZERO, Decimal::ZERO)]);

        let outcome = machine
            .on_depth(&depth(0.5), &mut gateway, start + secs(30))
            .await
            .unwrap();

        assert!(matches!(outcome, CycleOutcome::OrderBlocked { .. }));
        assert_eq!(machine.state(), PositionState::Empty);
        assert_eq!(machine.position().last_exit_at, start + secs(30));
    }
}
