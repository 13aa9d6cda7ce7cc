use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    Empty,
    Holding,
}

/// Held base amount plus the reference prices the exit rule compares.
#[derive(Clone, Debug, PartialEq)]
pub struct TradingPosition {
    pub held_amount: f64,
    pub buy_timestamp: Option<Instant>,
    /// Start of the current buy cool-down: process start or the last exit.
    pub last_exit_at: Instant,
    pub previous_price: f64,
    pub current_price: f64,
    pub sample_count: u64,
    /// Time of the last blocked sell while holding.
    pub sell_blocked_at: Option<Instant>,
}

impl TradingPosition {
    pub fn new(start: Instant) -> Self {
        Self {
            held_amount: 0.0,
            buy_timestamp: None,
            last_exit_at: start,
            previous_price: 0.0,
            current_price: 0.0,
            sample_count: 0,
            sell_blocked_at: None,
        }
    }

    pub fn state(&self) -> PositionState {
        if self.held_amount > 0.0 {
            PositionState::Holding
        } else {
            PositionState::Empty
        }
    }

    pub fn record_price(&mut self, price: f64) {
        self.previous_price = self.current_price;
        self.current_price = price;
        self.sample_count += 1;
    }

    /// Relative move between the last two samples; zero until two exist.
    pub fn price_change(&self) -> f64 {
        if self.sample_count < 2 || self.previous_price <= 0.0 {
            return 0.0;
        }
        self.current_price / self.previous_price - 1.0
    }

    pub fn open(&mut self, amount: f64, now: Instant) {
        self.held_amount = amount.max(0.0);
        self.buy_timestamp = Some(now);
        self.sell_blocked_at = None;
    }

    pub fn close(&mut self, now: Instant) {
        self.held_amount = 0.0;
        self.buy_timestamp = None;
        self.sell_blocked_at = None;
        self.last_exit_at = now;
    }

    pub fn restart_cooldown(&mut self, now: Instant) {
        self.last_exit_at = now;
    }

    pub fn block_sell(&mut self, now: Instant) {
        self.sell_blocked_at = Some(now);
    }

    /// Time left before a blocked sell may be retried, if any.
    pub fn sell_retry_remaining(&self, now: Instant, retry_delay: Duration) -> Option<Duration> {
        let blocked = self.sell_blocked_at?;
        retry_delay
            .checked_sub(now.saturating_duration_since(blocked))
            .filter(|remaining| !remaining.is_zero())
    }

    pub fn since_exit(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_exit_at)
    }

    pub fn held_for(&self, now: Instant) -> Duration {
        self.buy_timestamp
            .map(|bought| now.saturating_duration_since(bought))
            .unwrap_or_default()
    }
}
