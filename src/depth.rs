//! Depth ladder decoding and executable-price aggregation.
//!
//! This module provides:
//! - Decoding of raw `@depth` stream payloads into a [`DepthSnapshot`]
//! - Aggregation of a ladder into the executable price for a fixed target size

use serde::Deserialize;

use crate::errors::{TradeError, TradeResult};

/// Single price level of a ladder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthLevel {
    pub price: f64,
    pub quantity: f64,
}

impl DepthLevel {
    pub const fn new(price: f64, quantity: f64) -> Self {
        Self { price, quantity }
    }
}

/// Ask and bid ladders of one depth update, best price first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepthSnapshot {
    pub asks: Vec<DepthLevel>,
    pub bids: Vec<DepthLevel>,
}

#[derive(Debug, Deserialize)]
struct DepthUpdatePayload {
    #[serde(rename = "a")]
    asks: Vec<[String; 2]>,
    #[serde(rename = "b")]
    bids: Vec<[String; 2]>,
}

impl DepthSnapshot {
    pub fn new(asks: Vec<DepthLevel>, bids: Vec<DepthLevel>) -> Self {
        Self { asks, bids }
    }

    /// Decode a raw depth update (`{"a": [[price, qty], ...], "b": [...]}`).
    ///
    /// Other fields of the update (event time, update ids, symbol) are ignored.
    ///
    /// # Arguments
    /// * `payload` - Raw message bytes as received from the stream
    ///
    /// # Returns
    /// The decoded snapshot, or [`TradeError::Depth`] when the payload is not a
    /// depth update or a level does not hold two numeric strings
    pub fn from_slice(payload: &[u8]) -> TradeResult<Self> {
        let update: DepthUpdatePayload =
            serde_json::from_slice(payload).map_err(|err| TradeError::Depth(err.to_string()))?;
        Ok(Self {
            asks: parse_levels(&update.asks)?,
            bids: parse_levels(&update.bids)?,
        })
    }
}

fn parse_levels(raw: &[[String; 2]]) -> TradeResult<Vec<DepthLevel>> {
    raw.iter()
        .map(|[price, quantity]| {
            Ok(DepthLevel::new(
                parse_f64("price", price)?,
                parse_f64("quantity", quantity)?,
            ))
        })
        .collect()
}

fn parse_f64(label: &str, text: &str) -> TradeResult<f64> {
    text.trim()
        .parse::<f64>()
        .map_err(|err| TradeError::Depth(format!("invalid {label} {text:?}: {err}")))
}

/// Executable price of a fixed-size trade on each side of the book.
///
/// `buy_*` is accumulated from the asks, `sell_*` from the bids. Prices are
/// accumulated in reciprocal space (`consumed / price`), so they are volumes
/// expressed in the opposite unit of the target quantity.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExecutablePrice {
    pub buy_price: f64,
    pub buy_amount: f64,
    pub sell_price: f64,
    pub sell_amount: f64,
}

impl ExecutablePrice {
    /// Whether the bid side was deep enough to fill `target`.
    pub fn sell_side_filled(&self, target: f64) -> bool {
        self.sell_amount >= target
    }
}

/// Walk a ladder from the best level outward until `target` is accumulated
///
/// # Arguments
/// * `levels` - Ladder ordered best price first
/// * `target` - Quantity to accumulate
///
/// # Returns
/// `(price, amount)` where `amount <= target`; `amount < target` means the
/// ladder ran out before the target was reached
pub fn walk_ladder(levels: &[DepthLevel], target: f64) -> (f64, f64) {
    let mut price = 0.0;
    let mut amount = 0.0;
    for level in levels {
        let remaining = target - amount;
        if remaining <= 0.0 {
            break;
        }
        if !(level.price.is_finite() && level.price > 0.0) {
            continue;
        }
        let consumed = remaining.min(level.quantity.max(0.0));
        amount += consumed;
        price += consumed / level.price;
    }
    (price, amount)
}

/// Aggregate both ladders of a snapshot into an [`ExecutablePrice`]
///
/// # Arguments
/// * `snapshot` - Depth snapshot to read
/// * `target` - Trade size, must be positive
///
/// # Returns
/// Accumulated price and amount for the buy (asks) and sell (bids) sides
pub fn aggregate(snapshot: &DepthSnapshot, target: f64) -> ExecutablePrice {
    let (buy_price, buy_amount) = walk_ladder(&snapshot.asks, target);
    let (sell_price, sell_amount) = walk_ladder(&snapshot.bids, target);
    ExecutablePrice {
        buy_price,
        buy_amount,
        sell_price,
        sell_amount,
    }
}
