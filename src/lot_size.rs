//! Per-symbol `LOT_SIZE` table and quantity rounding.
//!
//! Rounding is done on [`Decimal`] so that the quantity sent to the exchange is
//! an exact multiple of the increment and never exceeds the requested amount.

use std::{collections::HashMap, str::FromStr};

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{
    errors::{TradeError, TradeResult},
    exchange::{Method, RestChannel},
    types::{Denomination, Symbol},
};

const EXCHANGE_INFO_PATH: &str = "/api/v3/exchangeInfo";

/// How a raw quantity is mapped onto the exchange's lot increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityRounding {
    /// Floor every quantity to a multiple of the lot step.
    #[default]
    LotStep,
    /// Floor quote quantities to multiples of `1 / step`; base quantities
    /// still use the lot step.
    InverseStep,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    filters: Vec<SymbolFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolFilter {
    filter_type: String,
    #[serde(default)]
    step_size: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LotSizeRounder {
    steps: HashMap<String, Decimal>,
}

impl LotSizeRounder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_table<I, S>(table: I) -> Self
    where
        I: IntoIterator<Item = (S, Decimal)>,
        S: Into<String>,
    {
        Self {
            steps: table
                .into_iter()
                .map(|(symbol, step)| (symbol.into(), step))
                .collect(),
        }
    }

    /// Reload the step table from `GET /api/v3/exchangeInfo`.
    ///
    /// The table is replaced only once the whole response parsed; on error the
    /// previous table stays in place.
    pub async fn refresh<C>(&mut self, channel: &C) -> TradeResult<usize>
    where
        C: RestChannel + ?Sized,
    {
        let response = channel
            .unsigned_request(Method::GET, EXCHANGE_INFO_PATH, "")
            .await?;
        if !response.is_success() {
            return Err(TradeError::ExchangeInfo(format!(
                "status {}: {}",
                response.status, response.body
            )));
        }
        self.steps = Self::parse_exchange_info(&response.body)?;
        tracing::info!(symbols = self.steps.len(), "lot sizes refreshed");
        Ok(self.steps.len())
    }

    /// Extract `symbol -> stepSize` from an exchange-info body. Symbols
    /// without a `LOT_SIZE` filter map to zero.
    pub fn parse_exchange_info(body: &str) -> TradeResult<HashMap<String, Decimal>> {
        let info: ExchangeInfo =
            serde_json::from_str(body).map_err(|err| TradeError::ExchangeInfo(err.to_string()))?;

        info.symbols
            .into_iter()
            .map(|entry| {
                let step = match entry
                    .filters
                    .iter()
                    .find(|filter| filter.filter_type == "LOT_SIZE")
                    .and_then(|filter| filter.step_size.as_deref())
                {
                    Some(raw) => Decimal::from_str(raw.trim()).map_err(|err| {
                        TradeError::ExchangeInfo(format!(
                            "invalid stepSize {raw:?} for {}: {err}",
                            entry.symbol
                        ))
                    })?,
                    None => Decimal::ZERO,
                };
                Ok((entry.symbol, step))
            })
            .collect()
    }

    pub fn step_size(&self, symbol: &Symbol) -> Option<Decimal> {
        self.steps.get(symbol.as_str()).copied()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Largest multiple of the symbol's lot step that does not exceed `raw`.
    pub fn round(&self, symbol: &Symbol, raw: Decimal) -> TradeResult<Decimal> {
        let step = self.usable_step(symbol)?;
        floor_to_increment(raw, step)
    }

    pub fn round_for(
        &self,
        symbol: &Symbol,
        raw: Decimal,
        denomination: Denomination,
        mode: QuantityRounding,
    ) -> TradeResult<Decimal> {
        let step = self.usable_step(symbol)?;
        let increment = match (mode, denomination) {
            (QuantityRounding::InverseStep, Denomination::Quote) => {
                Decimal::ONE.checked_div(step).ok_or_else(|| {
                    TradeError::InvalidQuantity(format!("inverse of lot step {step} overflows"))
                })?
            }
            _ => step,
        };
        floor_to_increment(raw, increment)
    }

    fn usable_step(&self, symbol: &Symbol) -> TradeResult<Decimal> {
        match self.step_size(symbol) {
            Some(step) if step > Decimal::ZERO => Ok(step),
            _ => Err(TradeError::UnknownLotSize {
                symbol: symbol.to_string(),
            }),
        }
    }
}

fn floor_to_increment(raw: Decimal, increment: Decimal) -> TradeResult<Decimal> {
    raw.checked_div(increment)
        .and_then(|units| units.floor().checked_mul(increment))
        .map(|value| value.normalize())
        .ok_or_else(|| {
            TradeError::InvalidQuantity(format!(
                "{raw} is out of range for an increment of {increment}"
            ))
        })
}
