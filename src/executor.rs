//! Market order placement.
//!
//! Handles:
//! - Rounding the requested quantity onto the symbol's lot increment
//! - Building and sending the signed `POST /api/v3/order` request
//! - Recording the raw response and parsing the fill summary
//!
//! Every raw response reaches the audit sink before it is parsed, including
//! rejections.

use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    audit::AuditSink,
    errors::{TradeError, TradeResult},
    exchange::{encode_query, Method, RawResponse, RestChannel},
    lot_size::{LotSizeRounder, QuantityRounding},
    timings::time_async_block,
    types::{Denomination, OrderSide, Symbol},
};

pub const ORDER_PATH: &str = "/api/v3/order";

/// Fill summary of a market order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderResult {
    pub requested_quantity: Decimal,
    pub executed_quantity: Decimal,
    pub cumulative_quote_quantity: Decimal,
    pub raw: String,
}

impl OrderResult {
    pub fn executed_base(&self) -> f64 {
        self.executed_quantity.to_f64().unwrap_or(0.0)
    }

    pub fn executed_quote(&self) -> f64 {
        self.cumulative_quote_quantity.to_f64().unwrap_or(0.0)
    }
}

/// Something that can place a market order for the traded symbol.
#[async_trait]
pub trait OrderGateway: Send {
    async fn place_market_order(
        &mut self,
        side: OrderSide,
        quantity: f64,
        denomination: Denomination,
    ) -> TradeResult<OrderResult>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderFill {
    orig_qty: String,
    executed_qty: String,
    cummulative_quote_qty: String,
}

pub struct OrderExecutor {
    symbol: Symbol,
    rounding: QuantityRounding,
    lot_sizes: LotSizeRounder,
    audit: Box<dyn AuditSink>,
}

impl OrderExecutor {
    pub fn new(
        symbol: Symbol,
        rounding: QuantityRounding,
        lot_sizes: LotSizeRounder,
        audit: Box<dyn AuditSink>,
    ) -> Self {
        Self {
            symbol,
            rounding,
            lot_sizes,
            audit,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn lot_sizes(&self) -> &LotSizeRounder {
        &self.lot_sizes
    }

    pub async fn refresh_lot_sizes<C>(&mut self, channel: &C) -> TradeResult<usize>
    where
        C: RestChannel + ?Sized,
    {
        self.lot_sizes.refresh(channel).await
    }

    /// Convert and round `quantity` to what will actually be sent.
    pub fn prepare_quantity(
        &self,
        quantity: f64,
        denomination: Denomination,
    ) -> TradeResult<Decimal> {
        let raw = decimal_from_f64(quantity)?;
        let rounded = self
            .lot_sizes
            .round_for(&self.symbol, raw, denomination, self.rounding)?;
        if rounded <= Decimal::ZERO {
            return Err(TradeError::QuantityBelowStep {
                symbol: self.symbol.to_string(),
                quantity: raw.normalize().to_string(),
            });
        }
        Ok(rounded)
    }

    /// Round, sign and send a market order, then parse the fill.
    ///
    /// # Arguments
    /// * `channel` - REST channel the signed request goes through
    /// * `side` - Buy or sell
    /// * `quantity` - Unrounded amount, in `denomination` units
    /// * `denomination` - Whether `quantity` is quote (`quoteOrderQty`) or base (`quantity`)
    ///
    /// # Returns
    /// The parsed fill, or an order-scoped [`TradeError`] when the order could
    /// not be placed; session failures are passed through
    pub async fn place_market_order<C>(
        &mut self,
        channel: &C,
        side: OrderSide,
        quantity: f64,
        denomination: Denomination,
    ) -> TradeResult<OrderResult>
    where
        C: RestChannel + ?Sized,
    {
        let rounded = self.prepare_quantity(quantity, denomination)?;
        let query = market_order_query(&self.symbol, side, denomination, rounded);
        info!(
            symbol = %self.symbol,
            %side,
            quantity = %rounded,
            %denomination,
            "placing market order"
        );

        let response = time_async_block(
            "market_order",
            channel.signed_request(Method::POST, ORDER_PATH, &query),
        )
        .await?;
        self.audit.record(&response.body);

        match parse_order_response(&response) {
            Ok(result) => {
                info!(
                    symbol = %self.symbol,
                    %side,
                    requested = %result.requested_quantity,
                    executed = %result.executed_quantity,
                    quote = %result.cumulative_quote_quantity,
                    "market order filled"
                );
                Ok(result)
            }
            Err(err) => {
                warn!(symbol = %self.symbol, %side, error = %err, "market order failed");
                Err(err)
            }
        }
    }

    /// Bind the executor to a channel for use as an [`OrderGateway`].
    pub fn route<'a, C>(&'a mut self, channel: &'a C) -> ChannelGateway<'a, C>
    where
        C: RestChannel + ?Sized,
    {
        ChannelGateway {
            executor: self,
            channel,
        }
    }

    pub fn finish_audit(&mut self) {
        self.audit.finish();
    }
}

/// [`OrderExecutor`] paired with the channel it sends through.
pub struct ChannelGateway<'a, C: ?Sized> {
    executor: &'a mut OrderExecutor,
    channel: &'a C,
}

#[async_trait]
impl<C> OrderGateway for ChannelGateway<'_, C>
where
    C: RestChannel + ?Sized,
{
    async fn place_market_order(
        &mut self,
        side: OrderSide,
        quantity: f64,
        denomination: Denomination,
    ) -> TradeResult<OrderResult> {
        self.executor
            .place_market_order(self.channel, side, quantity, denomination)
            .await
    }
}

/// `type=MARKET&symbol=..&side=..&(quoteOrderQty|quantity)=..`
pub fn market_order_query(
    symbol: &Symbol,
    side: OrderSide,
    denomination: Denomination,
    quantity: Decimal,
) -> String {
    let quantity = quantity.normalize().to_string();
    encode_query(&[
        ("type", "MARKET"),
        ("symbol", symbol.as_str()),
        ("side", side.as_str()),
        (denomination.query_key(), quantity.as_str()),
    ])
}

/// Classify an order response body.
///
/// `{"code":..,"msg":..}` is an exchange rejection; anything else must carry
/// `origQty`, `executedQty` and `cummulativeQuoteQty`.
pub fn parse_order_response(response: &RawResponse) -> TradeResult<OrderResult> {
    let value: Value = serde_json::from_str(&response.body).map_err(|err| {
        TradeError::OrderParse(format!("status {}: {err}", response.status))
    })?;

    if let (Some(code), Some(msg)) = (
        value.get("code").and_then(Value::as_i64),
        value.get("msg").and_then(Value::as_str),
    ) {
        return Err(TradeError::ExchangeRejected {
            status: response.status,
            code,
            msg: msg.to_string(),
        });
    }
    if !response.is_success() {
        return Err(TradeError::OrderParse(format!(
            "status {} without error code",
            response.status
        )));
    }

    let fill: OrderFill = serde_json::from_value(value)
        .map_err(|err| TradeError::OrderParse(err.to_string()))?;
    debug!(?fill, "order response decoded");
    Ok(OrderResult {
        requested_quantity: parse_decimal("origQty", &fill.orig_qty)?,
        executed_quantity: parse_decimal("executedQty", &fill.executed_qty)?,
        cumulative_quote_quantity: parse_decimal(
            "cummulativeQuoteQty",
            &fill.cummulative_quote_qty,
        )?,
        raw: response.body.clone(),
    })
}

fn parse_decimal(field: &str, text: &str) -> TradeResult<Decimal> {
    Decimal::from_str(text.trim())
        .map_err(|err| TradeError::OrderParse(format!("invalid {field} {text:?}: {err}")))
}

// Goes through the shortest round-trip text so 0.3 stays 0.3.
fn decimal_from_f64(value: f64) -> TradeResult<Decimal> {
    if !value.is_finite() || value <= 0.0 {
        return Err(TradeError::InvalidQuantity(value.to_string()));
    }
    Decimal::from_str(&value.to_string())
        .map_err(|err| TradeError::InvalidQuantity(format!("{value}: {err}")))
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use rust_decimal_macros::dec;

    use super::*;
    use crate::{audit::MemoryAuditLog, errors::SessionResult};

    const FILLED: &str = r#"{
        "symbol": "BTCUSDT",
        "orderId": 28,
        "clientOrderId": "6gCrw2kRUAF9CvJDGP16IP",
        "transactTime": 1507725176595,
        "price": "0.00000000",
        "origQty": "0.00150000",
        "executedQty": "0.00150000",
        "cummulativeQuoteQty": "52.33050000",
        "status": "FILLED",
        "type": "MARKET",
        "side": "BUY"
    }"#;

    #[derive(Default)]
    struct RecordingChannel {
        responses: Mutex<VecDeque<RawResponse>>,
        requests: Mutex<Vec<(Method, String, String)>>,
    }

    impl RecordingChannel {
        fn replying(status: u16, body: &str) -> Self {
            let channel = Self::default();
            channel.responses.lock().unwrap().push_back(RawResponse {
                status,
                body: body.to_string(),
            });
            channel
        }

        fn requests(&self) -> Vec<(Method, String, String)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RestChannel for RecordingChannel {
        async fn signed_request(
            &self,
            method: Method,
            path: &str,
            query: &str,
        ) -> SessionResult<RawResponse> {
            self.requests
                .lock()
                .unwrap()
                .push((method, path.to_string(), query.to_string()));
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected request"))
        }

        async fn unsigned_request(
            &self,
            _method: Method,
            _path: &str,
            _query: &str,
        ) -> SessionResult<RawResponse> {
            unreachable!("orders are signed")
        }
    }

    struct SharedAudit(Arc<Mutex<MemoryAuditLog>>);

    impl AuditSink for SharedAudit {
        fn record(&mut self, raw: &str) {
            self.0.lock().unwrap().record(raw);
        }

        fn finish(&mut self) {
            self.0.lock().unwrap().finish();
        }
    }

    fn executor(rounding: QuantityRounding) -> (OrderExecutor, Arc<Mutex<MemoryAuditLog>>) {
        let audit = Arc::new(Mutex::new(MemoryAuditLog::default()));
        let executor = OrderExecutor::new(
            Symbol::new("BTCUSDT"),
            rounding,
            LotSizeRounder::from_table([("BTCUSDT", dec!(0.00001))]),
            Box::new(SharedAudit(audit.clone())),
        );
        (executor, audit)
    }

    #[test]
    fn test_market_order_query_layout() {
        let symbol = Symbol::new("BTCUSDT");
        assert_eq!(
            market_order_query(&symbol, OrderSide::Buy, Denomination::Quote, dec!(10.50)),
            "type=MARKET&symbol=BTCUSDT&side=BUY&quoteOrderQty=10.5"
        );
        assert_eq!(
            market_order_query(&symbol, OrderSide::Sell, Denomination::Base, dec!(0.00150000)),
            "type=MARKET&symbol=BTCUSDT&side=SELL&quantity=0.0015"
        );
    }

    #[test]
    fn test_parse_filled_order() {
        let result = parse_order_response(&RawResponse {
            status: 200,
            body: FILLED.to_string(),
        })
        .unwrap();
        assert_eq!(result.requested_quantity, dec!(0.0015));
        assert_eq!(result.executed_quantity, dec!(0.0015));
        assert_eq!(result.cumulative_quote_quantity, dec!(52.3305));
        assert!((result.executed_base() - 0.0015).abs() < 1e-12);
    }

    #[test]
    fn test_parse_exchange_rejection() {
        let err = parse_order_response(&RawResponse {
            status: 400,
            body: r#"{"code":-2010,"msg":"Account has insufficient balance for requested action."}"#
                .to_string(),
        })
        .unwrap_err();
        match err {
            TradeError::ExchangeRejected { status, code, msg } => {
                assert_eq!(status, 400);
                assert_eq!(code, -2010);
                assert!(msg.contains("insufficient balance"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_parse_incomplete_or_garbled_body() {
        let missing = parse_order_response(&RawResponse {
            status: 200,
            body: r#"{"symbol":"BTCUSDT","origQty":"1"}"#.to_string(),
        });
        assert!(matches!(missing, Err(TradeError::OrderParse(_))));

        let html = parse_order_response(&RawResponse {
            status: 502,
            body: "<html>Bad Gateway</html>".to_string(),
        });
        assert!(matches!(html, Err(TradeError::OrderParse(_))));

        let bad_number = parse_order_response(&RawResponse {
            status: 200,
            body: r#"{"origQty":"1","executedQty":"x","cummulativeQuoteQty":"1"}"#.to_string(),
        });
        assert!(matches!(bad_number, Err(TradeError::OrderParse(_))));
    }

    #[tokio::test]
    async fn test_place_market_order_rounds_signs_and_audits() {
        let (mut executor, audit) = executor(QuantityRounding::LotStep);
        let channel = RecordingChannel::replying(200, FILLED);

        let result = executor
            .place_market_order(&channel, OrderSide::Sell, 0.001_509_9, Denomination::Base)
            .await
            .unwrap();

        assert_eq!(result.executed_quantity, dec!(0.0015));
        let requests = channel.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, Method::POST);
        assert_eq!(requests[0].1, ORDER_PATH);
        assert_eq!(
            requests[0].2,
            "type=MARKET&symbol=BTCUSDT&side=SELL&quantity=0.0015"
        );
        assert_eq!(audit.lock().unwrap().entries, vec![FILLED.to_string()]);
    }

    #[tokio::test]
    async fn test_rejection_is_still_audited() {
        let (mut executor, audit) = executor(QuantityRounding::LotStep);
        let rejection = r#"{"code":-1013,"msg":"Filter failure: NOTIONAL"}"#;
        let channel = RecordingChannel::replying(400, rejection);

        let mut gateway = executor.route(&channel);
        let err = gateway
            .place_market_order(OrderSide::Buy, 5.0, Denomination::Quote)
            .await
            .unwrap_err();

        assert!(err.is_order_scoped());
        assert_eq!(channel.requests()[0].2, "type=MARKET&symbol=BTCUSDT&side=BUY&quoteOrderQty=5");
        assert_eq!(audit.lock().unwrap().entries, vec![rejection.to_string()]);
    }

    #[tokio::test]
    async fn test_quantity_below_step_sends_nothing() {
        let (mut executor, audit) = executor(QuantityRounding::LotStep);
        let channel = RecordingChannel::default();

        let err = executor
            .place_market_order(&channel, OrderSide::Sell, 0.000_009, Denomination::Base)
            .await
            .unwrap_err();

        assert!(matches!(err, TradeError::QuantityBelowStep { .. }));
        assert!(channel.requests().is_empty());
        assert!(audit.lock().unwrap().entries.is_empty());
    }

    #[tokio::test]
    async fn test_inverse_step_quote_rounding() {
        let (mut executor, _audit) = executor(QuantityRounding::InverseStep);
        let channel = RecordingChannel::replying(200, FILLED);

        executor
            .place_market_order(&channel, OrderSide::Buy, 250_000.0, Denomination::Quote)
            .await
            .unwrap();

        assert_eq!(
            channel.requests()[0].2,
            "type=MARKET&symbol=BTCUSDT&side=BUY&quoteOrderQty=200000"
        );
    }

    #[test]
    fn test_invalid_quantities() {
        let (executor, _audit) = executor(QuantityRounding::LotStep);
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                executor.prepare_quantity(bad, Denomination::Base),
                Err(TradeError::InvalidQuantity(_))
            ));
        }
        assert_eq!(
            executor.prepare_quantity(0.3, Denomination::Base).unwrap(),
            dec!(0.3)
        );
    }

    #[tokio::test]
    async fn test_quantity_out_of_decimal_range_blocks_order() {
        let (mut executor, audit) = executor(QuantityRounding::LotStep);
        let channel = RecordingChannel::default();

        for huge in [1e24, 1e30] {
            let err = executor
                .place_market_order(&channel, OrderSide::Buy, huge, Denomination::Base)
                .await
                .unwrap_err();
            assert!(matches!(err, TradeError::InvalidQuantity(_)), "{huge}: {err:?}");
            assert!(err.is_order_scoped());
        }
        assert!(channel.requests().is_empty());
        assert!(audit.lock().unwrap().entries.is_empty());
    }

    #[test]
    fn test_unknown_symbol_blocks_order() {
        let executor = OrderExecutor::new(
            Symbol::new("ETHUSDT"),
            QuantityRounding::LotStep,
            LotSizeRounder::from_table([("BTCUSDT", dec!(0.00001))]),
            Box::new(MemoryAuditLog::default()),
        );
        assert!(matches!(
            executor.prepare_quantity(1.0, Denomination::Base),
            Err(TradeError::UnknownLotSize { .. })
        ));
    }
}
