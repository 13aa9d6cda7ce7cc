pub mod audit;
pub mod depth;
pub mod errors;
pub mod exchange;
pub mod executor;
pub mod lot_size;
pub mod runtime;
pub mod strategy;
pub(crate) mod timings;
pub mod types;

pub use audit::{AuditSink, JsonArrayAuditLog, MemoryAuditLog};
pub use depth::{aggregate, DepthLevel, DepthSnapshot, ExecutablePrice};
pub use errors::{CloseFrameInfo, SessionError, SessionResult, TradeError, TradeResult};
pub use exchange::{
    Credentials, ExchangeSession, RawResponse, RestChannel, SessionConfig, StreamConfig,
    SubscriptionAck,
};
pub use executor::{OrderExecutor, OrderGateway, OrderResult};
pub use lot_size::{LotSizeRounder, QuantityRounding};
pub use runtime::{run, spawn_stop_watcher, Trader, TraderStats};
pub use strategy::{
    CycleOutcome, ExitReason, PositionState, TraderConfig, TradingPosition, TradingStateMachine,
};
pub use types::{Denomination, OrderSide, Symbol};
