use thiserror::Error;

pub type SessionResult<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("depth stream failed: {0}")]
    Stream(#[source] tokio_tungstenite::tungstenite::Error),
    #[error("depth stream closed by peer{}", .0.as_ref().map(|info| format!(" ({info})")).unwrap_or_default())]
    StreamClosed(Option<CloseFrameInfo>),
    #[error("subscription rejected by exchange: {msg} (code: {code})")]
    SubscriptionRejected { code: i64, msg: String },
    #[error("no subscription acknowledgement within {frames} frames")]
    SubscriptionUnacknowledged { frames: usize },
    #[error("signing error: {0}")]
    Signing(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SessionError {
    pub(crate) fn connection(context: &str, err: impl std::fmt::Display) -> Self {
        SessionError::Connection(format!("{context}: {err}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrameInfo {
    pub code: u16,
    pub reason: String,
}

impl std::fmt::Display for CloseFrameInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "code {}: {}", self.code, self.reason)
    }
}

pub type TradeResult<T> = std::result::Result<T, TradeError>;

#[derive(Debug, Error)]
pub enum TradeError {
    #[error("no usable lot size for {symbol}")]
    UnknownLotSize { symbol: String },
    #[error("quantity {quantity} is below one lot step for {symbol}")]
    QuantityBelowStep { symbol: String, quantity: String },
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),
    #[error("malformed order response: {0}")]
    OrderParse(String),
    #[error("order rejected by exchange: {msg} (code: {code}, status: {status})")]
    ExchangeRejected { status: u16, code: i64, msg: String },
    #[error("malformed exchange info: {0}")]
    ExchangeInfo(String),
    #[error("malformed depth update: {0}")]
    Depth(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl TradeError {
    /// True for failures that only invalidate the order being placed; the
    /// session itself is still usable.
    pub fn is_order_scoped(&self) -> bool {
        matches!(
            self,
            TradeError::UnknownLotSize { .. }
                | TradeError::QuantityBelowStep { .. }
                | TradeError::InvalidQuantity(_)
                | TradeError::OrderParse(_)
                | TradeError::ExchangeRejected { .. }
        )
    }
}
