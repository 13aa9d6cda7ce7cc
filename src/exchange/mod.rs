//! Exchange connectivity: the depth websocket plus one signed REST channel.

mod auth;
mod rest;
mod session;
mod stream;

use async_trait::async_trait;
pub use reqwest::Method;

pub use auth::{encode_query, Credentials};
pub use session::{ExchangeSession, SessionConfig};
pub use stream::{depth_channel, StreamConfig, SubscriptionAck};

use crate::errors::SessionResult;

/// Status and body of a REST call, returned whatever the HTTP status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Request/response channel to the exchange REST API.
///
/// `query` is an encoded query string (see [`encode_query`]); signed calls
/// append `timestamp` and `signature` to it verbatim.
#[async_trait]
pub trait RestChannel: Send + Sync {
    async fn signed_request(
        &self,
        method: Method,
        path: &str,
        query: &str,
    ) -> SessionResult<RawResponse>;

    async fn unsigned_request(
        &self,
        method: Method,
        path: &str,
        query: &str,
    ) -> SessionResult<RawResponse>;
}
