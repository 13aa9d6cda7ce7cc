use async_trait::async_trait;
use reqwest::Method;

use super::{
    auth::Credentials,
    rest::RestClient,
    stream::{DepthStream, StreamConfig, SubscriptionAck},
    RawResponse, RestChannel,
};
use crate::{errors::SessionResult, types::Symbol};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub rest_host: String,
    pub stream: StreamConfig,
    pub credentials: Credentials,
}

/// Live connection pair to the exchange: the depth stream and the REST channel.
///
/// Both transports are opened by [`ExchangeSession::connect`] and released by
/// [`ExchangeSession::close`]. The session is driven from a single task.
#[derive(Debug)]
pub struct ExchangeSession {
    stream: DepthStream,
    rest: RestClient,
    credentials: Credentials,
}

impl ExchangeSession {
    pub async fn connect(config: SessionConfig) -> SessionResult<Self> {
        let rest = RestClient::new(&config.rest_host)?;
        rest.warm_up().await?;
        tracing::info!(rest = %rest.base_url(), "rest channel ready");

        let stream = DepthStream::connect(&config.stream).await?;
        tracing::info!(stream = %stream.url(), "depth stream ready");

        Ok(Self {
            stream,
            rest,
            credentials: config.credentials,
        })
    }

    pub async fn subscribe_depth(&mut self, symbol: &Symbol) -> SessionResult<SubscriptionAck> {
        let ack = self.stream.subscribe_depth(symbol).await?;
        match &ack {
            SubscriptionAck::Accepted => tracing::info!(%symbol, "depth subscription accepted"),
            SubscriptionAck::Rejected { code, msg } => {
                tracing::warn!(%symbol, code, msg = %msg, "depth subscription rejected")
            }
        }
        Ok(ack)
    }

    pub async fn read_depth_message(&mut self) -> SessionResult<Vec<u8>> {
        self.stream.next_payload().await
    }

    pub async fn signed_request(
        &self,
        method: Method,
        path: &str,
        query: &str,
    ) -> SessionResult<RawResponse> {
        self.rest
            .signed(&self.credentials, method, path, query)
            .await
    }

    pub async fn unsigned_request(
        &self,
        method: Method,
        path: &str,
        query: &str,
    ) -> SessionResult<RawResponse> {
        self.rest.unsigned(method, path, query).await
    }

    /// Close the websocket handshake; the REST connection is released on drop.
    pub async fn close(self) -> SessionResult<()> {
        let Self { stream, rest, .. } = self;
        let result = stream.close().await;
        drop(rest);
        tracing::info!("exchange session closed");
        result
    }
}

#[async_trait]
impl RestChannel for ExchangeSession {
    async fn signed_request(
        &self,
        method: Method,
        path: &str,
        query: &str,
    ) -> SessionResult<RawResponse> {
        ExchangeSession::signed_request(self, method, path, query).await
    }

    async fn unsigned_request(
        &self,
        method: Method,
        path: &str,
        query: &str,
    ) -> SessionResult<RawResponse> {
        ExchangeSession::unsigned_request(self, method, path, query).await
    }
}
