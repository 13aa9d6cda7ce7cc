use std::{collections::VecDeque, time::Duration};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};
use url::Url;

use crate::{
    errors::{CloseFrameInfo, SessionError, SessionResult},
    types::Symbol,
};

const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
// About six seconds of 100ms depth updates.
const MAX_PRE_ACK_FRAMES: usize = 64;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub host: String,
    pub path: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: "stream.binance.com:9443".to_string(),
            path: "/ws".to_string(),
        }
    }
}

/// Exchange reply to a `SUBSCRIBE` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionAck {
    Accepted,
    Rejected { code: i64, msg: String },
}

/// Depth stream connection. Owns the websocket; not shared between tasks.
#[derive(Debug)]
pub struct DepthStream {
    url: Url,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    // Data frames that arrived while waiting for a subscription ack.
    pending: VecDeque<Vec<u8>>,
    request_id: u64,
}

impl DepthStream {
    pub async fn connect(config: &StreamConfig) -> SessionResult<Self> {
        let url = build_url(config)?;
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| SessionError::connection("depth stream handshake", err))?;
        tracing::debug!(%url, "depth stream connected");
        Ok(Self {
            url,
            stream,
            pending: VecDeque::new(),
            request_id: 0,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Subscribe to the 100ms depth channel of `symbol` and wait for the ack.
    pub async fn subscribe_depth(&mut self, symbol: &Symbol) -> SessionResult<SubscriptionAck> {
        let id = self.request_id;
        self.request_id += 1;
        let payload = json!({
            "method": "SUBSCRIBE",
            "params": [depth_channel(symbol)],
            "id": id,
        })
        .to_string();
        self.stream
            .send(Message::Text(payload))
            .await
            .map_err(SessionError::Stream)?;

        loop {
            let frame = self.next_data_frame().await?;
            if let Some(ack) = hold_until_ack(&mut self.pending, frame)? {
                return Ok(ack);
            }
        }
    }

    /// Next raw text or binary payload. Control frames are handled here and
    /// never surface to the caller.
    pub async fn next_payload(&mut self) -> SessionResult<Vec<u8>> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(frame);
        }
        self.next_data_frame().await
    }

    async fn next_data_frame(&mut self) -> SessionResult<Vec<u8>> {
        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(err)) => return Err(SessionError::Stream(err)),
                None => return Err(SessionError::StreamClosed(None)),
            };
            match message {
                Message::Text(text) => return Ok(text.into_bytes()),
                Message::Binary(binary) => return Ok(binary),
                Message::Ping(payload) => {
                    tracing::trace!("depth stream ping");
                    self.stream
                        .send(Message::Pong(payload))
                        .await
                        .map_err(SessionError::Stream)?;
                }
                Message::Pong(_) | Message::Frame(_) => {}
                Message::Close(frame) => {
                    let info = frame.map(|frame| CloseFrameInfo {
                        code: u16::from(frame.code),
                        reason: frame.reason.into_owned(),
                    });
                    return Err(SessionError::StreamClosed(info));
                }
            }
        }
    }

    /// Run the closing handshake. Peers that drop the socket early are not an error.
    pub async fn close(mut self) -> SessionResult<()> {
        match self.stream.close(None).await {
            Ok(()) => {}
            Err(err) if is_benign_close(&err) => return Ok(()),
            Err(err) => return Err(SessionError::Stream(err)),
        }

        let drain = async {
            while let Some(message) = self.stream.next().await {
                match message {
                    Ok(_) => continue,
                    Err(err) if is_benign_close(&err) => break,
                    Err(err) => return Err(SessionError::Stream(err)),
                }
            }
            Ok::<(), SessionError>(())
        };
        match tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, drain).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!("peer did not complete close handshake");
                Ok(())
            }
        }
    }
}

pub fn depth_channel(symbol: &Symbol) -> String {
    format!("{}@depth@100ms", symbol.stream_name())
}

/// Classify a frame received while waiting for the ack. Anything else is
/// queued for `next_payload`, up to `MAX_PRE_ACK_FRAMES`.
fn hold_until_ack(
    pending: &mut VecDeque<Vec<u8>>,
    frame: Vec<u8>,
) -> SessionResult<Option<SubscriptionAck>> {
    if let Some(ack) = parse_subscription_reply(&frame) {
        return Ok(Some(ack));
    }
    if pending.len() >= MAX_PRE_ACK_FRAMES {
        return Err(SessionError::SubscriptionUnacknowledged {
            frames: pending.len() + 1,
        });
    }
    pending.push_back(frame);
    Ok(None)
}

fn parse_subscription_reply(frame: &[u8]) -> Option<SubscriptionAck> {
    let value: Value = serde_json::from_slice(frame).ok()?;
    let object = value.as_object()?;
    if object.contains_key("result") {
        return Some(SubscriptionAck::Accepted);
    }
    let error = object.get("error").unwrap_or(&value);
    let code = error.get("code")?.as_i64()?;
    let msg = error
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some(SubscriptionAck::Rejected { code, msg })
}

fn is_benign_close(err: &tungstenite::Error) -> bool {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => true,
        tungstenite::Error::Io(io) => matches!(
            io.kind(),
            std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe
        ),
        tungstenite::Error::Protocol(
            tungstenite::error::ProtocolError::ResetWithoutClosingHandshake,
        ) => true,
        _ => false,
    }
}

fn build_url(config: &StreamConfig) -> SessionResult<Url> {
    let mut candidate = config.host.clone();
    if candidate.starts_with("https://") {
        candidate = candidate.replacen("https://", "wss://", 1);
    } else if candidate.starts_with("http://") {
        candidate = candidate.replacen("http://", "ws://", 1);
    } else if !candidate.starts_with("ws://") && !candidate.starts_with("wss://") {
        candidate = format!("wss://{candidate}");
    }

    let mut url = Url::parse(&candidate)?;
    url.set_path(&config.path);
    Ok(url)
}
