use reqwest::{Client, Method};
use url::Url;

use super::{
    auth::{timestamp_ms, Credentials, API_KEY_HEADER},
    RawResponse,
};
use crate::errors::{SessionError, SessionResult};

const PING_PATH: &str = "/api/v3/ping";

/// Thin wrapper around a single keep-alive HTTPS connection to the REST host.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    base: Url,
}

impl RestClient {
    pub(crate) fn new(host: &str) -> SessionResult<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(1)
            .tcp_nodelay(true)
            .build()
            .map_err(|err| SessionError::connection("http client", err))?;
        Ok(Self {
            client,
            base: build_base_url(host)?,
        })
    }

    pub(crate) fn base_url(&self) -> &Url {
        &self.base
    }

    /// Open the connection with an unsigned ping so the first order does not
    /// pay for the TLS handshake.
    pub(crate) async fn warm_up(&self) -> SessionResult<()> {
        let response = self
            .unsigned(Method::GET, PING_PATH, "")
            .await
            .map_err(|err| SessionError::connection("rest warm-up", err))?;
        if !response.is_success() {
            return Err(SessionError::Connection(format!(
                "rest warm-up returned {}: {}",
                response.status, response.body
            )));
        }
        Ok(())
    }

    pub(crate) async fn unsigned(
        &self,
        method: Method,
        path: &str,
        query: &str,
    ) -> SessionResult<RawResponse> {
        let url = self.endpoint(path, query)?;
        tracing::debug!(%method, path, "rest request");
        let response = self.client.request(method, url).send().await?;
        read_response(response).await
    }

    pub(crate) async fn signed(
        &self,
        credentials: &Credentials,
        method: Method,
        path: &str,
        query: &str,
    ) -> SessionResult<RawResponse> {
        let signed_query = credentials.signed_query(query, timestamp_ms())?;
        let url = self.endpoint(path, &signed_query)?;
        tracing::debug!(%method, path, "signed rest request");
        let response = self
            .client
            .request(method, url)
            .header(API_KEY_HEADER, credentials.api_key())
            .send()
            .await?;
        read_response(response).await
    }

    fn endpoint(&self, path: &str, query: &str) -> SessionResult<Url> {
        let mut url = self.base.join(path)?;
        if !query.is_empty() {
            url.set_query(Some(query));
        }
        Ok(url)
    }
}

async fn read_response(response: reqwest::Response) -> SessionResult<RawResponse> {
    let status = response.status().as_u16();
    let body = response.text().await?;
    Ok(RawResponse { status, body })
}

fn build_base_url(host: &str) -> SessionResult<Url> {
    let candidate = if host.starts_with("https://") || host.starts_with("http://") {
        host.to_string()
    } else {
        format!("https://{host}")
    };
    Ok(Url::parse(&candidate)?)
}
