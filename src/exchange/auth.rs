use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::form_urlencoded;

use crate::errors::{SessionError, SessionResult};

type HmacSha256 = Hmac<Sha256>;

pub(crate) const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// API key pair used for signed endpoints. Immutable once the session is built.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn is_complete(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }

    /// Lower-case hex HMAC-SHA256 of `payload` keyed with the API secret.
    pub fn sign(&self, payload: &str) -> SessionResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|err| SessionError::Signing(err.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Append `timestamp` and `signature` to an already encoded query string.
    ///
    /// The signature covers `query&timestamp=<ms>` byte for byte; the returned
    /// string must be transmitted unchanged.
    pub fn signed_query(&self, query: &str, timestamp_ms: i64) -> SessionResult<String> {
        if !self.is_complete() {
            return Err(SessionError::Signing(
                "api key or api secret is missing".to_string(),
            ));
        }
        let mut payload = String::with_capacity(query.len() + 96);
        payload.push_str(query);
        if !payload.is_empty() {
            payload.push('&');
        }
        payload.push_str("timestamp=");
        payload.push_str(&timestamp_ms.to_string());

        let signature = self.sign(&payload)?;
        payload.push_str("&signature=");
        payload.push_str(&signature);
        Ok(payload)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Encode `(key, value)` pairs into a query string, preserving their order.
pub fn encode_query(params: &[(&str, &str)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

pub(crate) fn timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Example key pair published in the exchange's API documentation.
    const DOC_SECRET: &str = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
    const DOC_QUERY: &str = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";

    #[test]
    fn test_signature_matches_documented_vector() {
        let creds = Credentials::new("key", DOC_SECRET);
        assert_eq!(
            creds.sign(DOC_QUERY).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_signature_is_deterministic_and_byte_sensitive() {
        let creds = Credentials::new("key", "secret");
        let a = creds.sign("type=MARKET&symbol=BTCUSDT").unwrap();
        let b = creds.sign("type=MARKET&symbol=BTCUSDT").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        let changed = creds.sign("type=MARKET&symbol=BTCUSDU").unwrap();
        assert_ne!(a, changed);
        let reordered = creds.sign("symbol=BTCUSDT&type=MARKET").unwrap();
        assert_ne!(a, reordered);
    }

    #[test]
    fn test_signed_query_signs_exact_prefix() {
        let creds = Credentials::new("key", "secret");
        let signed = creds
            .signed_query("type=MARKET&symbol=BTCUSDT", 1_700_000_000_123)
            .unwrap();

        let (payload, signature) = signed.rsplit_once("&signature=").unwrap();
        assert_eq!(
            payload,
            "type=MARKET&symbol=BTCUSDT&timestamp=1700000000123"
        );
        assert_eq!(signature, creds.sign(payload).unwrap());
    }

    #[test]
    fn test_signed_query_without_params() {
        let creds = Credentials::new("key", "secret");
        let signed = creds.signed_query("", 42).unwrap();
        assert!(signed.starts_with("timestamp=42&signature="));
    }

    #[test]
    fn test_signing_requires_complete_credentials() {
        let creds = Credentials::new("", "secret");
        assert!(matches!(
            creds.signed_query("a=b", 1),
            Err(SessionError::Signing(_))
        ));
    }

    #[test]
    fn test_encode_query_preserves_order() {
        let query = encode_query(&[("type", "MARKET"), ("symbol", "BTCUSDT"), ("quantity", "0.0015")]);
        assert_eq!(query, "type=MARKET&symbol=BTCUSDT&quantity=0.0015");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = Credentials::new("public-key", "very-secret");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("public-key"));
        assert!(!rendered.contains("very-secret"));
    }
}
