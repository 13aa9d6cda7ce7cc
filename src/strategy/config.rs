use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{
    exchange::{Credentials, SessionConfig, StreamConfig},
    lot_size::QuantityRounding,
    types::{Denomination, Symbol},
};

pub const USAGE: &str = "usage: arb <rest api host> <api key> <api secret> <symbol> <amount> \
<buy delay secs> <max sell delay secs> <activation threshold>\n       arb --config <file.toml>";

/// Number of positional arguments accepted by [`TraderConfig::from_args`].
pub const POSITIONAL_ARGS: usize = 8;

#[derive(Debug, Clone, Deserialize)]
pub struct TraderConfig {
    pub rest_host: String,
    #[serde(default = "default_stream_host")]
    pub stream_host: String,
    #[serde(default = "default_stream_path")]
    pub stream_path: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    pub symbol: Symbol,
    pub target_amount: f64,
    pub buy_delay_secs: u64,
    pub max_sell_delay_secs: u64,
    pub activation_threshold: f64,
    /// Minimum wait before a blocked sell is sent again.
    #[serde(default = "default_sell_retry_secs")]
    pub sell_retry_secs: u64,
    #[serde(default)]
    pub denomination: Denomination,
    #[serde(default)]
    pub rounding: QuantityRounding,
    #[serde(default)]
    pub fail_on_subscribe_error: bool,
    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: PathBuf,
}

fn default_stream_host() -> String {
    StreamConfig::default().host
}

fn default_stream_path() -> String {
    StreamConfig::default().path
}

fn default_sell_retry_secs() -> u64 {
    1
}

fn default_audit_log_path() -> PathBuf {
    PathBuf::from("log.json")
}

impl TraderConfig {
    /// Build from the eight positional command line arguments (program name
    /// excluded). Optional settings still honour `ARB_*` variables.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        anyhow::ensure!(
            args.len() == POSITIONAL_ARGS,
            "expected {POSITIONAL_ARGS} arguments, got {}\n{USAGE}",
            args.len()
        );
        let arg = |index: usize| args[index].as_ref().trim();

        let mut cfg = TraderConfig {
            rest_host: arg(0).to_string(),
            stream_host: default_stream_host(),
            stream_path: default_stream_path(),
            api_key: arg(1).to_string(),
            api_secret: arg(2).to_string(),
            symbol: Symbol::new(arg(3)),
            target_amount: arg(4)
                .parse()
                .with_context(|| format!("invalid amount {:?}", arg(4)))?,
            buy_delay_secs: arg(5)
                .parse()
                .with_context(|| format!("invalid buy delay {:?}", arg(5)))?,
            max_sell_delay_secs: arg(6)
                .parse()
                .with_context(|| format!("invalid max sell delay {:?}", arg(6)))?,
            activation_threshold: arg(7)
                .parse()
                .with_context(|| format!("invalid activation threshold {:?}", arg(7)))?,
            sell_retry_secs: default_sell_retry_secs(),
            denomination: Denomination::default(),
            rounding: QuantityRounding::default(),
            fail_on_subscribe_error: false,
            audit_log_path: default_audit_log_path(),
        };
        cfg.apply_optional_overrides(env_lookup);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut cfg = Self::from_toml_str(&data)?;
        cfg.apply_overrides(env_lookup);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document holding either a `[trader]` table or top-level keys.
    pub fn from_toml_str(data: &str) -> Result<Self> {
        let raw: toml::Value =
            toml::from_str(data).with_context(|| "Failed to parse TOML config")?;
        let nested = raw.get("trader").cloned();
        nested
            .unwrap_or(raw)
            .try_into()
            .with_context(|| "Invalid trader config structure")
    }

    /// Apply every `ARB_*` override found through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        override_string(&lookup, "ARB_REST_HOST", &mut self.rest_host);
        override_string(&lookup, "ARB_API_KEY", &mut self.api_key);
        override_string(&lookup, "ARB_API_SECRET", &mut self.api_secret);
        if let Some(value) = lookup("ARB_SYMBOL") {
            self.symbol = Symbol::new(value);
        }
        override_parsed(&lookup, "ARB_TARGET_AMOUNT", &mut self.target_amount);
        override_parsed(&lookup, "ARB_BUY_DELAY_SECS", &mut self.buy_delay_secs);
        override_parsed(
            &lookup,
            "ARB_MAX_SELL_DELAY_SECS",
            &mut self.max_sell_delay_secs,
        );
        override_parsed(
            &lookup,
            "ARB_ACTIVATION_THRESHOLD",
            &mut self.activation_threshold,
        );
        self.apply_optional_overrides(lookup);
    }

    fn apply_optional_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        override_string(&lookup, "ARB_STREAM_HOST", &mut self.stream_host);
        override_string(&lookup, "ARB_STREAM_PATH", &mut self.stream_path);
        override_parsed(&lookup, "ARB_SELL_RETRY_SECS", &mut self.sell_retry_secs);
        override_parsed(
            &lookup,
            "ARB_FAIL_ON_SUBSCRIBE_ERROR",
            &mut self.fail_on_subscribe_error,
        );
        if let Some(value) = lookup("ARB_AUDIT_LOG_PATH") {
            self.audit_log_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("ARB_DENOMINATION") {
            match value.trim().to_ascii_lowercase().as_str() {
                "quote" => self.denomination = Denomination::Quote,
                "base" => self.denomination = Denomination::Base,
                other => tracing::warn!(value = other, "ignoring unknown ARB_DENOMINATION"),
            }
        }
        if let Some(value) = lookup("ARB_ROUNDING") {
            match value.trim().to_ascii_lowercase().as_str() {
                "lot_step" => self.rounding = QuantityRounding::LotStep,
                "inverse_step" => self.rounding = QuantityRounding::InverseStep,
                other => tracing::warn!(value = other, "ignoring unknown ARB_ROUNDING"),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.rest_host.is_empty(), "rest_host must not be empty");
        anyhow::ensure!(!self.stream_host.is_empty(), "stream_host must not be empty");
        anyhow::ensure!(
            self.stream_path.starts_with('/'),
            "stream_path must start with '/'"
        );
        anyhow::ensure!(
            !self.api_key.is_empty() && !self.api_secret.is_empty(),
            "api_key and api_secret are required"
        );
        anyhow::ensure!(
            !self.symbol.as_str().is_empty()
                && self.symbol.as_str().chars().all(|c| c.is_ascii_alphanumeric()),
            "symbol must be a non-empty alphanumeric pair such as BTCUSDT"
        );
        anyhow::ensure!(
            self.target_amount.is_finite() && self.target_amount > 0.0,
            "target_amount must be positive"
        );
        anyhow::ensure!(
            self.activation_threshold.is_finite() && self.activation_threshold >= 0.0,
            "activation_threshold must be non-negative"
        );
        Ok(())
    }

    pub fn buy_delay(&self) -> Duration {
        Duration::from_secs(self.buy_delay_secs)
    }

    pub fn max_sell_delay(&self) -> Duration {
        Duration::from_secs(self.max_sell_delay_secs)
    }

    pub fn sell_retry_delay(&self) -> Duration {
        Duration::from_secs(self.sell_retry_secs)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.api_key.clone(), self.api_secret.clone())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            rest_host: self.rest_host.clone(),
            stream: StreamConfig {
                host: self.stream_host.clone(),
                path: self.stream_path.clone(),
            },
            credentials: self.credentials(),
        }
    }
}

fn env_lookup(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn override_string<F>(lookup: &F, key: &str, field: &mut String)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(key) {
        *field = value;
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, field: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(value) = lookup(key) {
        match value.trim().parse::<T>() {
            Ok(parsed) => *field = parsed,
            Err(_) => tracing::warn!(key, value = %value, "ignoring unparsable override"),
        }
    }
}
