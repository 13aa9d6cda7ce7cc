use std::fmt;

use serde::Deserialize;

/// Exchange symbol such as `BTCUSDT`, stored in the exchange's upper-case form.
#[repr(transparent)]
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(from = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stream names are addressed in lower case (`btcusdt@depth@100ms`).
    pub fn stream_name(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Order side representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub const fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit a market order quantity is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Denomination {
    /// Quote currency (`quoteOrderQty`), e.g. USDT for `BTCUSDT`.
    #[default]
    Quote,
    /// Base asset (`quantity`), e.g. BTC for `BTCUSDT`.
    Base,
}

impl Denomination {
    pub const fn query_key(self) -> &'static str {
        match self {
            Denomination::Quote => "quoteOrderQty",
            Denomination::Base => "quantity",
        }
    }
}

impl fmt::Display for Denomination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denomination::Quote => write!(f, "quote"),
            Denomination::Base => write!(f, "base"),
        }
    }
}
