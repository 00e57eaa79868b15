//! Trading pair identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::id::Asset;

/// A trading pair: base asset priced in the quote asset.
///
/// Displays and parses as `"BASE/QUOTE"`, e.g. `"BTC/USDT"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol {
    base: Asset,
    quote: Asset,
}

impl Symbol {
    pub fn new(base: impl Into<Asset>, quote: impl Into<Asset>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    #[must_use]
    pub fn base(&self) -> &Asset {
        &self.base
    }

    #[must_use]
    pub fn quote(&self) -> &Asset {
        &self.quote
    }

    /// Whether this pair converts between the two given assets, either way.
    #[must_use]
    pub fn connects(&self, a: &Asset, b: &Asset) -> bool {
        (self.base == *a && self.quote == *b) || (self.base == *b && self.quote == *a)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Error parsing a `"BASE/QUOTE"` string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid symbol {0:?}, expected BASE/QUOTE")]
pub struct ParseSymbolError(pub String);

impl FromStr for Symbol {
    type Err = ParseSymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() => {
                Ok(Self::new(base, quote))
            }
            _ => Err(ParseSymbolError(s.to_string())),
        }
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Per-symbol precision settings (integer digits after the decimal point).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolPrecision {
    pub amount: u32,
    pub price: u32,
}

impl Default for SymbolPrecision {
    fn default() -> Self {
        Self {
            amount: 8,
            price: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_roundtrip() {
        let symbol: Symbol = "BTC/USDT".parse().unwrap();
        assert_eq!(symbol.base().as_str(), "BTC");
        assert_eq!(symbol.quote().as_str(), "USDT");
        assert_eq!(symbol.to_string(), "BTC/USDT");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!("BTCUSDT".parse::<Symbol>().is_err());
        assert!("/USDT".parse::<Symbol>().is_err());
        assert!("BTC/".parse::<Symbol>().is_err());
    }

    #[test]
    fn connects_either_direction() {
        let symbol = Symbol::new("ETH", "BTC");
        assert!(symbol.connects(&Asset::from("ETH"), &Asset::from("BTC")));
        assert!(symbol.connects(&Asset::from("BTC"), &Asset::from("ETH")));
        assert!(!symbol.connects(&Asset::from("BTC"), &Asset::from("USDT")));
    }
}
