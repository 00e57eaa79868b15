//! Crate-wide error types.
//!
//! Errors are grouped by kind: venue transport and protocol failures live in
//! [`crate::exchange::VenueError`], domain invariant violations in
//! [`crate::domain::DomainError`], and risk gate rejections in
//! [`crate::risk::RiskReason`]. This module ties them together under a single
//! [`Error`] for the application layer.

use thiserror::Error;

use crate::domain::DomainError;
use crate::domain::VenueId;
use crate::exchange::VenueError;
use crate::risk::RiskReason;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("venue {venue}: {source}")]
    Venue {
        venue: VenueId,
        #[source]
        source: VenueError,
    },

    #[error("trading error: {0}")]
    Trading(#[from] TradingError),

    #[error("risk rejection: {0}")]
    Risk(#[from] RiskReason),

    #[error("invalid market data: {0}")]
    DataValidation(#[from] DomainError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap a venue error with the venue it came from.
    pub fn venue(venue: &VenueId, source: VenueError) -> Self {
        Self::Venue {
            venue: venue.clone(),
            source,
        }
    }

    /// Fatal errors shut the process down instead of failing a single leg.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_) | Self::Internal(_) => true,
            Self::Venue { source, .. } => matches!(source, VenueError::Auth(_)),
            _ => false,
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Order placement and fill failures raised while driving a leg.
#[derive(Error, Debug, Clone)]
pub enum TradingError {
    #[error("order rejected by venue: {0}")]
    OrderRejected(String),

    #[error("insufficient balance: need {needed} {asset}, have {available}")]
    InsufficientBalance {
        asset: String,
        needed: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },

    #[error("leg {step} timed out after {waited_ms} ms")]
    LegTimeout { step: u32, waited_ms: u64 },

    #[error("no adapter configured for venue {0}")]
    UnknownVenue(String),
}

pub type Result<T> = std::result::Result<T, Error>;
