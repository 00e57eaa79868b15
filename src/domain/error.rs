//! Domain validation errors.
//!
//! Returned by `try_new` constructors and state transition methods when an
//! invariant would be violated.

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Ticker quote must satisfy `0 < bid <= ask`.
    #[error("invalid quote: bid {bid} / ask {ask}")]
    InvalidQuote { bid: Decimal, ask: Decimal },

    /// Book side violates its price ordering.
    #[error("{side} not strictly ordered: {prev} then {next}")]
    UnorderedBook {
        side: &'static str,
        prev: Decimal,
        next: Decimal,
    },

    /// Best bid at or above best ask.
    #[error("crossed book: bid {bid} >= ask {ask}")]
    CrossedBook { bid: Decimal, ask: Decimal },

    /// Opportunities must carry at least one leg.
    #[error("legs cannot be empty")]
    EmptyLegs,

    /// Leg step indices must run 1, 2, 3, ...
    #[error("leg steps must be consecutive from 1, got {got} at position {position}")]
    NonConsecutiveSteps { position: usize, got: u32 },

    /// Expiry must be after creation.
    #[error("expiry {expires_at} not after creation {created_at}")]
    ExpiryBeforeCreation {
        created_at: chrono::DateTime<chrono::Utc>,
        expires_at: chrono::DateTime<chrono::Utc>,
    },

    /// Attempted lifecycle transition not on the state machine.
    #[error("illegal transition: {from} -> {to}")]
    IllegalTransition {
        from: &'static str,
        to: &'static str,
    },

    /// Amounts must be positive for trading operations.
    #[error("amount must be positive, got {amount}")]
    NonPositiveAmount { amount: Decimal },
}
