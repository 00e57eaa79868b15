//! Venue-agnostic domain types.
//!
//! Everything here is a value type or a registry over value types; no I/O,
//! no async. The pipeline components in the sibling modules communicate in
//! terms of these types.

pub mod balance;
pub mod error;
pub mod execution;
pub mod id;
pub mod market;
pub mod money;
pub mod opportunity;
pub mod symbol;
pub mod trade;
pub mod venue;

pub use balance::Balance;
pub use error::DomainError;
pub use execution::{Execution, ExecutionStatus};
pub use id::{Asset, ClientOrderId, ExecutionId, ExternalOrderId, OpportunityId, VenueId};
pub use market::{BookLevel, BookSnapshot, FundingSnapshot, TickerSnapshot, MAX_BOOK_LEVELS};
pub use money::{Amount, Price, Quote};
pub use opportunity::{
    Fingerprint, LegOrderType, Opportunity, OpportunityKind, OpportunityLeg, OpportunityStatus,
    RiskFactor, RiskFactorKind, RiskSeverity,
};
pub use symbol::{Symbol, SymbolPrecision};
pub use trade::{Side, Trade, TradeStatus};
pub use venue::{FeeSchedule, TradeLimits, Venue, VenueHealth, VenueKind, VenueRegistry};
