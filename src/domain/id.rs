//! Typed identifiers.
//!
//! Newtypes prevent mixing up the many string- and UUID-shaped ids flowing
//! through the pipeline (venues, opportunities, executions, orders).

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id! {
    /// Stable short identifier for a trading venue (e.g. `"binance"`).
    VenueId
}

string_id! {
    /// An asset ticker symbol (e.g. `"BTC"`, `"USDT"`).
    Asset
}

string_id! {
    /// Order id assigned by a venue.
    ExternalOrderId
}

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random id.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id! {
    /// Row identity of a detected opportunity.
    OpportunityId
}

uuid_id! {
    /// Row identity of an execution attempt.
    ExecutionId
}

/// Client-side order identifier, derived from the execution and leg so that
/// a retried submission never produces a second venue order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    /// Id for a plan leg.
    #[must_use]
    pub fn for_leg(execution: ExecutionId, step_index: u32) -> Self {
        Self(format!("{execution}-{step_index}"))
    }

    /// Id for the compensating order of a leg.
    #[must_use]
    pub fn for_compensation(execution: ExecutionId, step_index: u32) -> Self {
        Self(format!("{execution}-{step_index}-comp"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
