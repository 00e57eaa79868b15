//! Read-only view handed to strategies on each scan tick.

use chrono::{DateTime, Utc};

use crate::domain::VenueRegistry;
use crate::market::MarketDataCache;

/// Everything a strategy may look at. Strategies are pure: they read this
/// context and return candidates, nothing else.
pub struct ScanContext<'a> {
    pub cache: &'a MarketDataCache,
    pub venues: &'a VenueRegistry,
    /// Tick time, shared by all strategies in the same pass.
    pub now: DateTime<Utc>,
}

impl<'a> ScanContext<'a> {
    #[must_use]
    pub fn new(cache: &'a MarketDataCache, venues: &'a VenueRegistry) -> Self {
        Self {
            cache,
            venues,
            now: Utc::now(),
        }
    }
}
