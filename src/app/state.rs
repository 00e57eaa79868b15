//! Shared application state.
//!
//! Balances, exposure and the daily loss ledger. Mutated only by execution
//! outcomes and scheduled reconciliation; read by the risk gate through
//! [`AppState::portfolio_snapshot`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::domain::{Asset, Balance, Opportunity, OpportunityId, Quote, VenueId};
use crate::risk::{DailyAggregates, OpenPosition, PortfolioSnapshot};

#[derive(Debug, Clone)]
struct TrackedPosition {
    opportunity_id: OpportunityId,
    asset: Asset,
    quote_value: Quote,
    opened_at: chrono::DateTime<Utc>,
}

#[derive(Default)]
struct ExposureBook {
    total: Quote,
    per_venue: HashMap<VenueId, Quote>,
    positions: Vec<TrackedPosition>,
}

struct DailyLedger {
    date: NaiveDate,
    realized_loss: Quote,
}

impl Default for DailyLedger {
    fn default() -> Self {
        Self {
            date: Utc::now().date_naive(),
            realized_loss: Decimal::ZERO,
        }
    }
}

impl DailyLedger {
    /// Reset the ledger when the UTC day rolled over.
    fn roll(&mut self) {
        let today = Utc::now().date_naive();
        if today != self.date {
            self.date = today;
            self.realized_loss = Decimal::ZERO;
        }
    }
}

/// Process-wide mutable state.
#[derive(Default)]
pub struct AppState {
    balances: RwLock<HashMap<(VenueId, Asset), Balance>>,
    exposure: RwLock<ExposureBook>,
    daily: RwLock<DailyLedger>,
    emergency: AtomicBool,
}

impl AppState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the baseline balances fetched from a venue.
    pub fn set_balances(&self, venue: &VenueId, balances: HashMap<Asset, Balance>) {
        let mut map = self.balances.write();
        for (asset, balance) in balances {
            map.insert((venue.clone(), asset), balance);
        }
    }

    #[must_use]
    pub fn balance(&self, venue: &VenueId, asset: &Asset) -> Option<Balance> {
        self.balances
            .read()
            .get(&(venue.clone(), asset.clone()))
            .copied()
    }

    /// Reserve exposure for an approved opportunity before execution.
    pub fn reserve(&self, op: &Opportunity) {
        let mut exposure = self.exposure.write();
        exposure.total += op.volume_quote();
        for leg in op.legs() {
            *exposure.per_venue.entry(leg.venue.clone()).or_default() += leg.notional();
        }
        exposure.positions.push(TrackedPosition {
            opportunity_id: op.id(),
            asset: op.symbol().base().clone(),
            quote_value: op.volume_quote(),
            opened_at: Utc::now(),
        });
    }

    /// Release exposure once the execution reached a terminal state, and
    /// book any realized loss against the daily ledger.
    pub fn release(&self, op: &Opportunity, realized_profit: Quote) {
        {
            let mut exposure = self.exposure.write();
            exposure.total = (exposure.total - op.volume_quote()).max(Decimal::ZERO);
            for leg in op.legs() {
                if let Some(used) = exposure.per_venue.get_mut(&leg.venue) {
                    *used = (*used - leg.notional()).max(Decimal::ZERO);
                }
            }
            exposure
                .positions
                .retain(|p| p.opportunity_id != op.id());
        }
        if realized_profit < Decimal::ZERO {
            let mut daily = self.daily.write();
            daily.roll();
            daily.realized_loss += -realized_profit;
        }
    }

    #[must_use]
    pub fn total_exposure(&self) -> Quote {
        self.exposure.read().total
    }

    #[must_use]
    pub fn open_position_count(&self) -> usize {
        self.exposure.read().positions.len()
    }

    #[must_use]
    pub fn daily_aggregates(&self) -> DailyAggregates {
        let mut daily = self.daily.write();
        daily.roll();
        DailyAggregates {
            realized_loss_quote: daily.realized_loss,
        }
    }

    /// Snapshot for the risk gate.
    #[must_use]
    pub fn portfolio_snapshot(&self, open_breakers: HashSet<VenueId>) -> PortfolioSnapshot {
        let exposure = self.exposure.read();
        PortfolioSnapshot {
            exposure_quote: exposure.total,
            venue_exposure: exposure.per_venue.clone(),
            open_positions: exposure
                .positions
                .iter()
                .map(|p| OpenPosition {
                    asset: p.asset.clone(),
                    quote_value: p.quote_value,
                    opened_at: p.opened_at,
                })
                .collect(),
            open_breakers,
            as_of: Some(Utc::now()),
        }
    }

    pub fn set_emergency(&self) {
        self.emergency.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_emergency(&self) -> bool {
        self.emergency.load(Ordering::SeqCst)
    }
}
