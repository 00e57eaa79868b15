//! Risk and portfolio gate.
//!
//! [`RiskGate::evaluate`] is deterministic admission control: given an
//! opportunity, a portfolio snapshot, the day's aggregates and a depth view,
//! it approves or rejects with the first failing check. No I/O, no clock
//! reads; every input is passed in, so the same inputs always produce the
//! same decision.
//!
//! The stateful edge — emitting `riskAlert` exactly once when the daily
//! loss cap transitions from healthy to breached — lives in
//! [`RiskGate::admit`], outside the pure core.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::{
    Asset, BookSnapshot, Opportunity, Quote, Side, Symbol, VenueId, VenueRegistry,
};
use crate::market::MarketDataCache;
use crate::service::Event;

/// Book levels that must cover a leg's requested amount.
const DEPTH_LEVELS: usize = 5;

/// Global risk limits.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskLimits {
    #[serde(default = "default_min_profit_pct")]
    pub global_min_profit_pct: Decimal,
    #[serde(default = "default_max_exposure")]
    pub max_total_exposure_quote: Quote,
    #[serde(default = "default_max_daily_loss")]
    pub max_loss_per_day_quote: Quote,
    #[serde(default = "default_max_position_age_hours")]
    pub max_position_age_hours: i64,
    /// When set, the correlated-position age check applies.
    #[serde(default)]
    pub correlation_threshold: Option<f64>,
    /// Scanner pause after a daily-loss breach.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_min_profit_pct() -> Decimal {
    dec!(0.1)
}

fn default_max_exposure() -> Quote {
    Decimal::from(100_000)
}

fn default_max_daily_loss() -> Quote {
    Decimal::from(1_000)
}

fn default_max_position_age_hours() -> i64 {
    24
}

fn default_cooldown_secs() -> u64 {
    60
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            global_min_profit_pct: default_min_profit_pct(),
            max_total_exposure_quote: default_max_exposure(),
            max_loss_per_day_quote: default_max_daily_loss(),
            max_position_age_hours: default_max_position_age_hours(),
            correlation_threshold: None,
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl RiskLimits {
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// An open position, as much of it as the gate needs to know.
#[derive(Debug, Clone)]
pub struct OpenPosition {
    pub asset: Asset,
    pub quote_value: Quote,
    pub opened_at: DateTime<Utc>,
}

/// Immutable inputs describing the portfolio at decision time.
#[derive(Debug, Clone, Default)]
pub struct PortfolioSnapshot {
    pub exposure_quote: Quote,
    pub venue_exposure: HashMap<VenueId, Quote>,
    pub open_positions: Vec<OpenPosition>,
    /// Venues whose circuit breaker is currently open.
    pub open_breakers: HashSet<VenueId>,
    /// Decision time, passed in so evaluation stays clock-free.
    pub as_of: Option<DateTime<Utc>>,
}

/// Running aggregates for the current day.
#[derive(Debug, Clone, Copy, Default)]
pub struct DailyAggregates {
    /// Magnitude of today's realized loss (>= 0).
    pub realized_loss_quote: Quote,
}

/// Book snapshots for the legs under evaluation.
#[derive(Debug, Clone, Default)]
pub struct DepthView {
    books: HashMap<(VenueId, Symbol), BookSnapshot>,
}

impl DepthView {
    /// Collect the books an opportunity's legs will need from the cache.
    #[must_use]
    pub fn for_opportunity(cache: &MarketDataCache, op: &Opportunity) -> Self {
        let mut books = HashMap::new();
        for leg in op.legs() {
            if let Some(book) = cache.get_book(&leg.venue, &leg.symbol) {
                books.insert((leg.venue.clone(), leg.symbol.clone()), book);
            }
        }
        Self { books }
    }

    #[must_use]
    pub fn with_book(mut self, book: BookSnapshot) -> Self {
        self.books
            .insert((book.venue.clone(), book.symbol.clone()), book);
        self
    }

    fn get(&self, venue: &VenueId, symbol: &Symbol) -> Option<&BookSnapshot> {
        self.books.get(&(venue.clone(), symbol.clone()))
    }
}

/// Why the gate said no.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiskReason {
    #[error("projected {projected}% below minimum {minimum}%")]
    MinProfit { projected: Decimal, minimum: Decimal },

    #[error("volume {requested} exceeds remaining exposure headroom {headroom}")]
    MaxExposure { requested: Quote, headroom: Quote },

    #[error("leg notional {notional} exceeds remaining headroom {headroom} on {venue}")]
    VenueExposure {
        venue: VenueId,
        notional: Quote,
        headroom: Quote,
    },

    #[error("daily realized loss {realized} at or above cap {cap}")]
    DailyLoss { realized: Quote, cap: Quote },

    #[error("book depth on {venue} {symbol} covers {available}, need {needed}")]
    Depth {
        venue: VenueId,
        symbol: Symbol,
        available: Decimal,
        needed: Decimal,
    },

    #[error("open {asset} position aged {age_hours}h exceeds {max_hours}h")]
    PositionAge {
        asset: Asset,
        age_hours: i64,
        max_hours: i64,
    },

    #[error("circuit breaker open for {venue}")]
    VenueCircuitOpen { venue: VenueId },

    #[error("execution queue full")]
    Backpressure,
}

impl RiskReason {
    /// Stable short code for logs, events and the audit trail.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MinProfit { .. } => "minProfit",
            Self::MaxExposure { .. } => "maxExposure",
            Self::VenueExposure { .. } => "venueExposure",
            Self::DailyLoss { .. } => "dailyLoss",
            Self::Depth { .. } => "depth",
            Self::PositionAge { .. } => "positionAge",
            Self::VenueCircuitOpen { .. } => "venueCircuitOpen",
            Self::Backpressure => "backpressure",
        }
    }
}

/// Outcome of admission control.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Approved,
    Rejected(RiskReason),
}

impl RiskDecision {
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }

    #[must_use]
    pub fn rejection(&self) -> Option<&RiskReason> {
        match self {
            Self::Rejected(reason) => Some(reason),
            Self::Approved => None,
        }
    }
}

/// Deterministic admission control over configured limits.
pub struct RiskGate {
    limits: RiskLimits,
    venues: Arc<VenueRegistry>,
    events: Option<broadcast::Sender<Event>>,
    loss_breached: AtomicBool,
}

impl RiskGate {
    #[must_use]
    pub fn new(limits: RiskLimits, venues: Arc<VenueRegistry>) -> Self {
        Self {
            limits,
            venues,
            events: None,
            loss_breached: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: broadcast::Sender<Event>) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Pure evaluation: checks run in a fixed order, first failure wins.
    #[must_use]
    pub fn evaluate(
        &self,
        op: &Opportunity,
        portfolio: &PortfolioSnapshot,
        aggregates: &DailyAggregates,
        depth: &DepthView,
    ) -> RiskDecision {
        // 1. Profit floor.
        if op.projected_profit_pct() < self.limits.global_min_profit_pct {
            return RiskDecision::Rejected(RiskReason::MinProfit {
                projected: op.projected_profit_pct(),
                minimum: self.limits.global_min_profit_pct,
            });
        }

        // 2. Total exposure headroom.
        let headroom = self.limits.max_total_exposure_quote - portfolio.exposure_quote;
        if op.volume_quote() > headroom {
            return RiskDecision::Rejected(RiskReason::MaxExposure {
                requested: op.volume_quote(),
                headroom,
            });
        }

        // 3. Per-venue: breaker state, then exposure headroom.
        for leg in op.legs() {
            if portfolio.open_breakers.contains(&leg.venue) {
                return RiskDecision::Rejected(RiskReason::VenueCircuitOpen {
                    venue: leg.venue.clone(),
                });
            }
            let venue_cap = self
                .venues
                .get(&leg.venue)
                .map_or_else(|| Decimal::from(10_000), |v| v.limits().max_position_quote);
            let used = portfolio
                .venue_exposure
                .get(&leg.venue)
                .copied()
                .unwrap_or(Decimal::ZERO);
            let venue_headroom = venue_cap - used;
            if leg.notional() > venue_headroom {
                return RiskDecision::Rejected(RiskReason::VenueExposure {
                    venue: leg.venue.clone(),
                    notional: leg.notional(),
                    headroom: venue_headroom,
                });
            }
        }

        // 4. Daily loss halt.
        if aggregates.realized_loss_quote >= self.limits.max_loss_per_day_quote {
            return RiskDecision::Rejected(RiskReason::DailyLoss {
                realized: aggregates.realized_loss_quote,
                cap: self.limits.max_loss_per_day_quote,
            });
        }

        // 5. Book depth within the first few levels.
        for leg in op.legs() {
            let Some(book) = depth.get(&leg.venue, &leg.symbol) else {
                return RiskDecision::Rejected(RiskReason::Depth {
                    venue: leg.venue.clone(),
                    symbol: leg.symbol.clone(),
                    available: Decimal::ZERO,
                    needed: leg.amount,
                });
            };
            let side = match leg.side {
                Side::Buy => &book.asks,
                Side::Sell => &book.bids,
            };
            let available = BookSnapshot::depth_base(side, DEPTH_LEVELS);
            if available < leg.amount {
                return RiskDecision::Rejected(RiskReason::Depth {
                    venue: leg.venue.clone(),
                    symbol: leg.symbol.clone(),
                    available,
                    needed: leg.amount,
                });
            }
        }

        // 6. Correlated position age, only when the threshold is configured.
        if self.limits.correlation_threshold.is_some() {
            let as_of = portfolio.as_of.unwrap_or(op.created_at());
            for leg in op.legs() {
                for position in &portfolio.open_positions {
                    if position.asset != *leg.symbol.base() {
                        continue;
                    }
                    let age_hours = (as_of - position.opened_at).num_hours();
                    if age_hours > self.limits.max_position_age_hours {
                        return RiskDecision::Rejected(RiskReason::PositionAge {
                            asset: position.asset.clone(),
                            age_hours,
                            max_hours: self.limits.max_position_age_hours,
                        });
                    }
                }
            }
        }

        RiskDecision::Approved
    }

    /// Evaluate and handle the daily-loss breach edge: `riskAlert` is
    /// emitted exactly once per transition into the breached state.
    #[must_use]
    pub fn admit(
        &self,
        op: &Opportunity,
        portfolio: &PortfolioSnapshot,
        aggregates: &DailyAggregates,
        depth: &DepthView,
    ) -> RiskDecision {
        let decision = self.evaluate(op, portfolio, aggregates, depth);

        match decision.rejection() {
            Some(RiskReason::DailyLoss { realized, cap }) => {
                if !self.loss_breached.swap(true, Ordering::SeqCst) {
                    if let Some(tx) = &self.events {
                        let _ = tx.send(Event::RiskAlert {
                            limit: "dailyLoss",
                            value: *realized,
                        });
                    }
                    debug!(realized = %realized, cap = %cap, "daily loss cap breached");
                }
            }
            _ => {
                // Healthy again (or failed earlier in the order); re-arm.
                if aggregates.realized_loss_quote < self.limits.max_loss_per_day_quote {
                    self.loss_breached.store(false, Ordering::SeqCst);
                }
            }
        }

        decision
    }

    /// Whether the daily loss cap is currently breached.
    #[must_use]
    pub fn is_loss_breached(&self) -> bool {
        self.loss_breached.load(Ordering::SeqCst)
    }
}
