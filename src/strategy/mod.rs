//! Candidate synthesis strategies.
//!
//! Each strategy is a pure function from market snapshots to zero or more
//! fully planned [`Opportunity`] candidates: it neither mutates the cache
//! nor emits events. The scanner drives the [`StrategyRegistry`] on its
//! tick and owns everything downstream of detection.

mod basis;
mod context;
mod simple;
mod triangular;

pub use basis::{BasisParams, BasisStrategy};
pub use context::ScanContext;
pub use simple::{SimpleCrossVenueParams, SimpleCrossVenueStrategy};
pub use triangular::{TriangularParams, TriangularStrategy};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::domain::{
    Opportunity, OpportunityKind, RiskFactor, RiskFactorKind, RiskSeverity, TickerSnapshot,
    Venue,
};

/// Depth consumed on a book side is capped at this many quote units...
pub const DEPTH_QUOTE_CAP: Decimal = dec!(10000);

/// ...or this many base units, whichever binds first.
pub const DEPTH_BASE_CAP: Decimal = dec!(100);

/// Fraction of the computed tradable size actually planned.
pub const SAFETY_MARGIN: Decimal = dec!(0.8);

/// Candidate time-to-live.
pub const OPPORTUNITY_TTL_SECS: i64 = 30;

/// 24 h volume below which the liquidity risk factor attaches.
pub const LIQUIDITY_VOLUME_FLOOR: Decimal = dec!(100000);

/// Per-leg latency budget planned into every leg.
pub const LEG_LATENCY_MS: u64 = 5_000;

/// A detection strategy synthesizing opportunities from cache snapshots.
pub trait Strategy: Send + Sync {
    /// Unique identifier used in configuration and logging.
    fn name(&self) -> &'static str;

    fn kind(&self) -> OpportunityKind;

    /// Propose candidates for the current snapshot state. May be empty.
    fn scan(&self, ctx: &ScanContext<'_>) -> Vec<Opportunity>;
}

/// Registry of enabled strategies, run in configuration order.
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategyRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, strategy: Box<dyn Strategy>) {
        self.strategies.push(strategy);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run every strategy against the same context, preserving order.
    #[must_use]
    pub fn scan_all(&self, ctx: &ScanContext<'_>) -> Vec<Opportunity> {
        self.strategies.iter().flat_map(|s| s.scan(ctx)).collect()
    }
}

/// Confidence heuristic shared by all strategies.
///
/// Starts at 1.0; knocked down 0.8x when fewer than three venues held fresh
/// snapshots, and 0.9x for each snapshot used that is older than five
/// seconds. Floored at 0.1.
#[must_use]
pub fn confidence(
    now: DateTime<Utc>,
    snapshot_times: &[DateTime<Utc>],
    cross_venue_count: usize,
) -> f64 {
    let mut value = 1.0_f64;
    if cross_venue_count < 3 {
        value *= 0.8;
    }
    for observed_at in snapshot_times {
        if now - *observed_at > chrono::Duration::seconds(5) {
            value *= 0.9;
        }
    }
    value.max(0.1)
}

/// Liquidity risk factor when the thinnest leg venue turned over less than
/// [`LIQUIDITY_VOLUME_FLOOR`] quote units in 24 h.
#[must_use]
pub fn liquidity_factor(tickers: &[&TickerSnapshot]) -> Option<RiskFactor> {
    let thinnest = tickers.iter().map(|t| t.volume).min()?;
    if thinnest < LIQUIDITY_VOLUME_FLOOR {
        Some(RiskFactor {
            kind: RiskFactorKind::Liquidity,
            severity: RiskSeverity::Medium,
            impact: format!("thinnest venue 24h volume {thinnest}"),
        })
    } else {
        None
    }
}

/// Exchange risk factor when any leg venue is flagged high counterparty risk.
#[must_use]
pub fn exchange_factor<'a>(venues: impl Iterator<Item = &'a Venue>) -> Option<RiskFactor> {
    let flagged: Vec<_> = venues.filter(|v| v.is_high_risk()).collect();
    if flagged.is_empty() {
        None
    } else {
        Some(RiskFactor {
            kind: RiskFactorKind::Exchange,
            severity: RiskSeverity::High,
            impact: format!(
                "high-risk venues: {}",
                flagged
                    .iter()
                    .map(|v| v.id().as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            ),
        })
    }
}

/// Timing risk factor, attached by default to multi-hop and carry trades.
#[must_use]
pub fn timing_factor() -> RiskFactor {
    RiskFactor {
        kind: RiskFactorKind::Timing,
        severity: RiskSeverity::Medium,
        impact: "profit depends on all legs landing before prices move".to_string(),
    }
}

/// Expiry timestamp for a candidate created at `now`.
#[must_use]
pub fn expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    now + chrono::Duration::seconds(OPPORTUNITY_TTL_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Symbol, VenueId};

    fn ticker(volume: Decimal, observed_at: DateTime<Utc>) -> TickerSnapshot {
        TickerSnapshot {
            venue: VenueId::from("v"),
            symbol: Symbol::new("BTC", "USDT"),
            bid: dec!(99),
            ask: dec!(100),
            last: dec!(99.5),
            volume,
            change_24h: Decimal::ZERO,
            observed_at,
        }
    }

    #[test]
    fn confidence_full_when_fresh_and_deep() {
        let now = Utc::now();
        let value = confidence(now, &[now, now], 3);
        assert!((value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn confidence_penalizes_thin_venue_coverage() {
        let now = Utc::now();
        let value = confidence(now, &[now, now], 2);
        assert!((value - 0.8).abs() < 1e-12);
    }

    #[test]
    fn confidence_penalizes_old_snapshots() {
        let now = Utc::now();
        let old = now - chrono::Duration::seconds(6);
        let value = confidence(now, &[old, old], 3);
        assert!((value - 0.81).abs() < 1e-12);
    }

    #[test]
    fn confidence_floors_at_a_tenth() {
        let now = Utc::now();
        let old = now - chrono::Duration::seconds(6);
        let times = vec![old; 40];
        assert!((confidence(now, &times, 1) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn liquidity_factor_attaches_below_floor() {
        let now = Utc::now();
        let thin = ticker(dec!(50000), now);
        let deep = ticker(dec!(5000000), now);

        assert!(liquidity_factor(&[&thin, &deep]).is_some());
        assert!(liquidity_factor(&[&deep]).is_none());
    }
}
