//! Opportunity types for cross-venue arbitrage detection.
//!
//! An [`Opportunity`] is a fully planned multi-leg trade: each
//! [`OpportunityLeg`] names the venue, symbol, side, size and reference price
//! for one order. The projected profit is net of the per-leg fee estimates.
//!
//! # Lifecycle
//!
//! ```text
//! detected -> approved -> executing -> completed | failed
//!     \           \
//!      \           +-> rejected | expired
//!       +-> rejected | expired
//! ```
//!
//! Terminal states are final; only `detected` opportunities are live for
//! scanning purposes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::error::DomainError;
use super::id::{OpportunityId, VenueId};
use super::money::{Amount, Price, Quote};
use super::symbol::Symbol;
use super::trade::Side;

/// Kind of dislocation the opportunity exploits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpportunityKind {
    /// Buy on one venue, sell on another.
    Simple,
    /// Three-leg cycle on a single venue.
    Triangular,
    /// Spot long vs perp short carrying positive funding.
    Basis,
}

impl OpportunityKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Triangular => "triangular",
            Self::Basis => "basis",
        }
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpportunityStatus {
    Detected,
    Approved,
    Executing,
    Completed,
    Failed,
    Expired,
    Rejected,
}

impl OpportunityStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::Approved => "approved",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Rejected => "rejected",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Expired | Self::Rejected
        )
    }

    fn allows(self, to: Self) -> bool {
        use OpportunityStatus::{Approved, Detected, Executing};
        match self {
            Detected => matches!(to, Approved | Self::Rejected | Self::Expired),
            Approved => matches!(to, Executing | Self::Rejected | Self::Expired),
            Executing => matches!(to, Self::Completed | Self::Failed),
            _ => false,
        }
    }
}

/// Type of order a leg submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LegOrderType {
    /// Limit at the leg's reference price.
    #[default]
    Limit,
    /// Market, when the strategy prioritizes certainty over price.
    Market,
}

/// One atomic order within the plan.
#[derive(Debug, Clone, PartialEq)]
pub struct OpportunityLeg {
    /// 1-based position in the execution sequence.
    pub step_index: u32,
    pub venue: VenueId,
    pub symbol: Symbol,
    pub side: Side,
    /// Base amount to trade.
    pub amount: Amount,
    /// Price the plan was computed against.
    pub reference_price: Price,
    /// Estimated fee in quote units.
    pub fee_estimate: Quote,
    /// Budget for reaching a terminal order status.
    pub max_latency_ms: u64,
    pub order_type: LegOrderType,
}

impl OpportunityLeg {
    /// Notional value at the reference price.
    #[must_use]
    pub fn notional(&self) -> Quote {
        self.amount * self.reference_price
    }
}

/// Severity of an attached risk factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskSeverity {
    Low,
    Medium,
    High,
}

/// Kind of risk factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskFactorKind {
    /// Thin 24 h volume on the weakest leg venue.
    Liquidity,
    /// A leg venue is flagged high counterparty risk.
    Exchange,
    /// Profit depends on all legs landing quickly.
    Timing,
}

/// Qualitative risk tag attached by the detecting strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskFactor {
    pub kind: RiskFactorKind,
    pub severity: RiskSeverity,
    pub impact: String,
}

/// Structural identity used for deduplication: two candidates with the same
/// fingerprint are the same opportunity shape, differing only in numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    kind: OpportunityKind,
    symbol: Symbol,
    venues: Vec<VenueId>,
    sides: Vec<Side>,
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.symbol)?;
        for (venue, side) in self.venues.iter().zip(&self.sides) {
            write!(f, ":{venue}/{}", side.as_str())?;
        }
        Ok(())
    }
}

/// A detected multi-leg trade candidate.
#[derive(Debug, Clone)]
pub struct Opportunity {
    id: OpportunityId,
    kind: OpportunityKind,
    /// Primary symbol the candidate was scanned on.
    symbol: Symbol,
    legs: Vec<OpportunityLeg>,
    projected_profit_quote: Quote,
    /// Net profit as a percentage of the entry notional.
    projected_profit_pct: Decimal,
    /// Entry notional in quote units.
    volume_quote: Quote,
    confidence: f64,
    risks: Vec<RiskFactor>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    status: OpportunityStatus,
    strategy: String,
    partial_fills_enabled: bool,
}

impl Opportunity {
    /// Validating constructor.
    ///
    /// # Errors
    ///
    /// Rejects empty leg plans, non-consecutive step indices, and expiry not
    /// after creation.
    #[allow(clippy::too_many_arguments)]
    pub fn try_new(
        kind: OpportunityKind,
        symbol: Symbol,
        legs: Vec<OpportunityLeg>,
        projected_profit_quote: Quote,
        projected_profit_pct: Decimal,
        volume_quote: Quote,
        confidence: f64,
        risks: Vec<RiskFactor>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        strategy: impl Into<String>,
    ) -> Result<Self, DomainError> {
        if legs.is_empty() {
            return Err(DomainError::EmptyLegs);
        }
        for (position, leg) in legs.iter().enumerate() {
            let expected = position as u32 + 1;
            if leg.step_index != expected {
                return Err(DomainError::NonConsecutiveSteps {
                    position,
                    got: leg.step_index,
                });
            }
        }
        if expires_at <= created_at {
            return Err(DomainError::ExpiryBeforeCreation {
                created_at,
                expires_at,
            });
        }
        Ok(Self {
            id: OpportunityId::generate(),
            kind,
            symbol,
            legs,
            projected_profit_quote,
            projected_profit_pct,
            volume_quote,
            confidence: confidence.clamp(0.0, 1.0),
            risks,
            created_at,
            expires_at,
            status: OpportunityStatus::Detected,
            strategy: strategy.into(),
            partial_fills_enabled: false,
        })
    }

    /// Allow the coordinator to rescale later legs after a partial fill.
    #[must_use]
    pub fn with_partial_fills(mut self, enabled: bool) -> Self {
        self.partial_fills_enabled = enabled;
        self
    }

    #[must_use]
    pub fn id(&self) -> OpportunityId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> OpportunityKind {
        self.kind
    }

    #[must_use]
    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    #[must_use]
    pub fn legs(&self) -> &[OpportunityLeg] {
        &self.legs
    }

    #[must_use]
    pub fn projected_profit_quote(&self) -> Quote {
        self.projected_profit_quote
    }

    #[must_use]
    pub fn projected_profit_pct(&self) -> Decimal {
        self.projected_profit_pct
    }

    #[must_use]
    pub fn volume_quote(&self) -> Quote {
        self.volume_quote
    }

    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    #[must_use]
    pub fn risks(&self) -> &[RiskFactor] {
        &self.risks
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    #[must_use]
    pub fn status(&self) -> OpportunityStatus {
        self.status
    }

    #[must_use]
    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    #[must_use]
    pub fn partial_fills_enabled(&self) -> bool {
        self.partial_fills_enabled
    }

    /// Whether the candidate is still scannable-over.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.status == OpportunityStatus::Detected
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Move along the lifecycle; illegal edges are rejected.
    pub fn transition(&mut self, to: OpportunityStatus) -> Result<(), DomainError> {
        if !self.status.allows(to) {
            return Err(DomainError::IllegalTransition {
                from: self.status.as_str(),
                to: to.as_str(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// Structural identity for deduplication.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            kind: self.kind,
            symbol: self.symbol.clone(),
            venues: self.legs.iter().map(|l| l.venue.clone()).collect(),
            sides: self.legs.iter().map(|l| l.side).collect(),
        }
    }

    /// Recompute the projected profit from the leg plan.
    ///
    /// Only meaningful for `simple` candidates, where every leg is quoted in
    /// the same currency; triangular and basis profits follow their own rate
    /// models and are recomputed by the detecting strategy.
    #[must_use]
    pub fn projected_profit_from_legs(&self) -> Option<Quote> {
        if self.kind != OpportunityKind::Simple {
            return None;
        }
        let mut profit = Decimal::ZERO;
        for leg in &self.legs {
            match leg.side {
                Side::Sell => profit += leg.notional(),
                Side::Buy => profit -= leg.notional(),
            }
            profit -= leg.fee_estimate;
        }
        Some(profit)
    }
}
