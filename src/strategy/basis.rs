//! Basis / funding-rate strategy: long spot, short perp, collect funding.
//!
//! Proposes a candidate when annualized funding on the perp venue, less the
//! absolute spot/perp basis, clears the threshold and funding is positive
//! (shorts are being paid).

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::trace;

use crate::domain::{
    LegOrderType, Opportunity, OpportunityKind, OpportunityLeg, Quote, Side, Symbol, VenueId,
};

use super::{
    confidence, exchange_factor, expiry, liquidity_factor, timing_factor, ScanContext, Strategy,
    LEG_LATENCY_MS,
};

/// Parameters for one configured spot/perp pair.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BasisParams {
    pub spot_venue: VenueId,
    pub perp_venue: VenueId,
    pub symbol: Symbol,
    /// Minimum annualized carry (funding minus |basis|), in percent.
    pub min_profit_pct: Decimal,
    pub max_position_quote: Quote,
    #[serde(default)]
    pub enable_partial_fills: bool,
}

/// Basis detector.
pub struct BasisStrategy {
    params: BasisParams,
}

impl BasisStrategy {
    #[must_use]
    pub fn new(params: BasisParams) -> Self {
        Self { params }
    }
}

impl Strategy for BasisStrategy {
    fn name(&self) -> &'static str {
        "basis_carry"
    }

    fn kind(&self) -> OpportunityKind {
        OpportunityKind::Basis
    }

    fn scan(&self, ctx: &ScanContext<'_>) -> Vec<Opportunity> {
        let Some(spot) = ctx.cache.get_ticker(&self.params.spot_venue, &self.params.symbol)
        else {
            return Vec::new();
        };
        let Some(perp) = ctx.cache.get_ticker(&self.params.perp_venue, &self.params.symbol)
        else {
            return Vec::new();
        };
        let Some(funding) = ctx
            .cache
            .get_funding(&self.params.perp_venue, &self.params.symbol)
        else {
            return Vec::new();
        };

        // Shorts must be the side getting paid.
        if funding.rate <= Decimal::ZERO {
            return Vec::new();
        }

        let annualized_pct = funding.annualized_pct();
        let basis_pct = (perp.bid - spot.ask) / spot.ask * Decimal::ONE_HUNDRED;
        let carry_pct = annualized_pct - basis_pct.abs();
        if carry_pct < self.params.min_profit_pct {
            trace!(
                symbol = %self.params.symbol,
                annualized = %annualized_pct,
                basis = %basis_pct,
                "carry below threshold"
            );
            return Vec::new();
        }

        let size = (self.params.max_position_quote / spot.ask)
            .trunc_with_scale(ctx.venues.amount_precision(&self.params.symbol));
        if size <= Decimal::ZERO {
            return Vec::new();
        }
        let volume_quote = size * spot.ask;
        let spot_fee = volume_quote * ctx.venues.taker_rate(&self.params.spot_venue);
        let perp_fee = size * perp.bid * ctx.venues.taker_rate(&self.params.perp_venue);

        let legs = vec![
            OpportunityLeg {
                step_index: 1,
                venue: self.params.spot_venue.clone(),
                symbol: self.params.symbol.clone(),
                side: Side::Buy,
                amount: size,
                reference_price: spot.ask,
                fee_estimate: spot_fee,
                max_latency_ms: LEG_LATENCY_MS,
                order_type: LegOrderType::Limit,
            },
            OpportunityLeg {
                step_index: 2,
                venue: self.params.perp_venue.clone(),
                symbol: self.params.symbol.clone(),
                side: Side::Sell,
                amount: size,
                reference_price: perp.bid,
                fee_estimate: perp_fee,
                max_latency_ms: LEG_LATENCY_MS,
                order_type: LegOrderType::Limit,
            },
        ];

        let mut risks = vec![timing_factor()];
        if let Some(factor) = liquidity_factor(&[&spot, &perp]) {
            risks.push(factor);
        }
        let leg_venues = [&self.params.spot_venue, &self.params.perp_venue];
        if let Some(factor) =
            exchange_factor(leg_venues.iter().copied().filter_map(|id| ctx.venues.get(id)))
        {
            risks.push(factor);
        }

        let snapshot_times = [spot.observed_at, perp.observed_at];
        let confidence = confidence(ctx.now, &snapshot_times, 2);

        // Detection stays on the 30 s TTL even though the carry is held for
        // whole funding periods; the hold shows up as execution duration.
        // TODO: confirm with the risk owner whether basis candidates should
        // outlive the standard detection window.
        let projected_profit = volume_quote * carry_pct / Decimal::ONE_HUNDRED;
        Opportunity::try_new(
            OpportunityKind::Basis,
            self.params.symbol.clone(),
            legs,
            projected_profit,
            carry_pct,
            volume_quote,
            confidence,
            risks,
            ctx.now,
            expiry(ctx.now),
            self.name(),
        )
        .ok()
        .map(|op| op.with_partial_fills(self.params.enable_partial_fills))
        .into_iter()
        .collect()
    }
}
