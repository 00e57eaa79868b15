//! Simple cross-venue strategy: buy where the ask is low, sell where the
//! bid is high.
//!
//! For each configured symbol, every ordered venue pair with
//! `buy.ask < sell.bid` is priced up; the best candidate per symbol wins the
//! tie-break (highest net, then freshest snapshots, then lexicographic
//! venue pair).

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::trace;

use crate::domain::{
    BookSnapshot, LegOrderType, Opportunity, OpportunityKind, OpportunityLeg, Quote, Side,
    Symbol, TickerSnapshot, VenueId,
};

use super::{
    confidence, exchange_factor, expiry, liquidity_factor, ScanContext, Strategy,
    DEPTH_BASE_CAP, DEPTH_QUOTE_CAP, LEG_LATENCY_MS, SAFETY_MARGIN,
};

/// Parameters for the simple cross-venue strategy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimpleCrossVenueParams {
    pub symbols: Vec<Symbol>,
    pub venues: Vec<VenueId>,
    /// Minimum net profit percentage to propose a candidate.
    pub min_profit_pct: Decimal,
    /// Cap on entry notional in quote units.
    pub max_position_quote: Quote,
    #[serde(default)]
    pub enable_partial_fills: bool,
}

/// Simple cross-venue detector.
pub struct SimpleCrossVenueStrategy {
    params: SimpleCrossVenueParams,
}

impl SimpleCrossVenueStrategy {
    #[must_use]
    pub fn new(params: SimpleCrossVenueParams) -> Self {
        Self { params }
    }
}

struct PairCandidate<'a> {
    buy: &'a (VenueId, TickerSnapshot, BookSnapshot),
    sell: &'a (VenueId, TickerSnapshot, BookSnapshot),
    size: Decimal,
    net_quote: Quote,
    net_pct: Decimal,
}

impl PairCandidate<'_> {
    /// Older of the two snapshots; later is fresher.
    fn freshness(&self) -> chrono::DateTime<chrono::Utc> {
        self.buy.1.observed_at.min(self.sell.1.observed_at)
    }

    fn beats(&self, other: &Self) -> bool {
        if self.net_quote != other.net_quote {
            return self.net_quote > other.net_quote;
        }
        if self.freshness() != other.freshness() {
            return self.freshness() > other.freshness();
        }
        (&self.buy.0, &self.sell.0) < (&other.buy.0, &other.sell.0)
    }
}

impl Strategy for SimpleCrossVenueStrategy {
    fn name(&self) -> &'static str {
        "simple_cross_venue"
    }

    fn kind(&self) -> OpportunityKind {
        OpportunityKind::Simple
    }

    fn scan(&self, ctx: &ScanContext<'_>) -> Vec<Opportunity> {
        let mut out = Vec::new();
        for symbol in &self.params.symbols {
            let fresh: Vec<_> = ctx
                .cache
                .list_fresh(symbol)
                .into_iter()
                .filter(|(venue, _, _)| self.params.venues.contains(venue))
                .collect();

            let mut best: Option<PairCandidate<'_>> = None;
            for buy in &fresh {
                for sell in &fresh {
                    if buy.0 == sell.0 {
                        continue;
                    }
                    let Some(candidate) = self.price_pair(ctx, buy, sell) else {
                        continue;
                    };
                    if best.as_ref().is_none_or(|b| candidate.beats(b)) {
                        best = Some(candidate);
                    }
                }
            }

            if let Some(op) = best.and_then(|winner| self.build(ctx, symbol, &fresh, winner)) {
                out.push(op);
            }
        }
        out
    }
}

impl SimpleCrossVenueStrategy {
    fn price_pair<'a>(
        &self,
        ctx: &ScanContext<'_>,
        buy: &'a (VenueId, TickerSnapshot, BookSnapshot),
        sell: &'a (VenueId, TickerSnapshot, BookSnapshot),
    ) -> Option<PairCandidate<'a>> {
        let buy_ask = buy.1.ask;
        let sell_bid = sell.1.bid;
        if buy_ask >= sell_bid {
            return None;
        }

        // Tradable size: liquidity consumable on both books inside the
        // depth caps, then the position cap, then the safety margin.
        let buy_liquidity =
            BookSnapshot::consumable_base(&buy.2.asks, DEPTH_QUOTE_CAP, DEPTH_BASE_CAP);
        let sell_liquidity =
            BookSnapshot::consumable_base(&sell.2.bids, DEPTH_QUOTE_CAP, DEPTH_BASE_CAP);
        let position_cap = self.params.max_position_quote / buy_ask;
        let size = (SAFETY_MARGIN * buy_liquidity.min(sell_liquidity).min(position_cap))
            .trunc_with_scale(ctx.venues.amount_precision(&buy.1.symbol));
        if size <= Decimal::ZERO {
            return None;
        }

        let spread_pct = (sell_bid - buy_ask) / buy_ask * Decimal::ONE_HUNDRED;
        let fee_pct = (ctx.venues.taker_rate(&buy.0) + ctx.venues.taker_rate(&sell.0))
            * Decimal::ONE_HUNDRED;
        let net_pct = spread_pct - fee_pct;
        if net_pct < self.params.min_profit_pct {
            trace!(
                buy = %buy.0,
                sell = %sell.0,
                net_pct = %net_pct,
                "spread below threshold after fees"
            );
            return None;
        }

        let net_quote = size * buy_ask * net_pct / Decimal::ONE_HUNDRED;
        Some(PairCandidate {
            buy,
            sell,
            size,
            net_quote,
            net_pct,
        })
    }

    fn build(
        &self,
        ctx: &ScanContext<'_>,
        symbol: &Symbol,
        fresh: &[(VenueId, TickerSnapshot, BookSnapshot)],
        winner: PairCandidate<'_>,
    ) -> Option<Opportunity> {
        let volume_quote = winner.size * winner.buy.1.ask;
        let buy_fee = volume_quote * ctx.venues.taker_rate(&winner.buy.0);
        let sell_fee = volume_quote * ctx.venues.taker_rate(&winner.sell.0);

        let legs = vec![
            OpportunityLeg {
                step_index: 1,
                venue: winner.buy.0.clone(),
                symbol: symbol.clone(),
                side: Side::Buy,
                amount: winner.size,
                reference_price: winner.buy.1.ask,
                fee_estimate: buy_fee,
                max_latency_ms: LEG_LATENCY_MS,
                order_type: LegOrderType::Limit,
            },
            OpportunityLeg {
                step_index: 2,
                venue: winner.sell.0.clone(),
                symbol: symbol.clone(),
                side: Side::Sell,
                amount: winner.size,
                reference_price: winner.sell.1.bid,
                fee_estimate: sell_fee,
                max_latency_ms: LEG_LATENCY_MS,
                order_type: LegOrderType::Limit,
            },
        ];

        let mut risks = Vec::new();
        if let Some(factor) = liquidity_factor(&[&winner.buy.1, &winner.sell.1]) {
            risks.push(factor);
        }
        let leg_venues = [&winner.buy.0, &winner.sell.0];
        if let Some(factor) =
            exchange_factor(leg_venues.iter().copied().filter_map(|id| ctx.venues.get(id)))
        {
            risks.push(factor);
        }

        let snapshot_times = [winner.buy.1.observed_at, winner.sell.1.observed_at];
        let confidence = confidence(ctx.now, &snapshot_times, fresh.len());

        Opportunity::try_new(
            OpportunityKind::Simple,
            symbol.clone(),
            legs,
            winner.net_quote,
            winner.net_pct,
            volume_quote,
            confidence,
            risks,
            ctx.now,
            expiry(ctx.now),
            self.name(),
        )
        .ok()
        .map(|op| op.with_partial_fills(self.params.enable_partial_fills))
    }
}
