//! Triangular strategy: a closed three-hop cycle on a single venue.
//!
//! Both traversal directions are priced with the correct side per hop (ask
//! when buying the pair's base, bid when selling it); the more profitable
//! direction is proposed when its net percentage, after three per-leg fees,
//! clears the threshold.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::trace;

use crate::domain::{
    Asset, LegOrderType, Opportunity, OpportunityKind, OpportunityLeg, Price, Quote, Side,
    Symbol, TickerSnapshot, VenueId,
};

use super::{
    confidence, exchange_factor, expiry, liquidity_factor, timing_factor, ScanContext, Strategy,
    LEG_LATENCY_MS,
};

/// Parameters for one configured triangle.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriangularParams {
    pub venue: VenueId,
    /// Cycle assets, traversed first to last and back to the first.
    pub assets: [Asset; 3],
    /// The three pairs tradable on the venue for this cycle.
    pub symbols: Vec<Symbol>,
    pub min_profit_pct: Decimal,
    /// Cap on the first leg's notional.
    pub max_position_quote: Quote,
    #[serde(default)]
    pub enable_partial_fills: bool,
}

/// Triangular detector.
pub struct TriangularStrategy {
    params: TriangularParams,
}

impl TriangularStrategy {
    #[must_use]
    pub fn new(params: TriangularParams) -> Self {
        Self { params }
    }

    fn symbol_for(&self, from: &Asset, to: &Asset) -> Option<&Symbol> {
        self.params.symbols.iter().find(|s| s.connects(from, to))
    }
}

/// One hop of a traversal: which pair, which side, at what price.
struct Hop<'a> {
    symbol: &'a Symbol,
    side: Side,
    price: Price,
    fee_rate: Decimal,
}

impl Hop<'_> {
    /// Conversion rate from the hop's source asset to its target asset,
    /// before fees.
    fn rate(&self) -> Decimal {
        match self.side {
            Side::Buy => Decimal::ONE / self.price,
            Side::Sell => self.price,
        }
    }
}

impl Strategy for TriangularStrategy {
    fn name(&self) -> &'static str {
        "triangular"
    }

    fn kind(&self) -> OpportunityKind {
        OpportunityKind::Triangular
    }

    fn scan(&self, ctx: &ScanContext<'_>) -> Vec<Opportunity> {
        let [a, b, c] = &self.params.assets;

        let mut tickers = Vec::with_capacity(3);
        for symbol in &self.params.symbols {
            match ctx.cache.get_ticker(&self.params.venue, symbol) {
                Some(ticker) => tickers.push(ticker),
                None => {
                    trace!(venue = %self.params.venue, symbol = %symbol, "triangle missing fresh ticker");
                    return Vec::new();
                }
            }
        }

        let forward = [(a, b), (b, c), (c, a)];
        let reverse = [(a, c), (c, b), (b, a)];

        let forward_hops = self.resolve(ctx, &tickers, &forward);
        let reverse_hops = self.resolve(ctx, &tickers, &reverse);

        let best = match (forward_hops, reverse_hops) {
            (Some(f), Some(r)) => {
                if net_multiplier(&f) >= net_multiplier(&r) {
                    Some(f)
                } else {
                    Some(r)
                }
            }
            (f, r) => f.or(r),
        };

        let Some(hops) = best else {
            return Vec::new();
        };

        let net_pct = (net_multiplier(&hops) - Decimal::ONE) * Decimal::ONE_HUNDRED;
        if net_pct < self.params.min_profit_pct {
            return Vec::new();
        }

        self.build(ctx, &tickers, hops, net_pct)
            .into_iter()
            .collect()
    }
}

fn net_multiplier(hops: &[Hop<'_>; 3]) -> Decimal {
    hops.iter()
        .map(|h| h.rate() * (Decimal::ONE - h.fee_rate))
        .fold(Decimal::ONE, |acc, r| acc * r)
}

impl TriangularStrategy {
    fn resolve<'a>(
        &'a self,
        ctx: &ScanContext<'_>,
        tickers: &'a [TickerSnapshot],
        path: &[(&Asset, &Asset); 3],
    ) -> Option<[Hop<'a>; 3]> {
        let fee_rate = ctx.venues.taker_rate(&self.params.venue);
        let mut hops = Vec::with_capacity(3);
        for &(from, to) in path {
            let symbol = self.symbol_for(from, to)?;
            let ticker = tickers.iter().find(|t| &t.symbol == symbol)?;
            let (side, price) = if symbol.base() == to {
                (Side::Buy, ticker.ask)
            } else {
                (Side::Sell, ticker.bid)
            };
            hops.push(Hop {
                symbol,
                side,
                price,
                fee_rate,
            });
        }
        hops.try_into().ok()
    }

    fn build(
        &self,
        ctx: &ScanContext<'_>,
        tickers: &[TickerSnapshot],
        hops: [Hop<'_>; 3],
        net_pct: Decimal,
    ) -> Option<Opportunity> {
        // Starting stake, bounded by the first hop's notional cap.
        let start = match hops[0].side {
            Side::Buy => self.params.max_position_quote,
            Side::Sell => self.params.max_position_quote / hops[0].price,
        };
        if start <= Decimal::ZERO {
            return None;
        }

        // Propagate proceeds hop by hop so each leg's size reflects what the
        // prior leg actually yields.
        // TODO: confirm with trading ops that sizing the final leg from
        // intermediate proceeds matches their profit accounting.
        let mut holding = start;
        let mut legs = Vec::with_capacity(3);
        for (index, hop) in hops.iter().enumerate() {
            let (amount, fee_estimate, next_holding) = match hop.side {
                Side::Buy => {
                    let amount = holding / hop.price;
                    let fee = holding * hop.fee_rate;
                    (amount, fee, amount * (Decimal::ONE - hop.fee_rate))
                }
                Side::Sell => {
                    let gross = holding * hop.price;
                    let fee = gross * hop.fee_rate;
                    (holding, fee, gross - fee)
                }
            };
            legs.push(OpportunityLeg {
                step_index: index as u32 + 1,
                venue: self.params.venue.clone(),
                symbol: hop.symbol.clone(),
                side: hop.side,
                amount,
                reference_price: hop.price,
                fee_estimate,
                max_latency_ms: LEG_LATENCY_MS,
                order_type: LegOrderType::Limit,
            });
            holding = next_holding;
        }

        let projected_profit = holding - start;

        let mut risks = vec![timing_factor()];
        let ticker_refs: Vec<&TickerSnapshot> = tickers.iter().collect();
        if let Some(factor) = liquidity_factor(&ticker_refs) {
            risks.push(factor);
        }
        if let Some(factor) = exchange_factor(ctx.venues.get(&self.params.venue).into_iter()) {
            risks.push(factor);
        }

        let snapshot_times: Vec<DateTime<Utc>> =
            tickers.iter().map(|t| t.observed_at).collect();
        let confidence = confidence(ctx.now, &snapshot_times, tickers.len());

        let primary = legs[0].symbol.clone();
        Opportunity::try_new(
            OpportunityKind::Triangular,
            primary,
            legs,
            projected_profit,
            net_pct,
            start,
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
