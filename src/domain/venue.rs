//! Venue identity, fee schedules and trade limits.
//!
//! A [`Venue`] is immutable once loaded from configuration except for its
//! health, which is tracked separately in the [`VenueRegistry`] so readers
//! never contend with config data.

use std::collections::HashMap;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::id::{Asset, VenueId};
use super::money::Quote;
use super::symbol::{Symbol, SymbolPrecision};

/// Category of trading venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueKind {
    #[default]
    Spot,
    Perpetual,
    Dex,
    Demo,
}

/// Health of a venue connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VenueHealth {
    #[default]
    Active,
    Degraded,
    Down,
}

/// Trading fee schedule.
#[derive(Debug, Clone, Deserialize)]
pub struct FeeSchedule {
    #[serde(default = "default_fee_rate")]
    pub maker_rate: Decimal,
    #[serde(default = "default_fee_rate")]
    pub taker_rate: Decimal,
    /// Flat withdraw fee per asset, in units of that asset.
    #[serde(default)]
    pub withdraw_fees: HashMap<Asset, Decimal>,
}

fn default_fee_rate() -> Decimal {
    // 0.1 % when the venue publishes no schedule
    Decimal::new(1, 3)
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            maker_rate: default_fee_rate(),
            taker_rate: default_fee_rate(),
            withdraw_fees: HashMap::new(),
        }
    }
}

/// Per-venue trade size limits in quote units.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeLimits {
    #[serde(default = "default_min_order_quote")]
    pub min_order_quote: Quote,
    #[serde(default = "default_max_position_quote")]
    pub max_position_quote: Quote,
}

fn default_min_order_quote() -> Quote {
    Decimal::from(10)
}

fn default_max_position_quote() -> Quote {
    Decimal::from(10_000)
}

impl Default for TradeLimits {
    fn default() -> Self {
        Self {
            min_order_quote: default_min_order_quote(),
            max_position_quote: default_max_position_quote(),
        }
    }
}

/// A trading venue as loaded from configuration.
#[derive(Debug, Clone)]
pub struct Venue {
    id: VenueId,
    kind: VenueKind,
    fees: FeeSchedule,
    limits: TradeLimits,
    high_risk: bool,
}

impl Venue {
    #[must_use]
    pub fn new(id: VenueId, kind: VenueKind, fees: FeeSchedule, limits: TradeLimits) -> Self {
        Self {
            id,
            kind,
            fees,
            limits,
            high_risk: false,
        }
    }

    /// Flag the venue as high counterparty risk.
    #[must_use]
    pub fn with_high_risk(mut self, high_risk: bool) -> Self {
        self.high_risk = high_risk;
        self
    }

    #[must_use]
    pub fn id(&self) -> &VenueId {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> VenueKind {
        self.kind
    }

    #[must_use]
    pub fn fees(&self) -> &FeeSchedule {
        &self.fees
    }

    #[must_use]
    pub fn limits(&self) -> &TradeLimits {
        &self.limits
    }

    #[must_use]
    pub fn is_high_risk(&self) -> bool {
        self.high_risk
    }
}

/// Registry of configured venues plus their live health.
#[derive(Default)]
pub struct VenueRegistry {
    venues: HashMap<VenueId, Venue>,
    health: RwLock<HashMap<VenueId, VenueHealth>>,
    precisions: HashMap<Symbol, SymbolPrecision>,
}

impl VenueRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, venue: Venue) {
        self.health
            .write()
            .insert(venue.id().clone(), VenueHealth::Active);
        self.venues.insert(venue.id().clone(), venue);
    }

    #[must_use]
    pub fn get(&self, id: &VenueId) -> Option<&Venue> {
        self.venues.get(id)
    }

    #[must_use]
    pub fn venues(&self) -> impl Iterator<Item = &Venue> {
        self.venues.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.venues.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.venues.is_empty()
    }

    /// Taker fee rate for a venue, falling back to the default schedule.
    #[must_use]
    pub fn taker_rate(&self, id: &VenueId) -> Decimal {
        self.venues
            .get(id)
            .map_or_else(default_fee_rate, |v| v.fees().taker_rate)
    }

    pub fn set_precision(&mut self, symbol: Symbol, precision: SymbolPrecision) {
        self.precisions.insert(symbol, precision);
    }

    /// Decimal places allowed on order amounts for a symbol.
    #[must_use]
    pub fn amount_precision(&self, symbol: &Symbol) -> u32 {
        self.precisions
            .get(symbol)
            .copied()
            .unwrap_or_default()
            .amount
    }

    #[must_use]
    pub fn health(&self, id: &VenueId) -> VenueHealth {
        self.health
            .read()
            .get(id)
            .copied()
            .unwrap_or(VenueHealth::Down)
    }

    pub fn set_health(&self, id: &VenueId, health: VenueHealth) {
        self.health.write().insert(id.clone(), health);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_venue(id: &str) -> Venue {
        Venue::new(
            VenueId::from(id),
            VenueKind::Spot,
            FeeSchedule::default(),
            TradeLimits::default(),
        )
    }

    #[test]
    fn registry_tracks_health_separately() {
        let mut registry = VenueRegistry::new();
        registry.add(make_venue("a"));

        assert_eq!(registry.health(&VenueId::from("a")), VenueHealth::Active);

        registry.set_health(&VenueId::from("a"), VenueHealth::Degraded);
        assert_eq!(registry.health(&VenueId::from("a")), VenueHealth::Degraded);

        // Unknown venues read as down
        assert_eq!(registry.health(&VenueId::from("nope")), VenueHealth::Down);
    }

    #[test]
    fn taker_rate_falls_back_to_default() {
        let registry = VenueRegistry::new();
        assert_eq!(registry.taker_rate(&VenueId::from("missing")), dec!(0.001));
    }
}
