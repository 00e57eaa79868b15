//! Per-(venue, asset) balances.

use rust_decimal::Decimal;

use super::money::Quote;

/// Funds held at a venue in one asset.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Balance {
    /// Available for new orders.
    pub free: Decimal,
    /// Reserved by open orders.
    pub locked: Decimal,
    /// Valuation in quote units at the last reconciliation.
    pub quote_value: Quote,
}

impl Balance {
    #[must_use]
    pub fn new(free: Decimal, locked: Decimal, quote_value: Quote) -> Self {
        Self {
            free,
            locked,
            quote_value,
        }
    }

    #[must_use]
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}
