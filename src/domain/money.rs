//! Monetary types for price and amount representation.

use rust_decimal::Decimal;

/// Price in quote units, as a Decimal for precision.
pub type Price = Decimal;

/// Amount in base units.
pub type Amount = Decimal;

/// Notional value in quote units.
pub type Quote = Decimal;

/// Percentage of `part` relative to `basis`, as a Decimal (e.g. `0.4` = 0.4 %).
///
/// Returns zero when the basis is zero.
#[must_use]
pub fn pct_of(part: Decimal, basis: Decimal) -> Decimal {
    if basis.is_zero() {
        Decimal::ZERO
    } else {
        part / basis * Decimal::ONE_HUNDRED
    }
}
