//! Individual venue orders and their fill state.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::id::{ClientOrderId, ExternalOrderId, VenueId};
use super::money::{Amount, Price, Quote};
use super::symbol::Symbol;

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }

    /// The compensating direction.
    #[must_use]
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

/// Order status as observed from the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeStatus {
    /// Created locally, not yet acknowledged.
    Pending,
    /// Resting on the venue.
    Open,
    Filled,
    /// Partially filled, then terminal (cancelled remainder).
    Partial,
    Cancelled,
    Rejected,
}

impl TradeStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Open => "open",
            Self::Filled => "filled",
            Self::Partial => "partial",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Partial | Self::Cancelled | Self::Rejected
        )
    }
}

/// One order submitted (or planned) against a venue.
#[derive(Debug, Clone)]
pub struct Trade {
    pub venue: VenueId,
    pub symbol: Symbol,
    pub side: Side,
    pub requested_amount: Amount,
    pub requested_price: Option<Price>,
    pub filled_amount: Amount,
    pub average_fill_price: Price,
    pub fee: Quote,
    pub status: TradeStatus,
    pub client_order_id: ClientOrderId,
    pub external_order_id: Option<ExternalOrderId>,
    /// True for best-effort unwind orders issued during recovery.
    pub compensation: bool,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
}

impl Trade {
    /// A new locally created order, not yet submitted.
    #[must_use]
    pub fn new(
        venue: VenueId,
        symbol: Symbol,
        side: Side,
        requested_amount: Amount,
        requested_price: Option<Price>,
        client_order_id: ClientOrderId,
    ) -> Self {
        Self {
            venue,
            symbol,
            side,
            requested_amount,
            requested_price,
            filled_amount: Decimal::ZERO,
            average_fill_price: Decimal::ZERO,
            fee: Decimal::ZERO,
            status: TradeStatus::Pending,
            client_order_id,
            external_order_id: None,
            compensation: false,
            created_at: Utc::now(),
            filled_at: None,
        }
    }

    #[must_use]
    pub fn as_compensation(mut self) -> Self {
        self.compensation = true;
        self
    }

    /// Quote value actually filled.
    #[must_use]
    pub fn filled_notional(&self) -> Quote {
        self.filled_amount * self.average_fill_price
    }

    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.status == TradeStatus::Filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExecutionId;
    use rust_decimal_macros::dec;

    #[test]
    fn side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TradeStatus::Pending.is_terminal());
        assert!(!TradeStatus::Open.is_terminal());
        assert!(TradeStatus::Filled.is_terminal());
        assert!(TradeStatus::Partial.is_terminal());
        assert!(TradeStatus::Cancelled.is_terminal());
        assert!(TradeStatus::Rejected.is_terminal());
    }

    #[test]
    fn filled_notional() {
        let mut trade = Trade::new(
            VenueId::from("a"),
            Symbol::new("BTC", "USDT"),
            Side::Buy,
            dec!(1),
            Some(dec!(100)),
            ClientOrderId::for_leg(ExecutionId::generate(), 1),
        );
        trade.filled_amount = dec!(0.5);
        trade.average_fill_price = dec!(100);
        assert_eq!(trade.filled_notional(), dec!(50));
    }
}
