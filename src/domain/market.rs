//! Market observation snapshots: tickers, order books, funding rates.
//!
//! Snapshots are immutable value types. Validation lives in `try_new` and
//! [`BookSnapshot::validate`]; the market data cache re-checks book ordering
//! on insert so malformed feeds are rejected rather than poisoning scans.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::error::DomainError;
use super::id::VenueId;
use super::money::{Amount, Price, Quote};
use super::symbol::Symbol;

/// Maximum order book levels retained per side.
pub const MAX_BOOK_LEVELS: usize = 20;

/// Top-of-book ticker observation for one (venue, symbol).
#[derive(Debug, Clone, PartialEq)]
pub struct TickerSnapshot {
    pub venue: VenueId,
    pub symbol: Symbol,
    pub bid: Price,
    pub ask: Price,
    pub last: Price,
    /// 24 h traded volume in quote units.
    pub volume: Quote,
    pub change_24h: Decimal,
    pub observed_at: DateTime<Utc>,
}

impl TickerSnapshot {
    /// Validating constructor: requires `0 < bid <= ask`.
    pub fn try_new(
        venue: VenueId,
        symbol: Symbol,
        bid: Price,
        ask: Price,
        last: Price,
        volume: Quote,
        change_24h: Decimal,
        observed_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if bid <= Decimal::ZERO || bid > ask {
            return Err(DomainError::InvalidQuote { bid, ask });
        }
        Ok(Self {
            venue,
            symbol,
            bid,
            ask,
            last,
            volume,
            change_24h,
            observed_at,
        })
    }

    /// Age of the snapshot relative to `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.observed_at
    }
}

/// One price level of an order book side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookLevel {
    pub price: Price,
    pub size: Amount,
}

impl BookLevel {
    #[must_use]
    pub const fn new(price: Price, size: Amount) -> Self {
        Self { price, size }
    }
}

/// Depth-of-book observation for one (venue, symbol).
///
/// Bids are ordered best-first (strictly decreasing price), asks likewise
/// (strictly increasing), and the book must not be crossed.
#[derive(Debug, Clone, PartialEq)]
pub struct BookSnapshot {
    pub venue: VenueId,
    pub symbol: Symbol,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub observed_at: DateTime<Utc>,
}

impl BookSnapshot {
    /// Unvalidated constructor. Sides are truncated to [`MAX_BOOK_LEVELS`].
    #[must_use]
    pub fn new(
        venue: VenueId,
        symbol: Symbol,
        mut bids: Vec<BookLevel>,
        mut asks: Vec<BookLevel>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        bids.truncate(MAX_BOOK_LEVELS);
        asks.truncate(MAX_BOOK_LEVELS);
        Self {
            venue,
            symbol,
            bids,
            asks,
            observed_at,
        }
    }

    /// Validating constructor.
    pub fn try_new(
        venue: VenueId,
        symbol: Symbol,
        bids: Vec<BookLevel>,
        asks: Vec<BookLevel>,
        observed_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let book = Self::new(venue, symbol, bids, asks, observed_at);
        book.validate()?;
        Ok(book)
    }

    /// Check the ordering invariants.
    pub fn validate(&self) -> Result<(), DomainError> {
        for pair in self.bids.windows(2) {
            if pair[1].price >= pair[0].price {
                return Err(DomainError::UnorderedBook {
                    side: "bids",
                    prev: pair[0].price,
                    next: pair[1].price,
                });
            }
        }
        for pair in self.asks.windows(2) {
            if pair[1].price <= pair[0].price {
                return Err(DomainError::UnorderedBook {
                    side: "asks",
                    prev: pair[0].price,
                    next: pair[1].price,
                });
            }
        }
        if let (Some(bid), Some(ask)) = (self.bids.first(), self.asks.first()) {
            if bid.price >= ask.price {
                return Err(DomainError::CrossedBook {
                    bid: bid.price,
                    ask: ask.price,
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.bids.first()
    }

    #[must_use]
    pub fn best_ask(&self) -> Option<&BookLevel> {
        self.asks.first()
    }

    /// Base amount consumable from a side before hitting either the quote
    /// depth cap or the base depth cap, whichever binds first.
    #[must_use]
    pub fn consumable_base(side: &[BookLevel], quote_cap: Quote, base_cap: Amount) -> Amount {
        let mut base = Decimal::ZERO;
        let mut quote = Decimal::ZERO;
        for level in side {
            if level.price <= Decimal::ZERO {
                break;
            }
            let base_room = base_cap - base;
            if base_room <= Decimal::ZERO {
                break;
            }
            let quote_room = quote_cap - quote;
            if quote_room <= Decimal::ZERO {
                break;
            }
            // Take as much of this level as both caps allow.
            let take = level
                .size
                .min(base_room)
                .min(quote_room / level.price);
            base += take;
            quote += take * level.price;
            if take < level.size {
                break;
            }
        }
        base
    }

    /// Cumulative base size available within the first `levels` levels of a side.
    #[must_use]
    pub fn depth_base(side: &[BookLevel], levels: usize) -> Amount {
        side.iter().take(levels).map(|l| l.size).sum()
    }
}

/// Funding rate observation for a perpetual (venue, symbol).
#[derive(Debug, Clone, PartialEq)]
pub struct FundingSnapshot {
    pub venue: VenueId,
    pub symbol: Symbol,
    /// Per-period rate as a fraction (e.g. `0.0001` = 1 bp per period).
    pub rate: Decimal,
    /// Funding periods per year (3 per day on 8 h venues = 1095).
    pub periods_per_year: u32,
    pub observed_at: DateTime<Utc>,
}

impl FundingSnapshot {
    /// Annualized funding in percent.
    #[must_use]
    pub fn annualized_pct(&self) -> Decimal {
        self.rate * Decimal::from(self.periods_per_year) * Decimal::ONE_HUNDRED
    }
}
