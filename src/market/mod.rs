//! Market data cache.
//!
//! The single source of truth for the scanner: adapters push snapshots in,
//! the scanner and risk gate read them out. Per (venue, symbol) the cache
//! keeps only the latest ticker, book and funding observation; updates that
//! do not advance `observed_at` are dropped, so readers never observe time
//! going backwards.
//!
//! Price and volume anomalies are derived synchronously inside
//! [`MarketDataCache::put_ticker`] but delivered over a broadcast channel,
//! so observers run in their own tasks and cannot mutate cache state.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::{
    BookSnapshot, DomainError, FundingSnapshot, Price, Quote, Symbol, TickerSnapshot, VenueId,
};

/// Default age beyond which a snapshot is excluded from scanning.
pub const STALE_AFTER: Duration = Duration::from_secs(10);

/// Funding moves on a scale of hours; it gets a wider freshness window.
pub const FUNDING_STALE_AFTER: Duration = Duration::from_secs(3600);

/// Relative last-price move that raises a price alert (1 %).
const PRICE_ALERT_PCT: Decimal = Decimal::ONE;

/// Volume multiple over the prior snapshot that raises a spike (2x).
const VOLUME_SPIKE_MULT: Decimal = Decimal::TWO;

/// Anomaly derived while ingesting a ticker.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    PriceAlert {
        venue: VenueId,
        symbol: Symbol,
        previous: Price,
        current: Price,
        change_pct: Decimal,
    },
    VolumeSpike {
        venue: VenueId,
        symbol: Symbol,
        previous: Quote,
        current: Quote,
    },
}

/// Outcome of a put: whether the snapshot replaced the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// Older than (or equal to) the stored snapshot; dropped.
    Superseded,
}

#[derive(Default)]
struct PairSlot {
    ticker: Option<TickerSnapshot>,
    book: Option<BookSnapshot>,
    funding: Option<FundingSnapshot>,
}

type PairKey = (VenueId, Symbol);

/// Latest-snapshot store per (venue, symbol).
pub struct MarketDataCache {
    pairs: RwLock<HashMap<PairKey, PairSlot>>,
    stale_after: chrono::Duration,
    funding_stale_after: chrono::Duration,
    events: Option<broadcast::Sender<MarketEvent>>,
}

impl MarketDataCache {
    /// Cache with default staleness and no event channel.
    #[must_use]
    pub fn new() -> Self {
        Self::with_stale_after(STALE_AFTER)
    }

    #[must_use]
    pub fn with_stale_after(stale_after: Duration) -> Self {
        Self {
            pairs: RwLock::new(HashMap::new()),
            stale_after: chrono::Duration::from_std(stale_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(10)),
            funding_stale_after: chrono::Duration::from_std(FUNDING_STALE_AFTER)
                .unwrap_or_else(|_| chrono::Duration::hours(1)),
            events: None,
        }
    }

    /// Cache that broadcasts derived market events.
    #[must_use]
    pub fn with_events(capacity: usize) -> (Self, broadcast::Receiver<MarketEvent>) {
        let (tx, rx) = broadcast::channel(capacity);
        let mut cache = Self::new();
        cache.events = Some(tx);
        (cache, rx)
    }

    /// Subscribe to derived market events, if the cache has a channel.
    #[must_use]
    pub fn subscribe(&self) -> Option<broadcast::Receiver<MarketEvent>> {
        self.events.as_ref().map(|tx| tx.subscribe())
    }

    /// Ingest a ticker. Returns whether it was stored or dropped as stale.
    pub fn put_ticker(&self, ticker: TickerSnapshot) -> PutOutcome {
        let key = (ticker.venue.clone(), ticker.symbol.clone());
        let mut events = Vec::new();

        let outcome = {
            let mut pairs = self.pairs.write();
            let slot = pairs.entry(key).or_default();

            if let Some(prior) = &slot.ticker {
                if ticker.observed_at <= prior.observed_at {
                    return PutOutcome::Superseded;
                }
                if prior.last > Decimal::ZERO {
                    let change_pct = ((ticker.last - prior.last) / prior.last
                        * Decimal::ONE_HUNDRED)
                        .abs();
                    if change_pct > PRICE_ALERT_PCT {
                        events.push(MarketEvent::PriceAlert {
                            venue: ticker.venue.clone(),
                            symbol: ticker.symbol.clone(),
                            previous: prior.last,
                            current: ticker.last,
                            change_pct,
                        });
                    }
                }
                if prior.volume > Decimal::ZERO && ticker.volume > prior.volume * VOLUME_SPIKE_MULT
                {
                    events.push(MarketEvent::VolumeSpike {
                        venue: ticker.venue.clone(),
                        symbol: ticker.symbol.clone(),
                        previous: prior.volume,
                        current: ticker.volume,
                    });
                }
            }

            slot.ticker = Some(ticker);
            PutOutcome::Stored
        };

        // Dispatch outside the lock; receivers run in their own tasks.
        if let Some(tx) = &self.events {
            for event in events {
                let _ = tx.send(event);
            }
        }
        outcome
    }

    /// Ingest a book. Malformed books are rejected for the caller to log
    /// and discard; stale books are silently dropped.
    pub fn put_book(&self, book: BookSnapshot) -> Result<PutOutcome, DomainError> {
        book.validate()?;
        let key = (book.venue.clone(), book.symbol.clone());
        let mut pairs = self.pairs.write();
        let slot = pairs.entry(key).or_default();

        if let Some(prior) = &slot.book {
            if book.observed_at <= prior.observed_at {
                return Ok(PutOutcome::Superseded);
            }
        }
        slot.book = Some(book);
        Ok(PutOutcome::Stored)
    }

    /// Ingest a funding observation.
    pub fn put_funding(&self, funding: FundingSnapshot) -> PutOutcome {
        let key = (funding.venue.clone(), funding.symbol.clone());
        let mut pairs = self.pairs.write();
        let slot = pairs.entry(key).or_default();

        if let Some(prior) = &slot.funding {
            if funding.observed_at <= prior.observed_at {
                return PutOutcome::Superseded;
            }
        }
        slot.funding = Some(funding);
        PutOutcome::Stored
    }

    /// Latest ticker, unless missing or stale.
    #[must_use]
    pub fn get_ticker(&self, venue: &VenueId, symbol: &Symbol) -> Option<TickerSnapshot> {
        let now = Utc::now();
        self.pairs
            .read()
            .get(&(venue.clone(), symbol.clone()))
            .and_then(|slot| slot.ticker.clone())
            .filter(|t| now - t.observed_at < self.stale_after)
    }

    /// Latest book, unless missing or stale.
    #[must_use]
    pub fn get_book(&self, venue: &VenueId, symbol: &Symbol) -> Option<BookSnapshot> {
        let now = Utc::now();
        self.pairs
            .read()
            .get(&(venue.clone(), symbol.clone()))
            .and_then(|slot| slot.book.clone())
            .filter(|b| now - b.observed_at < self.stale_after)
    }

    /// Latest funding, under the funding freshness window.
    #[must_use]
    pub fn get_funding(&self, venue: &VenueId, symbol: &Symbol) -> Option<FundingSnapshot> {
        let now = Utc::now();
        self.pairs
            .read()
            .get(&(venue.clone(), symbol.clone()))
            .and_then(|slot| slot.funding.clone())
            .filter(|f| now - f.observed_at < self.funding_stale_after)
    }

    /// All venues holding a fresh ticker and a fresh book for `symbol`,
    /// sorted by venue id for deterministic scans.
    #[must_use]
    pub fn list_fresh(&self, symbol: &Symbol) -> Vec<(VenueId, TickerSnapshot, BookSnapshot)> {
        let now = Utc::now();
        let pairs = self.pairs.read();
        let mut fresh: Vec<_> = pairs
            .iter()
            .filter(|((_, s), _)| s == symbol)
            .filter_map(|((venue, _), slot)| {
                let ticker = slot
                    .ticker
                    .clone()
                    .filter(|t| now - t.observed_at < self.stale_after)?;
                let book = slot
                    .book
                    .clone()
                    .filter(|b| now - b.observed_at < self.stale_after)?;
                Some((venue.clone(), ticker, book))
            })
            .collect();
        fresh.sort_by(|a, b| a.0.cmp(&b.0));
        debug!(symbol = %symbol, venues = fresh.len(), "fresh snapshot pairs");
        fresh
    }
}

impl Default for MarketDataCache {
    fn default() -> Self {
        Self::new()
    }
}
