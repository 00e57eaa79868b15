//! Venue adapter contract.
//!
//! The core never talks to a venue directly; it consumes the
//! [`VenueAdapter`] trait. Production adapters live outside this crate —
//! the in-tree [`DemoVenue`] implements the same contract for demo mode,
//! health checks and tests.
//!
//! [`InstrumentedVenue`] wraps an adapter with the cross-cutting policies
//! every caller needs: a token-bucket rate limit, retry with exponential
//! backoff for transient failures, and circuit breaker bookkeeping.

mod backoff;
mod breaker;
mod demo;
mod limiter;

pub use backoff::RetryPolicy;
pub use breaker::{BreakerConfig, BreakerRegistry, CircuitBreaker};
pub use demo::{DemoVenue, FillMode};
pub use limiter::TokenBucket;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{
    Amount, Asset, Balance, BookSnapshot, ClientOrderId, ExternalOrderId, FundingSnapshot,
    Price, Side, Symbol, TickerSnapshot, TradeStatus, VenueId,
};

/// Typed venue failure, per the propagation policy each kind gets.
#[derive(Error, Debug, Clone)]
pub enum VenueError {
    /// Reachability or transport failure; retried with backoff.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Venue asked us to slow down; retried after the hint.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Credentials rejected; fatal.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Protocol-level failure that will not heal on retry.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Unknown symbol or order id.
    #[error("not found: {0}")]
    NotFound(String),
}

impl VenueError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }

    /// Failures that count toward the venue circuit breaker.
    #[must_use]
    pub fn trips_breaker(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::RateLimited { .. } | Self::Permanent(_)
        )
    }
}

/// Order type supported by the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Limit,
    Market,
}

/// An order submission.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    /// Idempotency key; resubmitting the same id must not create a second
    /// venue order.
    pub client_order_id: ClientOrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub amount: Amount,
    /// Required for limit orders.
    pub price: Option<Price>,
}

/// Observed state of a venue order.
#[derive(Debug, Clone)]
pub struct OrderState {
    pub status: TradeStatus,
    pub filled_amount: Amount,
    pub average_fill_price: Price,
    pub fee: Price,
}

/// Uniform access to one venue.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue_id(&self) -> &VenueId;

    async fn fetch_ticker(&self, symbol: &Symbol) -> Result<TickerSnapshot, VenueError>;

    async fn fetch_book(&self, symbol: &Symbol, depth: usize) -> Result<BookSnapshot, VenueError>;

    async fn fetch_balances(&self) -> Result<HashMap<Asset, Balance>, VenueError>;

    async fn place_order(&self, request: &OrderRequest) -> Result<ExternalOrderId, VenueError>;

    async fn cancel_order(
        &self,
        order_id: &ExternalOrderId,
        symbol: &Symbol,
    ) -> Result<(), VenueError>;

    /// Observe an order previously placed on this venue.
    async fn fetch_order(
        &self,
        order_id: &ExternalOrderId,
        symbol: &Symbol,
    ) -> Result<OrderState, VenueError>;

    /// Current funding rate; `Ok(None)` on venues without perpetuals.
    async fn funding_rate(&self, symbol: &Symbol) -> Result<Option<FundingSnapshot>, VenueError>;

    async fn health_check(&self) -> Result<(), VenueError>;
}

/// Adapter wrapper applying rate limiting, retry and breaker accounting.
pub struct InstrumentedVenue {
    inner: Arc<dyn VenueAdapter>,
    limiter: TokenBucket,
    retry: RetryPolicy,
    breakers: Arc<BreakerRegistry>,
}

impl InstrumentedVenue {
    #[must_use]
    pub fn new(
        inner: Arc<dyn VenueAdapter>,
        limiter: TokenBucket,
        retry: RetryPolicy,
        breakers: Arc<BreakerRegistry>,
    ) -> Self {
        Self {
            inner,
            limiter,
            retry,
            breakers,
        }
    }

    #[must_use]
    pub fn venue_id(&self) -> &VenueId {
        self.inner.venue_id()
    }

    fn admit(&self) -> Result<(), VenueError> {
        self.limiter.try_acquire(1.0).map_err(|wait| VenueError::RateLimited {
            retry_after: Some(wait),
        })
    }

    fn record(&self, outcome: &Result<impl Sized, VenueError>) {
        match outcome {
            Ok(_) => self.breakers.record_success(self.inner.venue_id()),
            Err(e) if e.trips_breaker() => self.breakers.record_failure(self.inner.venue_id()),
            Err(_) => {}
        }
    }

    pub async fn place_order(
        &self,
        request: &OrderRequest,
    ) -> Result<ExternalOrderId, VenueError> {
        self.admit()?;
        let result = self
            .retry
            .run(|| self.inner.place_order(request))
            .await;
        self.record(&result);
        result
    }

    pub async fn cancel_order(
        &self,
        order_id: &ExternalOrderId,
        symbol: &Symbol,
    ) -> Result<(), VenueError> {
        // Cancels skip the limiter: holding an orphan order open is worse
        // than briefly exceeding the request budget.
        let result = self
            .retry
            .run(|| self.inner.cancel_order(order_id, symbol))
            .await;
        self.record(&result);
        result
    }

    pub async fn fetch_order(
        &self,
        order_id: &ExternalOrderId,
        symbol: &Symbol,
    ) -> Result<OrderState, VenueError> {
        let result = self.inner.fetch_order(order_id, symbol).await;
        self.record(&result);
        result
    }

    pub async fn fetch_balances(&self) -> Result<HashMap<Asset, Balance>, VenueError> {
        self.admit()?;
        let result = self.retry.run(|| self.inner.fetch_balances()).await;
        self.record(&result);
        result
    }

    pub async fn health_check(&self) -> Result<(), VenueError> {
        self.inner.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(VenueError::Transient("dns".into()).is_retryable());
        assert!(VenueError::RateLimited { retry_after: None }.is_retryable());
        assert!(!VenueError::Auth("bad key".into()).is_retryable());
        assert!(!VenueError::Permanent("bad symbol".into()).is_retryable());
        assert!(!VenueError::NotFound("order".into()).is_retryable());
    }

    #[test]
    fn auth_does_not_trip_breaker() {
        assert!(!VenueError::Auth("bad key".into()).trips_breaker());
        assert!(VenueError::Permanent("oops".into()).trips_breaker());
    }
}
