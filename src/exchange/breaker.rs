//! Per-venue circuit breaker.
//!
//! Opens after a threshold of venue failures inside a sliding window; while
//! open, the risk gate refuses any leg on that venue. After the open period
//! a single probe is allowed through (half-open); its outcome closes or
//! re-opens the breaker.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::domain::VenueId;

/// Breaker thresholds.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures inside `window` that open the breaker.
    pub failure_threshold: usize,
    pub window: Duration,
    /// How long the breaker stays open before allowing a probe.
    pub open_for: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(300),
            open_for: Duration::from_secs(600),
        }
    }
}

#[derive(Debug)]
enum BreakerState {
    Closed { failures: VecDeque<DateTime<Utc>> },
    Open { since: DateTime<Utc> },
    HalfOpen,
}

/// Breaker for a single venue.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed {
                failures: VecDeque::new(),
            },
        }
    }

    /// Whether calls to the venue should be refused right now.
    ///
    /// An open breaker past its open period moves to half-open, admitting
    /// one probe.
    pub fn is_open(&mut self, now: DateTime<Utc>) -> bool {
        if let BreakerState::Open { since } = self.state {
            let elapsed = (now - since).to_std().unwrap_or(Duration::ZERO);
            if elapsed >= self.config.open_for {
                self.state = BreakerState::HalfOpen;
                return false;
            }
            return true;
        }
        false
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        match &mut self.state {
            BreakerState::Closed { failures } => {
                failures.push_back(now);
                let window = chrono::Duration::from_std(self.config.window)
                    .unwrap_or_else(|_| chrono::Duration::seconds(300));
                while let Some(first) = failures.front() {
                    if now - *first > window {
                        failures.pop_front();
                    } else {
                        break;
                    }
                }
                if failures.len() >= self.config.failure_threshold {
                    self.state = BreakerState::Open { since: now };
                }
            }
            // A failed probe re-opens for a full period.
            BreakerState::HalfOpen => {
                self.state = BreakerState::Open { since: now };
            }
            BreakerState::Open { .. } => {}
        }
    }

    pub fn record_success(&mut self) {
        if matches!(self.state, BreakerState::HalfOpen) {
            self.state = BreakerState::Closed {
                failures: VecDeque::new(),
            };
        }
    }
}

/// Breakers for all configured venues.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<VenueId, CircuitBreaker>>,
}

impl BreakerRegistry {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_failure(&self, venue: &VenueId) {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(venue.clone())
            .or_insert_with(|| CircuitBreaker::new(self.config.clone()));
        let was_open = breaker.is_open(Utc::now());
        breaker.record_failure(Utc::now());
        if !was_open && breaker.is_open(Utc::now()) {
            warn!(venue = %venue, "circuit breaker opened");
        }
    }

    pub fn record_success(&self, venue: &VenueId) {
        if let Some(breaker) = self.breakers.lock().get_mut(venue) {
            let was_open = matches!(breaker.state, BreakerState::HalfOpen);
            breaker.record_success();
            if was_open {
                info!(venue = %venue, "circuit breaker closed after probe");
            }
        }
    }

    #[must_use]
    pub fn is_open(&self, venue: &VenueId) -> bool {
        self.breakers
            .lock()
            .get_mut(venue)
            .is_some_and(|b| b.is_open(Utc::now()))
    }

    /// Venues currently refusing legs; fed into the risk gate snapshot.
    #[must_use]
    pub fn open_venues(&self) -> HashSet<VenueId> {
        let now = Utc::now();
        let mut open = HashSet::new();
        for (id, b) in self.breakers.lock().iter_mut() {
            if b.is_open(now) {
                open.insert(id.clone());
            }
        }
        open
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            window: Duration::from_secs(300),
            open_for: Duration::from_secs(600),
        }
    }

    #[test]
    fn opens_after_threshold_failures() {
        let mut breaker = CircuitBreaker::new(config());
        let now = Utc::now();

        breaker.record_failure(now);
        breaker.record_failure(now);
        assert!(!breaker.is_open(now));

        breaker.record_failure(now);
        assert!(breaker.is_open(now));
    }

    #[test]
    fn failures_outside_window_do_not_count() {
        let mut breaker = CircuitBreaker::new(config());
        let start = Utc::now();

        breaker.record_failure(start);
        breaker.record_failure(start);
        // Third failure lands after the first two slid out of the window.
        let later = start + chrono::Duration::seconds(400);
        breaker.record_failure(later);
        assert!(!breaker.is_open(later));
    }

    #[test]
    fn half_open_probe_success_closes() {
        let mut breaker = CircuitBreaker::new(config());
        let now = Utc::now();
        for _ in 0..3 {
            breaker.record_failure(now);
        }
        assert!(breaker.is_open(now));

        let probe_time = now + chrono::Duration::seconds(601);
        assert!(!breaker.is_open(probe_time));
        breaker.record_success();
        assert!(!breaker.is_open(probe_time + chrono::Duration::seconds(1)));
    }

    #[test]
    fn half_open_probe_failure_reopens() {
        let mut breaker = CircuitBreaker::new(config());
        let now = Utc::now();
        for _ in 0..3 {
            breaker.record_failure(now);
        }
        let probe_time = now + chrono::Duration::seconds(601);
        assert!(!breaker.is_open(probe_time));
        breaker.record_failure(probe_time);
        assert!(breaker.is_open(probe_time + chrono::Duration::seconds(1)));
    }

    #[test]
    fn registry_reports_open_venues() {
        let registry = BreakerRegistry::new(config());
        let venue = VenueId::from("flaky");
        for _ in 0..3 {
            registry.record_failure(&venue);
        }
        assert!(registry.is_open(&venue));
        assert!(registry.open_venues().contains(&venue));
        assert!(!registry.is_open(&VenueId::from("healthy")));
    }
}
