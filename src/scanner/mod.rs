//! Opportunity scanner.
//!
//! Periodic driver over the strategy registry. Each tick runs the enabled
//! strategies in configuration order, deduplicates candidates by structural
//! fingerprint, enforces the active-set cap, and hands newly stored
//! candidates downstream. A slower sweep expires candidates past their TTL.
//!
//! `pause` suspends ticks but preserves the active set; `stop` clears it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::{Fingerprint, Opportunity, OpportunityId, OpportunityStatus, VenueRegistry};
use crate::market::MarketDataCache;
use crate::service::Event;
use crate::strategy::{ScanContext, StrategyRegistry};

/// Scanner timing and capacity settings.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub scan_period: Duration,
    pub sweep_period: Duration,
    pub max_active: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scan_period: Duration::from_secs(1),
            sweep_period: Duration::from_secs(5),
            max_active: 50,
        }
    }
}

struct ScannerInner {
    config: ScannerConfig,
    strategies: StrategyRegistry,
    cache: Arc<MarketDataCache>,
    venues: Arc<VenueRegistry>,
    active: Mutex<HashMap<Fingerprint, Opportunity>>,
    paused: AtomicBool,
    candidates: mpsc::Sender<Opportunity>,
    events: broadcast::Sender<Event>,
}

/// Periodic candidate synthesis driver.
pub struct OpportunityScanner {
    inner: Arc<ScannerInner>,
}

impl OpportunityScanner {
    #[must_use]
    pub fn new(
        config: ScannerConfig,
        strategies: StrategyRegistry,
        cache: Arc<MarketDataCache>,
        venues: Arc<VenueRegistry>,
        candidates: mpsc::Sender<Opportunity>,
        events: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            inner: Arc::new(ScannerInner {
                config,
                strategies,
                cache,
                venues,
                active: Mutex::new(HashMap::new()),
                paused: AtomicBool::new(false),
                candidates,
                events,
            }),
        }
    }

    /// Spawn the tick and sweep loops. They run until `stop` flips true.
    pub fn start(&self, stop: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(
            strategies = ?self.inner.strategies.names(),
            period_ms = self.inner.config.scan_period.as_millis() as u64,
            "scanner starting"
        );
        let tick_inner = Arc::clone(&self.inner);
        let mut tick_stop = stop.clone();
        let tick = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_inner.config.scan_period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if !tick_inner.paused.load(Ordering::SeqCst) {
                            tick_inner.run_tick().await;
                        }
                    }
                    changed = tick_stop.changed() => {
                        if changed.is_err() || *tick_stop.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        let sweep_inner = Arc::clone(&self.inner);
        let mut sweep_stop = stop;
        let sweep = tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_inner.config.sweep_period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => sweep_inner.run_sweep(),
                    changed = sweep_stop.changed() => {
                        if changed.is_err() || *sweep_stop.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        vec![tick, sweep]
    }

    /// Suspend ticks, preserving the active set.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        info!("scanner paused");
    }

    /// Resume ticking immediately.
    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        info!("scanner resumed");
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Clear the active set; used on shutdown.
    pub fn clear(&self) {
        self.inner.active.lock().clear();
    }

    /// Number of live candidates.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.active.lock().len()
    }

    /// Take ownership of a candidate, removing it from the active set.
    /// Called when the gate moves it onward (or rejects it).
    #[must_use]
    pub fn take(&self, id: OpportunityId) -> Option<Opportunity> {
        let mut active = self.inner.active.lock();
        let fingerprint = active
            .iter()
            .find(|(_, op)| op.id() == id)
            .map(|(fp, _)| fp.clone())?;
        active.remove(&fingerprint)
    }

    /// One synchronous scan pass; exposed for tests.
    pub async fn run_tick_now(&self) {
        self.inner.run_tick().await;
    }

    /// One synchronous expiry sweep; exposed for tests.
    pub fn run_sweep_now(&self) {
        self.inner.run_sweep();
    }
}

impl ScannerInner {
    async fn run_tick(&self) {
        let ctx = ScanContext::new(&self.cache, &self.venues);
        let found = self.strategies.scan_all(&ctx);
        if found.is_empty() {
            return;
        }

        let mut stored = Vec::new();
        {
            let mut active = self.active.lock();
            for candidate in found {
                let fingerprint = candidate.fingerprint();

                if let Some(existing) = active.get(&fingerprint) {
                    // Same shape already live: keep the higher net.
                    if existing.projected_profit_quote() >= candidate.projected_profit_quote() {
                        continue;
                    }
                }

                if !active.contains_key(&fingerprint) && active.len() >= self.config.max_active {
                    // Evict the lowest-net live candidate to make room.
                    let weakest = active
                        .iter()
                        .min_by_key(|(_, op)| op.projected_profit_quote())
                        .map(|(fp, _)| fp.clone());
                    match weakest {
                        Some(fp)
                            if active[&fp].projected_profit_quote()
                                < candidate.projected_profit_quote() =>
                        {
                            debug!(fingerprint = %fp, "evicting lowest-net candidate");
                            active.remove(&fp);
                        }
                        _ => continue,
                    }
                }

                active.insert(fingerprint, candidate.clone());
                stored.push(candidate);
            }
        }

        for candidate in stored {
            let _ = self
                .events
                .send(Event::OpportunityDetected(Arc::new(candidate.clone())));
            if let Err(e) = self.candidates.send(candidate).await {
                debug!(error = %e, "candidate channel closed");
                return;
            }
        }
    }

    fn run_sweep(&self) {
        let now = Utc::now();
        let mut expired = Vec::new();
        {
            let mut active = self.active.lock();
            active.retain(|_, op| {
                if op.status() == OpportunityStatus::Detected && op.is_expired(now) {
                    expired.push(op.id());
                    false
                } else {
                    true
                }
            });
        }
        for id in expired {
            debug!(id = %id, "opportunity expired");
            let _ = self.events.send(Event::OpportunityExpired { id });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        LegOrderType, OpportunityKind, OpportunityLeg, Quote, Side, Symbol, VenueId,
    };
    use crate::strategy::Strategy;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    /// Strategy that replays a fixed candidate template each tick.
    struct FixedStrategy {
        net: Quote,
        venue_a: &'static str,
        ttl_secs: i64,
    }

    impl Strategy for FixedStrategy {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn kind(&self) -> OpportunityKind {
            OpportunityKind::Simple
        }

        fn scan(&self, ctx: &ScanContext<'_>) -> Vec<Opportunity> {
            let symbol = Symbol::new("BTC", "USDT");
            let leg = |step, venue: &str, side| OpportunityLeg {
                step_index: step,
                venue: VenueId::from(venue),
                symbol: symbol.clone(),
                side,
                amount: dec!(1),
                reference_price: dec!(100),
                fee_estimate: Decimal::ZERO,
                max_latency_ms: 5000,
                order_type: LegOrderType::Limit,
            };
            let legs = vec![leg(1, self.venue_a, Side::Buy), leg(2, "z", Side::Sell)];
            vec![Opportunity::try_new(
                OpportunityKind::Simple,
                symbol,
                legs,
                self.net,
                dec!(0.2),
                dec!(100),
                1.0,
                vec![],
                ctx.now,
                ctx.now + chrono::Duration::seconds(self.ttl_secs),
                "fixed",
            )
            .unwrap()]
        }
    }

    fn scanner_with(
        strategies: StrategyRegistry,
        max_active: usize,
    ) -> (OpportunityScanner, mpsc::Receiver<Opportunity>, broadcast::Receiver<Event>) {
        let (candidate_tx, candidate_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = broadcast::channel(64);
        let scanner = OpportunityScanner::new(
            ScannerConfig {
                max_active,
                ..ScannerConfig::default()
            },
            strategies,
            Arc::new(MarketDataCache::new()),
            Arc::new(VenueRegistry::new()),
            candidate_tx,
            event_tx,
        );
        (scanner, candidate_rx, event_rx)
    }

    #[tokio::test]
    async fn dedup_keeps_higher_net() {
        let mut strategies = StrategyRegistry::new();
        // Same fingerprint twice per tick; the higher net must win.
        strategies.register(Box::new(FixedStrategy {
            net: dec!(1),
            venue_a: "a",
            ttl_secs: 30,
        }));
        strategies.register(Box::new(FixedStrategy {
            net: dec!(2),
            venue_a: "a",
            ttl_secs: 30,
        }));
        let (scanner, mut rx, _events) = scanner_with(strategies, 50);

        scanner.run_tick_now().await;

        assert_eq!(scanner.active_count(), 1);
        // Both stores emitted a candidate; the final stored one is the
        // higher-net replacement.
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.projected_profit_quote(), dec!(1));
        assert_eq!(second.projected_profit_quote(), dec!(2));
    }

    #[tokio::test]
    async fn lower_net_duplicate_is_ignored() {
        let mut strategies = StrategyRegistry::new();
        strategies.register(Box::new(FixedStrategy {
            net: dec!(2),
            venue_a: "a",
            ttl_secs: 30,
        }));
        strategies.register(Box::new(FixedStrategy {
            net: dec!(1),
            venue_a: "a",
            ttl_secs: 30,
        }));
        let (scanner, mut rx, _events) = scanner_with(strategies, 50);

        scanner.run_tick_now().await;

        assert_eq!(scanner.active_count(), 1);
        let stored = rx.recv().await.unwrap();
        assert_eq!(stored.projected_profit_quote(), dec!(2));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cap_evicts_lowest_net() {
        let mut strategies = StrategyRegistry::new();
        strategies.register(Box::new(FixedStrategy {
            net: dec!(1),
            venue_a: "a",
            ttl_secs: 30,
        }));
        strategies.register(Box::new(FixedStrategy {
            net: dec!(5),
            venue_a: "b",
            ttl_secs: 30,
        }));
        // Cap of 1: the second, richer candidate evicts the first.
        let (scanner, _rx, _events) = scanner_with(strategies, 1);

        scanner.run_tick_now().await;

        assert_eq!(scanner.active_count(), 1);
    }

    #[tokio::test]
    async fn cap_rejects_poorer_newcomer() {
        let mut strategies = StrategyRegistry::new();
        strategies.register(Box::new(FixedStrategy {
            net: dec!(5),
            venue_a: "a",
            ttl_secs: 30,
        }));
        strategies.register(Box::new(FixedStrategy {
            net: dec!(1),
            venue_a: "b",
            ttl_secs: 30,
        }));
        let (scanner, mut rx, _events) = scanner_with(strategies, 1);

        scanner.run_tick_now().await;

        assert_eq!(scanner.active_count(), 1);
        let stored = rx.recv().await.unwrap();
        assert_eq!(stored.projected_profit_quote(), dec!(5));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn paused_scanner_detects_nothing() {
        let mut strategies = StrategyRegistry::new();
        strategies.register(Box::new(FixedStrategy {
            net: dec!(1),
            venue_a: "a",
            ttl_secs: 30,
        }));
        let (candidate_tx, mut candidate_rx) = mpsc::channel(64);
        let (event_tx, _event_rx) = broadcast::channel(64);
        let scanner = OpportunityScanner::new(
            ScannerConfig {
                scan_period: Duration::from_millis(10),
                ..ScannerConfig::default()
            },
            strategies,
            Arc::new(MarketDataCache::new()),
            Arc::new(VenueRegistry::new()),
            candidate_tx,
            event_tx,
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        scanner.pause();
        let handles = scanner.start(stop_rx);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(scanner.active_count(), 0);
        assert!(candidate_rx.try_recv().is_err());

        scanner.resume();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(scanner.active_count() > 0);

        let _ = stop_tx.send(true);
        for handle in handles {
            let _ = handle.await;
        }
    }

    #[tokio::test]
    async fn sweep_expires_past_ttl() {
        let mut strategies = StrategyRegistry::new();
        strategies.register(Box::new(FixedStrategy {
            net: dec!(1),
            venue_a: "a",
            ttl_secs: 1,
        }));
        let (scanner, _rx, mut events) = scanner_with(strategies, 50);
        scanner.run_tick_now().await;
        assert_eq!(scanner.active_count(), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        scanner.run_sweep_now();
        assert_eq!(scanner.active_count(), 0);

        // Skip the detection event, then expect the expiry.
        loop {
            match events.recv().await.unwrap() {
                Event::OpportunityExpired { .. } => break,
                Event::OpportunityDetected(_) => {}
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn take_transfers_ownership() {
        let mut strategies = StrategyRegistry::new();
        strategies.register(Box::new(FixedStrategy {
            net: dec!(1),
            venue_a: "a",
            ttl_secs: 30,
        }));
        let (scanner, mut rx, _events) = scanner_with(strategies, 50);

        scanner.run_tick_now().await;
        let candidate = rx.recv().await.unwrap();

        let taken = scanner.take(candidate.id()).unwrap();
        assert_eq!(taken.id(), candidate.id());
        assert_eq!(scanner.active_count(), 0);
        assert!(scanner.take(candidate.id()).is_none());
    }
}
