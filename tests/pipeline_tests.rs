//! End-to-end pipeline tests: cache -> scanner -> risk gate -> coordinator
//! against demo venues.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{broadcast, mpsc, watch};

use skimmer::app::AppState;
use skimmer::domain::{
    BookLevel, BookSnapshot, FeeSchedule, Opportunity, OpportunityKind, OpportunityStatus, Side,
    Symbol, TickerSnapshot, TradeLimits, Venue, VenueId, VenueKind, VenueRegistry,
};
use skimmer::exchange::{
    BreakerRegistry, DemoVenue, FillMode, InstrumentedVenue, RetryPolicy, TokenBucket,
};
use skimmer::executor::{ExecutionCoordinator, ExecutorConfig};
use skimmer::market::MarketDataCache;
use skimmer::risk::{DepthView, RiskGate, RiskLimits};
use skimmer::scanner::{OpportunityScanner, ScannerConfig};
use skimmer::service::{Event, PerformanceTracker};
use skimmer::strategy::{SimpleCrossVenueParams, SimpleCrossVenueStrategy, StrategyRegistry};

fn symbol() -> Symbol {
    Symbol::new("BTC", "USDT")
}

fn venue_registry() -> Arc<VenueRegistry> {
    let mut registry = VenueRegistry::new();
    for id in ["a", "b"] {
        registry.add(Venue::new(
            VenueId::from(id),
            VenueKind::Demo,
            FeeSchedule::default(),
            TradeLimits {
                min_order_quote: dec!(1),
                max_position_quote: dec!(10000),
            },
        ));
    }
    Arc::new(registry)
}

/// Scenario prices: venue a asks 100.0, venue b bids 100.4.
fn seed_cache(cache: &MarketDataCache) {
    let now = Utc::now();
    for (venue, bid, ask) in [("a", dec!(99.9), dec!(100.0)), ("b", dec!(100.4), dec!(100.5))] {
        cache.put_ticker(TickerSnapshot {
            venue: VenueId::from(venue),
            symbol: symbol(),
            bid,
            ask,
            last: bid,
            volume: dec!(1000000),
            change_24h: Decimal::ZERO,
            observed_at: now,
        });
        cache
            .put_book(BookSnapshot::new(
                VenueId::from(venue),
                symbol(),
                vec![
                    BookLevel::new(bid, dec!(1.0)),
                    BookLevel::new(bid - dec!(0.1), dec!(1.0)),
                ],
                vec![
                    BookLevel::new(ask, dec!(1.0)),
                    BookLevel::new(ask + dec!(0.1), dec!(1.0)),
                ],
                now,
            ))
            .unwrap();
    }
}

fn seed_demo_quotes(venue: &DemoVenue, id: &str, bid: Decimal, ask: Decimal) {
    venue.set_ticker(TickerSnapshot {
        venue: VenueId::from(id),
        symbol: symbol(),
        bid,
        ask,
        last: bid,
        volume: dec!(1000000),
        change_24h: Decimal::ZERO,
        observed_at: Utc::now(),
    });
}

fn wrap(venue: Arc<DemoVenue>) -> Arc<InstrumentedVenue> {
    Arc::new(InstrumentedVenue::new(
        venue,
        TokenBucket::per_second(1000.0),
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            total_budget: Duration::from_secs(1),
        },
        Arc::new(BreakerRegistry::default()),
    ))
}

fn simple_strategies() -> StrategyRegistry {
    let mut strategies = StrategyRegistry::new();
    strategies.register(Box::new(SimpleCrossVenueStrategy::new(
        SimpleCrossVenueParams {
            symbols: vec![symbol()],
            venues: vec![VenueId::from("a"), VenueId::from("b")],
            min_profit_pct: dec!(0.1),
            max_position_quote: dec!(100),
            enable_partial_fills: false,
        },
    )));
    strategies
}

struct Pipeline {
    cache: Arc<MarketDataCache>,
    scanner: OpportunityScanner,
    candidate_rx: mpsc::Receiver<Opportunity>,
    gate: RiskGate,
    state: Arc<AppState>,
    coordinator: ExecutionCoordinator,
    events: broadcast::Receiver<Event>,
    stop: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
    venue_a: Arc<DemoVenue>,
    venue_b: Arc<DemoVenue>,
}

fn pipeline() -> Pipeline {
    let cache = Arc::new(MarketDataCache::new());
    let venues = venue_registry();
    let (candidate_tx, candidate_rx) = mpsc::channel(64);
    let (event_tx, events) = broadcast::channel(256);

    let scanner = OpportunityScanner::new(
        ScannerConfig::default(),
        simple_strategies(),
        Arc::clone(&cache),
        Arc::clone(&venues),
        candidate_tx,
        event_tx.clone(),
    );

    let venue_a = Arc::new(DemoVenue::new("a"));
    let venue_b = Arc::new(DemoVenue::new("b"));
    seed_demo_quotes(&venue_a, "a", dec!(99.9), dec!(100.0));
    seed_demo_quotes(&venue_b, "b", dec!(100.4), dec!(100.5));

    let state = Arc::new(AppState::new());
    let coordinator = ExecutionCoordinator::new(
        ExecutorConfig {
            poll_interval: Duration::from_millis(10),
            ..ExecutorConfig::default()
        },
        HashMap::from([
            (VenueId::from("a"), wrap(venue_a.clone())),
            (VenueId::from("b"), wrap(venue_b.clone())),
        ]),
        event_tx.clone(),
        Arc::clone(&state),
        Arc::new(PerformanceTracker::new()),
    );
    let (stop, stop_rx) = watch::channel(false);
    let handle = coordinator.run(stop_rx);

    let gate = RiskGate::new(RiskLimits::default(), venues).with_events(event_tx);

    Pipeline {
        cache,
        scanner,
        candidate_rx,
        gate,
        state,
        coordinator,
        events,
        stop,
        handle,
        venue_a,
        venue_b,
    }
}

async fn shutdown(p: Pipeline) {
    let _ = p.stop.send(true);
    let _ = p.handle.await;
}

#[tokio::test]
async fn detected_candidate_flows_to_completed_execution() {
    let mut p = pipeline();
    seed_cache(&p.cache);

    p.scanner.run_tick_now().await;
    let mut op = p.candidate_rx.recv().await.expect("candidate");
    assert_eq!(op.kind(), OpportunityKind::Simple);
    assert_eq!(op.status(), OpportunityStatus::Detected);

    // Gate approval against live books.
    let depth = DepthView::for_opportunity(&p.cache, &op);
    let portfolio = p.state.portfolio_snapshot(HashSet::new());
    let decision = p
        .gate
        .admit(&op, &portfolio, &p.state.daily_aggregates(), &depth);
    assert!(decision.is_approved(), "unexpected rejection: {decision:?}");

    let taken = p.scanner.take(op.id());
    assert!(taken.is_some());
    op.transition(OpportunityStatus::Approved).unwrap();
    p.state.reserve(&op);
    p.coordinator.submit(op).unwrap();

    let execution = loop {
        match p.events.recv().await.unwrap() {
            Event::ExecutionCompleted(execution) => break execution,
            Event::ExecutionFailed(execution) => {
                panic!("execution failed: {:?}", execution.errors)
            }
            _ => {}
        }
    };

    assert_eq!(execution.trades.len(), 2);
    assert!(execution.trades.iter().all(|t| t.is_filled()));
    assert_eq!(execution.trades[0].side, Side::Buy);
    assert_eq!(execution.trades[1].side, Side::Sell);
    assert!(execution.realized_profit > Decimal::ZERO);
    // Exposure fully released on completion.
    assert_eq!(p.state.total_exposure(), Decimal::ZERO);

    shutdown(p).await;
}

#[tokio::test]
async fn failed_leg_compensates_and_releases_exposure() {
    let mut p = pipeline();
    seed_cache(&p.cache);
    // The sell leg on venue b never fills.
    p.venue_b.set_fill_mode(symbol(), Side::Sell, FillMode::Never);

    p.scanner.run_tick_now().await;
    let mut op = p.candidate_rx.recv().await.expect("candidate");
    let _ = p.scanner.take(op.id());
    op.transition(OpportunityStatus::Approved).unwrap();
    p.state.reserve(&op);
    p.coordinator.submit(op).unwrap();

    let execution = loop {
        match p.events.recv().await.unwrap() {
            Event::ExecutionFailed(execution) => break execution,
            Event::ExecutionCompleted(_) => panic!("expected failure"),
            _ => {}
        }
    };

    assert!(execution.errors.iter().any(|e| e.contains("leg_timeout")));
    assert!(execution.trades.iter().any(|t| t.compensation));
    assert_eq!(p.state.total_exposure(), Decimal::ZERO);
    // No orphan order rests on the sell venue.
    assert_eq!(p.venue_b.open_order_count(), 0);

    shutdown(p).await;
}

#[tokio::test]
async fn daily_loss_breach_rejects_and_alerts_once() {
    let mut p = pipeline();
    seed_cache(&p.cache);

    // Burn through the daily loss cap.
    p.scanner.run_tick_now().await;
    let op = p.candidate_rx.recv().await.expect("candidate");
    p.state.reserve(&op);
    p.state.release(&op, dec!(-1000));

    let depth = DepthView::for_opportunity(&p.cache, &op);
    let portfolio = p.state.portfolio_snapshot(HashSet::new());
    let aggregates = p.state.daily_aggregates();
    assert_eq!(aggregates.realized_loss_quote, dec!(1000));

    let first = p.gate.admit(&op, &portfolio, &aggregates, &depth);
    let second = p.gate.admit(&op, &portfolio, &aggregates, &depth);
    assert_eq!(first.rejection().unwrap().code(), "dailyLoss");
    assert_eq!(second.rejection().unwrap().code(), "dailyLoss");

    // Exactly one riskAlert on the event stream; the supervisor reacts by
    // pausing the scanner for the cooldown.
    let mut alerts = 0;
    while let Ok(event) = p.events.try_recv() {
        if matches!(event, Event::RiskAlert { limit: "dailyLoss", .. }) {
            alerts += 1;
        }
    }
    assert_eq!(alerts, 1);

    p.scanner.pause();
    assert!(p.scanner.is_paused());
    p.scanner.resume();
    assert!(!p.scanner.is_paused());

    shutdown(p).await;
}

#[tokio::test]
async fn live_set_respects_cap_and_fingerprint_uniqueness() {
    let mut p = pipeline();
    seed_cache(&p.cache);

    // Repeated ticks over identical snapshots keep exactly one live
    // candidate: same fingerprint, never duplicated.
    for _ in 0..5 {
        p.scanner.run_tick_now().await;
    }
    assert_eq!(p.scanner.active_count(), 1);

    // Drain whatever the ticks emitted; each stored candidate is a
    // replacement of the same fingerprint.
    let mut seen = 0;
    while p.candidate_rx.try_recv().is_ok() {
        seen += 1;
    }
    assert!(seen >= 1);

    shutdown(p).await;
}

#[tokio::test]
async fn stale_feed_stops_detection() {
    let p = pipeline();
    let old = Utc::now() - chrono::Duration::seconds(11);
    for (venue, bid, ask) in [("a", dec!(99.9), dec!(100.0)), ("b", dec!(100.4), dec!(100.5))] {
        p.cache.put_ticker(TickerSnapshot {
            venue: VenueId::from(venue),
            symbol: symbol(),
            bid,
            ask,
            last: bid,
            volume: dec!(1000000),
            change_24h: Decimal::ZERO,
            observed_at: old,
        });
    }

    assert!(p.cache.list_fresh(&symbol()).is_empty());
    p.scanner.run_tick_now().await;
    assert_eq!(p.scanner.active_count(), 0);

    shutdown(p).await;
}

#[tokio::test]
async fn emergency_stop_prevents_new_executions() {
    let mut p = pipeline();
    seed_cache(&p.cache);

    p.coordinator.emergency_stop("fatal risk event");

    p.scanner.run_tick_now().await;
    let mut op = p.candidate_rx.recv().await.expect("candidate");
    let _ = p.scanner.take(op.id());
    op.transition(OpportunityStatus::Approved).unwrap();
    assert!(p.coordinator.submit(op).is_err());

    // The stream carries the stop but never an executionStarted.
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(event) = p.events.try_recv() {
        assert!(
            !matches!(event, Event::ExecutionStarted { .. }),
            "execution started after emergency stop"
        );
    }

    shutdown(p).await;
}

#[tokio::test]
async fn venue_a_quotes_are_left_untouched_by_pipeline() {
    // Guard against components mutating adapter state they only observe.
    let p = pipeline();
    seed_cache(&p.cache);
    let before = p.venue_a.order_count();
    p.scanner.run_tick_now().await;
    assert_eq!(p.venue_a.order_count(), before);
    shutdown(p).await;
}
