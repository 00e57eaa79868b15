//! Core supervisor.
//!
//! Owns startup order (venue adapters, cache consumers, portfolio baseline,
//! scanner, coordinator), the candidate admission loop, the heartbeat, and
//! graceful shutdown in reverse order with a grace period for in-flight
//! executions. All cross-component wiring happens here; components talk
//! through channels and never hold references to each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::db::{create_pool, spawn_audit_task, AuditRecorder};
use crate::domain::{
    Asset, Balance, BookLevel, BookSnapshot, FundingSnapshot, Opportunity, OpportunityStatus,
    Symbol, TickerSnapshot, VenueHealth, VenueId, VenueKind, VenueRegistry,
};
use crate::error::{ConfigError, Error, Result};
use crate::exchange::{
    BreakerConfig, BreakerRegistry, DemoVenue, InstrumentedVenue, RetryPolicy, TokenBucket,
    VenueAdapter,
};
use crate::executor::{ExecutionCoordinator, ExecutorConfig, SubmitError};
use crate::market::{MarketDataCache, MarketEvent};
use crate::risk::{DepthView, RiskGate};
use crate::scanner::{OpportunityScanner, ScannerConfig};
use crate::service::{
    Event, LogNotifier, NotifierRegistry, PerformanceTracker, StatusConfig, StatusWriter,
};

use super::config::{Config, StrategySpec};
use super::state::AppState;

/// Run mode from the process surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Full pipeline, but approved opportunities are logged, not executed.
    Monitor,
    Execute,
}

impl Mode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monitor => "monitor",
            Self::Execute => "execute",
        }
    }
}

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Clean,
    EmergencyStopped,
}

/// Resident set size, best effort.
fn rss_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(statm) = std::fs::read_to_string("/proc/self/statm") {
            if let Some(pages) = statm.split_whitespace().nth(1) {
                if let Ok(pages) = pages.parse::<u64>() {
                    return pages * 4096;
                }
            }
        }
    }
    0
}

/// The core supervisor: builds the pipeline and runs it to completion.
pub struct Supervisor;

impl Supervisor {
    /// Run until shutdown signal or fatal error.
    pub async fn run(config: Config, mode: Mode, no_dashboard: bool) -> Result<RunOutcome> {
        let started = Instant::now();
        info!(mode = mode.as_str(), demo = config.demo_mode, "skimmer core starting");

        // Event stream shared by every component and observer.
        let (event_tx, _) = broadcast::channel::<Event>(1024);
        let (stop_tx, stop_rx) = watch::channel(false);

        let venues = Arc::new(config.build_venue_registry());
        let state = Arc::new(AppState::new());
        let perf = Arc::new(PerformanceTracker::new());
        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default()));

        // 1. Venue adapters.
        let demo_venues = build_adapters(&config)?;
        let raw_adapters: HashMap<VenueId, Arc<dyn VenueAdapter>> = demo_venues
            .iter()
            .map(|(id, demo)| (id.clone(), Arc::clone(demo) as Arc<dyn VenueAdapter>))
            .collect();
        let adapters = instrument(&config, raw_adapters.clone(), Arc::clone(&breakers));
        check_venue_health(&raw_adapters, &venues, &event_tx).await?;

        // 2. Market data cache and its consumers.
        let (cache, market_rx) = MarketDataCache::with_events(1024);
        let cache = Arc::new(cache);
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        tasks.push(bridge_market_events(market_rx, event_tx.clone()));
        if config.demo_mode {
            for (venue_id, demo) in &demo_venues {
                tasks.push(spawn_demo_feed(
                    venue_id.clone(),
                    Arc::clone(demo),
                    demo_symbols(&config),
                    venue_kind(&config, venue_id),
                    Arc::clone(&cache),
                    stop_rx.clone(),
                ));
            }
        }
        tasks.push(spawn_health_monitor(
            raw_adapters.clone(),
            Arc::clone(&venues),
            Arc::clone(&state),
            event_tx.clone(),
            stop_rx.clone(),
        ));

        // 3. Portfolio baseline.
        for (venue_id, adapter) in &raw_adapters {
            match adapter.fetch_balances().await {
                Ok(balances) => state.set_balances(venue_id, balances),
                Err(e) => warn!(venue = %venue_id, error = %e, "baseline balances unavailable"),
            }
        }

        // Observers: audit, notifiers, status file.
        let audit = match create_pool(&config.database) {
            Ok(pool) => {
                let recorder = Arc::new(AuditRecorder::new(pool));
                tasks.push(spawn_audit_task(recorder, event_tx.subscribe()));
                true
            }
            Err(e) => {
                warn!(error = %e, "audit store unavailable, continuing without it");
                false
            }
        };
        info!(audit, "observers wired");
        tasks.push(spawn_notifier_task(event_tx.subscribe()));

        let status_writer = (config.dashboard.enabled && !no_dashboard).then(|| {
            Arc::new(StatusWriter::new(
                config.dashboard.status_file.clone().into(),
                StatusConfig {
                    mode: mode.as_str().to_string(),
                    venues: config.venues.iter().map(|v| v.id.to_string()).collect(),
                    strategies: config
                        .strategies
                        .iter()
                        .map(|s| match s {
                            StrategySpec::Simple(_) => "simple_cross_venue".to_string(),
                            StrategySpec::Triangular(_) => "triangular".to_string(),
                            StrategySpec::Basis(_) => "basis_carry".to_string(),
                        })
                        .collect(),
                },
            ))
        });

        // 4. Scanner.
        let (candidate_tx, mut candidate_rx) = mpsc::channel::<Opportunity>(256);
        let scanner = Arc::new(OpportunityScanner::new(
            ScannerConfig {
                scan_period: Duration::from_millis(config.scanner.scan_period_ms),
                sweep_period: Duration::from_millis(config.scanner.sweep_period_ms),
                max_active: config.scanner.max_active,
            },
            config.build_strategy_registry(),
            Arc::clone(&cache),
            Arc::clone(&venues),
            candidate_tx,
            event_tx.clone(),
        ));
        tasks.extend(scanner.start(stop_rx.clone()));

        // 5. Execution coordinator.
        let coordinator = Arc::new(ExecutionCoordinator::new(
            ExecutorConfig {
                max_concurrent: config.execution.max_concurrent,
                queue_bound: config.execution.queue_bound,
                poll_interval: Duration::from_millis(config.execution.poll_interval_ms),
            },
            adapters,
            event_tx.clone(),
            Arc::clone(&state),
            Arc::clone(&perf),
        ));
        let coordinator_handle = coordinator.run(stop_rx.clone());

        let gate = Arc::new(
            RiskGate::new(config.risk.clone(), Arc::clone(&venues)).with_events(event_tx.clone()),
        );

        // Heartbeat, carrying the status refresh with it.
        tasks.push(spawn_heartbeat(
            config.heartbeat_secs,
            started,
            event_tx.clone(),
            status_writer.clone(),
            Arc::clone(&scanner),
            Arc::clone(&coordinator),
            Arc::clone(&state),
            Arc::clone(&perf),
            stop_rx.clone(),
        ));

        info!("pipeline running");

        // Admission loop: candidates in, gate decision, coordinator out.
        let mut events_rx = event_tx.subscribe();
        loop {
            tokio::select! {
                maybe = candidate_rx.recv() => {
                    let Some(op) = maybe else { break };
                    handle_candidate(
                        op, mode, &scanner, &gate, &state, &breakers, &cache, &coordinator,
                    );
                }
                event = events_rx.recv() => {
                    if let Ok(Event::RiskAlert { .. }) = event {
                        start_cooldown(&scanner, gate.limits().cooldown());
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        // Shutdown in reverse startup order.
        scanner.pause();
        let grace = Duration::from_secs(config.shutdown_grace_secs);
        let drained = tokio::select! {
            drained = coordinator.drain(grace) => drained,
            _ = tokio::signal::ctrl_c() => {
                warn!("second shutdown signal: emergency stop");
                coordinator.emergency_stop("operator interrupt");
                false
            }
        };
        if !drained {
            coordinator.emergency_stop("shutdown grace expired");
            let _ = coordinator.drain(Duration::from_secs(5)).await;
        }
        let _ = stop_tx.send(true);
        scanner.clear();
        coordinator_handle.abort();
        for task in tasks {
            task.abort();
        }
        if let Some(writer) = &status_writer {
            let _ = writer.write();
        }

        let outcome = if state.is_emergency() {
            RunOutcome::EmergencyStopped
        } else {
            RunOutcome::Clean
        };
        info!(outcome = ?outcome, "skimmer core stopped");
        Ok(outcome)
    }
}

/// One-shot health probe used by `--health-check`.
pub async fn health_check(config: &Config) -> Result<Vec<(VenueId, bool)>> {
    let adapters = build_adapters(config)?;
    let mut results = Vec::new();
    for (venue_id, adapter) in adapters {
        let healthy = VenueAdapter::health_check(adapter.as_ref()).await.is_ok();
        results.push((venue_id, healthy));
    }
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn venue_kind(config: &Config, id: &VenueId) -> VenueKind {
    config
        .venues
        .iter()
        .find(|v| &v.id == id)
        .map_or(VenueKind::Demo, |v| v.kind)
}

/// Production adapters are provided out of tree; in this crate only the
/// demo adapter is constructible, so demo mode is required.
fn build_adapters(config: &Config) -> Result<HashMap<VenueId, Arc<DemoVenue>>> {
    if config.venues.is_empty() {
        return Err(ConfigError::MissingField { field: "venues" }.into());
    }
    if !config.demo_mode {
        return Err(Error::Internal(
            "no production venue adapters linked; run with demo_mode".to_string(),
        ));
    }
    let mut adapters = HashMap::new();
    for venue in &config.venues {
        let demo = DemoVenue::new(venue.id.clone()).with_taker_rate(venue.fees.taker_rate);
        demo.set_balance(
            Asset::from("USDT"),
            Balance::new(Decimal::from(100_000), Decimal::ZERO, Decimal::from(100_000)),
        );
        adapters.insert(venue.id.clone(), Arc::new(demo));
    }
    Ok(adapters)
}

fn instrument(
    config: &Config,
    adapters: HashMap<VenueId, Arc<dyn VenueAdapter>>,
    breakers: Arc<BreakerRegistry>,
) -> HashMap<VenueId, Arc<InstrumentedVenue>> {
    adapters
        .into_iter()
        .map(|(id, adapter)| {
            let rps = config
                .venues
                .iter()
                .find(|v| v.id == id)
                .map_or(10.0, |v| v.rate_limit_rps);
            let wrapped = InstrumentedVenue::new(
                adapter,
                TokenBucket::per_second(rps),
                RetryPolicy::default(),
                Arc::clone(&breakers),
            );
            (id, Arc::new(wrapped))
        })
        .collect()
}

/// Startup probe: every venue is pinged; the run aborts only when no venue
/// at all is reachable.
async fn check_venue_health(
    adapters: &HashMap<VenueId, Arc<dyn VenueAdapter>>,
    venues: &Arc<VenueRegistry>,
    events: &broadcast::Sender<Event>,
) -> Result<()> {
    let mut healthy = 0usize;
    for (venue_id, adapter) in adapters {
        match adapter.health_check().await {
            Ok(()) => {
                venues.set_health(venue_id, VenueHealth::Active);
                healthy += 1;
            }
            Err(e) => {
                warn!(venue = %venue_id, error = %e, "venue unhealthy at startup");
                venues.set_health(venue_id, VenueHealth::Down);
                let _ = events.send(Event::VenueConnectionLost {
                    venue: venue_id.clone(),
                });
            }
        }
    }
    if healthy == 0 {
        return Err(Error::Internal("no healthy venues at startup".to_string()));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn handle_candidate(
    op: Opportunity,
    mode: Mode,
    scanner: &Arc<OpportunityScanner>,
    gate: &Arc<RiskGate>,
    state: &Arc<AppState>,
    breakers: &Arc<BreakerRegistry>,
    cache: &Arc<MarketDataCache>,
    coordinator: &Arc<ExecutionCoordinator>,
) {
    // Ownership transfer: the scanner no longer scans over this candidate.
    let mut op = scanner.take(op.id()).unwrap_or(op);

    let depth = DepthView::for_opportunity(cache, &op);
    let portfolio = state.portfolio_snapshot(breakers.open_venues());
    let aggregates = state.daily_aggregates();

    let decision = gate.admit(&op, &portfolio, &aggregates, &depth);
    match decision.rejection() {
        None => {
            if op.transition(OpportunityStatus::Approved).is_err() {
                return;
            }
            if mode == Mode::Monitor {
                info!(
                    opportunity = %op.id(),
                    net = %op.projected_profit_quote(),
                    "approved (monitor mode, not submitting)"
                );
                return;
            }
            state.reserve(&op);
            if let Err(e) = coordinator.submit(op.clone()) {
                state.release(&op, Decimal::ZERO);
                match e {
                    SubmitError::Backpressure => {
                        warn!(opportunity = %op.id(), "rejected: backpressure");
                    }
                    SubmitError::Stopped => {
                        warn!(opportunity = %op.id(), "rejected: coordinator stopped");
                    }
                }
            }
        }
        Some(reason) => {
            let _ = op.transition(OpportunityStatus::Rejected);
            info!(
                opportunity = %op.id(),
                reason = reason.code(),
                "opportunity rejected by risk gate"
            );
        }
    }
}

/// Pause the scanner for the configured cooldown, then resume.
fn start_cooldown(scanner: &Arc<OpportunityScanner>, cooldown: Duration) {
    if scanner.is_paused() {
        return;
    }
    warn!(cooldown_secs = cooldown.as_secs(), "risk cooldown: scanner paused");
    scanner.pause();
    let scanner = Arc::clone(scanner);
    tokio::spawn(async move {
        tokio::time::sleep(cooldown).await;
        scanner.resume();
    });
}

/// Re-publish cache-derived anomalies on the core event stream.
fn bridge_market_events(
    mut market_rx: broadcast::Receiver<MarketEvent>,
    events: broadcast::Sender<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match market_rx.recv().await {
                Ok(MarketEvent::PriceAlert {
                    venue,
                    symbol,
                    previous,
                    current,
                    change_pct,
                }) => {
                    let _ = events.send(Event::PriceAlert {
                        venue,
                        symbol,
                        previous,
                        current,
                        change_pct,
                    });
                }
                Ok(MarketEvent::VolumeSpike {
                    venue,
                    symbol,
                    previous,
                    current,
                }) => {
                    let _ = events.send(Event::VolumeSpike {
                        venue,
                        symbol,
                        previous,
                        current,
                    });
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_notifier_task(mut events: broadcast::Receiver<Event>) -> JoinHandle<()> {
    let mut registry = NotifierRegistry::new();
    registry.register(Box::new(LogNotifier));
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => registry.notify_all(&event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Periodic health probe per venue, emitting lost/restored transitions and
/// reconciling balances while the venue is reachable.
fn spawn_health_monitor(
    adapters: HashMap<VenueId, Arc<dyn VenueAdapter>>,
    venues: Arc<VenueRegistry>,
    state: Arc<AppState>,
    events: broadcast::Sender<Event>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for (venue_id, adapter) in &adapters {
                        let was = venues.health(venue_id);
                        match adapter.health_check().await {
                            Ok(()) => {
                                venues.set_health(venue_id, VenueHealth::Active);
                                if was == VenueHealth::Down {
                                    let _ = events.send(Event::VenueConnectionRestored {
                                        venue: venue_id.clone(),
                                    });
                                }
                                if let Ok(balances) = adapter.fetch_balances().await {
                                    state.set_balances(venue_id, balances);
                                }
                            }
                            Err(e) => {
                                venues.set_health(venue_id, VenueHealth::Down);
                                if was != VenueHealth::Down {
                                    warn!(venue = %venue_id, error = %e, "venue went down");
                                    let _ = events.send(Event::VenueConnectionLost {
                                        venue: venue_id.clone(),
                                    });
                                }
                            }
                        }
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[allow(clippy::too_many_arguments)]
fn spawn_heartbeat(
    period_secs: u64,
    started: Instant,
    events: broadcast::Sender<Event>,
    status_writer: Option<Arc<StatusWriter>>,
    scanner: Arc<OpportunityScanner>,
    coordinator: Arc<ExecutionCoordinator>,
    state: Arc<AppState>,
    perf: Arc<PerformanceTracker>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(period_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let _ = events.send(Event::Heartbeat {
                        uptime_secs: started.elapsed().as_secs(),
                        rss_bytes: rss_bytes(),
                    });
                    if let Some(writer) = &status_writer {
                        writer.update(
                            scanner.active_count(),
                            coordinator.in_flight(),
                            state.total_exposure(),
                            &perf.snapshot(),
                        );
                        if let Err(e) = writer.write() {
                            error!(error = %e, "status file write failed");
                        }
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

/// Symbols any configured strategy cares about; the demo feed covers them all.
fn demo_symbols(config: &Config) -> Vec<Symbol> {
    let mut symbols = Vec::new();
    for spec in &config.strategies {
        match spec {
            StrategySpec::Simple(p) => symbols.extend(p.symbols.iter().cloned()),
            StrategySpec::Triangular(p) => symbols.extend(p.symbols.iter().cloned()),
            StrategySpec::Basis(p) => symbols.push(p.symbol.clone()),
        }
    }
    symbols.sort();
    symbols.dedup();
    if symbols.is_empty() {
        symbols.push(Symbol::new("BTC", "USDT"));
    }
    symbols
}

/// Synthetic market feed for demo mode: a per-venue random walk pushed into
/// both the cache and the demo venue itself so orders fill near the quotes.
fn spawn_demo_feed(
    venue_id: VenueId,
    demo: Arc<DemoVenue>,
    symbols: Vec<Symbol>,
    kind: VenueKind,
    cache: Arc<MarketDataCache>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(400));
        let mut mids: HashMap<Symbol, f64> = symbols
            .iter()
            .map(|s| (s.clone(), demo_base_price(s)))
            .collect();
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for symbol in &symbols {
                        let Some(mid) = mids.get_mut(symbol) else { continue };
                        let drift: f64 = rand::thread_rng().gen_range(-0.003..0.003);
                        *mid *= 1.0 + drift;
                        let spread = *mid * 0.0005;
                        let bid = Decimal::from_f64(*mid - spread).unwrap_or(Decimal::ONE);
                        let ask = Decimal::from_f64(*mid + spread).unwrap_or(Decimal::ONE);
                        if bid <= Decimal::ZERO || bid > ask {
                            continue;
                        }
                        let now = chrono::Utc::now();
                        let ticker = TickerSnapshot {
                            venue: venue_id.clone(),
                            symbol: symbol.clone(),
                            bid,
                            ask,
                            last: bid,
                            volume: Decimal::from(1_000_000),
                            change_24h: Decimal::ZERO,
                            observed_at: now,
                        };
                        let size = Decimal::from(5);
                        let book = BookSnapshot::new(
                            venue_id.clone(),
                            symbol.clone(),
                            vec![
                                BookLevel::new(bid, size),
                                BookLevel::new(bid * Decimal::new(999, 3), size),
                            ],
                            vec![
                                BookLevel::new(ask, size),
                                BookLevel::new(ask * Decimal::new(1001, 3), size),
                            ],
                            now,
                        );

                        // The demo venue serves the same quotes it fills at.
                        demo.set_ticker(ticker.clone());
                        demo.set_book(book.clone());

                        cache.put_ticker(ticker);
                        if let Err(e) = cache.put_book(book) {
                            warn!(error = %e, "demo feed produced invalid book");
                        }
                        if kind == VenueKind::Perpetual {
                            let funding = FundingSnapshot {
                                venue: venue_id.clone(),
                                symbol: symbol.clone(),
                                rate: Decimal::new(1, 4),
                                periods_per_year: 1095,
                                observed_at: now,
                            };
                            demo.set_funding(funding.clone());
                            cache.put_funding(funding);
                        }
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

fn demo_base_price(symbol: &Symbol) -> f64 {
    match symbol.base().as_str() {
        "BTC" => 60_000.0,
        "ETH" => 3_000.0,
        _ => 100.0,
    }
}
