//! Execution coordinator.
//!
//! Drives approved opportunities through their legs, strictly in step order,
//! one venue order at a time. Admission is a bounded FIFO queue; a worker
//! pool caps concurrent executions. Per-leg failure or timeout stops forward
//! progress and triggers best-effort compensation of the already-filled
//! legs, after which the execution is recorded as failed. An execution
//! halted before anything filled resolves to cancelled instead: there is
//! nothing to unwind.
//!
//! Emergency stop flips a watch flag observed at every cancellable boundary:
//! between legs, and inside the fill-wait loop of an open leg.

mod leg;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::app::AppState;
use crate::domain::{Execution, ExecutionStatus, Opportunity, OpportunityStatus, VenueId};
use crate::exchange::InstrumentedVenue;
use crate::service::{Event, PerformanceTracker};

use leg::{drive_compensation, drive_leg, LegResult};

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// In-flight execution cap.
    pub max_concurrent: usize,
    /// Queued approvals beyond in-flight capacity.
    pub queue_bound: usize,
    /// Order status poll cadence while a leg is open.
    pub poll_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            queue_bound: 16,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Why a submission was not accepted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// Queue full; the opportunity is rejected, not retried.
    #[error("execution queue full")]
    Backpressure,
    /// Coordinator is stopping or emergency-stopped.
    #[error("coordinator not accepting executions")]
    Stopped,
}

pub(crate) struct CoordinatorInner {
    pub(crate) config: ExecutorConfig,
    pub(crate) adapters: HashMap<VenueId, Arc<InstrumentedVenue>>,
    pub(crate) events: broadcast::Sender<Event>,
    pub(crate) state: Arc<AppState>,
    pub(crate) perf: Arc<PerformanceTracker>,
    pub(crate) emergency: watch::Sender<bool>,
    /// Worker pool; also used to await in-flight work on shutdown.
    pub(crate) slots: Arc<Semaphore>,
}

/// Per-opportunity execution state machine and worker pool.
pub struct ExecutionCoordinator {
    inner: Arc<CoordinatorInner>,
    queue_tx: mpsc::Sender<Opportunity>,
    queue_rx: parking_lot::Mutex<Option<mpsc::Receiver<Opportunity>>>,
}

impl ExecutionCoordinator {
    #[must_use]
    pub fn new(
        config: ExecutorConfig,
        adapters: HashMap<VenueId, Arc<InstrumentedVenue>>,
        events: broadcast::Sender<Event>,
        state: Arc<AppState>,
        perf: Arc<PerformanceTracker>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_bound);
        let (emergency, _) = watch::channel(false);
        let slots = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                adapters,
                events,
                state,
                perf,
                emergency,
                slots,
            }),
            queue_tx,
            queue_rx: parking_lot::Mutex::new(Some(queue_rx)),
        }
    }

    /// Enqueue an approved opportunity. FIFO; a full queue rejects with
    /// backpressure rather than blocking the pipeline.
    pub fn submit(&self, op: Opportunity) -> Result<(), SubmitError> {
        if *self.inner.emergency.borrow() {
            return Err(SubmitError::Stopped);
        }
        self.queue_tx.try_send(op).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => SubmitError::Stopped,
        })
    }

    /// Spawn the dispatch loop. Call once.
    pub fn run(&self, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let mut queue_rx = self
            .queue_rx
            .lock()
            .take()
            .unwrap_or_else(|| mpsc::channel(1).1);
        tokio::spawn(async move {
            loop {
                // Claim a worker slot before pulling work so queued
                // approvals start strictly in FIFO order.
                let permit = tokio::select! {
                    permit = Arc::clone(&inner.slots).acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => break,
                    },
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                        continue;
                    }
                };

                let op = tokio::select! {
                    maybe = queue_rx.recv() => match maybe {
                        Some(op) => op,
                        None => break,
                    },
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                        continue;
                    }
                };

                if *inner.emergency.borrow() {
                    warn!(opportunity = %op.id(), "dropping queued execution after emergency stop");
                    continue;
                }

                let task_inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    execute_one(task_inner, op).await;
                    drop(permit);
                });
            }
            info!("coordinator dispatch loop stopped");
        })
    }

    /// Signal every in-flight execution to begin recovery at its next
    /// cancellable boundary; no new executions begin afterwards.
    pub fn emergency_stop(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(reason = %reason, "emergency stop signaled");
        let _ = self.inner.emergency.send(true);
        self.inner.state.set_emergency();
        let _ = self.inner.events.send(Event::EmergencyStop { reason });
    }

    /// Await in-flight executions up to `grace`; true when all drained.
    pub async fn drain(&self, grace: Duration) -> bool {
        let all = self.inner.config.max_concurrent as u32;
        match tokio::time::timeout(grace, self.inner.slots.acquire_many(all)).await {
            Ok(Ok(permits)) => {
                permits.forget();
                true
            }
            _ => false,
        }
    }

    /// Executions currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner
            .config
            .max_concurrent
            .saturating_sub(self.inner.slots.available_permits())
    }
}

/// Drive one approved opportunity to a terminal execution state.
async fn execute_one(inner: Arc<CoordinatorInner>, mut op: Opportunity) {
    let mut execution = Execution::new(op.id());
    if op.transition(OpportunityStatus::Executing).is_err() {
        execution.cancel("opportunity not executable");
        warn!(
            opportunity = %op.id(),
            status = op.status().as_str(),
            execution = %execution.id,
            "execution cancelled before start"
        );
        return;
    }

    inner.perf.on_started();
    let _ = inner.events.send(Event::ExecutionStarted {
        execution_id: execution.id,
        opportunity_id: op.id(),
    });
    execution.status = ExecutionStatus::Executing;

    // Partial fills on earlier legs shrink every subsequent leg by the same
    // ratio so the position stays balanced.
    let mut scale = Decimal::ONE;
    let mut failure: Option<String> = None;

    for leg in op.legs() {
        if *inner.emergency.borrow() {
            failure = Some("emergency_stop".to_string());
            break;
        }

        let Some(adapter) = inner.adapters.get(&leg.venue) else {
            failure = Some(format!("no adapter for venue {}", leg.venue));
            break;
        };

        let amount = leg.amount * scale;
        let (trade, result) = drive_leg(
            adapter,
            execution.id,
            leg,
            amount,
            inner.config.poll_interval,
            inner.emergency.subscribe(),
        )
        .await;

        match result {
            LegResult::Filled => {
                execution.trades.push(trade);
            }
            LegResult::Partial if op.partial_fills_enabled() && amount > Decimal::ZERO => {
                let filled = trade.filled_amount;
                scale = scale * filled / amount;
                execution.trades.push(trade);
            }
            LegResult::Partial => {
                execution.trades.push(trade);
                failure = Some("partial_fill".to_string());
                break;
            }
            LegResult::Failed(reason) => {
                execution.trades.push(trade);
                failure = Some(reason);
                break;
            }
        }
    }

    match failure {
        None => {
            execution.complete();
            info!(
                execution = %execution.id,
                profit = %execution.realized_profit,
                "execution completed"
            );
            let _ = op.transition(OpportunityStatus::Completed);
            inner.state.release(&op, execution.realized_profit);
            inner.perf.on_completed(&execution);
            let _ = inner
                .events
                .send(Event::ExecutionCompleted(Arc::new(execution)));
        }
        Some(reason) => {
            let nothing_filled = execution
                .trades
                .iter()
                .all(|t| t.filled_amount.is_zero());
            if reason == "emergency_stop" && nothing_filled {
                // Stopped before any fill: a clean cancel, no compensation.
                execution.cancel(reason);
            } else {
                recover(&inner, &mut execution).await;
                execution.fail(reason);
            }
            warn!(
                execution = %execution.id,
                status = execution.status.as_str(),
                errors = ?execution.errors,
                "execution did not complete"
            );
            let _ = op.transition(OpportunityStatus::Failed);
            inner.state.release(&op, execution.realized_profit);
            inner.perf.on_failed(&execution);
            let _ = inner
                .events
                .send(Event::ExecutionFailed(Arc::new(execution)));
        }
    }
}

/// Best-effort unwind: compensate every filled prior leg with an opposite
/// market order on the same venue, capped at the filled amount.
async fn recover(inner: &Arc<CoordinatorInner>, execution: &mut Execution) {
    let to_compensate: Vec<_> = execution
        .trades
        .iter()
        .enumerate()
        .filter(|(_, t)| !t.compensation && t.filled_amount > Decimal::ZERO)
        .map(|(index, t)| (index as u32 + 1, t.clone()))
        .collect();

    for (step, filled_trade) in to_compensate {
        let Some(adapter) = inner.adapters.get(&filled_trade.venue) else {
            execution.errors.push(format!(
                "compensation skipped: no adapter for {}",
                filled_trade.venue
            ));
            continue;
        };
        let (trade, result) = drive_compensation(
            adapter,
            execution.id,
            step,
            &filled_trade,
            inner.config.poll_interval,
        )
        .await;
        if let LegResult::Failed(reason) = &result {
            execution
                .errors
                .push(format!("compensation step {step}: {reason}"));
        }
        execution.trades.push(trade);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LegOrderType, OpportunityKind, OpportunityLeg, Side, Symbol};
    use crate::exchange::{BreakerRegistry, DemoVenue, FillMode, RetryPolicy, TokenBucket};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn symbol() -> Symbol {
        Symbol::new("BTC", "USDT")
    }

    fn two_leg_candidate(timeout_ms: u64) -> Opportunity {
        let now = Utc::now();
        let mut op = Opportunity::try_new(
            OpportunityKind::Simple,
            symbol(),
            vec![
                OpportunityLeg {
                    step_index: 1,
                    venue: VenueId::from("a"),
                    symbol: symbol(),
                    side: Side::Buy,
                    amount: dec!(1),
                    reference_price: dec!(100),
                    fee_estimate: dec!(0.1),
                    max_latency_ms: timeout_ms,
                    order_type: LegOrderType::Limit,
                },
                OpportunityLeg {
                    step_index: 2,
                    venue: VenueId::from("b"),
                    symbol: symbol(),
                    side: Side::Sell,
                    amount: dec!(1),
                    reference_price: dec!(100.4),
                    fee_estimate: dec!(0.1),
                    max_latency_ms: timeout_ms,
                    order_type: LegOrderType::Limit,
                },
            ],
            dec!(0.2),
            dec!(0.25),
            dec!(100),
            1.0,
            vec![],
            now,
            now + chrono::Duration::seconds(30),
            "test",
        )
        .unwrap();
        op.transition(OpportunityStatus::Approved).unwrap();
        op
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

    struct Harness {
        coordinator: ExecutionCoordinator,
        venue_a: Arc<DemoVenue>,
        venue_b: Arc<DemoVenue>,
        events: broadcast::Receiver<Event>,
        state: Arc<AppState>,
        stop: watch::Sender<bool>,
        handle: JoinHandle<()>,
    }

    fn harness() -> Harness {
        let venue_a = Arc::new(DemoVenue::new("a"));
        let venue_b = Arc::new(DemoVenue::new("b"));
        let adapters = HashMap::from([
            (VenueId::from("a"), wrap(venue_a.clone())),
            (VenueId::from("b"), wrap(venue_b.clone())),
        ]);
        let (event_tx, events) = broadcast::channel(64);
        let state = Arc::new(AppState::new());
        let coordinator = ExecutionCoordinator::new(
            ExecutorConfig {
                poll_interval: Duration::from_millis(10),
                ..ExecutorConfig::default()
            },
            adapters,
            event_tx,
            state.clone(),
            Arc::new(PerformanceTracker::new()),
        );
        let (stop, stop_rx) = watch::channel(false);
        let handle = coordinator.run(stop_rx);
        Harness {
            coordinator,
            venue_a,
            venue_b,
            events,
            state,
            stop,
            handle,
        }
    }

    async fn next_terminal(events: &mut broadcast::Receiver<Event>) -> Event {
        loop {
            match events.recv().await.unwrap() {
                event @ (Event::ExecutionCompleted(_) | Event::ExecutionFailed(_)) => {
                    return event;
                }
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn two_legs_fill_and_complete() {
        let mut h = harness();
        let op = two_leg_candidate(1000);
        h.state.reserve(&op);

        h.coordinator.submit(op).unwrap();

        match next_terminal(&mut h.events).await {
            Event::ExecutionCompleted(execution) => {
                assert_eq!(execution.status, ExecutionStatus::Completed);
                assert_eq!(execution.trades.len(), 2);
                assert!(execution.trades.iter().all(|t| t.is_filled()));
                // 100.4 - 100.0 spread minus 0.1% taker on both fills.
                let expected_fees = dec!(0.1) + dec!(0.1004);
                assert_eq!(execution.total_fees, expected_fees);
                assert_eq!(execution.realized_profit, dec!(0.4) - expected_fees);
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(h.state.total_exposure(), Decimal::ZERO);

        let _ = h.stop.send(true);
        let _ = h.handle.await;
    }

    #[tokio::test]
    async fn leg_timeout_cancels_and_compensates() {
        let mut h = harness();
        // Leg 1 fills; leg 2 rests open past its latency budget.
        h.venue_b.set_fill_mode(symbol(), Side::Sell, FillMode::Never);
        let op = two_leg_candidate(100);
        h.state.reserve(&op);

        h.coordinator.submit(op).unwrap();

        match next_terminal(&mut h.events).await {
            Event::ExecutionFailed(execution) => {
                assert_eq!(execution.status, ExecutionStatus::Failed);
                assert!(execution.errors.iter().any(|e| e.contains("leg_timeout")));

                // Compensation: a market sell on venue a for the filled buy.
                let compensation: Vec<_> =
                    execution.trades.iter().filter(|t| t.compensation).collect();
                assert_eq!(compensation.len(), 1);
                assert_eq!(compensation[0].venue.as_str(), "a");
                assert_eq!(compensation[0].side, Side::Sell);
                assert_eq!(compensation[0].requested_amount, dec!(1));
            }
            other => panic!("expected failure, got {other:?}"),
        }

        // The timed-out order was cancelled; nothing rests on either venue.
        assert_eq!(h.venue_a.open_order_count(), 0);
        assert_eq!(h.venue_b.open_order_count(), 0);

        let _ = h.stop.send(true);
        let _ = h.handle.await;
    }

    #[tokio::test]
    async fn rejected_first_leg_leaves_nothing_to_compensate() {
        let mut h = harness();
        h.venue_a.set_fill_mode(symbol(), Side::Buy, FillMode::Reject);
        let op = two_leg_candidate(1000);
        h.state.reserve(&op);

        h.coordinator.submit(op).unwrap();

        match next_terminal(&mut h.events).await {
            Event::ExecutionFailed(execution) => {
                assert!(execution.trades.iter().all(|t| !t.compensation));
                assert!(execution.trades.iter().all(|t| t.filled_amount.is_zero()));
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let _ = h.stop.send(true);
        let _ = h.handle.await;
    }

    #[tokio::test]
    async fn partial_fill_rescales_next_leg_when_enabled() {
        let mut h = harness();
        h.venue_a
            .set_fill_mode(symbol(), Side::Buy, FillMode::Partial(dec!(0.5)));
        let op = two_leg_candidate(1000).with_partial_fills(true);
        h.state.reserve(&op);

        h.coordinator.submit(op).unwrap();

        match next_terminal(&mut h.events).await {
            Event::ExecutionCompleted(execution) => {
                assert_eq!(execution.trades.len(), 2);
                assert_eq!(execution.trades[0].filled_amount, dec!(0.5));
                // Second leg shrank proportionally.
                assert_eq!(execution.trades[1].requested_amount, dec!(0.5));
            }
            other => panic!("expected completion, got {other:?}"),
        }

        let _ = h.stop.send(true);
        let _ = h.handle.await;
    }

    #[tokio::test]
    async fn partial_fill_fails_execution_when_disabled() {
        let mut h = harness();
        h.venue_a
            .set_fill_mode(symbol(), Side::Buy, FillMode::Partial(dec!(0.5)));
        let op = two_leg_candidate(1000);
        h.state.reserve(&op);

        h.coordinator.submit(op).unwrap();

        match next_terminal(&mut h.events).await {
            Event::ExecutionFailed(execution) => {
                assert!(execution.errors.iter().any(|e| e.contains("partial_fill")));
                // The half-filled buy gets compensated.
                let compensation: Vec<_> =
                    execution.trades.iter().filter(|t| t.compensation).collect();
                assert_eq!(compensation.len(), 1);
                assert_eq!(compensation[0].requested_amount, dec!(0.5));
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let _ = h.stop.send(true);
        let _ = h.handle.await;
    }

    #[tokio::test]
    async fn backpressure_rejects_excess_submissions() {
        let venue_a = Arc::new(DemoVenue::new("a"));
        let adapters = HashMap::from([(VenueId::from("a"), wrap(venue_a))]);
        let (event_tx, _events) = broadcast::channel(64);
        let coordinator = ExecutionCoordinator::new(
            ExecutorConfig {
                max_concurrent: 1,
                queue_bound: 2,
                poll_interval: Duration::from_millis(10),
            },
            adapters,
            event_tx,
            Arc::new(AppState::new()),
            Arc::new(PerformanceTracker::new()),
        );
        // Dispatch loop not running: everything stays queued.

        assert!(coordinator.submit(two_leg_candidate(1000)).is_ok());
        assert!(coordinator.submit(two_leg_candidate(1000)).is_ok());
        assert_eq!(
            coordinator.submit(two_leg_candidate(1000)),
            Err(SubmitError::Backpressure)
        );
    }

    #[tokio::test]
    async fn emergency_stop_blocks_new_submissions() {
        let h = harness();
        h.coordinator.emergency_stop("drill");

        assert_eq!(
            h.coordinator.submit(two_leg_candidate(1000)),
            Err(SubmitError::Stopped)
        );
        assert!(h.state.is_emergency());

        let _ = h.stop.send(true);
        let _ = h.handle.await;
    }

    #[tokio::test]
    async fn emergency_stop_before_any_fill_cancels_cleanly() {
        let mut h = harness();
        // Leg 1 rests open; the stop arrives while it waits for a fill.
        h.venue_a.set_fill_mode(symbol(), Side::Buy, FillMode::Never);
        let op = two_leg_candidate(5_000);
        h.state.reserve(&op);

        h.coordinator.submit(op).unwrap();
        loop {
            if let Event::ExecutionStarted { .. } = h.events.recv().await.unwrap() {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        h.coordinator.emergency_stop("drill");

        match next_terminal(&mut h.events).await {
            Event::ExecutionFailed(execution) => {
                assert_eq!(execution.status, ExecutionStatus::Cancelled);
                assert!(execution.errors.iter().any(|e| e.contains("emergency_stop")));
                // Nothing filled, so nothing was compensated.
                assert!(execution.trades.iter().all(|t| !t.compensation));
                assert!(execution.trades.iter().all(|t| t.filled_amount.is_zero()));
            }
            other => panic!("expected terminal event, got {other:?}"),
        }
        assert_eq!(h.venue_a.open_order_count(), 0);

        let _ = h.stop.send(true);
        let _ = h.handle.await;
    }

    #[tokio::test]
    async fn no_execution_starts_after_emergency_stop() {
        let mut h = harness();
        h.coordinator.emergency_stop("drill");

        tokio::time::sleep(Duration::from_millis(100)).await;
        // Only the stop event itself; never an executionStarted.
        loop {
            match h.events.try_recv() {
                Ok(Event::EmergencyStop { .. }) => {}
                Ok(Event::ExecutionStarted { .. }) => {
                    panic!("execution started after emergency stop")
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }

        let _ = h.stop.send(true);
        let _ = h.handle.await;
    }
}
