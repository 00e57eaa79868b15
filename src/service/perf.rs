//! Performance tracker.
//!
//! Pure aggregator over execution lifecycle events. Single writer (the
//! coordinator's completion path), many readers via [`PerformanceTracker::snapshot`].
//! Never triggers actions.

use std::collections::{BTreeMap, VecDeque};

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::domain::{Execution, Quote};

/// Rolling per-execution samples retained.
const ROLLING_WINDOW: usize = 1_000;

/// Days of per-day profit retained.
const DAILY_WINDOW: usize = 30;

/// Daily risk-free rate used in the Sharpe-style ratio.
const DAILY_RISK_FREE: f64 = 0.02 / 365.0;

#[derive(Default)]
struct PerfInner {
    total_executions: u64,
    successful_executions: u64,
    failed_executions: u64,
    cumulative_profit: Quote,
    cumulative_fees: Quote,
    recent_profits: VecDeque<Decimal>,
    recent_latency_ms: VecDeque<u64>,
    daily_profit: BTreeMap<NaiveDate, Decimal>,
    peak_profit: Quote,
    max_drawdown: Decimal,
}

impl PerfInner {
    fn record_result(&mut self, execution: &Execution) {
        self.cumulative_profit += execution.realized_profit;
        self.cumulative_fees += execution.total_fees;

        self.recent_profits.push_back(execution.realized_profit);
        if self.recent_profits.len() > ROLLING_WINDOW {
            self.recent_profits.pop_front();
        }
        if let Some(latency) = execution.duration_ms() {
            self.recent_latency_ms.push_back(latency);
            if self.recent_latency_ms.len() > ROLLING_WINDOW {
                self.recent_latency_ms.pop_front();
            }
        }

        let day = execution
            .completed_at
            .unwrap_or_else(Utc::now)
            .date_naive();
        *self.daily_profit.entry(day).or_default() += execution.realized_profit;
        while self.daily_profit.len() > DAILY_WINDOW {
            let oldest = *self
                .daily_profit
                .keys()
                .next()
                .unwrap_or(&day);
            self.daily_profit.remove(&oldest);
        }

        if self.cumulative_profit > self.peak_profit {
            self.peak_profit = self.cumulative_profit;
        } else if self.peak_profit > Decimal::ZERO {
            let drawdown = (self.peak_profit - self.cumulative_profit) / self.peak_profit;
            if drawdown > self.max_drawdown {
                self.max_drawdown = drawdown;
            }
        }
    }

    fn sharpe(&self) -> Option<f64> {
        if self.daily_profit.len() < 2 {
            return None;
        }
        let returns: Vec<f64> = self
            .daily_profit
            .values()
            .filter_map(|p| p.to_f64())
            .collect();
        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();
        if std_dev == 0.0 {
            return None;
        }
        Some((mean - DAILY_RISK_FREE) / std_dev)
    }
}

/// Point-in-time view of accumulated performance.
#[derive(Debug, Clone)]
pub struct PerformanceSnapshot {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub cumulative_profit: Quote,
    pub cumulative_fees: Quote,
    pub success_rate: Option<f64>,
    pub average_latency_ms: Option<f64>,
    pub peak_profit: Quote,
    pub max_drawdown: Decimal,
    pub sharpe: Option<f64>,
}

/// Aggregates completed and failed executions into rolling metrics.
#[derive(Default)]
pub struct PerformanceTracker {
    inner: Mutex<PerfInner>,
}

impl PerformanceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An execution entered the pipeline.
    ///
    /// Total counts on start, successful on completion, so the success rate
    /// dips while executions are in flight.
    /// TODO: verify this counting against product requirements; an earlier
    /// revision bumped both counters on start.
    pub fn on_started(&self) {
        self.inner.lock().total_executions += 1;
    }

    pub fn on_completed(&self, execution: &Execution) {
        let mut inner = self.inner.lock();
        inner.successful_executions += 1;
        inner.record_result(execution);
    }

    pub fn on_failed(&self, execution: &Execution) {
        let mut inner = self.inner.lock();
        inner.failed_executions += 1;
        inner.record_result(execution);
    }

    #[must_use]
    pub fn snapshot(&self) -> PerformanceSnapshot {
        let inner = self.inner.lock();
        let success_rate = if inner.total_executions > 0 {
            Some(inner.successful_executions as f64 / inner.total_executions as f64)
        } else {
            None
        };
        let average_latency_ms = if inner.recent_latency_ms.is_empty() {
            None
        } else {
            Some(
                inner.recent_latency_ms.iter().sum::<u64>() as f64
                    / inner.recent_latency_ms.len() as f64,
            )
        };
        PerformanceSnapshot {
            total_executions: inner.total_executions,
            successful_executions: inner.successful_executions,
            failed_executions: inner.failed_executions,
            cumulative_profit: inner.cumulative_profit,
            cumulative_fees: inner.cumulative_fees,
            success_rate,
            average_latency_ms,
            peak_profit: inner.peak_profit,
            max_drawdown: inner.max_drawdown,
            sharpe: inner.sharpe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OpportunityId;
    use rust_decimal_macros::dec;

    fn finished(profit: Decimal, fees: Decimal) -> Execution {
        let mut execution = Execution::new(OpportunityId::generate());
        execution.realized_profit = profit;
        execution.total_fees = fees;
        execution.completed_at = Some(Utc::now());
        execution
    }

    #[test]
    fn counts_total_on_start_and_success_on_complete() {
        let tracker = PerformanceTracker::new();
        tracker.on_started();
        tracker.on_started();
        tracker.on_completed(&finished(dec!(1), dec!(0.1)));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.total_executions, 2);
        assert_eq!(snapshot.successful_executions, 1);
        assert_eq!(snapshot.success_rate, Some(0.5));
    }

    #[test]
    fn accumulates_profit_and_fees() {
        let tracker = PerformanceTracker::new();
        tracker.on_started();
        tracker.on_completed(&finished(dec!(2.5), dec!(0.2)));
        tracker.on_started();
        tracker.on_failed(&finished(dec!(-1.0), dec!(0.1)));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.cumulative_profit, dec!(1.5));
        assert_eq!(snapshot.cumulative_fees, dec!(0.3));
        assert_eq!(snapshot.failed_executions, 1);
    }

    #[test]
    fn drawdown_tracks_fall_from_peak() {
        let tracker = PerformanceTracker::new();
        tracker.on_started();
        tracker.on_completed(&finished(dec!(10), Decimal::ZERO));
        tracker.on_started();
        tracker.on_failed(&finished(dec!(-4), Decimal::ZERO));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.peak_profit, dec!(10));
        assert_eq!(snapshot.max_drawdown, dec!(0.4));
    }

    #[test]
    fn drawdown_needs_positive_peak() {
        let tracker = PerformanceTracker::new();
        tracker.on_started();
        tracker.on_failed(&finished(dec!(-5), Decimal::ZERO));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.max_drawdown, Decimal::ZERO);
    }

    #[test]
    fn sharpe_requires_two_daily_returns() {
        let tracker = PerformanceTracker::new();
        tracker.on_started();
        tracker.on_completed(&finished(dec!(1), Decimal::ZERO));

        // One day of history only.
        assert!(tracker.snapshot().sharpe.is_none());
    }

    #[test]
    fn sharpe_computes_over_distinct_days() {
        let tracker = PerformanceTracker::new();
        tracker.on_started();
        let mut yesterday = finished(dec!(1), Decimal::ZERO);
        yesterday.completed_at = Some(Utc::now() - chrono::Duration::days(1));
        tracker.on_completed(&yesterday);
        tracker.on_started();
        tracker.on_completed(&finished(dec!(3), Decimal::ZERO));

        let sharpe = tracker.snapshot().sharpe.unwrap();
        // Mean 2, std 1, risk-free negligible.
        assert!((sharpe - 2.0).abs() < 0.01);
    }
}
