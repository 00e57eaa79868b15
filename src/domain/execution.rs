//! Execution records: the result of driving an opportunity's legs.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::id::{ExecutionId, OpportunityId};
use super::money::Quote;
use super::trade::{Side, Trade};

/// Execution state machine.
///
/// ```text
/// pending -> executing -> completed | failed | cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// The record of one execution attempt.
#[derive(Debug, Clone)]
pub struct Execution {
    pub id: ExecutionId,
    pub opportunity_id: OpportunityId,
    pub status: ExecutionStatus,
    pub trades: Vec<Trade>,
    pub realized_profit: Quote,
    pub total_fees: Quote,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
}

impl Execution {
    #[must_use]
    pub fn new(opportunity_id: OpportunityId) -> Self {
        Self {
            id: ExecutionId::generate(),
            opportunity_id,
            status: ExecutionStatus::Pending,
            trades: Vec::new(),
            realized_profit: Decimal::ZERO,
            total_fees: Decimal::ZERO,
            started_at: Utc::now(),
            completed_at: None,
            errors: Vec::new(),
        }
    }

    /// Sum of fees across all recorded trades.
    #[must_use]
    pub fn fees_from_trades(&self) -> Quote {
        self.trades.iter().map(|t| t.fee).sum()
    }

    /// Realized profit from filled notionals: sell proceeds minus buy costs
    /// minus total fees. Includes compensation trades, since those are real
    /// fills too.
    #[must_use]
    pub fn realized_from_trades(&self) -> Quote {
        let mut profit = Decimal::ZERO;
        for trade in &self.trades {
            match trade.side {
                Side::Sell => profit += trade.filled_notional(),
                Side::Buy => profit -= trade.filled_notional(),
            }
        }
        profit - self.fees_from_trades()
    }

    /// Wall-clock duration, if finished.
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        self.completed_at.map(|done| {
            (done - self.started_at)
                .num_milliseconds()
                .try_into()
                .unwrap_or(0)
        })
    }

    /// Finalize as completed, deriving profit and fees from the trades.
    pub fn complete(&mut self) {
        self.total_fees = self.fees_from_trades();
        self.realized_profit = self.realized_from_trades();
        self.completed_at = Some(Utc::now());
        self.status = ExecutionStatus::Completed;
    }

    /// Finalize as failed, still accounting any fills and compensations.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
        self.total_fees = self.fees_from_trades();
        self.realized_profit = self.realized_from_trades();
        self.completed_at = Some(Utc::now());
        self.status = ExecutionStatus::Failed;
    }

    /// Finalize as cancelled: the execution was stopped before any order
    /// filled, so there is nothing to compensate.
    pub fn cancel(&mut self, reason: impl Into<String>) {
        self.errors.push(reason.into());
        self.total_fees = self.fees_from_trades();
        self.realized_profit = self.realized_from_trades();
        self.completed_at = Some(Utc::now());
        self.status = ExecutionStatus::Cancelled;
    }
}
