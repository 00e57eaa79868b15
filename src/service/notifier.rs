//! Core event stream and notification fan-out.
//!
//! Every component reports through the typed [`Event`] stream; the
//! supervisor re-broadcasts it to external observers (dashboard status
//! file, notifiers). Observers are read-only: notification dispatch is
//! fire-and-forget and must never block or mutate core state.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::domain::{Execution, ExecutionId, Opportunity, OpportunityId, Symbol, VenueId};

/// Events emitted by the core pipeline.
#[derive(Debug, Clone)]
pub enum Event {
    OpportunityDetected(Arc<Opportunity>),
    OpportunityExpired {
        id: OpportunityId,
    },
    ExecutionStarted {
        execution_id: ExecutionId,
        opportunity_id: OpportunityId,
    },
    ExecutionCompleted(Arc<Execution>),
    ExecutionFailed(Arc<Execution>),
    /// A risk limit crossed from healthy to breached.
    RiskAlert {
        limit: &'static str,
        value: Decimal,
    },
    EmergencyStop {
        reason: String,
    },
    PriceAlert {
        venue: VenueId,
        symbol: Symbol,
        previous: Decimal,
        current: Decimal,
        change_pct: Decimal,
    },
    VolumeSpike {
        venue: VenueId,
        symbol: Symbol,
        previous: Decimal,
        current: Decimal,
    },
    VenueConnectionLost {
        venue: VenueId,
    },
    VenueConnectionRestored {
        venue: VenueId,
    },
    Heartbeat {
        uptime_secs: u64,
        rss_bytes: u64,
    },
}

impl Event {
    /// Short name matching the external event stream contract.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpportunityDetected(_) => "opportunityDetected",
            Self::OpportunityExpired { .. } => "opportunityExpired",
            Self::ExecutionStarted { .. } => "executionStarted",
            Self::ExecutionCompleted(_) => "executionCompleted",
            Self::ExecutionFailed(_) => "executionFailed",
            Self::RiskAlert { .. } => "riskAlert",
            Self::EmergencyStop { .. } => "emergencyStop",
            Self::PriceAlert { .. } => "priceAlert",
            Self::VolumeSpike { .. } => "volumeSpike",
            Self::VenueConnectionLost { .. } => "venueConnectionLost",
            Self::VenueConnectionRestored { .. } => "venueConnectionRestored",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }
}

/// A notification sink.
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deliver an event. Implementations must be quick and non-blocking;
    /// slow transports should queue internally.
    fn notify(&self, event: &Event);
}

/// Notifier that logs events through `tracing`.
#[derive(Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn notify(&self, event: &Event) {
        match event {
            Event::OpportunityDetected(op) => info!(
                event = event.name(),
                id = %op.id(),
                kind = op.kind().as_str(),
                symbol = %op.symbol(),
                net = %op.projected_profit_quote(),
                net_pct = %op.projected_profit_pct(),
                confidence = op.confidence(),
                "opportunity detected"
            ),
            Event::OpportunityExpired { id } => {
                info!(event = event.name(), id = %id, "opportunity expired");
            }
            Event::ExecutionStarted {
                execution_id,
                opportunity_id,
            } => info!(
                event = event.name(),
                execution = %execution_id,
                opportunity = %opportunity_id,
                "execution started"
            ),
            Event::ExecutionCompleted(execution) => info!(
                event = event.name(),
                execution = %execution.id,
                profit = %execution.realized_profit,
                fees = %execution.total_fees,
                "execution completed"
            ),
            Event::ExecutionFailed(execution) => warn!(
                event = event.name(),
                execution = %execution.id,
                errors = ?execution.errors,
                "execution failed"
            ),
            Event::RiskAlert { limit, value } => {
                warn!(event = event.name(), limit, value = %value, "risk limit breached");
            }
            Event::EmergencyStop { reason } => {
                warn!(event = event.name(), reason = %reason, "emergency stop");
            }
            Event::PriceAlert {
                venue,
                symbol,
                change_pct,
                ..
            } => info!(
                event = event.name(),
                venue = %venue,
                symbol = %symbol,
                change_pct = %change_pct,
                "price alert"
            ),
            Event::VolumeSpike { venue, symbol, .. } => {
                info!(event = event.name(), venue = %venue, symbol = %symbol, "volume spike");
            }
            Event::VenueConnectionLost { venue } => {
                warn!(event = event.name(), venue = %venue, "venue connection lost");
            }
            Event::VenueConnectionRestored { venue } => {
                info!(event = event.name(), venue = %venue, "venue connection restored");
            }
            Event::Heartbeat {
                uptime_secs,
                rss_bytes,
            } => info!(
                event = event.name(),
                uptime_secs,
                rss_bytes,
                "heartbeat"
            ),
        }
    }
}

/// Notifier that drops everything; placeholder for disabled transports.
#[derive(Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn name(&self) -> &'static str {
        "null"
    }

    fn notify(&self, _event: &Event) {}
}

/// Fan-out to all registered notifiers.
#[derive(Default)]
pub struct NotifierRegistry {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotifierRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, notifier: Box<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    pub fn notify_all(&self, event: &Event) {
        for notifier in &self.notifiers {
            notifier.notify(event);
        }
    }
}
