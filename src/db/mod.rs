//! Append-only audit store.
//!
//! Detected opportunities, finished executions and their trades go into
//! SQLite for offline analysis. The audit is strictly an observer: write
//! failures are logged and never surface into the pipeline.

pub mod model;
pub mod schema;

use std::sync::Arc;

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::{Execution, Opportunity, Trade};
use crate::error::{Error, Result};
use crate::service::Event;

use model::{NewExecutionRow, NewOpportunityRow, NewTradeRow};

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

const SCHEMA_SQL: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS opportunities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        opportunity_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        symbol TEXT NOT NULL,
        strategy TEXT NOT NULL,
        projected_profit DOUBLE NOT NULL,
        projected_profit_pct DOUBLE NOT NULL,
        volume_quote DOUBLE NOT NULL,
        confidence DOUBLE NOT NULL,
        status TEXT NOT NULL,
        detected_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS executions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        execution_id TEXT NOT NULL,
        opportunity_id TEXT NOT NULL,
        status TEXT NOT NULL,
        realized_profit DOUBLE NOT NULL,
        total_fees DOUBLE NOT NULL,
        errors TEXT NOT NULL,
        started_at TEXT NOT NULL,
        completed_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS trades (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        execution_id TEXT NOT NULL,
        venue TEXT NOT NULL,
        symbol TEXT NOT NULL,
        side TEXT NOT NULL,
        requested_amount DOUBLE NOT NULL,
        filled_amount DOUBLE NOT NULL,
        average_fill_price DOUBLE NOT NULL,
        fee DOUBLE NOT NULL,
        status TEXT NOT NULL,
        client_order_id TEXT NOT NULL,
        external_order_id TEXT,
        compensation BOOLEAN NOT NULL,
        created_at TEXT NOT NULL,
        filled_at TEXT
    )",
];

/// Open (or create) the audit database and ensure the schema exists.
pub fn create_pool(database_url: &str) -> Result<DbPool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| Error::Database(e.to_string()))?;

    let mut conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
    for statement in SCHEMA_SQL {
        diesel::sql_query(statement)
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
    }
    Ok(pool)
}

fn decimal_to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Writes pipeline events into the audit tables.
pub struct AuditRecorder {
    pool: DbPool,
}

impl AuditRecorder {
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn record_opportunity(&self, op: &Opportunity) {
        let row = NewOpportunityRow {
            opportunity_id: op.id().to_string(),
            kind: op.kind().as_str().to_string(),
            symbol: op.symbol().to_string(),
            strategy: op.strategy().to_string(),
            projected_profit: decimal_to_f64(op.projected_profit_quote()),
            projected_profit_pct: decimal_to_f64(op.projected_profit_pct()),
            volume_quote: decimal_to_f64(op.volume_quote()),
            confidence: op.confidence(),
            status: op.status().as_str().to_string(),
            detected_at: op.created_at().to_rfc3339(),
        };

        let Ok(mut conn) = self.pool.get() else {
            warn!("audit connection unavailable, dropping opportunity row");
            return;
        };
        if let Err(e) = diesel::insert_into(schema::opportunities::table)
            .values(&row)
            .execute(&mut conn)
        {
            warn!(error = %e, "failed to record opportunity");
        }
    }

    pub fn record_execution(&self, execution: &Execution) {
        let row = NewExecutionRow {
            execution_id: execution.id.to_string(),
            opportunity_id: execution.opportunity_id.to_string(),
            status: execution.status.as_str().to_string(),
            realized_profit: decimal_to_f64(execution.realized_profit),
            total_fees: decimal_to_f64(execution.total_fees),
            errors: serde_json::to_string(&execution.errors).unwrap_or_default(),
            started_at: execution.started_at.to_rfc3339(),
            completed_at: execution.completed_at.map(|t| t.to_rfc3339()),
        };

        let Ok(mut conn) = self.pool.get() else {
            warn!("audit connection unavailable, dropping execution row");
            return;
        };
        if let Err(e) = diesel::insert_into(schema::executions::table)
            .values(&row)
            .execute(&mut conn)
        {
            warn!(error = %e, "failed to record execution");
            return;
        }
        for trade in &execution.trades {
            self.record_trade(&mut conn, execution, trade);
        }
        debug!(execution = %execution.id, trades = execution.trades.len(), "execution audited");
    }

    fn record_trade(&self, conn: &mut SqliteConnection, execution: &Execution, trade: &Trade) {
        let row = NewTradeRow {
            execution_id: execution.id.to_string(),
            venue: trade.venue.to_string(),
            symbol: trade.symbol.to_string(),
            side: trade.side.as_str().to_string(),
            requested_amount: decimal_to_f64(trade.requested_amount),
            filled_amount: decimal_to_f64(trade.filled_amount),
            average_fill_price: decimal_to_f64(trade.average_fill_price),
            fee: decimal_to_f64(trade.fee),
            status: trade.status.as_str().to_string(),
            client_order_id: trade.client_order_id.to_string(),
            external_order_id: trade.external_order_id.as_ref().map(ToString::to_string),
            compensation: trade.compensation,
            created_at: trade.created_at.to_rfc3339(),
            filled_at: trade.filled_at.map(|t| t.to_rfc3339()),
        };
        if let Err(e) = diesel::insert_into(schema::trades::table)
            .values(&row)
            .execute(conn)
        {
            warn!(error = %e, "failed to record trade");
        }
    }
}

/// Subscribe the audit recorder to the event stream.
pub fn spawn_audit_task(
    recorder: Arc<AuditRecorder>,
    mut events: broadcast::Receiver<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(Event::OpportunityDetected(op)) => recorder.record_opportunity(&op),
                Ok(Event::ExecutionCompleted(execution) | Event::ExecutionFailed(execution)) => {
                    recorder.record_execution(&execution);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "audit task lagged behind event stream");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExecutionStatus, OpportunityId};
    use diesel::dsl::count_star;

    fn memory_pool() -> DbPool {
        create_pool(":memory:").unwrap()
    }

    #[test]
    fn schema_creates_and_accepts_execution_rows() {
        let pool = memory_pool();
        let recorder = AuditRecorder::new(pool.clone());

        let mut execution = Execution::new(OpportunityId::generate());
        execution.status = ExecutionStatus::Completed;
        execution.errors.push("none".to_string());
        recorder.record_execution(&execution);

        let mut conn = pool.get().unwrap();
        let rows: i64 = schema::executions::table
            .select(count_star())
            .first(&mut conn)
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn trades_are_written_with_their_execution() {
        use crate::domain::{ClientOrderId, ExecutionId, Side, Symbol, Trade, VenueId};
        use rust_decimal_macros::dec;

        let pool = memory_pool();
        let recorder = AuditRecorder::new(pool.clone());

        let mut execution = Execution::new(OpportunityId::generate());
        execution.trades.push(Trade::new(
            VenueId::from("a"),
            Symbol::new("BTC", "USDT"),
            Side::Buy,
            dec!(1),
            Some(dec!(100)),
            ClientOrderId::for_leg(ExecutionId::generate(), 1),
        ));
        recorder.record_execution(&execution);

        let mut conn = pool.get().unwrap();
        let rows: i64 = schema::trades::table
            .select(count_star())
            .first(&mut conn)
            .unwrap();
        assert_eq!(rows, 1);
    }
}
