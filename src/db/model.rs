//! Insertable rows for the audit tables.

use diesel::prelude::*;

use super::schema::{executions, opportunities, trades};

#[derive(Debug, Insertable)]
#[diesel(table_name = opportunities)]
pub struct NewOpportunityRow {
    pub opportunity_id: String,
    pub kind: String,
    pub symbol: String,
    pub strategy: String,
    pub projected_profit: f64,
    pub projected_profit_pct: f64,
    pub volume_quote: f64,
    pub confidence: f64,
    pub status: String,
    pub detected_at: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = executions)]
pub struct NewExecutionRow {
    pub execution_id: String,
    pub opportunity_id: String,
    pub status: String,
    pub realized_profit: f64,
    pub total_fees: f64,
    pub errors: String,
    pub started_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = trades)]
pub struct NewTradeRow {
    pub execution_id: String,
    pub venue: String,
    pub symbol: String,
    pub side: String,
    pub requested_amount: f64,
    pub filled_amount: f64,
    pub average_fill_price: f64,
    pub fee: f64,
    pub status: String,
    pub client_order_id: String,
    pub external_order_id: Option<String>,
    pub compensation: bool,
    pub created_at: String,
    pub filled_at: Option<String>,
}
