//! Driving a single leg order to a terminal status.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::{
    Amount, ClientOrderId, ExecutionId, LegOrderType, OpportunityLeg, Side, Trade, TradeStatus,
};
use crate::exchange::{InstrumentedVenue, OrderRequest, OrderState, OrderType};

/// Compensation orders get a fixed budget to land.
const COMPENSATION_BUDGET: Duration = Duration::from_secs(5);

/// How a driven leg ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LegResult {
    Filled,
    Partial,
    Failed(String),
}

fn apply_state(trade: &mut Trade, state: &OrderState) {
    trade.filled_amount = state.filled_amount;
    trade.average_fill_price = state.average_fill_price;
    trade.fee = state.fee;
    trade.status = state.status;
    if state.status == TradeStatus::Filled {
        trade.filled_at = Some(chrono::Utc::now());
    }
}

/// Cancel an order and capture whatever fill state it ended with.
async fn cancel_and_settle(adapter: &Arc<InstrumentedVenue>, trade: &mut Trade) {
    let Some(external_id) = trade.external_order_id.clone() else {
        trade.status = TradeStatus::Cancelled;
        return;
    };
    if let Err(e) = adapter.cancel_order(&external_id, &trade.symbol).await {
        warn!(order = %external_id, error = %e, "order cancel failed");
    }
    match adapter.fetch_order(&external_id, &trade.symbol).await {
        Ok(state) => {
            apply_state(trade, &state);
            if !trade.status.is_terminal() {
                trade.status = TradeStatus::Cancelled;
            }
        }
        Err(e) => {
            debug!(order = %external_id, error = %e, "final order state unavailable");
            trade.status = TradeStatus::Cancelled;
        }
    }
}

/// Submit a leg's order and wait for a terminal status, the leg's latency
/// budget, or an emergency signal, whichever comes first.
pub(crate) async fn drive_leg(
    adapter: &Arc<InstrumentedVenue>,
    execution_id: ExecutionId,
    leg: &OpportunityLeg,
    amount: Amount,
    poll_interval: Duration,
    mut emergency: watch::Receiver<bool>,
) -> (Trade, LegResult) {
    let client_order_id = ClientOrderId::for_leg(execution_id, leg.step_index);
    let (order_type, price) = match leg.order_type {
        LegOrderType::Limit => (OrderType::Limit, Some(leg.reference_price)),
        LegOrderType::Market => (OrderType::Market, None),
    };
    let mut trade = Trade::new(
        leg.venue.clone(),
        leg.symbol.clone(),
        leg.side,
        amount,
        price,
        client_order_id.clone(),
    );

    let request = OrderRequest {
        client_order_id,
        symbol: leg.symbol.clone(),
        side: leg.side,
        order_type,
        amount,
        price,
    };

    let external_id = match adapter.place_order(&request).await {
        Ok(id) => id,
        Err(e) => {
            trade.status = TradeStatus::Rejected;
            return (trade, LegResult::Failed(format!("order_submit_failed: {e}")));
        }
    };
    trade.external_order_id = Some(external_id.clone());
    trade.status = TradeStatus::Open;

    let deadline = Instant::now() + Duration::from_millis(leg.max_latency_ms.max(1));
    loop {
        let now = Instant::now();
        if now >= deadline {
            cancel_and_settle(adapter, &mut trade).await;
            return (trade, LegResult::Failed("leg_timeout".to_string()));
        }

        let sleep_for = poll_interval.min(deadline - now);
        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = emergency.changed() => {
                if *emergency.borrow() {
                    cancel_and_settle(adapter, &mut trade).await;
                    return (trade, LegResult::Failed("emergency_stop".to_string()));
                }
            }
        }

        match adapter.fetch_order(&external_id, &leg.symbol).await {
            Ok(state) => {
                apply_state(&mut trade, &state);
                match state.status {
                    TradeStatus::Filled => return (trade, LegResult::Filled),
                    TradeStatus::Partial => return (trade, LegResult::Partial),
                    TradeStatus::Cancelled => {
                        return (trade, LegResult::Failed("order_cancelled".to_string()));
                    }
                    TradeStatus::Rejected => {
                        return (trade, LegResult::Failed("order_rejected".to_string()));
                    }
                    TradeStatus::Pending | TradeStatus::Open => {}
                }
            }
            Err(e) => {
                cancel_and_settle(adapter, &mut trade).await;
                return (trade, LegResult::Failed(format!("status_probe_failed: {e}")));
            }
        }
    }
}

/// Issue a best-effort compensating market order for a filled leg: same
/// venue, opposite side, capped at the filled amount.
pub(crate) async fn drive_compensation(
    adapter: &Arc<InstrumentedVenue>,
    execution_id: ExecutionId,
    step: u32,
    filled: &Trade,
    poll_interval: Duration,
) -> (Trade, LegResult) {
    let client_order_id = ClientOrderId::for_compensation(execution_id, step);
    let side: Side = filled.side.opposite();
    let mut trade = Trade::new(
        filled.venue.clone(),
        filled.symbol.clone(),
        side,
        filled.filled_amount,
        None,
        client_order_id.clone(),
    )
    .as_compensation();

    let request = OrderRequest {
        client_order_id,
        symbol: filled.symbol.clone(),
        side,
        order_type: OrderType::Market,
        amount: filled.filled_amount,
        price: None,
    };

    let external_id = match adapter.place_order(&request).await {
        Ok(id) => id,
        Err(e) => {
            trade.status = TradeStatus::Rejected;
            return (
                trade,
                LegResult::Failed(format!("compensation_submit_failed: {e}")),
            );
        }
    };
    trade.external_order_id = Some(external_id.clone());
    trade.status = TradeStatus::Open;

    let deadline = Instant::now() + COMPENSATION_BUDGET;
    while Instant::now() < deadline {
        match adapter.fetch_order(&external_id, &trade.symbol).await {
            Ok(state) => {
                apply_state(&mut trade, &state);
                match state.status {
                    TradeStatus::Filled => return (trade, LegResult::Filled),
                    TradeStatus::Partial if state.filled_amount > Decimal::ZERO => {
                        return (trade, LegResult::Partial);
                    }
                    status if status.is_terminal() => {
                        return (
                            trade,
                            LegResult::Failed(format!("compensation_{}", status.as_str())),
                        );
                    }
                    _ => {}
                }
            }
            Err(e) => {
                return (
                    trade,
                    LegResult::Failed(format!("compensation_probe_failed: {e}")),
                );
            }
        }
        tokio::time::sleep(poll_interval).await;
    }

    cancel_and_settle(adapter, &mut trade).await;
    (trade, LegResult::Failed("compensation_timeout".to_string()))
}
