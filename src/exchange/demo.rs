//! In-memory demo venue.
//!
//! Implements the full [`VenueAdapter`] contract against scripted market
//! state. Used by demo mode, the one-shot health check, and the test
//! suites, which drive fills through [`FillMode`] and inject failures with
//! [`DemoVenue::fail_next`].

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::domain::{
    Amount, Asset, Balance, BookSnapshot, ClientOrderId, ExternalOrderId, FundingSnapshot,
    Price, Side, Symbol, TickerSnapshot, TradeStatus, VenueId,
};

use super::{OrderRequest, OrderState, OrderType, VenueAdapter, VenueError};

/// How the demo venue resolves an incoming order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillMode {
    /// Fill completely on placement.
    Immediate,
    /// Fill this fraction of the requested amount, then go terminal.
    Partial(Decimal),
    /// Stay open for `n` status polls, then fill.
    AfterPolls(u32),
    /// Rest open until cancelled.
    Never,
    /// Reject on placement.
    Reject,
}

#[derive(Debug, Clone)]
struct DemoOrder {
    external_id: ExternalOrderId,
    symbol: Symbol,
    side: Side,
    amount: Amount,
    price: Price,
    status: TradeStatus,
    filled_amount: Amount,
    fee: Decimal,
    polls_remaining: u32,
}

#[derive(Default)]
struct DemoState {
    tickers: HashMap<Symbol, TickerSnapshot>,
    books: HashMap<Symbol, BookSnapshot>,
    funding: HashMap<Symbol, FundingSnapshot>,
    balances: HashMap<Asset, Balance>,
    orders: HashMap<ClientOrderId, DemoOrder>,
    by_external: HashMap<ExternalOrderId, ClientOrderId>,
    fill_modes: HashMap<(Symbol, Side), FillMode>,
    fail_next: VecDeque<VenueError>,
    order_seq: u64,
}

/// Scriptable venue for demo mode and tests.
pub struct DemoVenue {
    id: VenueId,
    taker_rate: Decimal,
    state: Mutex<DemoState>,
}

impl DemoVenue {
    #[must_use]
    pub fn new(id: impl Into<VenueId>) -> Self {
        Self {
            id: id.into(),
            taker_rate: Decimal::new(1, 3),
            state: Mutex::new(DemoState::default()),
        }
    }

    #[must_use]
    pub fn with_taker_rate(mut self, rate: Decimal) -> Self {
        self.taker_rate = rate;
        self
    }

    pub fn set_ticker(&self, ticker: TickerSnapshot) {
        self.state.lock().tickers.insert(ticker.symbol.clone(), ticker);
    }

    pub fn set_book(&self, book: BookSnapshot) {
        self.state.lock().books.insert(book.symbol.clone(), book);
    }

    pub fn set_funding(&self, funding: FundingSnapshot) {
        self.state
            .lock()
            .funding
            .insert(funding.symbol.clone(), funding);
    }

    pub fn set_balance(&self, asset: impl Into<Asset>, balance: Balance) {
        self.state.lock().balances.insert(asset.into(), balance);
    }

    /// Resolution mode for future orders on (symbol, side).
    pub fn set_fill_mode(&self, symbol: Symbol, side: Side, mode: FillMode) {
        self.state.lock().fill_modes.insert((symbol, side), mode);
    }

    /// Queue an error returned by the next adapter call that checks it.
    pub fn fail_next(&self, error: VenueError) {
        self.state.lock().fail_next.push_back(error);
    }

    /// Number of orders still resting (pending or open).
    #[must_use]
    pub fn open_order_count(&self) -> usize {
        self.state
            .lock()
            .orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .count()
    }

    /// Total orders ever accepted; idempotent resubmits do not count twice.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.state.lock().orders.len()
    }

    fn take_failure(state: &mut DemoState) -> Result<(), VenueError> {
        match state.fail_next.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn fill_price(state: &DemoState, request: &OrderRequest) -> Price {
        if let Some(price) = request.price {
            return price;
        }
        // Market order: cross the book at the touch.
        state
            .tickers
            .get(&request.symbol)
            .map(|t| match request.side {
                Side::Buy => t.ask,
                Side::Sell => t.bid,
            })
            .unwrap_or(Decimal::ZERO)
    }
}

#[async_trait]
impl VenueAdapter for DemoVenue {
    fn venue_id(&self) -> &VenueId {
        &self.id
    }

    async fn fetch_ticker(&self, symbol: &Symbol) -> Result<TickerSnapshot, VenueError> {
        let mut state = self.state.lock();
        Self::take_failure(&mut state)?;
        state
            .tickers
            .get(symbol)
            .cloned()
            .ok_or_else(|| VenueError::NotFound(symbol.to_string()))
    }

    async fn fetch_book(&self, symbol: &Symbol, depth: usize) -> Result<BookSnapshot, VenueError> {
        let mut state = self.state.lock();
        Self::take_failure(&mut state)?;
        let mut book = state
            .books
            .get(symbol)
            .cloned()
            .ok_or_else(|| VenueError::NotFound(symbol.to_string()))?;
        book.bids.truncate(depth);
        book.asks.truncate(depth);
        Ok(book)
    }

    async fn fetch_balances(&self) -> Result<HashMap<Asset, Balance>, VenueError> {
        let mut state = self.state.lock();
        Self::take_failure(&mut state)?;
        Ok(state.balances.clone())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<ExternalOrderId, VenueError> {
        let mut state = self.state.lock();
        Self::take_failure(&mut state)?;

        // Idempotency: a resubmitted client id returns the original order.
        if let Some(existing) = state.orders.get(&request.client_order_id) {
            return Ok(existing.external_id.clone());
        }

        if request.order_type == OrderType::Limit && request.price.is_none() {
            return Err(VenueError::Permanent("limit order without price".into()));
        }

        state.order_seq += 1;
        let external_id = ExternalOrderId::from(format!("{}-{}", self.id, state.order_seq));
        let mode = state
            .fill_modes
            .get(&(request.symbol.clone(), request.side))
            .copied()
            .unwrap_or(FillMode::Immediate);
        let price = Self::fill_price(&state, request);

        let mut order = DemoOrder {
            external_id: external_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            amount: request.amount,
            price,
            status: TradeStatus::Open,
            filled_amount: Decimal::ZERO,
            fee: Decimal::ZERO,
            polls_remaining: 0,
        };

        match mode {
            FillMode::Immediate => {
                order.status = TradeStatus::Filled;
                order.filled_amount = request.amount;
                order.fee = request.amount * price * self.taker_rate;
            }
            FillMode::Partial(ratio) => {
                order.status = TradeStatus::Partial;
                order.filled_amount = request.amount * ratio;
                order.fee = order.filled_amount * price * self.taker_rate;
            }
            FillMode::AfterPolls(n) => {
                order.polls_remaining = n;
            }
            FillMode::Never => {}
            FillMode::Reject => {
                order.status = TradeStatus::Rejected;
            }
        }

        state
            .by_external
            .insert(external_id.clone(), request.client_order_id.clone());
        state.orders.insert(request.client_order_id.clone(), order);
        Ok(external_id)
    }

    async fn cancel_order(
        &self,
        order_id: &ExternalOrderId,
        _symbol: &Symbol,
    ) -> Result<(), VenueError> {
        let mut state = self.state.lock();
        Self::take_failure(&mut state)?;
        let client_id = state
            .by_external
            .get(order_id)
            .cloned()
            .ok_or_else(|| VenueError::NotFound(order_id.to_string()))?;
        if let Some(order) = state.orders.get_mut(&client_id) {
            if !order.status.is_terminal() {
                order.status = if order.filled_amount > Decimal::ZERO {
                    TradeStatus::Partial
                } else {
                    TradeStatus::Cancelled
                };
            }
        }
        Ok(())
    }

    async fn fetch_order(
        &self,
        order_id: &ExternalOrderId,
        _symbol: &Symbol,
    ) -> Result<OrderState, VenueError> {
        let mut state = self.state.lock();
        Self::take_failure(&mut state)?;
        let client_id = state
            .by_external
            .get(order_id)
            .cloned()
            .ok_or_else(|| VenueError::NotFound(order_id.to_string()))?;
        let taker_rate = self.taker_rate;
        let order = state
            .orders
            .get_mut(&client_id)
            .ok_or_else(|| VenueError::NotFound(order_id.to_string()))?;

        if order.status == TradeStatus::Open && order.polls_remaining > 0 {
            order.polls_remaining -= 1;
            if order.polls_remaining == 0 {
                order.status = TradeStatus::Filled;
                order.filled_amount = order.amount;
                order.fee = order.amount * order.price * taker_rate;
            }
        }

        Ok(OrderState {
            status: order.status,
            filled_amount: order.filled_amount,
            average_fill_price: if order.filled_amount > Decimal::ZERO {
                order.price
            } else {
                Decimal::ZERO
            },
            fee: order.fee,
        })
    }

    async fn funding_rate(&self, symbol: &Symbol) -> Result<Option<FundingSnapshot>, VenueError> {
        Ok(self.state.lock().funding.get(symbol).cloned())
    }

    async fn health_check(&self) -> Result<(), VenueError> {
        let mut state = self.state.lock();
        Self::take_failure(&mut state)
    }
}

/// A scripted ticker with sane defaults, for demo seeding and tests.
#[must_use]
pub fn demo_ticker(venue: &VenueId, symbol: &Symbol, bid: Price, ask: Price) -> TickerSnapshot {
    TickerSnapshot {
        venue: venue.clone(),
        symbol: symbol.clone(),
        bid,
        ask,
        last: bid,
        volume: Decimal::from(1_000_000),
        change_24h: Decimal::ZERO,
        observed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BookLevel, ExecutionId};
    use rust_decimal_macros::dec;

    fn symbol() -> Symbol {
        Symbol::new("BTC", "USDT")
    }

    fn limit_order(client_id: ClientOrderId, side: Side, amount: Decimal, price: Decimal) -> OrderRequest {
        OrderRequest {
            client_order_id: client_id,
            symbol: symbol(),
            side,
            order_type: OrderType::Limit,
            amount,
            price: Some(price),
        }
    }

    #[tokio::test]
    async fn immediate_fill_with_fee() {
        let venue = DemoVenue::new("demo");
        let client_id = ClientOrderId::for_leg(ExecutionId::generate(), 1);
        let external = venue
            .place_order(&limit_order(client_id, Side::Buy, dec!(1), dec!(100)))
            .await
            .unwrap();

        let state = venue.fetch_order(&external, &symbol()).await.unwrap();
        assert_eq!(state.status, TradeStatus::Filled);
        assert_eq!(state.filled_amount, dec!(1));
        assert_eq!(state.fee, dec!(0.1));
    }

    #[tokio::test]
    async fn resubmitting_client_id_is_idempotent() {
        let venue = DemoVenue::new("demo");
        let client_id = ClientOrderId::for_leg(ExecutionId::generate(), 1);
        let request = limit_order(client_id, Side::Buy, dec!(1), dec!(100));

        let first = venue.place_order(&request).await.unwrap();
        let second = venue.place_order(&request).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(venue.order_count(), 1);
    }

    #[tokio::test]
    async fn after_polls_fills_on_nth_probe() {
        let venue = DemoVenue::new("demo");
        venue.set_fill_mode(symbol(), Side::Buy, FillMode::AfterPolls(2));
        let client_id = ClientOrderId::for_leg(ExecutionId::generate(), 1);
        let external = venue
            .place_order(&limit_order(client_id, Side::Buy, dec!(1), dec!(100)))
            .await
            .unwrap();

        let first = venue.fetch_order(&external, &symbol()).await.unwrap();
        assert_eq!(first.status, TradeStatus::Open);
        let second = venue.fetch_order(&external, &symbol()).await.unwrap();
        assert_eq!(second.status, TradeStatus::Filled);
    }

    #[tokio::test]
    async fn cancel_leaves_no_open_order() {
        let venue = DemoVenue::new("demo");
        venue.set_fill_mode(symbol(), Side::Sell, FillMode::Never);
        let client_id = ClientOrderId::for_leg(ExecutionId::generate(), 1);
        let external = venue
            .place_order(&limit_order(client_id, Side::Sell, dec!(1), dec!(100)))
            .await
            .unwrap();
        assert_eq!(venue.open_order_count(), 1);

        venue.cancel_order(&external, &symbol()).await.unwrap();
        assert_eq!(venue.open_order_count(), 0);

        let state = venue.fetch_order(&external, &symbol()).await.unwrap();
        assert_eq!(state.status, TradeStatus::Cancelled);
    }

    #[tokio::test]
    async fn injected_failure_surfaces_once() {
        let venue = DemoVenue::new("demo");
        venue.set_ticker(demo_ticker(
            &VenueId::from("demo"),
            &symbol(),
            dec!(99),
            dec!(100),
        ));
        venue.fail_next(VenueError::Transient("blip".into()));

        assert!(venue.fetch_ticker(&symbol()).await.is_err());
        assert!(venue.fetch_ticker(&symbol()).await.is_ok());
    }

    #[tokio::test]
    async fn market_order_crosses_the_touch() {
        let venue = DemoVenue::new("demo");
        venue.set_ticker(demo_ticker(
            &VenueId::from("demo"),
            &symbol(),
            dec!(99.5),
            dec!(100.5),
        ));
        let client_id = ClientOrderId::for_leg(ExecutionId::generate(), 1);
        let external = venue
            .place_order(&OrderRequest {
                client_order_id: client_id,
                symbol: symbol(),
                side: Side::Sell,
                order_type: OrderType::Market,
                amount: dec!(2),
                price: None,
            })
            .await
            .unwrap();

        let state = venue.fetch_order(&external, &symbol()).await.unwrap();
        assert_eq!(state.average_fill_price, dec!(99.5));
    }

    #[tokio::test]
    async fn book_depth_is_truncated() {
        let venue = DemoVenue::new("demo");
        let levels: Vec<BookLevel> = (0..10)
            .map(|i| BookLevel::new(dec!(100) + Decimal::from(i), dec!(1)))
            .collect();
        venue.set_book(BookSnapshot::new(
            VenueId::from("demo"),
            symbol(),
            vec![],
            levels,
            Utc::now(),
        ));

        let book = venue.fetch_book(&symbol(), 3).await.unwrap();
        assert_eq!(book.asks.len(), 3);
    }
}
