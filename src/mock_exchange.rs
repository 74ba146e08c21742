// src/mock_exchange.rs
//
// Deterministic in-memory exchange adapter for tests and dry runs.
// Books and balances are scripted, order ids are sequential, and
// failures can be injected per call site.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::account::WsStatus;
use crate::adapter::{
    BoxFuture, CancelStatus, Capability, ExchangeAdapter, MarketRules, NewOrderRequest,
};
use crate::errors::{EngineError, EngineResult};
use crate::executor::now_ms;
use crate::orderbook::Orderbook;
use crate::types::{Balance, MarketId, Order, PrivateTrade, PublicTrade, Side};

#[derive(Debug, Clone, PartialEq)]
pub struct MockOpenOrder {
    pub id: String,
    pub request: NewOrderRequest,
}

#[derive(Default)]
struct MockState {
    books: HashMap<String, Orderbook>,
    rules: HashMap<String, MarketRules>,
    balances: Vec<Balance>,
    open_orders: Vec<MockOpenOrder>,
    create_failures: VecDeque<EngineError>,
    cancel_failures: VecDeque<EngineError>,
    fetch_failures: VecDeque<EngineError>,
    created: Vec<NewOrderRequest>,
    cancelled: Vec<String>,
    public_tx: Vec<mpsc::UnboundedSender<PublicTrade>>,
    private_tx: Vec<mpsc::UnboundedSender<PrivateTrade>>,
}

pub struct MockExchange {
    name: String,
    next_order_id: AtomicU64,
    state: Mutex<MockState>,
    ws_public: WsStatus,
    ws_private: WsStatus,
}

impl MockExchange {
    pub fn new(name: impl Into<String>) -> Self {
        let mock = Self {
            name: name.into(),
            next_order_id: AtomicU64::new(1),
            state: Mutex::new(MockState::default()),
            ws_public: WsStatus::new(),
            ws_private: WsStatus::new(),
        };
        mock.ws_public.set_connected(true);
        mock.ws_private.set_connected(true);
        mock
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock exchange lock")
    }

    // --- scripting -------------------------------------------------------

    pub fn set_orderbook(&self, symbol: &str, book: Orderbook) {
        self.lock().books.insert(symbol.to_string(), book);
    }

    pub fn set_rules(&self, symbol: &str, rules: MarketRules) {
        self.lock().rules.insert(symbol.to_string(), rules);
    }

    pub fn set_balances(&self, balances: Vec<Balance>) {
        self.lock().balances = balances;
    }

    pub fn set_open_orders(&self, orders: Vec<MockOpenOrder>) {
        self.lock().open_orders = orders;
    }

    pub fn fail_next_create(&self, err: EngineError) {
        self.lock().create_failures.push_back(err);
    }

    pub fn fail_next_cancel(&self, err: EngineError) {
        self.lock().cancel_failures.push_back(err);
    }

    pub fn fail_next_fetch(&self, err: EngineError) {
        self.lock().fetch_failures.push_back(err);
    }

    pub fn ws_public_status(&self) -> WsStatus {
        self.ws_public.clone()
    }

    pub fn ws_private_status(&self) -> WsStatus {
        self.ws_private.clone()
    }

    // --- assertions ------------------------------------------------------

    pub fn created_requests(&self) -> Vec<NewOrderRequest> {
        self.lock().created.clone()
    }

    pub fn cancelled_ids(&self) -> Vec<String> {
        self.lock().cancelled.clone()
    }

    pub fn open_order_count(&self) -> usize {
        self.lock().open_orders.len()
    }

    // --- event injection -------------------------------------------------

    /// Push a private fill to every subscribed stream.
    pub fn emit_private_trade(&self, trade: PrivateTrade) {
        let state = self.lock();
        for tx in &state.private_tx {
            let _ = tx.send(trade.clone());
        }
    }

    pub fn emit_public_trade(&self, trade: PublicTrade) {
        let state = self.lock();
        for tx in &state.public_tx {
            let _ = tx.send(trade.clone());
        }
    }
}

impl ExchangeAdapter for MockExchange {
    fn name(&self) -> &str {
        &self.name
    }

    fn markets(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.lock().rules.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    fn market_rules(&self, symbol: &str) -> EngineResult<MarketRules> {
        self.lock()
            .rules
            .get(symbol)
            .cloned()
            .ok_or_else(|| EngineError::Configuration(format!("unknown market {symbol}")))
    }

    fn supports(&self, _capability: Capability) -> bool {
        true
    }

    fn fetch_orderbook(
        &self,
        symbol: &str,
        depth: usize,
    ) -> BoxFuture<'_, EngineResult<Orderbook>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            let mut state = self.lock();
            if let Some(err) = state.fetch_failures.pop_front() {
                return Err(err);
            }
            let book = state.books.get(&symbol).cloned().unwrap_or_default();
            drop(state);
            if depth == 0 {
                return Ok(book);
            }
            // Trim to the requested depth per side.
            let bids: Vec<_> = book.bids_desc().take(depth).collect();
            let asks: Vec<_> = book.asks_asc().take(depth).collect();
            Orderbook::from_levels(&bids, &asks)
        })
    }

    fn create_order(&self, request: NewOrderRequest) -> BoxFuture<'_, EngineResult<String>> {
        Box::pin(async move {
            let mut state = self.lock();
            if let Some(err) = state.create_failures.pop_front() {
                return Err(err);
            }
            let id = format!("m{}", self.next_order_id.fetch_add(1, Ordering::Relaxed));
            state.created.push(request.clone());
            state.open_orders.push(MockOpenOrder {
                id: id.clone(),
                request,
            });
            Ok(id)
        })
    }

    fn cancel_order(
        &self,
        _symbol: &str,
        order_id: &str,
    ) -> BoxFuture<'_, EngineResult<CancelStatus>> {
        let order_id = order_id.to_string();
        Box::pin(async move {
            let mut state = self.lock();
            if let Some(err) = state.cancel_failures.pop_front() {
                return Err(err);
            }
            state.cancelled.push(order_id.clone());
            let before = state.open_orders.len();
            state.open_orders.retain(|o| o.id != order_id);
            if state.open_orders.len() < before {
                Ok(CancelStatus::Cancelled)
            } else {
                Ok(CancelStatus::NotFound)
            }
        })
    }

    fn fetch_openorders(&self, symbol: &str) -> BoxFuture<'_, EngineResult<Vec<Order>>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            let mut state = self.lock();
            if let Some(err) = state.fetch_failures.pop_front() {
                return Err(err);
            }
            let orders = state
                .open_orders
                .iter()
                .filter(|o| o.request.symbol == symbol)
                .map(|o| Order {
                    market: MarketId(0),
                    price: o.request.price_s.parse().unwrap_or_default(),
                    amount: o.request.amount,
                    side: o.request.side,
                    order_type: o.request.order_type,
                    id: Some(o.id.clone()),
                    price_s: Some(o.request.price_s.clone()),
                    created_ms: now_ms(),
                })
                .collect();
            Ok(orders)
        })
    }

    fn fetch_balances(&self) -> BoxFuture<'_, EngineResult<Vec<Balance>>> {
        Box::pin(async move {
            let mut state = self.lock();
            if let Some(err) = state.fetch_failures.pop_front() {
                return Err(err);
            }
            Ok(state.balances.clone())
        })
    }

    fn subscribe_public_trades(
        &self,
        _symbol: &str,
        tx: mpsc::UnboundedSender<PublicTrade>,
    ) -> BoxFuture<'_, EngineResult<WsStatus>> {
        Box::pin(async move {
            self.lock().public_tx.push(tx);
            Ok(self.ws_public.clone())
        })
    }

    fn subscribe_private_trades(
        &self,
        tx: mpsc::UnboundedSender<PrivateTrade>,
    ) -> BoxFuture<'_, EngineResult<WsStatus>> {
        Box::pin(async move {
            self.lock().private_tx.push(tx);
            Ok(self.ws_private.clone())
        })
    }
}
