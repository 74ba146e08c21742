// src/executor.rs
//
// Per-account action executor. Each strategy gets a FIFO queue; a single
// dispatcher task drains the queues round-robin at the account's rate
// limit, so the executor is the sole writer to the account's outbound
// connection. Pushing a fresh plan replaces the stale one by default.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::account::Account;
use crate::actions::Action;
use crate::adapter::{with_deadline, CancelStatus, ExchangeAdapter, NewOrderRequest};
use crate::errors::{EngineError, EngineResult};
use crate::market::{Market, SharedMarketState};
use crate::types::{MarketId, Order, Side, StrategyId, TimestampMs};

const MAX_CREATE_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(250);

pub fn now_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[derive(Debug)]
struct QueueState {
    actions: VecDeque<Action>,
    /// Initial dispatch delay, measured from queue creation.
    ready_at_ms: TimestampMs,
}

#[derive(Debug, Default)]
struct Queues {
    // Insertion-ordered so round-robin order is stable.
    order: Vec<StrategyId>,
    by_strategy: HashMap<StrategyId, QueueState>,
    cursor: usize,
}

/// Counters from one reconciliation pass, for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub removed: usize,
    pub adopted: usize,
    pub duplicates_cancelled: usize,
}

pub struct Executor {
    account: Account,
    adapter: Arc<dyn ExchangeAdapter>,
    markets: HashMap<MarketId, (Market, SharedMarketState)>,
    queues: Arc<Mutex<Queues>>,
    notify: Arc<Notify>,
    purge_on_push: bool,
}

impl Executor {
    /// `purge_on_push` defaults to true for market making: a stale plan
    /// must never clobber a fresher one.
    pub fn new(
        account: Account,
        adapter: Arc<dyn ExchangeAdapter>,
        markets: HashMap<MarketId, (Market, SharedMarketState)>,
    ) -> Self {
        Self {
            account,
            adapter,
            markets,
            queues: Arc::new(Mutex::new(Queues::default())),
            notify: Arc::new(Notify::new()),
            purge_on_push: true,
        }
    }

    pub fn with_purge_on_push(mut self, purge_on_push: bool) -> Self {
        self.purge_on_push = purge_on_push;
        self
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Idempotent queue registration.
    pub fn create_queue(&self, strategy: StrategyId, delay: Duration) {
        let mut queues = self.queues.lock().expect("executor queues lock");
        if queues.by_strategy.contains_key(&strategy) {
            return;
        }
        queues.order.push(strategy);
        queues.by_strategy.insert(
            strategy,
            QueueState {
                actions: VecDeque::new(),
                ready_at_ms: now_ms() + delay.as_millis() as i64,
            },
        );
    }

    /// Hand a plan to the dispatcher. With purge-on-push the queue is
    /// atomically replaced; otherwise the actions are appended.
    pub fn push(&self, strategy: StrategyId, actions: Vec<Action>) {
        {
            let mut queues = self.queues.lock().expect("executor queues lock");
            let Some(queue) = queues.by_strategy.get_mut(&strategy) else {
                eprintln!(
                    "WARN: [{}/{}] push to unknown queue {strategy}, dropping {} action(s)",
                    strategy, self.account.id, actions.len()
                );
                return;
            };
            if self.purge_on_push {
                queue.actions.clear();
            }
            queue.actions.extend(actions);
        }
        self.notify.notify_one();
    }

    /// Append regardless of the purge policy. The order-back path uses
    /// this: a buffered hedge is an obligation, not a plan, and must not
    /// be clobbered by a later batch.
    pub fn append(&self, strategy: StrategyId, actions: Vec<Action>) {
        {
            let mut queues = self.queues.lock().expect("executor queues lock");
            let Some(queue) = queues.by_strategy.get_mut(&strategy) else {
                eprintln!(
                    "WARN: [{}/{}] append to unknown queue {strategy}, dropping {} action(s)",
                    strategy,
                    self.account.id,
                    actions.len()
                );
                return;
            };
            queue.actions.extend(actions);
        }
        self.notify.notify_one();
    }

    /// Actions currently queued for a strategy (diagnostics and tests).
    pub fn queued(&self, strategy: StrategyId) -> Vec<Action> {
        let queues = self.queues.lock().expect("executor queues lock");
        queues
            .by_strategy
            .get(&strategy)
            .map(|q| q.actions.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop all queued work (shutdown path).
    pub fn purge_all(&self) {
        let mut queues = self.queues.lock().expect("executor queues lock");
        for queue in queues.by_strategy.values_mut() {
            queue.actions.clear();
        }
    }

    fn pop_next(&self) -> Option<Action> {
        let mut queues = self.queues.lock().expect("executor queues lock");
        let count = queues.order.len();
        if count == 0 {
            return None;
        }
        let now = now_ms();
        for _ in 0..count {
            let cursor = queues.cursor % count;
            queues.cursor = (queues.cursor + 1) % count;
            let strategy = queues.order[cursor];
            let queue = queues
                .by_strategy
                .get_mut(&strategy)
                .expect("queue for registered strategy");
            if queue.ready_at_ms > now {
                continue;
            }
            if let Some(action) = queue.actions.pop_front() {
                return Some(action);
            }
        }
        None
    }

    /// Spawn the dispatcher. It drains queues round-robin, sleeping
    /// between sends to honour the account's published rate limit, and
    /// exits when `shutdown` flips to true.
    pub fn start(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let executor = Arc::clone(self);
        let min_interval =
            Duration::from_secs_f64(1.0 / f64::from(executor.account.rate_limit_rps.max(1)));
        tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    return;
                }
                match executor.pop_next() {
                    Some(action) => {
                        executor.run_action(action).await;
                        tokio::time::sleep(min_interval).await;
                    }
                    None => {
                        tokio::select! {
                            _ = executor.notify.notified() => {}
                            _ = shutdown.changed() => {}
                            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                        }
                    }
                }
            }
        })
    }

    fn market(&self, id: MarketId) -> Option<&(Market, SharedMarketState)> {
        self.markets.get(&id)
    }

    async fn run_action(&self, action: Action) {
        let result = match &action {
            Action::OrderCreate { order } => self.run_create(order.clone()).await,
            Action::OrderCancel {
                market,
                side,
                order_id,
            } => self.run_cancel(*market, *side, order_id).await,
            Action::OrderStop {
                market,
                side,
                price,
            } => {
                let ids: Vec<String> = match self.market(*market) {
                    Some((_, state)) => state
                        .lock()
                        .expect("market state lock")
                        .open_orders
                        .orders_at(*side, *price)
                        .iter()
                        .filter_map(|o| o.id.clone())
                        .collect(),
                    None => Vec::new(),
                };
                let mut result = Ok(());
                for id in ids {
                    if let Err(err) = self.run_cancel(*market, *side, &id).await {
                        result = Err(err);
                    }
                }
                result
            }
            Action::OrderStopAll { market, side } => {
                let targets: Vec<(Side, String)> = match self.market(*market) {
                    Some((_, state)) => {
                        let state = state.lock().expect("market state lock");
                        let mut out = Vec::new();
                        for s in [Side::Sell, Side::Buy] {
                            if side.map_or(true, |only| only == s) {
                                out.extend(
                                    state
                                        .open_orders
                                        .side_orders(s)
                                        .iter()
                                        .filter_map(|o| o.id.clone().map(|id| (s, id))),
                                );
                            }
                        }
                        out
                    }
                    None => Vec::new(),
                };
                let mut result = Ok(());
                for (s, id) in targets {
                    if let Err(err) = self.run_cancel(*market, s, &id).await {
                        result = Err(err);
                    }
                }
                result
            }
        };
        if let Err(err) = result {
            eprintln!(
                "ERROR: [{}] {} {} failed: {err}",
                self.account.id,
                action.kind_label(),
                action.market()
            );
        }
    }

    /// Create with bounded retries. Only transient failures retry;
    /// permanent ones drop the action so the next tick replans.
    async fn run_create(&self, mut order: Order) -> EngineResult<()> {
        let Some((market, state)) = self.market(order.market) else {
            return Err(EngineError::PermanentExchange(format!(
                "unknown market {}",
                order.market
            )));
        };
        order.render_price(market.price_precision);
        let request = NewOrderRequest::from_order(&market.symbol, &order, market.price_precision);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = with_deadline(
                self.adapter.deadline(),
                "create_order",
                self.adapter.create_order(request.clone()),
            )
            .await;
            match result {
                Ok(order_id) => {
                    order.id = Some(order_id);
                    order.created_ms = now_ms();
                    state
                        .lock()
                        .expect("market state lock")
                        .open_orders
                        .add(order);
                    return Ok(());
                }
                Err(err) if err.is_transient() && attempt < MAX_CREATE_ATTEMPTS => {
                    let backoff = RETRY_BACKOFF_BASE * 2u32.pow(attempt - 1);
                    eprintln!(
                        "WARN: [{}] create_order attempt {attempt} failed ({err}), retrying in {backoff:?}",
                        self.account.id
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn run_cancel(&self, market_id: MarketId, side: Side, order_id: &str) -> EngineResult<()> {
        let Some((market, state)) = self.market(market_id) else {
            return Err(EngineError::PermanentExchange(format!(
                "unknown market {market_id}"
            )));
        };
        // NotFound means the exchange already forgot the order; the cache
        // must forget it too, so both outcomes fall through to removal.
        let _status: CancelStatus = with_deadline(
            self.adapter.deadline(),
            "cancel_order",
            self.adapter.cancel_order(&market.symbol, order_id),
        )
        .await?;
        state
            .lock()
            .expect("market state lock")
            .open_orders
            .remove(side, order_id);
        Ok(())
    }

    /// Reconcile the market's open-order cache against the exchange's
    /// authoritative list, ignoring cache entries younger than `grace`
    /// (they may not have propagated to the venue yet). Same-slot
    /// duplicates are collapsed by cancelling all but the newest.
    pub async fn fetch_openorders(
        &self,
        market_id: MarketId,
        grace: Duration,
    ) -> EngineResult<ReconcileReport> {
        let Some((market, state)) = self.market(market_id) else {
            return Err(EngineError::PermanentExchange(format!(
                "unknown market {market_id}"
            )));
        };
        let fetched = with_deadline(
            self.adapter.deadline(),
            "fetch_openorders",
            self.adapter.fetch_openorders(&market.symbol),
        )
        .await?;

        let now = now_ms();
        let grace_ms = grace.as_millis() as i64;
        let mut report = ReconcileReport::default();
        let duplicates: Vec<(Side, String)>;
        {
            let mut cache = state.lock().expect("market state lock");
            let mut exchange_ids: HashMap<Side, Vec<String>> = HashMap::new();
            for mut order in fetched {
                let Some(id) = order.id.clone() else {
                    continue;
                };
                exchange_ids.entry(order.side).or_default().push(id.clone());
                match cache.open_orders.get(order.side, &id).cloned() {
                    Some(existing) => {
                        if existing.amount != order.amount {
                            // The exchange's amount is the truth.
                            cache.open_orders.remove(order.side, &id);
                            order.market = market_id;
                            order.created_ms = existing.created_ms;
                            cache.open_orders.add(order);
                            report.adopted += 1;
                        }
                    }
                    None => {
                        order.market = market_id;
                        order.created_ms = now;
                        cache.open_orders.add(order);
                        report.inserted += 1;
                    }
                }
            }
            for side in [Side::Sell, Side::Buy] {
                let known = exchange_ids.remove(&side).unwrap_or_default();
                let stale: Vec<String> = cache
                    .open_orders
                    .side_orders(side)
                    .iter()
                    .filter(|o| now - o.created_ms >= grace_ms)
                    .filter_map(|o| o.id.clone())
                    .filter(|id| !known.contains(id))
                    .collect();
                for id in stale {
                    cache.open_orders.remove(side, &id);
                    report.removed += 1;
                }
            }
            duplicates = [Side::Sell, Side::Buy]
                .into_iter()
                .flat_map(|side| {
                    cache
                        .open_orders
                        .stale_duplicates(side)
                        .into_iter()
                        .filter_map(move |o| o.id.map(|id| (side, id)))
                })
                .collect();
        }

        for (side, id) in duplicates {
            if self.run_cancel(market_id, side, &id).await.is_ok() {
                report.duplicates_cancelled += 1;
            }
        }
        if report != ReconcileReport::default() {
            eprintln!(
                "INFO: [{}] reconcile {}: +{} -{} ~{} dup_cancel {}",
                self.account.id,
                market.symbol,
                report.inserted,
                report.removed,
                report.adopted,
                report.duplicates_cancelled
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Action;
    use crate::types::MarketId;
    use rust_decimal_macros::dec;

    fn action(price: rust_decimal::Decimal) -> Action {
        Action::OrderCreate {
            order: Order::limit(MarketId(0), price, dec!(1), Side::Buy),
        }
    }

    fn executor() -> Executor {
        let account = Account {
            id: crate::types::AccountId(0),
            name: "test".into(),
            driver: "mock".into(),
            rate_limit_rps: 100,
            modes: Default::default(),
        };
        let adapter = Arc::new(crate::mock_exchange::MockExchange::new("mock"));
        Executor::new(account, adapter, HashMap::new())
    }

    #[test]
    fn create_queue_is_idempotent() {
        let exec = executor();
        exec.create_queue(StrategyId(1), Duration::ZERO);
        exec.push(StrategyId(1), vec![action(dec!(1))]);
        exec.create_queue(StrategyId(1), Duration::ZERO);
        assert_eq!(exec.queued(StrategyId(1)).len(), 1);
    }

    #[test]
    fn purge_on_push_replaces_queue() {
        let exec = executor();
        exec.create_queue(StrategyId(1), Duration::ZERO);
        exec.push(StrategyId(1), vec![action(dec!(1)), action(dec!(2))]);
        let fresh = vec![action(dec!(3))];
        exec.push(StrategyId(1), fresh.clone());
        assert_eq!(exec.queued(StrategyId(1)), fresh);
    }

    #[test]
    fn append_mode_preserves_fifo() {
        let exec = executor().with_purge_on_push(false);
        exec.create_queue(StrategyId(1), Duration::ZERO);
        exec.push(StrategyId(1), vec![action(dec!(1))]);
        exec.push(StrategyId(1), vec![action(dec!(2))]);
        let queued = exec.queued(StrategyId(1));
        assert_eq!(queued, vec![action(dec!(1)), action(dec!(2))]);
    }

    #[test]
    fn push_to_unknown_queue_is_dropped() {
        let exec = executor();
        exec.push(StrategyId(9), vec![action(dec!(1))]);
        assert!(exec.queued(StrategyId(9)).is_empty());
    }

    #[test]
    fn round_robin_pops_across_strategies() {
        let exec = executor();
        exec.create_queue(StrategyId(1), Duration::ZERO);
        exec.create_queue(StrategyId(2), Duration::ZERO);
        exec.push(StrategyId(1), vec![action(dec!(1)), action(dec!(3))]);
        exec.push(StrategyId(2), vec![action(dec!(2))]);
        let popped: Vec<Action> = std::iter::from_fn(|| exec.pop_next()).collect();
        assert_eq!(popped, vec![action(dec!(1)), action(dec!(2)), action(dec!(3))]);
    }

    #[test]
    fn delayed_queue_is_skipped_until_ready() {
        let exec = executor();
        exec.create_queue(StrategyId(1), Duration::from_secs(60));
        exec.push(StrategyId(1), vec![action(dec!(1))]);
        assert_eq!(exec.pop_next(), None);
    }
}
