// src/reactor.rs
//
// The reactor owns the account/market/strategy registries and drives
// everything periodic: strategy ticks, balance refresh, open-order
// reconciliation, gauge updates, and the websocket lifecycle. Every
// periodic handler is wrapped so that no error or panic escapes to the
// runtime; a failing strategy logs and survives.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::account::{Account, AccountModes, AccountState, SharedAccountState};
use crate::actions::Action;
use crate::adapter::{with_deadline, ExchangeAdapter};
use crate::config::{EngineConfig, ResolvedStrategy};
use crate::errors::{log_strategy_error, EngineError, EngineResult};
use crate::executor::Executor;
use crate::fx::SharedFxRate;
use crate::market::{shared_market_state, Market, MarketModes, SharedMarketState};
use crate::metrics::{EngineMetrics, MetricsServer};
use crate::open_orders::OpenOrders;
use crate::scheduler::{SmartScheduler, SmartOptions};
use crate::strategy::{
    OrderbackSchedule, OrderbackStrategy, SourceContext, Strategy, StrategyContext,
};
use crate::telemetry::{EventSink, TickRecord};
use crate::types::{AccountId, MarketId, PrivateTrade, StrategyId};

const BALANCE_REFRESH_INTERVAL: Duration = Duration::from_secs(23);
const RECONCILE_INTERVAL: Duration = Duration::from_secs(600);
const RECONCILE_GRACE: Duration = Duration::from_secs(10);
const GAUGE_INTERVAL: Duration = Duration::from_secs(30);
const ORDERBOOK_DEPTH: usize = 50;

type SharedStrategy = Arc<Mutex<Box<dyn Strategy>>>;

/// Everything the background tasks share. Arena-shaped: ids index into
/// the vectors, tasks pass ids rather than owning references.
pub struct Registries {
    pub accounts: Vec<Account>,
    pub account_states: Vec<SharedAccountState>,
    pub adapters: Vec<Arc<dyn ExchangeAdapter>>,
    pub markets: Vec<Market>,
    pub market_states: Vec<SharedMarketState>,
    pub executors: Vec<Arc<Executor>>,
    pub strategies: Vec<SharedStrategy>,
    pub resolved: Vec<ResolvedStrategy>,
    pub metrics: EngineMetrics,
    pub sink: Mutex<Box<dyn EventSink>>,
    pub dry_run: bool,
}

impl Registries {
    pub fn account(&self, id: AccountId) -> &Account {
        &self.accounts[id.0]
    }

    pub fn market(&self, id: MarketId) -> &Market {
        &self.markets[id.0]
    }

    pub fn market_state(&self, id: MarketId) -> &SharedMarketState {
        &self.market_states[id.0]
    }

    pub fn executor(&self, id: AccountId) -> &Arc<Executor> {
        &self.executors[id.0]
    }

    fn ws_ready(&self, id: AccountId) -> bool {
        let account = self.account(id);
        self.account_states[id.0]
            .lock()
            .expect("account state lock")
            .ws_ready(&account.modes)
    }

    fn open_orders_snapshot(&self, market: MarketId) -> OpenOrders {
        self.market_state(market)
            .lock()
            .expect("market state lock")
            .open_orders
            .clone()
    }
}

pub struct Reactor {
    registries: Arc<Registries>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
    metrics_server: Option<MetricsServer>,
    metrics_bind: Option<String>,
}

impl Reactor {
    /// Build the registries from a validated configuration. `adapters`
    /// maps driver names to adapter instances; `sink` receives per-tick
    /// telemetry.
    pub fn new(
        config: &EngineConfig,
        adapters: HashMap<String, Arc<dyn ExchangeAdapter>>,
        sink: Box<dyn EventSink>,
    ) -> EngineResult<Self> {
        let resolved = config.resolve()?;

        let mut accounts = Vec::with_capacity(config.accounts.len());
        let mut account_states = Vec::with_capacity(config.accounts.len());
        let mut account_adapters: Vec<Arc<dyn ExchangeAdapter>> =
            Vec::with_capacity(config.accounts.len());
        for (index, account_cfg) in config.accounts.iter().enumerate() {
            let adapter = adapters.get(&account_cfg.driver).cloned().ok_or_else(|| {
                EngineError::Configuration(format!(
                    "account {}: no adapter for driver {}",
                    account_cfg.id, account_cfg.driver
                ))
            })?;
            accounts.push(Account {
                id: AccountId(index),
                name: account_cfg.id.clone(),
                driver: account_cfg.driver.clone(),
                rate_limit_rps: account_cfg.rate_limit_rps,
                modes: AccountModes {
                    ws_private: account_cfg.ws_private,
                    ws_public: account_cfg.ws_public,
                    fetch_private_balance: account_cfg.fetch_private_balance,
                },
            });
            account_states.push(Arc::new(Mutex::new(AccountState::default())));
            account_adapters.push(adapter);
        }

        let account_index: HashMap<&str, usize> = config
            .accounts
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id.as_str(), i))
            .collect();

        let mut markets = Vec::with_capacity(config.markets.len());
        let mut market_states = Vec::with_capacity(config.markets.len());
        for (index, market_cfg) in config.markets.iter().enumerate() {
            let account = AccountId(account_index[market_cfg.account.as_str()]);
            markets.push(Market {
                id: MarketId(index),
                account,
                symbol: market_cfg
                    .symbol
                    .clone()
                    .unwrap_or_else(|| market_cfg.id.clone()),
                base: market_cfg.base.clone(),
                quote: market_cfg.quote.clone(),
                modes: MarketModes {
                    fetch_public_orderbook: market_cfg.fetch_public_orderbook,
                    fetch_private_balance: accounts[account.0].modes.fetch_private_balance,
                    listen_public_trades: market_cfg.listen_public_trades,
                    ws_private: accounts[account.0].modes.ws_private,
                    ws_public: accounts[account.0].modes.ws_public,
                },
                min_amount: market_cfg.min_amount,
                amount_precision: market_cfg.amount_precision,
                price_precision: market_cfg.price_precision,
            });
            market_states.push(shared_market_state());
        }

        let mut executors = Vec::with_capacity(accounts.len());
        for account in &accounts {
            let owned: HashMap<MarketId, (Market, SharedMarketState)> = markets
                .iter()
                .filter(|m| m.account == account.id)
                .map(|m| (m.id, (m.clone(), Arc::clone(&market_states[m.id.0]))))
                .collect();
            executors.push(Arc::new(Executor::new(
                account.clone(),
                Arc::clone(&account_adapters[account.id.0]),
                owned,
            )));
        }

        let mut strategies: Vec<SharedStrategy> = Vec::with_capacity(resolved.len());
        for entry in &resolved {
            let fx = entry.config.fx.as_ref().map(|fx_cfg| {
                let holder = match fx_cfg.rate {
                    Some(rate) => SharedFxRate::fixed(rate),
                    None => SharedFxRate::empty(),
                };
                Arc::new(holder) as Arc<dyn crate::fx::Fx>
            });
            let strategy = OrderbackStrategy::new(
                entry.id,
                entry.target_market,
                entry.config.params.clone(),
                fx,
            )?;
            strategies.push(Arc::new(Mutex::new(Box::new(strategy) as Box<dyn Strategy>)));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            registries: Arc::new(Registries {
                accounts,
                account_states,
                adapters: account_adapters,
                markets,
                market_states,
                executors,
                strategies,
                resolved,
                metrics: EngineMetrics::new(),
                sink: Mutex::new(sink),
                dry_run: config.dry_run,
            }),
            shutdown_tx,
            shutdown_rx,
            tasks: Vec::new(),
            metrics_server: None,
            metrics_bind: config.metrics_bind.clone(),
        })
    }

    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    /// Bring the engine up: sockets, balance loop, executors, periodic
    /// strategy loops. Returns once everything is scheduled.
    pub async fn start(&mut self) -> EngineResult<()> {
        // 1. Metrics sink.
        if let Some(bind) = &self.metrics_bind {
            let server = MetricsServer::start(bind, self.registries.metrics.clone())
                .map_err(|e| EngineError::Configuration(format!("metrics bind {bind}: {e}")))?;
            self.metrics_server = Some(server);
        }

        // 2. Private websockets and fill routing.
        for account in self.registries.accounts.clone() {
            if !account.modes.ws_private {
                continue;
            }
            let adapter = Arc::clone(&self.registries.adapters[account.id.0]);
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PrivateTrade>();
            let status = with_deadline(
                adapter.deadline(),
                "subscribe_private_trades",
                adapter.subscribe_private_trades(tx),
            )
            .await?;
            self.registries.account_states[account.id.0]
                .lock()
                .expect("account state lock")
                .ws_private = Some(status);

            let registries = Arc::clone(&self.registries);
            let account_id = account.id;
            let mut shutdown = self.shutdown_rx.clone();
            self.tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        trade = rx.recv() => {
                            let Some(trade) = trade else { return };
                            dispatch_private_trade(&registries, account_id, &trade);
                        }
                    }
                }
            }));
        }

        // 3. Markets: initial snapshot plus public trade feeds.
        for market in self.registries.markets.clone() {
            if market.modes.fetch_public_orderbook {
                if let Err(err) = refresh_orderbook(&self.registries, market.id).await {
                    eprintln!(
                        "WARN: [{}] initial orderbook snapshot failed for {}: {err}",
                        market.account, market.symbol
                    );
                }
            }
            if market.modes.listen_public_trades {
                self.start_public_feed(&market).await?;
            }
        }

        // 4. Balance refresh: once now, then on a timer.
        update_balances(&self.registries).await;
        {
            let registries = Arc::clone(&self.registries);
            let mut shutdown = self.shutdown_rx.clone();
            self.tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        _ = tokio::time::sleep(BALANCE_REFRESH_INTERVAL) => {
                            update_balances(&registries).await;
                        }
                    }
                }
            }));
        }

        // 5. Executor queues for every strategy, on target and sources.
        for entry in &self.registries.resolved {
            let delay = Duration::from_secs_f64(entry.config.delay.max(0.0));
            self.registries
                .executor(entry.target_account)
                .create_queue(entry.id, delay);
            for (account, _) in &entry.sources {
                self.registries
                    .executor(*account)
                    .create_queue(entry.id, delay);
            }
        }

        // 6. Executors (not in dry-run: plans are computed but never sent).
        if !self.registries.dry_run {
            for executor in &self.registries.executors {
                self.tasks.push(executor.start(self.shutdown_rx.clone()));
            }
        }

        // 7. Public websockets for accounts not already covered.
        for account in self.registries.accounts.clone() {
            if !account.modes.ws_public {
                continue;
            }
            let already = self.registries.account_states[account.id.0]
                .lock()
                .expect("account state lock")
                .ws_public
                .is_some();
            if already {
                continue;
            }
            if let Some(market) = self
                .registries
                .markets
                .iter()
                .find(|m| m.account == account.id)
                .cloned()
            {
                self.start_public_feed(&market).await?;
            }
        }

        // 8. Per-strategy periodic loops.
        for entry in self.registries.resolved.clone() {
            self.spawn_tick_loop(&entry);
            self.spawn_reconcile_loop(&entry);
            self.spawn_gauge_loop(&entry);
        }
        Ok(())
    }

    async fn start_public_feed(&mut self, market: &Market) -> EngineResult<()> {
        let adapter = Arc::clone(&self.registries.adapters[market.account.0]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let status = with_deadline(
            adapter.deadline(),
            "subscribe_public_trades",
            adapter.subscribe_public_trades(&market.symbol, tx),
        )
        .await?;
        self.registries.account_states[market.account.0]
            .lock()
            .expect("account state lock")
            .ws_public = Some(status);

        let metrics = self.registries.metrics.clone();
        let symbol = market.symbol.clone();
        let mut shutdown = self.shutdown_rx.clone();
        self.tasks.push(tokio::spawn(async move {
            use rust_decimal::prelude::ToPrimitive;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    trade = rx.recv() => {
                        let Some(trade) = trade else { return };
                        metrics.add_market_volume(
                            &symbol,
                            trade.volume.to_f64().unwrap_or_default(),
                        );
                    }
                }
            }
        }));
        Ok(())
    }

    fn spawn_tick_loop(&mut self, entry: &ResolvedStrategy) {
        let registries = Arc::clone(&self.registries);
        let entry = entry.clone();
        let mut shutdown = self.shutdown_rx.clone();
        self.tasks.push(tokio::spawn(async move {
            let mut skip_next = entry.config.delay_the_first_execute;
            loop {
                let jitter = if entry.config.period_random_delay > 0.0 {
                    let mut rng = rand::thread_rng();
                    rng.gen_range(0.0..entry.config.period_random_delay)
                } else {
                    0.0
                };
                let period = Duration::from_secs_f64(entry.config.period + jitter);
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = tokio::time::sleep(period) => {}
                }
                if skip_next {
                    // Skip exactly the first tick, resume normal cadence.
                    skip_next = false;
                    continue;
                }
                let run = std::panic::AssertUnwindSafe(tick(&registries, entry.id))
                    .catch_unwind()
                    .await;
                match run {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        log_strategy_error(entry.id, entry.target_account, &err);
                    }
                    Err(_) => {
                        let err = EngineError::FatalReactor {
                            strategy: entry.id,
                            message: "tick panicked".into(),
                        };
                        log_strategy_error(entry.id, entry.target_account, &err);
                        return;
                    }
                }
            }
        }));
    }

    fn spawn_reconcile_loop(&mut self, entry: &ResolvedStrategy) {
        let registries = Arc::clone(&self.registries);
        let entry = entry.clone();
        let mut shutdown = self.shutdown_rx.clone();
        self.tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = tokio::time::sleep(RECONCILE_INTERVAL) => {}
                }
                let executor = registries.executor(entry.target_account);
                if let Err(err) = executor
                    .fetch_openorders(entry.target_market, RECONCILE_GRACE)
                    .await
                {
                    log_strategy_error(entry.id, entry.target_account, &err);
                }
            }
        }));
    }

    fn spawn_gauge_loop(&mut self, entry: &ResolvedStrategy) {
        let registries = Arc::clone(&self.registries);
        let entry = entry.clone();
        let mut shutdown = self.shutdown_rx.clone();
        self.tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = tokio::time::sleep(GAUGE_INTERVAL) => {}
                }
                let market = registries.market(entry.target_market);
                let open_orders = registries.open_orders_snapshot(entry.target_market);
                for side in [crate::types::Side::Buy, crate::types::Side::Sell] {
                    registries.metrics.set_order_count(
                        side.as_str(),
                        &market.symbol,
                        open_orders.side_len(side),
                    );
                }
            }
        }));
    }

    /// Run until SIGINT/SIGTERM, then shut down cleanly.
    pub async fn run(&mut self) -> EngineResult<()> {
        self.start().await?;
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .map_err(|e| {
                EngineError::Configuration(format!("cannot install SIGTERM handler: {e}"))
            })?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("INFO: SIGINT received, shutting down");
            }
            _ = sigterm.recv() => {
                eprintln!("INFO: SIGTERM received, shutting down");
            }
        }
        self.stop().await;
        Ok(())
    }

    /// Halt metrics, cancel queued work, close sockets, stop the loops.
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(server) = self.metrics_server.take() {
            server.stop();
        }
        for executor in &self.registries.executors {
            executor.purge_all();
        }
        for state in &self.registries.account_states {
            let state = state.lock().expect("account state lock");
            if let Some(ws) = &state.ws_private {
                ws.set_connected(false);
            }
            if let Some(ws) = &state.ws_public {
                ws.set_connected(false);
            }
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Route a private fill to every strategy targeting this account, and
/// schedule whatever timer work the strategies ask for.
fn dispatch_private_trade(registries: &Arc<Registries>, account: AccountId, trade: &PrivateTrade) {
    for entry in &registries.resolved {
        if entry.target_account != account {
            continue;
        }
        let open_orders = registries.open_orders_snapshot(entry.target_market);
        let schedules = {
            let mut strategy = registries.strategies[entry.id.0]
                .lock()
                .expect("strategy lock");
            strategy.notify_private_trade(trade, false, &open_orders)
        };
        for schedule in schedules {
            spawn_orderback_schedule(registries, entry, schedule);
        }
    }
}

/// Execute one `OrderbackSchedule` in the background. Retries loop in
/// place; a grace timer flush pushes hedge orders to the source executor.
fn spawn_orderback_schedule(
    registries: &Arc<Registries>,
    entry: &ResolvedStrategy,
    schedule: OrderbackSchedule,
) {
    let registries = Arc::clone(registries);
    let entry = entry.clone();
    tokio::spawn(async move {
        let mut schedule = schedule;
        loop {
            match schedule {
                OrderbackSchedule::GraceTimer(delay) => {
                    tokio::time::sleep(delay).await;
                    flush_order_back(&registries, &entry);
                    return;
                }
                OrderbackSchedule::Retry {
                    trade,
                    order,
                    delay,
                } => {
                    tokio::time::sleep(delay).await;
                    let next = {
                        let mut strategy = registries.strategies[entry.id.0]
                            .lock()
                            .expect("strategy lock");
                        strategy.retry_order_back(&trade, &order)
                    };
                    match next.into_iter().next() {
                        Some(next_schedule) => schedule = next_schedule,
                        None => return,
                    }
                }
            }
        }
    });
}

fn flush_order_back(registries: &Arc<Registries>, entry: &ResolvedStrategy) {
    let Some((source_account, source_market)) = entry.sources.first().copied() else {
        return;
    };
    let source = registries.market(source_market).clone();
    let orders = {
        let mut strategy = registries.strategies[entry.id.0]
            .lock()
            .expect("strategy lock");
        strategy.flush_order_back(&source)
    };
    if orders.is_empty() {
        return;
    }
    let actions: Vec<Action> = orders
        .into_iter()
        .map(|order| Action::OrderCreate { order })
        .collect();
    eprintln!(
        "INFO: [{}/{}] order-back: {} hedge order(s) for {}",
        entry.id,
        source_account,
        actions.len(),
        source.symbol
    );
    registries.executor(source_account).append(entry.id, actions);
}

async fn refresh_orderbook(registries: &Arc<Registries>, market_id: MarketId) -> EngineResult<()> {
    let market = registries.market(market_id).clone();
    let adapter = Arc::clone(&registries.adapters[market.account.0]);
    let book = with_deadline(
        adapter.deadline(),
        "fetch_orderbook",
        adapter.fetch_orderbook(&market.symbol, ORDERBOOK_DEPTH),
    )
    .await?;
    let mut state = registries
        .market_state(market_id)
        .lock()
        .expect("market state lock");
    state.orderbook = book;
    state.last_orderbook_ms = crate::executor::now_ms();
    Ok(())
}

async fn update_balances(registries: &Arc<Registries>) {
    for account in &registries.accounts {
        if !account.modes.fetch_private_balance {
            continue;
        }
        let adapter = Arc::clone(&registries.adapters[account.id.0]);
        let fetched = with_deadline(
            adapter.deadline(),
            "fetch_balances",
            adapter.fetch_balances(),
        )
        .await;
        match fetched {
            Ok(balances) => {
                use rust_decimal::prelude::ToPrimitive;
                for balance in &balances {
                    for (kind, value) in [
                        ("free", balance.free),
                        ("locked", balance.locked),
                        ("total", balance.total),
                    ] {
                        registries.metrics.set_account_balance(
                            &account.name,
                            kind,
                            &balance.currency,
                            value.to_f64().unwrap_or_default(),
                        );
                    }
                }
                registries.account_states[account.id.0]
                    .lock()
                    .expect("account state lock")
                    .apply_balances(balances);
            }
            Err(err) => {
                eprintln!("WARN: [{}] balance refresh failed: {err}", account.id);
            }
        }
    }
}

/// The per-strategy hot path: gate on websockets, refresh sources,
/// compute the desired book, diff, and hand the plan to the executor.
pub async fn tick(registries: &Arc<Registries>, strategy_id: StrategyId) -> EngineResult<()> {
    let entry = registries
        .resolved
        .iter()
        .find(|e| e.id == strategy_id)
        .ok_or_else(|| EngineError::FatalReactor {
            strategy: strategy_id,
            message: "unknown strategy".into(),
        })?
        .clone();

    // Gate on our own target socket and on the linked strategy's.
    if !registries.ws_ready(entry.target_account) {
        log_skip(registries, &entry, "target websocket not connected");
        return Ok(());
    }
    if let Some(linked) = entry.linked {
        let linked_entry = registries
            .resolved
            .iter()
            .find(|e| e.id == linked)
            .cloned();
        if let Some(linked_entry) = linked_entry {
            if !registries.ws_ready(linked_entry.target_account) {
                log_skip(registries, &entry, "linked strategy websocket not connected");
                return Ok(());
            }
        }
    }

    // Refresh flagged source books.
    for (_, market_id) in &entry.sources {
        if registries.market(*market_id).modes.fetch_public_orderbook {
            refresh_orderbook(registries, *market_id).await?;
        }
    }

    // Snapshot the context and run the strategy.
    let target = registries.market(entry.target_market).clone();
    let target_balances = registries.account_states[entry.target_account.0]
        .lock()
        .expect("account state lock")
        .balances
        .clone();
    let sources = entry
        .sources
        .iter()
        .map(|(account, market_id)| {
            let market = registries.market(*market_id).clone();
            let orderbook = registries
                .market_state(*market_id)
                .lock()
                .expect("market state lock")
                .orderbook
                .clone();
            let balances = registries.account_states[account.0]
                .lock()
                .expect("account state lock")
                .balances
                .clone();
            SourceContext {
                market,
                orderbook,
                balances,
            }
        })
        .collect();
    let ctx = StrategyContext {
        target: target.clone(),
        target_balances: target_balances.clone(),
        sources,
    };

    let (output, fx) = {
        let mut strategy = registries.strategies[entry.id.0]
            .lock()
            .expect("strategy lock");
        (strategy.call(&ctx)?, strategy.fx())
    };
    let Some(output) = output else {
        return Ok(());
    };

    // FX transform of the desired book and grids.
    let (desired, price_levels) = match fx {
        Some(fx) => fx.apply(&output.desired, &output.price_levels)?,
        None => (output.desired, output.price_levels),
    };

    if registries.dry_run {
        record_tick(registries, &entry, &desired, 0, 0, false);
        return Ok(());
    }

    // Diff against the resting set and hand the plan to the executor.
    let params = &entry.config.params;
    let source_limits = ctx.sources.first().map(|source| {
        (
            source.balances.get(&source.market.quote).map(|b| b.free),
            source.balances.get(&source.market.base).map(|b| b.free),
        )
    });
    let opts = SmartOptions {
        strategy_id: entry.id,
        price_levels,
        max_amount_per_order: params.max_amount_per_order,
        limit_asks_base: target_balances.get(&target.base).map(|b| b.free),
        limit_bids_quote: target_balances.get(&target.quote).map(|b| b.free),
        limit_asks_quote: params
            .apply_safe_limits_on_source
            .then(|| source_limits.as_ref().and_then(|(quote, _)| *quote))
            .flatten(),
        limit_bids_base: params
            .apply_safe_limits_on_source
            .then(|| source_limits.as_ref().and_then(|(_, base)| *base))
            .flatten(),
    };
    let current = registries.open_orders_snapshot(entry.target_market);
    let actions = SmartScheduler::new(&current, &desired, &target, opts).schedule();
    let cancels = actions.iter().filter(|a| a.is_cancel()).count();
    let creates = actions.len() - cancels;
    if !actions.is_empty() {
        registries
            .executor(entry.target_account)
            .push(entry.id, actions);
    }
    record_tick(registries, &entry, &desired, cancels, creates, false);
    Ok(())
}

fn log_skip(registries: &Arc<Registries>, entry: &ResolvedStrategy, reason: &str) {
    eprintln!("INFO: [{}/{}] tick skipped: {reason}", entry.id, entry.target_account);
    record_tick(
        registries,
        entry,
        &crate::orderbook::Orderbook::new(),
        0,
        0,
        true,
    );
}

fn record_tick(
    registries: &Arc<Registries>,
    entry: &ResolvedStrategy,
    desired: &crate::orderbook::Orderbook,
    cancels: usize,
    creates: usize,
    skipped: bool,
) {
    let record = TickRecord {
        timestamp_ms: crate::executor::now_ms(),
        strategy: entry.id,
        desired_bid_levels: desired.side_levels(crate::types::Side::Buy).len(),
        desired_ask_levels: desired.side_levels(crate::types::Side::Sell).len(),
        cancels,
        creates,
        skipped,
    };
    registries
        .sink
        .lock()
        .expect("telemetry sink lock")
        .log_tick(&record);
}
