// Executor dispatch and reconciliation against the mock exchange.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use tokio::sync::watch;

use mirrormaker::account::{Account, AccountModes};
use mirrormaker::actions::Action;
use mirrormaker::adapter::NewOrderRequest;
use mirrormaker::errors::EngineError;
use mirrormaker::executor::Executor;
use mirrormaker::market::{shared_market_state, Market, MarketModes, SharedMarketState};
use mirrormaker::mock_exchange::{MockExchange, MockOpenOrder};
use mirrormaker::types::{AccountId, MarketId, Order, OrderType, Side, StrategyId};

fn market() -> Market {
    Market {
        id: MarketId(0),
        account: AccountId(0),
        symbol: "BTCUSD".into(),
        base: "BTC".into(),
        quote: "USD".into(),
        modes: MarketModes::default(),
        min_amount: dec!(0.001),
        amount_precision: 4,
        price_precision: 2,
    }
}

fn harness() -> (Arc<MockExchange>, Arc<Executor>, SharedMarketState) {
    let mock = Arc::new(MockExchange::new("mock"));
    let state = shared_market_state();
    let mut markets = HashMap::new();
    markets.insert(MarketId(0), (market(), Arc::clone(&state)));
    let account = Account {
        id: AccountId(0),
        name: "test".into(),
        driver: "mock".into(),
        rate_limit_rps: 1_000,
        modes: AccountModes::default(),
    };
    let executor = Arc::new(Executor::new(
        account,
        Arc::clone(&mock) as Arc<dyn mirrormaker::adapter::ExchangeAdapter>,
        markets,
    ));
    (mock, executor, state)
}

fn create_action(price: rust_decimal::Decimal, amount: rust_decimal::Decimal) -> Action {
    Action::OrderCreate {
        order: Order::limit(MarketId(0), price, amount, Side::Buy),
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn dispatched_create_updates_cache_and_exchange() {
    let (mock, executor, state) = harness();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    executor.create_queue(StrategyId(0), Duration::ZERO);
    let _task = executor.start(shutdown_rx);

    executor.push(StrategyId(0), vec![create_action(dec!(100), dec!(1))]);
    settle().await;

    let created = mock.created_requests();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].price_s, "100.00");
    let cache = state.lock().unwrap();
    assert_eq!(cache.open_orders.len(), 1);
    let resting = cache.open_orders.side_orders(Side::Buy);
    assert!(resting[0].id.is_some(), "cache holds the venue-assigned id");
}

#[tokio::test]
async fn transient_create_failure_is_retried() {
    let (mock, executor, state) = harness();
    mock.fail_next_create(EngineError::TransientExchange("rate limited".into()));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    executor.create_queue(StrategyId(0), Duration::ZERO);
    let _task = executor.start(shutdown_rx);

    executor.push(StrategyId(0), vec![create_action(dec!(100), dec!(1))]);
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(mock.open_order_count(), 1, "retry should have succeeded");
    assert_eq!(state.lock().unwrap().open_orders.len(), 1);
}

#[tokio::test]
async fn permanent_create_failure_is_dropped() {
    let (mock, executor, state) = harness();
    mock.fail_next_create(EngineError::PermanentExchange("insufficient funds".into()));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    executor.create_queue(StrategyId(0), Duration::ZERO);
    let _task = executor.start(shutdown_rx);

    executor.push(StrategyId(0), vec![create_action(dec!(100), dec!(1))]);
    settle().await;

    assert_eq!(mock.open_order_count(), 0);
    assert_eq!(state.lock().unwrap().open_orders.len(), 0);
}

#[tokio::test]
async fn cancel_removes_from_cache_and_exchange() {
    let (mock, executor, state) = harness();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    executor.create_queue(StrategyId(0), Duration::ZERO);
    let _task = executor.start(shutdown_rx);

    executor.push(StrategyId(0), vec![create_action(dec!(100), dec!(1))]);
    settle().await;
    let id = state.lock().unwrap().open_orders.side_orders(Side::Buy)[0]
        .id
        .clone()
        .unwrap();

    executor.push(
        StrategyId(0),
        vec![Action::OrderCancel {
            market: MarketId(0),
            side: Side::Buy,
            order_id: id.clone(),
        }],
    );
    settle().await;

    assert_eq!(mock.cancelled_ids(), vec![id]);
    assert_eq!(mock.open_order_count(), 0);
    assert_eq!(state.lock().unwrap().open_orders.len(), 0);
}

#[tokio::test]
async fn stop_clears_a_whole_price_slot() {
    let (mock, executor, state) = harness();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    executor.create_queue(StrategyId(0), Duration::ZERO);
    let _task = executor.start(shutdown_rx);

    executor.push(
        StrategyId(0),
        vec![
            create_action(dec!(100), dec!(1)),
            create_action(dec!(100), dec!(2)),
            create_action(dec!(99), dec!(1)),
        ],
    );
    settle().await;
    assert_eq!(mock.open_order_count(), 3);

    executor.push(
        StrategyId(0),
        vec![Action::OrderStop {
            market: MarketId(0),
            side: Side::Buy,
            price: dec!(100),
        }],
    );
    settle().await;

    let cache = state.lock().unwrap();
    assert!(cache.open_orders.orders_at(Side::Buy, dec!(100)).is_empty());
    assert_eq!(cache.open_orders.amount_at(Side::Buy, dec!(99)), dec!(1));
    assert_eq!(mock.open_order_count(), 1);
}

#[tokio::test]
async fn stop_all_flushes_one_side() {
    let (mock, executor, state) = harness();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    executor.create_queue(StrategyId(0), Duration::ZERO);
    let _task = executor.start(shutdown_rx);

    executor.push(
        StrategyId(0),
        vec![
            create_action(dec!(100), dec!(1)),
            Action::OrderCreate {
                order: Order::limit(MarketId(0), dec!(101), dec!(1), Side::Sell),
            },
        ],
    );
    settle().await;
    assert_eq!(mock.open_order_count(), 2);

    executor.push(
        StrategyId(0),
        vec![Action::OrderStopAll {
            market: MarketId(0),
            side: Some(Side::Buy),
        }],
    );
    settle().await;

    let cache = state.lock().unwrap();
    assert_eq!(cache.open_orders.side_len(Side::Buy), 0);
    assert_eq!(cache.open_orders.side_len(Side::Sell), 1);
}

fn exchange_order(id: &str, symbol: &str, price_s: &str, amount: rust_decimal::Decimal) -> MockOpenOrder {
    MockOpenOrder {
        id: id.to_string(),
        request: NewOrderRequest {
            symbol: symbol.to_string(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            price_s: price_s.to_string(),
            amount,
        },
    }
}

#[tokio::test]
async fn reconcile_inserts_unknown_exchange_orders() {
    let (mock, executor, state) = harness();
    mock.set_open_orders(vec![exchange_order("x1", "BTCUSD", "100.00", dec!(2))]);

    let report = executor
        .fetch_openorders(MarketId(0), Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(report.inserted, 1);
    let cache = state.lock().unwrap();
    assert_eq!(cache.open_orders.amount_at(Side::Buy, dec!(100)), dec!(2));
}

#[tokio::test]
async fn reconcile_removes_vanished_orders_after_grace() {
    let (_mock, executor, state) = harness();
    {
        let mut cache = state.lock().unwrap();
        let mut old = Order::limit(MarketId(0), dec!(100), dec!(1), Side::Buy);
        old.id = Some("gone".into());
        old.created_ms = 0; // long past the grace window
        cache.open_orders.add(old);
        let mut young = Order::limit(MarketId(0), dec!(99), dec!(1), Side::Buy);
        young.id = Some("fresh".into());
        young.created_ms = mirrormaker::executor::now_ms();
        cache.open_orders.add(young);
    }

    let report = executor
        .fetch_openorders(MarketId(0), Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(report.removed, 1, "only the grace-aged order is removed");
    let cache = state.lock().unwrap();
    assert!(cache.open_orders.get(Side::Buy, "gone").is_none());
    assert!(cache.open_orders.get(Side::Buy, "fresh").is_some());
}

#[tokio::test]
async fn reconcile_adopts_exchange_amounts() {
    let (mock, executor, state) = harness();
    {
        let mut cache = state.lock().unwrap();
        let mut order = Order::limit(MarketId(0), dec!(100), dec!(3), Side::Buy);
        order.id = Some("x1".into());
        order.created_ms = mirrormaker::executor::now_ms();
        cache.open_orders.add(order);
    }
    // Exchange reports a partial fill down to 1.5.
    mock.set_open_orders(vec![exchange_order("x1", "BTCUSD", "100.00", dec!(1.5))]);

    let report = executor
        .fetch_openorders(MarketId(0), Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(report.adopted, 1);
    let cache = state.lock().unwrap();
    assert_eq!(cache.open_orders.amount_at(Side::Buy, dec!(100)), dec!(1.5));
}

#[tokio::test]
async fn reconcile_collapses_duplicate_slots() {
    let (mock, executor, state) = harness();
    mock.set_open_orders(vec![
        exchange_order("older", "BTCUSD", "100.00", dec!(1)),
        exchange_order("newer", "BTCUSD", "100.00", dec!(1)),
    ]);
    {
        let mut cache = state.lock().unwrap();
        let mut a = Order::limit(MarketId(0), dec!(100), dec!(1), Side::Buy);
        a.id = Some("older".into());
        a.created_ms = 1_000;
        cache.open_orders.add(a);
        let mut b = Order::limit(MarketId(0), dec!(100), dec!(1), Side::Buy);
        b.id = Some("newer".into());
        b.created_ms = mirrormaker::executor::now_ms();
        cache.open_orders.add(b);
    }

    let report = executor
        .fetch_openorders(MarketId(0), Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(report.duplicates_cancelled, 1);
    assert_eq!(mock.cancelled_ids(), vec!["older".to_string()]);
    let cache = state.lock().unwrap();
    assert!(cache.open_orders.get(Side::Buy, "older").is_none());
    assert!(cache.open_orders.get(Side::Buy, "newer").is_some());
}

#[tokio::test]
async fn reconcile_propagates_fetch_failures() {
    let (mock, executor, _state) = harness();
    mock.fail_next_fetch(EngineError::TransientExchange("timeout".into()));
    let err = executor
        .fetch_openorders(MarketId(0), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(err.is_transient());
}
