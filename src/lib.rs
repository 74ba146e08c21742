//! Mirrormaker core library.
//!
//! A liquidity-mirroring market maker: it reads the order book of a
//! source exchange, transforms it (aggregation onto price grids, spread,
//! balance-bounded volume), and keeps a matching book resting on a
//! target exchange with the minimal set of create/cancel requests. When
//! a resting order fills, the engine can "order back", hedging the fill
//! on the source exchange.
//!
//! The crate separates pure computation from I/O:
//!
//! - **Book algebra** (`orderbook`, `aggregate`): deterministic
//!   transformations with no side effects.
//! - **Strategy** (`strategy`): desired-book computation and order-back
//!   batching, pure given a context snapshot.
//! - **Scheduler** (`scheduler`): diffs resting orders against the
//!   desired book into an ordered action list.
//! - **Executor** (`executor`): per-account FIFO queues, rate-limited
//!   dispatch, open-order reconciliation.
//! - **Reactor** (`reactor`): registries plus every periodic loop; the
//!   only place that wires the layers together.
//!
//! Exchange adapters are external: anything implementing
//! [`adapter::ExchangeAdapter`] can sit on either side of a strategy.

pub mod account;
pub mod actions;
pub mod adapter;
pub mod aggregate;
pub mod config;
pub mod errors;
pub mod executor;
pub mod fx;
pub mod limits;
pub mod market;
pub mod metrics;
pub mod mock_exchange;
pub mod open_orders;
pub mod orderbook;
pub mod reactor;
pub mod scheduler;
pub mod strategy;
pub mod telemetry;
pub mod types;

// --- Re-exports for ergonomic external use ---------------------------------

pub use actions::Action;
pub use adapter::{CancelStatus, Capability, ExchangeAdapter, MarketRules, NewOrderRequest};
pub use aggregate::{AggregatedLevel, AggregatedOrderbook};
pub use config::EngineConfig;
pub use errors::{EngineError, EngineResult};
pub use executor::{Executor, ReconcileReport};
pub use fx::{Fx, SharedFxRate};
pub use limits::{balance_limits, SideLimits};
pub use market::{Market, MarketModes};
pub use metrics::{EngineMetrics, MetricsServer};
pub use mock_exchange::MockExchange;
pub use open_orders::OpenOrders;
pub use orderbook::Orderbook;
pub use reactor::{tick, Reactor};
pub use scheduler::{SmartOptions, SmartScheduler};
pub use strategy::{
    OrderbackParams, OrderbackStrategy, PriceLevels, PricePointsFunc, QuotedSide, Strategy,
    StrategyContext, StrategyOutput,
};
pub use telemetry::{EventSink, FileSink, NoopSink, TickRecord};
pub use types::{
    AccountId, Amount, Balance, MarketId, Order, OrderType, Price, PricePoint, PrivateTrade,
    PublicTrade, Side, StrategyId, TimestampMs,
};
