// src/market.rs
//
// Static per-market configuration plus the mutable state the market owns:
// its source-of-liquidity order book and the open-orders cache. State is
// mutated only by the owning market's fetch/stream handlers; everything
// else reads snapshots.

use std::sync::{Arc, Mutex};

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::open_orders::OpenOrders;
use crate::orderbook::Orderbook;
use crate::types::{AccountId, Amount, MarketId, Price, TimestampMs};

/// Which background behaviours a market participates in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketModes {
    pub fetch_public_orderbook: bool,
    pub fetch_private_balance: bool,
    pub listen_public_trades: bool,
    pub ws_private: bool,
    pub ws_public: bool,
}

/// Static description of a tradable market on some account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub account: AccountId,
    /// Venue-side symbol, e.g. "BTCUSD".
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub modes: MarketModes,
    pub min_amount: Amount,
    pub amount_precision: u32,
    pub price_precision: u32,
}

impl Market {
    /// Round a price to the market's tick precision.
    pub fn round_price(&self, price: Price) -> Price {
        price.round_dp_with_strategy(self.price_precision, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Round an amount down to the market's lot precision. Truncation,
    /// not rounding: an amount must never grow past the balance backing it.
    pub fn round_amount(&self, amount: Amount) -> Amount {
        amount.round_dp_with_strategy(self.amount_precision, RoundingStrategy::ToZero)
    }

    /// Amount precision expressed as the smallest representable step.
    pub fn amount_step(&self) -> Amount {
        Decimal::new(1, self.amount_precision)
    }

    pub fn meets_min_amount(&self, amount: Amount) -> bool {
        amount >= self.min_amount
    }
}

/// Mutable market-owned state, one lock per market.
#[derive(Debug, Default)]
pub struct MarketState {
    pub orderbook: Orderbook,
    pub open_orders: OpenOrders,
    pub last_orderbook_ms: TimestampMs,
}

pub type SharedMarketState = Arc<Mutex<MarketState>>;

pub fn shared_market_state() -> SharedMarketState {
    Arc::new(Mutex::new(MarketState::default()))
}
