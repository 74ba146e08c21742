// src/types.rs
//
// Common shared types for the mirrormaker engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Millisecond timestamp since Unix epoch.
pub type TimestampMs = i64;

/// Quote-per-base price. Fixed-point; never a binary float.
pub type Price = Decimal;

/// Base-unit amount. Fixed-point; never a binary float.
pub type Amount = Decimal;

/// Arena handle for an account registered with the reactor.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct AccountId(pub usize);

/// Arena handle for a market registered with the reactor.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct MarketId(pub usize);

/// Arena handle for a strategy registered with the reactor.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct StrategyId(pub usize);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acc{}", self.0)
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mkt{}", self.0)
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "strat{}", self.0)
    }
}

/// Buy or sell side for an order. Bids are buys, asks are sells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Stable lowercase name (used in logs and metric labels).
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// Limit or market execution for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    Market,
}

/// An order owned by the engine, either desired (no id yet) or resting
/// on an exchange (id assigned by the venue).
///
/// `price_s` is the canonical wire rendering of the price. Once set it is
/// immutable and is the identity used for compare-and-cancel decisions;
/// two orders quoting "1.20" and "1.2000" are the same order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub market: MarketId,
    pub price: Price,
    pub amount: Amount,
    pub side: Side,
    pub order_type: OrderType,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub price_s: Option<String>,
    #[serde(default)]
    pub created_ms: TimestampMs,
}

impl Order {
    pub fn limit(market: MarketId, price: Price, amount: Amount, side: Side) -> Self {
        Self {
            market,
            price,
            amount,
            side,
            order_type: OrderType::Limit,
            id: None,
            price_s: None,
            created_ms: 0,
        }
    }

    /// Render and freeze the wire price at the given precision.
    /// A second call is a no-op: the rendered price is the order's identity.
    pub fn render_price(&mut self, price_precision: u32) {
        if self.price_s.is_none() {
            self.price_s = Some(format_price(self.price, price_precision));
        }
    }

    /// Wire price, rendering on the fly when not yet frozen.
    pub fn wire_price(&self, price_precision: u32) -> String {
        self.price_s
            .clone()
            .unwrap_or_else(|| format_price(self.price, price_precision))
    }
}

/// Canonical decimal rendering at fixed precision.
pub fn format_price(price: Price, precision: u32) -> String {
    let rounded = price.round_dp(precision);
    format!("{:.prec$}", rounded, prec = precision as usize)
}

/// An externally supplied ordinate around which the desired book is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: Price,
}

impl PricePoint {
    pub fn new(price: Price) -> Self {
        Self { price }
    }
}

/// A trade observed on a public feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicTrade {
    pub market: MarketId,
    pub price: Price,
    /// Filled base amount.
    pub volume: Amount,
    pub side: Side,
    pub timestamp_ms: TimestampMs,
}

impl PublicTrade {
    /// Quote-denominated notional of the trade.
    pub fn total(&self) -> Decimal {
        self.price * self.volume
    }
}

/// A fill of one of our own resting orders, delivered on the private feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateTrade {
    pub id: String,
    pub market: MarketId,
    pub order_id: String,
    pub price: Price,
    pub amount: Amount,
    pub side: Side,
    pub timestamp_ms: TimestampMs,
}

/// Per-currency balance snapshot for an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub currency: String,
    pub free: Decimal,
    pub locked: Decimal,
    pub total: Decimal,
}

impl Balance {
    pub fn new(currency: impl Into<String>, free: Decimal, locked: Decimal) -> Self {
        Self {
            currency: currency.into(),
            free,
            locked,
            total: free + locked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_rendering_is_frozen_once() {
        let mut order = Order::limit(MarketId(0), dec!(1.2), dec!(3), Side::Buy);
        order.render_price(4);
        assert_eq!(order.price_s.as_deref(), Some("1.2000"));
        // Re-render at another precision must not change the identity.
        order.render_price(2);
        assert_eq!(order.price_s.as_deref(), Some("1.2000"));
    }

    #[test]
    fn public_trade_total_is_price_times_volume() {
        let trade = PublicTrade {
            market: MarketId(1),
            price: dec!(101),
            volume: dec!(0.5),
            side: Side::Sell,
            timestamp_ms: 0,
        };
        assert_eq!(trade.total(), dec!(50.5));
    }

    #[test]
    fn side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }
}
