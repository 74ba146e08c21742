// src/adapter.rs
//
// Abstract exchange adapter contract. A venue is "a bidirectional channel
// offering snapshot order book, trade streams, order create/cancel, and
// balance/open-order queries"; everything venue-specific lives behind
// this trait.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::account::WsStatus;
use crate::errors::{EngineError, EngineResult};
use crate::orderbook::Orderbook;
use crate::types::{Amount, Balance, Order, OrderType, Price, PrivateTrade, PublicTrade, Side};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Static venue-side description of a market.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketRules {
    pub base: String,
    pub quote: String,
    pub min_price: Option<Price>,
    pub max_price: Option<Price>,
    pub min_amount: Amount,
    pub amount_precision: u32,
    pub price_precision: u32,
}

/// Wire-shaped order creation request. The price travels as its canonical
/// string rendering; the adapter must submit it verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price_s: String,
    pub amount: Amount,
}

impl NewOrderRequest {
    pub fn from_order(symbol: &str, order: &Order, price_precision: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: order.side,
            order_type: order.order_type,
            price_s: order.wire_price(price_precision),
            amount: order.amount,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelStatus {
    Cancelled,
    NotFound,
}

/// Capabilities an adapter can advertise; probed at construction, never
/// at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    FetchOrderbook,
    FetchBalances,
    FetchOpenOrders,
    PublicTrades,
    PrivateTrades,
}

/// The exchange adapter contract (spec'd interface; concrete REST/WS
/// clients to named venues live outside this crate).
pub trait ExchangeAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Venue-side symbols this adapter can trade.
    fn markets(&self) -> Vec<String>;

    fn market_rules(&self, symbol: &str) -> EngineResult<MarketRules>;

    fn supports(&self, capability: Capability) -> bool;

    /// Deadline applied by callers to every network method. On expiry the
    /// call fails as a transient error.
    fn deadline(&self) -> Duration {
        Duration::from_secs(10)
    }

    fn fetch_orderbook(&self, symbol: &str, depth: usize)
        -> BoxFuture<'_, EngineResult<Orderbook>>;

    /// Returns the venue-assigned order id.
    fn create_order(&self, request: NewOrderRequest) -> BoxFuture<'_, EngineResult<String>>;

    fn cancel_order(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> BoxFuture<'_, EngineResult<CancelStatus>>;

    fn fetch_openorders(&self, symbol: &str) -> BoxFuture<'_, EngineResult<Vec<Order>>>;

    fn fetch_balances(&self) -> BoxFuture<'_, EngineResult<Vec<Balance>>>;

    /// Start the public trade stream for a symbol. The returned status
    /// flag tracks the socket's connection state.
    fn subscribe_public_trades(
        &self,
        symbol: &str,
        tx: mpsc::UnboundedSender<PublicTrade>,
    ) -> BoxFuture<'_, EngineResult<WsStatus>>;

    /// Start the private fill stream for the whole account.
    fn subscribe_private_trades(
        &self,
        tx: mpsc::UnboundedSender<PrivateTrade>,
    ) -> BoxFuture<'_, EngineResult<WsStatus>>;
}

/// Run an adapter call under its deadline; expiry maps to a transient
/// exchange error so the executor's retry policy applies.
pub async fn with_deadline<T>(
    deadline: Duration,
    what: &str,
    fut: impl Future<Output = EngineResult<T>>,
) -> EngineResult<T> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::TransientExchange(format!(
            "{what}: deadline of {deadline:?} exceeded"
        ))),
    }
}

/// Clamp a price into the venue's allowed band, when the rules define one.
pub fn clamp_price(rules: &MarketRules, price: Price) -> Price {
    let mut price = price;
    if let Some(min_price) = rules.min_price {
        price = price.max(min_price);
    }
    if let Some(max_price) = rules.max_price {
        price = price.min(max_price);
    }
    price
}

/// Notional (quote) value helper shared by order validations.
pub fn order_notional(price: Price, amount: Amount) -> Decimal {
    price * amount
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MarketId;
    use rust_decimal_macros::dec;

    #[test]
    fn request_freezes_wire_price() {
        let mut order = Order::limit(MarketId(3), dec!(1.5), dec!(2), Side::Sell);
        order.render_price(3);
        let req = NewOrderRequest::from_order("ETHUSD", &order, 3);
        assert_eq!(req.price_s, "1.500");
        assert_eq!(req.amount, dec!(2));
    }

    #[test]
    fn clamp_respects_band() {
        let rules = MarketRules {
            base: "ETH".into(),
            quote: "USD".into(),
            min_price: Some(dec!(1)),
            max_price: Some(dec!(1000)),
            min_amount: dec!(0.01),
            amount_precision: 2,
            price_precision: 2,
        };
        assert_eq!(clamp_price(&rules, dec!(0.5)), dec!(1));
        assert_eq!(clamp_price(&rules, dec!(2000)), dec!(1000));
        assert_eq!(clamp_price(&rules, dec!(50)), dec!(50));
    }

    #[tokio::test]
    async fn deadline_expiry_is_transient() {
        let err = with_deadline(Duration::from_millis(5), "fetch_orderbook", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(err.is_transient());
    }
}
