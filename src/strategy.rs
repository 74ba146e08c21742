// src/strategy.rs
//
// Strategy layer: each tick a strategy turns source order books into the
// desired target book plus the price grids it was built on. The
// Orderback variant additionally hedges private fills back onto the
// source exchange, batching them within a grace window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};
use crate::fx::Fx;
use crate::limits::{balance_limits, SideLimits};
use crate::market::Market;
use crate::open_orders::OpenOrders;
use crate::orderbook::Orderbook;
use crate::types::{
    Amount, Balance, MarketId, Order, OrderType, Price, PricePoint, PrivateTrade, Side,
    StrategyId,
};

/// Shape of the offsets between consecutive price points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricePointsFunc {
    Constant,
    Linear,
    Exponential,
}

/// Which sides of the target book the strategy quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotedSide {
    Asks,
    Bids,
    Both,
}

impl QuotedSide {
    pub fn quotes(&self, side: Side) -> bool {
        matches!(
            (*self, side),
            (QuotedSide::Both, _) | (QuotedSide::Asks, Side::Sell) | (QuotedSide::Bids, Side::Buy)
        )
    }
}

fn default_grace_time() -> f64 {
    1.0
}

fn default_levels_count() -> u32 {
    1
}

fn default_orderback_type() -> OrderType {
    OrderType::Limit
}

/// Orderback strategy parameters (the stable external contract).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderbackParams {
    pub levels_price_step: Decimal,
    pub levels_price_func: PricePointsFunc,
    #[serde(default = "default_levels_count")]
    pub levels_count: u32,
    #[serde(default)]
    pub spread_bids: Decimal,
    #[serde(default)]
    pub spread_asks: Decimal,
    pub side: QuotedSide,
    #[serde(default)]
    pub enable_orderback: bool,
    #[serde(default)]
    pub min_order_back_amount: Amount,
    #[serde(default = "default_grace_time")]
    pub orderback_grace_time: f64,
    #[serde(default = "default_orderback_type")]
    pub orderback_type: OrderType,
    #[serde(default)]
    pub apply_safe_limits_on_source: bool,
    #[serde(default)]
    pub max_amount_per_order: Option<Amount>,
}

impl OrderbackParams {
    pub fn validate(&self) -> EngineResult<()> {
        if self.levels_count < 1 {
            return Err(EngineError::Configuration(
                "levels_count must be >= 1".into(),
            ));
        }
        if self.levels_price_step <= Decimal::ZERO {
            return Err(EngineError::Configuration(
                "levels_price_step must be positive".into(),
            ));
        }
        if self.spread_bids < Decimal::ZERO || self.spread_asks < Decimal::ZERO {
            return Err(EngineError::Configuration("spreads must be >= 0".into()));
        }
        // A full bid spread makes the de-spread divisor zero.
        if self.spread_bids >= Decimal::ONE {
            return Err(EngineError::Configuration(
                "spread_bids must be < 1".into(),
            ));
        }
        if self.orderback_grace_time < 0.0 {
            return Err(EngineError::Configuration(
                "orderback_grace_time must be >= 0".into(),
            ));
        }
        Ok(())
    }

    pub fn grace_window(&self) -> Duration {
        Duration::from_secs_f64(self.orderback_grace_time)
    }
}

/// Price grids the desired book was built on; the scheduler snaps
/// resting orders onto these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceLevels {
    pub bids: Vec<PricePoint>,
    pub asks: Vec<PricePoint>,
}

impl PriceLevels {
    pub fn side(&self, side: Side) -> &[PricePoint] {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }
}

/// What a tick produces: the book we want resting on the target and the
/// grids it sits on.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyOutput {
    pub desired: Orderbook,
    pub price_levels: PriceLevels,
}

/// Per-source snapshot handed to `Strategy::call`, copied out of the
/// market/account locks up front so the tick reads a consistent view.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub market: Market,
    pub orderbook: Orderbook,
    pub balances: HashMap<String, Balance>,
}

#[derive(Debug, Clone)]
pub struct StrategyContext {
    pub target: Market,
    pub target_balances: HashMap<String, Balance>,
    pub sources: Vec<SourceContext>,
}

/// Timer work a notify call asks the reactor to schedule.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderbackSchedule {
    /// Arm the one-shot grace timer; on fire, call `flush_order_back`.
    GraceTimer(Duration),
    /// FX rate not ready: re-run the hedge for this fill after the delay.
    Retry {
        trade: PrivateTrade,
        order: Order,
        delay: Duration,
    },
}

pub trait Strategy: Send {
    fn id(&self) -> StrategyId;

    /// Compute the desired target book. `Ok(None)` means "nothing to
    /// quote this tick" (e.g. empty source book) and is not an error.
    fn call(&mut self, ctx: &StrategyContext) -> EngineResult<Option<StrategyOutput>>;

    /// React to a private fill on the target. Returns timer requests for
    /// the reactor; an empty vec means nothing to schedule.
    fn notify_private_trade(
        &mut self,
        trade: &PrivateTrade,
        trust: bool,
        open_orders: &OpenOrders,
    ) -> Vec<OrderbackSchedule>;

    /// Re-attempt a hedge deferred by `OrderbackSchedule::Retry`.
    fn retry_order_back(&mut self, trade: &PrivateTrade, order: &Order) -> Vec<OrderbackSchedule>;

    /// Grace-window flush: drain buffered hedges into orders for the
    /// source market. Safe to call with an empty buffer.
    fn flush_order_back(&mut self, source: &Market) -> Vec<Order>;

    /// FX provider backing this strategy, if any.
    fn fx(&self) -> Option<Arc<dyn Fx>>;
}

/// Key of one buffered hedge: the (trade, order) pair that produced it.
type PendingKey = (String, String);

#[derive(Debug, Clone, PartialEq)]
struct PendingHedge {
    price: Price,
    amount: Amount,
    side: Side,
}

/// The liquidity-mirroring strategy with optional order-back hedging.
pub struct OrderbackStrategy {
    id: StrategyId,
    params: OrderbackParams,
    target: MarketId,
    fx: Option<Arc<dyn Fx>>,
    pending: HashMap<PendingKey, PendingHedge>,
    grace_timer_armed: bool,
}

impl OrderbackStrategy {
    pub fn new(
        id: StrategyId,
        target: MarketId,
        params: OrderbackParams,
        fx: Option<Arc<dyn Fx>>,
    ) -> EngineResult<Self> {
        params.validate()?;
        Ok(Self {
            id,
            params,
            target,
            fx,
            pending: HashMap::new(),
            grace_timer_armed: false,
        })
    }

    pub fn params(&self) -> &OrderbackParams {
        &self.params
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn require_currencies(
        balances: &HashMap<String, Balance>,
        market: &Market,
        role: &str,
    ) -> EngineResult<()> {
        for currency in [&market.base, &market.quote] {
            if !balances.contains_key(currency.as_str()) {
                return Err(EngineError::Strategy(format!(
                    "{role} account is missing currency {currency}"
                )));
            }
        }
        Ok(())
    }

    /// Build one side's grid away from the top of book.
    fn price_points(&self, top_price: Price, side: Side, market: &Market) -> Vec<PricePoint> {
        let count = self.params.levels_count;
        let step = self.params.levels_price_step;
        let one = Decimal::ONE;
        let mut prices: Vec<Price> = Vec::with_capacity(count as usize);
        match self.params.levels_price_func {
            PricePointsFunc::Constant => {
                for i in 0..count {
                    let offset = step * Decimal::from(i);
                    prices.push(signed_offset(top_price, offset, side));
                }
            }
            PricePointsFunc::Linear => {
                let mut offset = Decimal::ZERO;
                for i in 0..count {
                    offset += step * Decimal::from(i + 1);
                    prices.push(signed_offset(top_price, offset, side));
                }
            }
            PricePointsFunc::Exponential => {
                let factor = match side {
                    Side::Sell => one + step,
                    Side::Buy => one - step,
                };
                let mut price = top_price;
                for i in 0..count {
                    if i > 0 {
                        price *= factor;
                    }
                    prices.push(price);
                }
            }
        }
        let mut rounded: Vec<Price> = prices
            .into_iter()
            .map(|p| market.round_price(p))
            .filter(|p| *p > Decimal::ZERO)
            .collect();
        rounded.dedup();
        rounded.into_iter().map(PricePoint::new).collect()
    }

    fn adjust_for_limits(
        &self,
        book: Orderbook,
        target: &SideLimits,
        source: &SideLimits,
    ) -> Orderbook {
        let adjusted =
            book.adjust_volume_simple(target.limit_in_base, target.limit_in_quote, false);
        if self.params.apply_safe_limits_on_source {
            // Source limits are denominated in the opposite account's
            // currencies: a target ask fill spends source quote.
            adjusted.adjust_volume_simple(source.limit_in_quote, source.limit_in_base, true)
        } else {
            adjusted
        }
    }

    fn keep_quoted_sides(&self, book: Orderbook, levels: PriceLevels) -> (Orderbook, PriceLevels) {
        let mut filtered = Orderbook::new();
        let mut kept_levels = PriceLevels::default();
        if self.params.side.quotes(Side::Buy) {
            for (price, amount) in book.bids_desc() {
                let _ = filtered.update(Side::Buy, price, amount);
            }
            kept_levels.bids = levels.bids;
        }
        if self.params.side.quotes(Side::Sell) {
            for (price, amount) in book.asks_asc() {
                let _ = filtered.update(Side::Sell, price, amount);
            }
            kept_levels.asks = levels.asks;
        }
        (filtered, kept_levels)
    }

    /// Undo the spread on a filled order's price to recover the source
    /// ordinate the quote was derived from.
    fn despread_price(&self, order: &Order) -> Price {
        match order.side {
            Side::Sell => order.price / (Decimal::ONE + self.params.spread_asks),
            Side::Buy => order.price / (Decimal::ONE - self.params.spread_bids),
        }
    }

    /// Buffer one hedge; returns the timer request when the grace timer
    /// was not yet armed, or a retry request when FX is not ready.
    fn order_back(&mut self, trade: &PrivateTrade, order: &Order) -> Option<OrderbackSchedule> {
        let mut price = self.despread_price(order);
        if let Some(fx) = &self.fx {
            match fx.rate() {
                Some(rate) => price /= rate,
                None => {
                    return Some(OrderbackSchedule::Retry {
                        trade: trade.clone(),
                        order: order.clone(),
                        delay: Duration::from_secs(1),
                    });
                }
            }
        }
        let key = (trade.id.clone(), order.id.clone().unwrap_or_default());
        self.pending.insert(
            key,
            PendingHedge {
                price,
                amount: trade.amount,
                side: order.side.opposite(),
            },
        );
        if !self.grace_timer_armed {
            self.grace_timer_armed = true;
            return Some(OrderbackSchedule::GraceTimer(self.params.grace_window()));
        }
        None
    }
}

fn signed_offset(top: Price, offset: Decimal, side: Side) -> Price {
    match side {
        Side::Sell => top + offset,
        Side::Buy => top - offset,
    }
}

impl Strategy for OrderbackStrategy {
    fn id(&self) -> StrategyId {
        self.id
    }

    fn call(&mut self, ctx: &StrategyContext) -> EngineResult<Option<StrategyOutput>> {
        if ctx.sources.len() != 1 {
            return Err(EngineError::Strategy(format!(
                "orderback requires exactly one source, got {}",
                ctx.sources.len()
            )));
        }
        let source = &ctx.sources[0];
        Self::require_currencies(&ctx.target_balances, &ctx.target, "target")?;
        Self::require_currencies(&source.balances, &source.market, "source")?;

        let target_limit = balance_limits(
            &source.orderbook,
            &ctx.target_balances,
            &ctx.target.base,
            &ctx.target.quote,
        );
        let source_limit = balance_limits(
            &source.orderbook,
            &source.balances,
            &source.market.base,
            &source.market.quote,
        );

        let (Some(top_bid), Some(top_ask)) =
            (source_limit.top_bid_price, source_limit.top_ask_price)
        else {
            // Nothing to mirror without a two-sided source book.
            return Ok(None);
        };

        let bid_points = self.price_points(top_bid, Side::Buy, &ctx.target);
        let ask_points = self.price_points(top_ask, Side::Sell, &ctx.target);

        let aggregated =
            source
                .orderbook
                .aggregate(&bid_points, &ask_points, ctx.target.min_amount);
        let adjusted = self.adjust_for_limits(aggregated.to_ob(), &target_limit, &source_limit);
        let desired = adjusted.spread(self.params.spread_bids, self.params.spread_asks);

        let spread_points = |points: &[PricePoint], side: Side| -> Vec<PricePoint> {
            let one = Decimal::ONE;
            points
                .iter()
                .map(|p| {
                    let price = match side {
                        Side::Buy => p.price * (one - self.params.spread_bids),
                        Side::Sell => p.price * (one + self.params.spread_asks),
                    };
                    PricePoint::new(ctx.target.round_price(price))
                })
                .collect()
        };
        let levels = PriceLevels {
            bids: spread_points(&bid_points, Side::Buy),
            asks: spread_points(&ask_points, Side::Sell),
        };

        let (desired, levels) = self.keep_quoted_sides(desired, levels);
        Ok(Some(StrategyOutput {
            desired,
            price_levels: levels,
        }))
    }

    fn notify_private_trade(
        &mut self,
        trade: &PrivateTrade,
        trust: bool,
        open_orders: &OpenOrders,
    ) -> Vec<OrderbackSchedule> {
        if !self.params.enable_orderback || trade.market != self.target {
            return Vec::new();
        }
        if trust {
            // Trusted payloads carry the filled order's shape directly.
            let mut order = Order::limit(trade.market, trade.price, trade.amount, trade.side);
            order.id = Some(trade.order_id.clone());
            return self.order_back(trade, &order).into_iter().collect();
        }
        let (bid, ask) = open_orders.find_both_sides(&trade.order_id);
        match (bid, ask) {
            (Some(_), Some(_)) => {
                eprintln!(
                    "ERROR: [{}] invariant_violation: order {} resting on both sides, fill dropped",
                    self.id, trade.order_id
                );
                Vec::new()
            }
            (Some(order), None) | (None, Some(order)) => {
                let order = order.clone();
                self.order_back(trade, &order).into_iter().collect()
            }
            (None, None) => Vec::new(),
        }
    }

    fn retry_order_back(&mut self, trade: &PrivateTrade, order: &Order) -> Vec<OrderbackSchedule> {
        self.order_back(trade, order).into_iter().collect()
    }

    fn flush_order_back(&mut self, source: &Market) -> Vec<Order> {
        // Disarm first: the flag must clear on every exit path, including
        // the all-groups-discarded one.
        self.grace_timer_armed = false;
        let drained: Vec<PendingHedge> = self.pending.drain().map(|(_, h)| h).collect();
        if drained.is_empty() {
            return Vec::new();
        }

        let mut groups: HashMap<(Price, Side), Amount> = HashMap::new();
        for hedge in drained {
            *groups.entry((hedge.price, hedge.side)).or_default() += hedge.amount;
        }

        let mut keys: Vec<(Price, Side)> = groups.keys().cloned().collect();
        keys.sort_by(|a, b| (a.1.as_str(), a.0).cmp(&(b.1.as_str(), b.0)));

        let mut orders = Vec::new();
        for key in keys {
            let amount = groups[&key];
            if amount <= self.params.min_order_back_amount {
                continue;
            }
            let (price, side) = key;
            let amount = source.round_amount(amount);
            if !source.meets_min_amount(amount) {
                continue;
            }
            let mut order = Order {
                market: source.id,
                price: source.round_price(price),
                amount,
                side,
                order_type: self.params.orderback_type,
                id: None,
                price_s: None,
                created_ms: 0,
            };
            order.render_price(source.price_precision);
            orders.push(order);
        }
        orders
    }

    fn fx(&self) -> Option<Arc<dyn Fx>> {
        self.fx.clone()
    }
}
