// src/orderbook.rs
//
// Side-indexed order book and its algebra: spread application and
// balance-bounded volume adjustment. Aggregation onto price-point grids
// lives in src/aggregate.rs.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};
use crate::types::{Amount, Order, Price, Side};

/// Ordered map from price to aggregated resting amount, one map per side.
///
/// Bids iterate descending (best first), asks ascending. Amounts are
/// strictly positive; an update to zero removes the level. A price may
/// never appear on both sides, and the book may not cross.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Orderbook {
    bids: BTreeMap<Price, Amount>,
    asks: BTreeMap<Price, Amount>,
}

impl Orderbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a book from raw levels. Zero-amount levels are skipped.
    pub fn from_levels(bids: &[(Price, Amount)], asks: &[(Price, Amount)]) -> EngineResult<Self> {
        let mut book = Self::new();
        for &(price, amount) in bids {
            book.update(Side::Buy, price, amount)?;
        }
        for &(price, amount) in asks {
            book.update(Side::Sell, price, amount)?;
        }
        Ok(book)
    }

    /// Insert or replace the (side, price) level. Zero amount removes.
    pub fn update(&mut self, side: Side, price: Price, amount: Amount) -> EngineResult<()> {
        if amount < Decimal::ZERO {
            return Err(EngineError::InvariantViolation(format!(
                "negative amount {amount} at {price}"
            )));
        }
        if amount.is_zero() {
            self.delete(side, price);
            return Ok(());
        }
        let (own, other) = match side {
            Side::Buy => (&mut self.bids, &self.asks),
            Side::Sell => (&mut self.asks, &self.bids),
        };
        if other.contains_key(&price) {
            return Err(EngineError::InvariantViolation(format!(
                "price {price} present on both sides"
            )));
        }
        let crossed = match side {
            Side::Buy => other.keys().next().is_some_and(|best_ask| price >= *best_ask),
            Side::Sell => other.keys().next_back().is_some_and(|best_bid| price <= *best_bid),
        };
        if crossed {
            return Err(EngineError::InvariantViolation(format!(
                "{} at {price} would cross the book",
                side.as_str()
            )));
        }
        own.insert(price, amount);
        Ok(())
    }

    /// Apply an order's (side, price, amount) as a level update.
    pub fn update_order(&mut self, order: &Order) -> EngineResult<()> {
        self.update(order.side, order.price, order.amount)
    }

    /// Idempotent removal of a level.
    pub fn delete(&mut self, side: Side, price: Price) {
        match side {
            Side::Buy => self.bids.remove(&price),
            Side::Sell => self.asks.remove(&price),
        };
    }

    /// Highest bid / lowest ask.
    pub fn best(&self, side: Side) -> Option<(Price, Amount)> {
        match side {
            Side::Buy => self.bids.iter().next_back().map(|(p, a)| (*p, *a)),
            Side::Sell => self.asks.iter().next().map(|(p, a)| (*p, *a)),
        }
    }

    /// Bids, best (highest) first.
    pub fn bids_desc(&self) -> impl Iterator<Item = (Price, Amount)> + '_ {
        self.bids.iter().rev().map(|(p, a)| (*p, *a))
    }

    /// Asks, best (lowest) first.
    pub fn asks_asc(&self) -> impl Iterator<Item = (Price, Amount)> + '_ {
        self.asks.iter().map(|(p, a)| (*p, *a))
    }

    /// Levels of one side, best first.
    pub fn side_levels(&self, side: Side) -> Vec<(Price, Amount)> {
        match side {
            Side::Buy => self.bids_desc().collect(),
            Side::Sell => self.asks_asc().collect(),
        }
    }

    pub fn amount_at(&self, side: Side, price: Price) -> Option<Amount> {
        match side {
            Side::Buy => self.bids.get(&price).copied(),
            Side::Sell => self.asks.get(&price).copied(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bids.len() + self.asks.len()
    }

    /// New book with every bid scaled by `(1 - bid_frac)` and every ask by
    /// `(1 + ask_frac)`. Fractions are non-negative (0.01 = 1%). Amounts
    /// are carried unchanged. The result may cross the *target's* live
    /// quotes; that is for the scheduler to police.
    pub fn spread(&self, bid_frac: Decimal, ask_frac: Decimal) -> Orderbook {
        let one = Decimal::ONE;
        let mut out = Orderbook::new();
        for (price, amount) in &self.bids {
            out.bids.insert(*price * (one - bid_frac), *amount);
        }
        for (price, amount) in &self.asks {
            out.asks.insert(*price * (one + ask_frac), *amount);
        }
        out
    }

    /// Cap cumulative volume per side against balance limits.
    ///
    /// Asks are walked in ascending price, capping cumulative *base*
    /// volume at `asks_base_limit`; bids in descending price, capping
    /// cumulative *quote* volume (sum of price * amount) at
    /// `bids_quote_limit`. `None` means unbounded. Levels past a cap are
    /// dropped and the boundary level is truncated to fit.
    ///
    /// With `side_swap` the denominations swap: the ask limit is read in
    /// quote units and the bid limit in base units. Used when the limits
    /// are measured on the opposite-account currency.
    pub fn adjust_volume_simple(
        &self,
        asks_base_limit: Option<Decimal>,
        bids_quote_limit: Option<Decimal>,
        side_swap: bool,
    ) -> Orderbook {
        let mut out = Orderbook::new();

        let mut ask_budget = asks_base_limit;
        for (price, amount) in self.asks_asc() {
            let cost = if side_swap { price * amount } else { amount };
            match take_from_budget(&mut ask_budget, cost) {
                Taken::All => {
                    out.asks.insert(price, amount);
                }
                Taken::Partial(fraction) => {
                    let kept = amount * fraction;
                    if kept > Decimal::ZERO {
                        out.asks.insert(price, kept);
                    }
                    break;
                }
                Taken::None => break,
            }
        }

        let mut bid_budget = bids_quote_limit;
        for (price, amount) in self.bids_desc() {
            let cost = if side_swap { amount } else { price * amount };
            match take_from_budget(&mut bid_budget, cost) {
                Taken::All => {
                    out.bids.insert(price, amount);
                }
                Taken::Partial(fraction) => {
                    let kept = amount * fraction;
                    if kept > Decimal::ZERO {
                        out.bids.insert(price, kept);
                    }
                    break;
                }
                Taken::None => break,
            }
        }

        out
    }
}

enum Taken {
    All,
    /// Fraction of the level that still fits in the budget.
    Partial(Decimal),
    None,
}

fn take_from_budget(budget: &mut Option<Decimal>, cost: Decimal) -> Taken {
    let Some(remaining) = budget else {
        return Taken::All;
    };
    if *remaining <= Decimal::ZERO {
        return Taken::None;
    }
    if cost <= *remaining {
        *remaining -= cost;
        Taken::All
    } else if cost > Decimal::ZERO {
        let fraction = *remaining / cost;
        *remaining = Decimal::ZERO;
        Taken::Partial(fraction)
    } else {
        Taken::All
    }
}
