// src/open_orders.rs
//
// Cache of our resting orders on the target exchange, indexed by side and
// price with a secondary id index. The exchange is the source of truth;
// this cache is refreshed by the executor's reconciliation pass.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;

use crate::types::{Amount, Order, Price, Side};

#[derive(Debug, Clone, Default)]
pub struct OpenOrders {
    buy_by_price: BTreeMap<Price, Vec<Order>>,
    sell_by_price: BTreeMap<Price, Vec<Order>>,
    buy_by_id: HashMap<String, Order>,
    sell_by_id: HashMap<String, Order>,
}

impl OpenOrders {
    pub fn new() -> Self {
        Self::default()
    }

    fn by_price(&self, side: Side) -> &BTreeMap<Price, Vec<Order>> {
        match side {
            Side::Buy => &self.buy_by_price,
            Side::Sell => &self.sell_by_price,
        }
    }

    fn by_price_mut(&mut self, side: Side) -> &mut BTreeMap<Price, Vec<Order>> {
        match side {
            Side::Buy => &mut self.buy_by_price,
            Side::Sell => &mut self.sell_by_price,
        }
    }

    fn by_id(&self, side: Side) -> &HashMap<String, Order> {
        match side {
            Side::Buy => &self.buy_by_id,
            Side::Sell => &self.sell_by_id,
        }
    }

    fn by_id_mut(&mut self, side: Side) -> &mut HashMap<String, Order> {
        match side {
            Side::Buy => &mut self.buy_by_id,
            Side::Sell => &mut self.sell_by_id,
        }
    }

    /// Insert a resting order. Orders without an exchange id are not
    /// resting and are ignored.
    pub fn add(&mut self, order: Order) {
        let Some(id) = order.id.clone() else {
            return;
        };
        self.by_price_mut(order.side)
            .entry(order.price)
            .or_default()
            .push(order.clone());
        self.by_id_mut(order.side).insert(id, order);
    }

    /// Remove by exchange id, searching the given side.
    pub fn remove(&mut self, side: Side, id: &str) -> Option<Order> {
        let order = self.by_id_mut(side).remove(id)?;
        let slot = self.by_price_mut(side);
        if let Some(orders) = slot.get_mut(&order.price) {
            orders.retain(|o| o.id.as_deref() != Some(id));
            if orders.is_empty() {
                slot.remove(&order.price);
            }
        }
        Some(order)
    }

    pub fn get(&self, side: Side, id: &str) -> Option<&Order> {
        self.by_id(side).get(id)
    }

    /// Look an id up on both sides at once. An id present on both sides
    /// is an invariant violation the caller must handle.
    pub fn find_both_sides(&self, id: &str) -> (Option<&Order>, Option<&Order>) {
        (self.buy_by_id.get(id), self.sell_by_id.get(id))
    }

    pub fn orders_at(&self, side: Side, price: Price) -> &[Order] {
        self.by_price(side)
            .get(&price)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total resting amount at a (side, price) slot.
    pub fn amount_at(&self, side: Side, price: Price) -> Amount {
        self.orders_at(side, price)
            .iter()
            .map(|o| o.amount)
            .sum()
    }

    /// All prices on a side, best first.
    pub fn prices(&self, side: Side) -> Vec<Price> {
        let keys = self.by_price(side).keys().copied();
        match side {
            Side::Buy => keys.rev().collect(),
            Side::Sell => keys.collect(),
        }
    }

    /// All orders on a side, best price first.
    pub fn side_orders(&self, side: Side) -> Vec<&Order> {
        let iter: Box<dyn Iterator<Item = &Vec<Order>>> = match side {
            Side::Buy => Box::new(self.buy_by_price.values().rev()),
            Side::Sell => Box::new(self.sell_by_price.values()),
        };
        iter.flat_map(|orders| orders.iter()).collect()
    }

    pub fn all_orders(&self) -> Vec<&Order> {
        let mut out = self.side_orders(Side::Sell);
        out.extend(self.side_orders(Side::Buy));
        out
    }

    /// Slots transiently holding more than one order. For each, returns
    /// every order except the newest; reconciliation cancels these.
    pub fn stale_duplicates(&self, side: Side) -> Vec<Order> {
        let mut out = Vec::new();
        for orders in self.by_price(side).values() {
            if orders.len() < 2 {
                continue;
            }
            let newest = orders
                .iter()
                .map(|o| o.created_ms)
                .max()
                .unwrap_or_default();
            let mut kept_newest = false;
            for order in orders {
                if order.created_ms == newest && !kept_newest {
                    kept_newest = true;
                } else {
                    out.push(order.clone());
                }
            }
        }
        out
    }

    /// Cumulative base volume resting on a side.
    pub fn base_volume(&self, side: Side) -> Amount {
        self.by_id(side).values().map(|o| o.amount).sum()
    }

    /// Cumulative quote volume resting on a side.
    pub fn quote_volume(&self, side: Side) -> Decimal {
        self.by_id(side)
            .values()
            .map(|o| o.price * o.amount)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.buy_by_id.len() + self.sell_by_id.len()
    }

    pub fn side_len(&self, side: Side) -> usize {
        self.by_id(side).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.buy_by_price.clear();
        self.sell_by_price.clear();
        self.buy_by_id.clear();
        self.sell_by_id.clear();
    }
}
