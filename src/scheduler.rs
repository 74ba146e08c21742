// src/scheduler.rs
//
// The "Smart" action scheduler: diff the resting order set against the
// desired book and emit the minimal ordered list of cancels and creates
// that converges them, subject to chunking and per-side volume caps.
//
// Ordering contract: cancel asks, cancel bids, create asks best-first,
// create bids best-first. Cancels come first so freed balance can back
// the creates; ask exposure is reduced before bid exposure grows.

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::actions::Action;
use crate::market::Market;
use crate::open_orders::OpenOrders;
use crate::orderbook::Orderbook;
use crate::strategy::PriceLevels;
use crate::types::{Amount, Order, Price, Side, StrategyId};

#[derive(Debug, Clone, Default)]
pub struct SmartOptions {
    pub strategy_id: StrategyId,
    /// Grids to align prices on; an empty side means "no grid, trust the
    /// desired book's prices".
    pub price_levels: PriceLevels,
    /// Split creates into chunks no larger than this.
    pub max_amount_per_order: Option<Amount>,
    /// Cumulative base volume allowed on the ask side (live + pending).
    pub limit_asks_base: Option<Decimal>,
    /// Cumulative quote volume allowed on the bid side (live + pending).
    pub limit_bids_quote: Option<Decimal>,
    /// Symmetric source-side caps, when the opposite account bounds us.
    pub limit_asks_quote: Option<Decimal>,
    pub limit_bids_base: Option<Decimal>,
}

pub struct SmartScheduler<'a> {
    current: &'a OpenOrders,
    desired: &'a Orderbook,
    market: &'a Market,
    opts: SmartOptions,
}

impl<'a> SmartScheduler<'a> {
    pub fn new(
        current: &'a OpenOrders,
        desired: &'a Orderbook,
        market: &'a Market,
        opts: SmartOptions,
    ) -> Self {
        Self {
            current,
            desired,
            market,
            opts,
        }
    }

    /// Produce the ordered action list driving `current` toward `desired`.
    pub fn schedule(&self) -> Vec<Action> {
        let (ask_cancels, ask_creates) = self.plan_side(Side::Sell);
        let (bid_cancels, bid_creates) = self.plan_side(Side::Buy);

        let mut actions = Vec::new();
        actions.extend(ask_cancels);
        actions.extend(bid_cancels);
        actions.extend(ask_creates);
        actions.extend(bid_creates);
        actions
    }

    fn plan_side(&self, side: Side) -> (Vec<Action>, Vec<Action>) {
        let grid: Vec<Price> = self
            .opts
            .price_levels
            .side(side)
            .iter()
            .map(|p| p.price)
            .collect();

        // Desired levels, snapped onto the grid and merged; best first.
        let mut desired_levels: Vec<(Price, Amount)> = Vec::new();
        let mut desired_index: HashMap<Price, Amount> = HashMap::new();
        for (price, amount) in self.desired.side_levels(side) {
            let snapped = snap_to_grid(price, &grid).unwrap_or(price);
            match desired_index.get_mut(&snapped) {
                Some(existing) => {
                    *existing += amount;
                    if let Some(level) = desired_levels.iter_mut().find(|(p, _)| *p == snapped) {
                        level.1 += amount;
                    }
                }
                None => {
                    desired_index.insert(snapped, amount);
                    desired_levels.push((snapped, amount));
                }
            }
        }

        let step = self.market.amount_step();
        let mut cancels = Vec::new();
        let mut kept: HashMap<Price, Amount> = HashMap::new();

        for price in self.current.prices(side) {
            let orders = self.current.orders_at(side, price);
            let slot_total: Amount = orders.iter().map(|o| o.amount).sum();
            let on_grid = grid.is_empty() || grid.contains(&price);
            let desired_amount = desired_index.get(&price).copied();

            let keep = on_grid
                && desired_amount
                    .is_some_and(|want| (slot_total - want).abs() <= step);
            if keep {
                kept.insert(price, slot_total);
            } else {
                for order in orders {
                    if let Some(id) = &order.id {
                        cancels.push(Action::OrderCancel {
                            market: self.market.id,
                            side,
                            order_id: id.clone(),
                        });
                    }
                }
            }
        }

        // Budgets cover live and pending volume together; kept orders are
        // charged first, creates consume what remains, best level first.
        let (mut base_budget, mut quote_budget) = match side {
            Side::Sell => (self.opts.limit_asks_base, self.opts.limit_asks_quote),
            Side::Buy => (self.opts.limit_bids_base, self.opts.limit_bids_quote),
        };
        for (price, amount) in &kept {
            charge(&mut base_budget, *amount);
            charge(&mut quote_budget, *price * *amount);
        }

        let mut creates = Vec::new();
        for (price, want) in desired_levels {
            let covered = kept.get(&price).copied().unwrap_or_default();
            let mut needed = self.market.round_amount(want - covered);
            if needed <= step && covered > Decimal::ZERO {
                continue;
            }
            if needed <= Decimal::ZERO {
                continue;
            }

            // Truncate against both budgets; a spent budget drops the
            // remaining (further-from-top) levels entirely.
            needed = cap_amount(needed, base_budget, Decimal::ONE);
            needed = cap_amount(needed, quote_budget, price);
            needed = self.market.round_amount(needed);
            if needed <= Decimal::ZERO {
                continue;
            }
            charge(&mut base_budget, needed);
            charge(&mut quote_budget, price * needed);

            for chunk in self.chunks(needed) {
                let mut order = Order::limit(self.market.id, price, chunk, side);
                order.render_price(self.market.price_precision);
                creates.push(Action::OrderCreate { order });
            }
        }

        (cancels, creates)
    }

    /// Split an amount into chunks no larger than `max_amount_per_order`,
    /// dropping trailing dust under the market minimum.
    fn chunks(&self, total: Amount) -> Vec<Amount> {
        let mut out = Vec::new();
        match self.opts.max_amount_per_order {
            Some(max) if max > Decimal::ZERO => {
                let mut remaining = total;
                while remaining > max {
                    out.push(max);
                    remaining -= max;
                }
                if self.market.meets_min_amount(remaining) {
                    out.push(remaining);
                }
            }
            _ => {
                if self.market.meets_min_amount(total) {
                    out.push(total);
                }
            }
        }
        out
    }
}

fn snap_to_grid(price: Price, grid: &[Price]) -> Option<Price> {
    grid.iter()
        .min_by_key(|p| (**p - price).abs())
        .copied()
}

fn charge(budget: &mut Option<Decimal>, cost: Decimal) {
    if let Some(remaining) = budget {
        *remaining = (*remaining - cost).max(Decimal::ZERO);
    }
}

fn cap_amount(amount: Amount, budget: Option<Decimal>, unit_cost: Decimal) -> Amount {
    match budget {
        Some(remaining) if unit_cost > Decimal::ZERO => amount.min(remaining / unit_cost),
        _ => amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::MarketModes;
    use crate::types::{AccountId, MarketId, PricePoint};
    use rust_decimal_macros::dec;

    fn market() -> Market {
        Market {
            id: MarketId(0),
            account: AccountId(0),
            symbol: "BTCUSD".into(),
            base: "BTC".into(),
            quote: "USD".into(),
            modes: MarketModes::default(),
            min_amount: dec!(0.01),
            amount_precision: 4,
            price_precision: 2,
        }
    }

    fn resting(id: &str, price: Decimal, amount: Decimal, side: Side) -> Order {
        let mut order = Order::limit(MarketId(0), price, amount, side);
        order.id = Some(id.to_string());
        order
    }

    fn schedule(
        current: &OpenOrders,
        desired: &Orderbook,
        opts: SmartOptions,
    ) -> Vec<Action> {
        let market = market();
        SmartScheduler::new(current, desired, &market, opts).schedule()
    }

    #[test]
    fn aligned_book_yields_no_actions() {
        let mut current = OpenOrders::new();
        current.add(resting("a", dec!(100), dec!(1), Side::Buy));
        current.add(resting("b", dec!(101), dec!(2), Side::Sell));
        let desired = Orderbook::from_levels(
            &[(dec!(100), dec!(1))],
            &[(dec!(101), dec!(2))],
        )
        .unwrap();
        assert!(schedule(&current, &desired, SmartOptions::default()).is_empty());
    }

    #[test]
    fn diff_cancels_then_creates() {
        // current bids {100:1, 99:1}, desired bids {100:1, 98:1}
        // -> cancel bid@99, create bid@98 for 1.
        let mut current = OpenOrders::new();
        current.add(resting("a", dec!(100), dec!(1), Side::Buy));
        current.add(resting("b", dec!(99), dec!(1), Side::Buy));
        let desired = Orderbook::from_levels(
            &[(dec!(100), dec!(1)), (dec!(98), dec!(1))],
            &[],
        )
        .unwrap();
        let actions = schedule(&current, &desired, SmartOptions::default());
        assert_eq!(actions.len(), 2);
        assert_eq!(
            actions[0],
            Action::OrderCancel {
                market: MarketId(0),
                side: Side::Buy,
                order_id: "b".into(),
            }
        );
        match &actions[1] {
            Action::OrderCreate { order } => {
                assert_eq!(order.side, Side::Buy);
                assert_eq!(order.price, dec!(98));
                assert_eq!(order.amount, dec!(1));
            }
            other => panic!("expected create, got {other:?}"),
        }
    }

    #[test]
    fn amount_divergence_beyond_precision_replaces_order() {
        let mut current = OpenOrders::new();
        current.add(resting("a", dec!(100), dec!(1), Side::Buy));
        let desired = Orderbook::from_levels(&[(dec!(100), dec!(1.5))], &[]).unwrap();
        let actions = schedule(&current, &desired, SmartOptions::default());
        assert_eq!(actions.len(), 2);
        assert!(actions[0].is_cancel());
        match &actions[1] {
            Action::OrderCreate { order } => assert_eq!(order.amount, dec!(1.5)),
            other => panic!("expected create, got {other:?}"),
        }
    }

    #[test]
    fn amount_within_precision_is_left_alone() {
        let mut current = OpenOrders::new();
        current.add(resting("a", dec!(100), dec!(1.00005), Side::Buy));
        let desired = Orderbook::from_levels(&[(dec!(100), dec!(1))], &[]).unwrap();
        assert!(schedule(&current, &desired, SmartOptions::default()).is_empty());
    }

    #[test]
    fn off_grid_resting_order_is_divergent() {
        let mut current = OpenOrders::new();
        current.add(resting("a", dec!(99.97), dec!(1), Side::Buy));
        let desired = Orderbook::from_levels(&[(dec!(100), dec!(1))], &[]).unwrap();
        let opts = SmartOptions {
            price_levels: PriceLevels {
                bids: vec![PricePoint::new(dec!(100)), PricePoint::new(dec!(99))],
                asks: vec![],
            },
            ..SmartOptions::default()
        };
        let actions = schedule(&current, &desired, opts);
        // Cancel the off-grid order, recreate on the grid.
        assert_eq!(actions.len(), 2);
        assert!(actions[0].is_cancel());
        match &actions[1] {
            Action::OrderCreate { order } => assert_eq!(order.price, dec!(100)),
            other => panic!("expected create, got {other:?}"),
        }
    }

    #[test]
    fn desired_prices_snap_to_grid() {
        let current = OpenOrders::new();
        let desired = Orderbook::from_levels(&[(dec!(99.98), dec!(1))], &[]).unwrap();
        let opts = SmartOptions {
            price_levels: PriceLevels {
                bids: vec![PricePoint::new(dec!(100)), PricePoint::new(dec!(99))],
                asks: vec![],
            },
            ..SmartOptions::default()
        };
        let actions = schedule(&current, &desired, opts);
        match &actions[0] {
            Action::OrderCreate { order } => {
                assert_eq!(order.price, dec!(100));
                assert_eq!(order.price_s.as_deref(), Some("100.00"));
            }
            other => panic!("expected create, got {other:?}"),
        }
    }

    #[test]
    fn creates_are_chunked_by_max_amount() {
        let current = OpenOrders::new();
        let desired = Orderbook::from_levels(&[], &[(dec!(101), dec!(5))]).unwrap();
        let opts = SmartOptions {
            max_amount_per_order: Some(dec!(2)),
            ..SmartOptions::default()
        };
        let actions = schedule(&current, &desired, opts);
        let amounts: Vec<Decimal> = actions
            .iter()
            .map(|a| match a {
                Action::OrderCreate { order } => order.amount,
                other => panic!("expected create, got {other:?}"),
            })
            .collect();
        assert_eq!(amounts, vec![dec!(2), dec!(2), dec!(1)]);
    }

    #[test]
    fn ask_base_cap_truncates_far_levels() {
        let current = OpenOrders::new();
        let desired = Orderbook::from_levels(
            &[],
            &[
                (dec!(101), dec!(3)),
                (dec!(102), dec!(5)),
                (dec!(103), dec!(4)),
            ],
        )
        .unwrap();
        let opts = SmartOptions {
            limit_asks_base: Some(dec!(6)),
            ..SmartOptions::default()
        };
        let actions = schedule(&current, &desired, opts);
        let levels: Vec<(Decimal, Decimal)> = actions
            .iter()
            .map(|a| match a {
                Action::OrderCreate { order } => (order.price, order.amount),
                other => panic!("expected create, got {other:?}"),
            })
            .collect();
        // Best level intact, boundary truncated, tail dropped.
        assert_eq!(levels, vec![(dec!(101), dec!(3)), (dec!(102), dec!(3))]);
    }

    #[test]
    fn bid_quote_cap_counts_live_orders() {
        let mut current = OpenOrders::new();
        current.add(resting("a", dec!(100), dec!(1), Side::Buy));
        let desired = Orderbook::from_levels(
            &[(dec!(100), dec!(1)), (dec!(99), dec!(2))],
            &[],
        )
        .unwrap();
        let opts = SmartOptions {
            // 100 consumed by the live order, 99 left for the new level.
            limit_bids_quote: Some(dec!(199)),
            ..SmartOptions::default()
        };
        let actions = schedule(&current, &desired, opts);
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            Action::OrderCreate { order } => {
                assert_eq!(order.price, dec!(99));
                assert_eq!(order.amount, dec!(1));
            }
            other => panic!("expected create, got {other:?}"),
        }
    }

    #[test]
    fn ordering_is_cancel_asks_cancel_bids_create_asks_create_bids() {
        let mut current = OpenOrders::new();
        current.add(resting("stale_ask", dec!(105), dec!(1), Side::Sell));
        current.add(resting("stale_bid", dec!(95), dec!(1), Side::Buy));
        let desired = Orderbook::from_levels(
            &[(dec!(100), dec!(1))],
            &[(dec!(101), dec!(1))],
        )
        .unwrap();
        let actions = schedule(&current, &desired, SmartOptions::default());
        let kinds: Vec<(&str, Side)> = actions
            .iter()
            .map(|a| match a {
                Action::OrderCancel { side, .. } => ("cancel", *side),
                Action::OrderCreate { order } => ("create", order.side),
                other => panic!("unexpected action {other:?}"),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("cancel", Side::Sell),
                ("cancel", Side::Buy),
                ("create", Side::Sell),
                ("create", Side::Buy),
            ]
        );
    }

    #[test]
    fn creates_are_best_first() {
        let current = OpenOrders::new();
        let desired = Orderbook::from_levels(
            &[(dec!(99), dec!(1)), (dec!(100), dec!(1))],
            &[(dec!(102), dec!(1)), (dec!(101), dec!(1))],
        )
        .unwrap();
        let actions = schedule(&current, &desired, SmartOptions::default());
        let prices: Vec<Decimal> = actions
            .iter()
            .map(|a| match a {
                Action::OrderCreate { order } => order.price,
                other => panic!("expected create, got {other:?}"),
            })
            .collect();
        assert_eq!(prices, vec![dec!(101), dec!(102), dec!(100), dec!(99)]);
    }

    #[test]
    fn applying_actions_converges_to_desired() {
        let mut current = OpenOrders::new();
        current.add(resting("a", dec!(100), dec!(1), Side::Buy));
        current.add(resting("b", dec!(99), dec!(2), Side::Buy));
        current.add(resting("c", dec!(103), dec!(1), Side::Sell));
        let desired = Orderbook::from_levels(
            &[(dec!(100), dec!(2)), (dec!(98), dec!(1))],
            &[(dec!(101), dec!(1))],
        )
        .unwrap();
        let actions = schedule(&current, &desired, SmartOptions::default());

        // Abstractly apply the plan to the current set.
        let mut next_id = 0;
        for action in &actions {
            match action {
                Action::OrderCancel { side, order_id, .. } => {
                    current.remove(*side, order_id);
                }
                Action::OrderCreate { order } => {
                    let mut order = order.clone();
                    order.id = Some(format!("new{next_id}"));
                    next_id += 1;
                    current.add(order);
                }
                other => panic!("unexpected action {other:?}"),
            }
        }

        let mut result = Orderbook::new();
        for side in [Side::Buy, Side::Sell] {
            for price in current.prices(side) {
                result
                    .update(side, price, current.amount_at(side, price))
                    .unwrap();
            }
        }
        assert_eq!(result, desired);
    }
}
