// src/aggregate.rs
//
// Quantisation of a source order book onto externally supplied price
// grids. Each grid point keeps the source levels that fed it, so the
// order-back path can recover the average source price and the original
// source volume behind a filled quote.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::orderbook::Orderbook;
use crate::types::{Amount, Price, PricePoint, Side};

/// One grid bucket: the point it quotes at, the aggregated amount, and
/// the `(source_price, source_amount)` provenance that filled it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedLevel {
    pub point: Price,
    pub amount: Amount,
    pub sources: Vec<(Price, Amount)>,
}

impl AggregatedLevel {
    fn empty(point: Price) -> Self {
        Self {
            point,
            amount: Decimal::ZERO,
            sources: Vec::new(),
        }
    }

    fn push_source(&mut self, price: Price, amount: Amount) {
        self.amount += amount;
        self.sources.push((price, amount));
    }

    /// Volume-weighted average price of the source liquidity behind the
    /// bucket. `None` for an empty bucket.
    pub fn weighted_source_price(&self) -> Option<Price> {
        if self.amount.is_zero() {
            return None;
        }
        let notional: Decimal = self.sources.iter().map(|(p, a)| *p * *a).sum();
        Some(notional / self.amount)
    }
}

/// An orderbook quantised onto price-point grids, best level first on
/// each side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedOrderbook {
    pub bids: Vec<AggregatedLevel>,
    pub asks: Vec<AggregatedLevel>,
}

impl AggregatedOrderbook {
    pub fn side_levels(&self, side: Side) -> &[AggregatedLevel] {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    /// Total bijection back to the plain book shape (empty buckets drop).
    pub fn to_ob(&self) -> Orderbook {
        let mut book = Orderbook::new();
        for level in &self.bids {
            if level.amount > Decimal::ZERO {
                // Points come from a validated grid; crossing cannot occur.
                let _ = book.update(Side::Buy, level.point, level.amount);
            }
        }
        for level in &self.asks {
            if level.amount > Decimal::ZERO {
                let _ = book.update(Side::Sell, level.point, level.amount);
            }
        }
        book
    }

    fn drop_below(mut self, min_amount: Amount) -> Self {
        // A zero floor keeps empty buckets: callers inspecting the raw
        // quantisation see which grid points attracted no liquidity.
        if min_amount.is_zero() {
            return self;
        }
        self.bids.retain(|l| l.amount >= min_amount);
        self.asks.retain(|l| l.amount >= min_amount);
        self
    }
}

impl Orderbook {
    /// Aggregate both sides onto the given price grids, dropping buckets
    /// whose amount ends up below `min_amount`.
    ///
    /// Each source level is assigned to the nearest price point that is
    /// not better than it: for bids the highest point at or below the
    /// source price, for asks the lowest point at or above it. Source
    /// liquidity better than the best grid point folds into that point;
    /// liquidity worse than the whole grid is dropped.
    pub fn aggregate(
        &self,
        bid_points: &[PricePoint],
        ask_points: &[PricePoint],
        min_amount: Amount,
    ) -> AggregatedOrderbook {
        self.aggregate_with_capacity(bid_points, ask_points, min_amount, None)
    }

    /// `aggregate` with a uniform per-point capacity. When a source level
    /// exceeds the remaining capacity of its point, the overflow carries
    /// over to subsequent (worse) points until exhausted or the grid runs
    /// out.
    pub fn aggregate_with_capacity(
        &self,
        bid_points: &[PricePoint],
        ask_points: &[PricePoint],
        min_amount: Amount,
        point_capacity: Option<Amount>,
    ) -> AggregatedOrderbook {
        let bids = aggregate_side(
            &self.side_levels(Side::Buy),
            bid_points,
            Side::Buy,
            point_capacity,
        );
        let asks = aggregate_side(
            &self.side_levels(Side::Sell),
            ask_points,
            Side::Sell,
            point_capacity,
        );
        AggregatedOrderbook { bids, asks }.drop_below(min_amount)
    }
}

/// Deduplicate and order a grid best-first: descending for bids,
/// ascending for asks.
fn normalize_points(points: &[PricePoint], side: Side) -> Vec<Price> {
    let mut prices: Vec<Price> = points.iter().map(|p| p.price).collect();
    prices.sort();
    prices.dedup();
    if side == Side::Buy {
        prices.reverse();
    }
    prices
}

/// True when `point` must not take liquidity from `source`: a bid point
/// above the source price (we would overbid the hedge), or an ask point
/// below it.
fn point_better_than_source(side: Side, point: Price, source: Price) -> bool {
    match side {
        Side::Buy => point > source,
        Side::Sell => point < source,
    }
}

fn aggregate_side(
    levels: &[(Price, Amount)],
    points: &[PricePoint],
    side: Side,
    point_capacity: Option<Amount>,
) -> Vec<AggregatedLevel> {
    let grid = normalize_points(points, side);
    let mut out: Vec<AggregatedLevel> = grid.iter().map(|p| AggregatedLevel::empty(*p)).collect();
    if out.is_empty() {
        return out;
    }

    // Cursor over the grid; levels and grid are both best-first, so the
    // cursor only ever advances.
    let mut cursor = 0usize;
    for &(source_price, source_amount) in levels {
        while cursor < out.len() && point_better_than_source(side, out[cursor].point, source_price)
        {
            cursor += 1;
        }
        if cursor >= out.len() {
            break;
        }
        let mut remaining = source_amount;
        let mut slot = cursor;
        while remaining > Decimal::ZERO && slot < out.len() {
            let taken = match point_capacity {
                Some(cap) => {
                    let free = (cap - out[slot].amount).max(Decimal::ZERO);
                    remaining.min(free)
                }
                None => remaining,
            };
            if taken > Decimal::ZERO {
                out[slot].push_source(source_price, taken);
                remaining -= taken;
            }
            if remaining > Decimal::ZERO {
                slot += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn points(prices: &[Decimal]) -> Vec<PricePoint> {
        prices.iter().map(|p| PricePoint::new(*p)).collect()
    }

    fn source_bids() -> Orderbook {
        Orderbook::from_levels(
            &[
                (dec!(100), dec!(1)),
                (dec!(99), dec!(2)),
                (dec!(98), dec!(5)),
            ],
            &[],
        )
        .unwrap()
    }

    #[test]
    fn bids_assign_to_nearest_not_better_point() {
        // Source bids [(100,1),(99,2),(98,5)] on grid [100, 99.5, 99, 98]:
        // {100:1, 99.5:0, 99:2, 98:5}.
        let agg = source_bids().aggregate(
            &points(&[dec!(100), dec!(99.5), dec!(99), dec!(98)]),
            &[],
            dec!(0),
        );
        let amounts: Vec<(Decimal, Decimal)> =
            agg.bids.iter().map(|l| (l.point, l.amount)).collect();
        assert_eq!(
            amounts,
            vec![
                (dec!(100), dec!(1)),
                (dec!(99.5), dec!(0)),
                (dec!(99), dec!(2)),
                (dec!(98), dec!(5)),
            ]
        );
    }

    #[test]
    fn min_amount_drops_sparse_points() {
        let agg = source_bids().aggregate(
            &points(&[dec!(100), dec!(99.5), dec!(99), dec!(98)]),
            &[],
            dec!(0.5),
        );
        let amounts: Vec<(Decimal, Decimal)> =
            agg.bids.iter().map(|l| (l.point, l.amount)).collect();
        assert_eq!(
            amounts,
            vec![
                (dec!(100), dec!(1)),
                (dec!(99), dec!(2)),
                (dec!(98), dec!(5)),
            ]
        );
    }

    #[test]
    fn asks_assign_to_lowest_point_at_or_above() {
        let book = Orderbook::from_levels(
            &[],
            &[(dec!(100.2), dec!(1)), (dec!(101), dec!(3))],
        )
        .unwrap();
        let agg = book.aggregate(&[], &points(&[dec!(100.5), dec!(101)]), dec!(0));
        let amounts: Vec<(Decimal, Decimal)> =
            agg.asks.iter().map(|l| (l.point, l.amount)).collect();
        assert_eq!(amounts, vec![(dec!(100.5), dec!(1)), (dec!(101), dec!(3))]);
    }

    #[test]
    fn liquidity_worse_than_grid_is_dropped() {
        let agg = source_bids().aggregate(&points(&[dec!(100), dec!(99)]), &[], dec!(0));
        // Level at 98 has no point at or below 99 left in the grid.
        let total: Decimal = agg.bids.iter().map(|l| l.amount).sum();
        assert_eq!(total, dec!(3));
    }

    #[test]
    fn duplicate_points_are_merged() {
        let agg = source_bids().aggregate(
            &points(&[dec!(100), dec!(100), dec!(99)]),
            &[],
            dec!(0),
        );
        assert_eq!(agg.bids.len(), 2);
    }

    #[test]
    fn capacity_overflow_carries_to_worse_points() {
        let book = Orderbook::from_levels(&[(dec!(100), dec!(5))], &[]).unwrap();
        let agg = book.aggregate_with_capacity(
            &points(&[dec!(100), dec!(99), dec!(98)]),
            &[],
            dec!(0),
            Some(dec!(2)),
        );
        let amounts: Vec<(Decimal, Decimal)> =
            agg.bids.iter().map(|l| (l.point, l.amount)).collect();
        assert_eq!(
            amounts,
            vec![
                (dec!(100), dec!(2)),
                (dec!(99), dec!(2)),
                (dec!(98), dec!(1)),
            ]
        );
    }

    #[test]
    fn provenance_records_source_levels() {
        let book = Orderbook::from_levels(
            &[(dec!(100), dec!(1)), (dec!(99.8), dec!(3))],
            &[],
        )
        .unwrap();
        let agg = book.aggregate(&points(&[dec!(99.5)]), &[], dec!(0));
        let bucket = &agg.bids[0];
        assert_eq!(bucket.amount, dec!(4));
        assert_eq!(
            bucket.sources,
            vec![(dec!(100), dec!(1)), (dec!(99.8), dec!(3))]
        );
        // (100*1 + 99.8*3) / 4 = 99.85
        assert_eq!(bucket.weighted_source_price(), Some(dec!(99.85)));
    }

    #[test]
    fn aggregation_is_idempotent_on_its_own_grid() {
        let grid_b = points(&[dec!(100), dec!(99.5), dec!(99), dec!(98)]);
        let agg1 = source_bids().aggregate(&grid_b, &[], dec!(0));
        let agg2 = agg1.to_ob().aggregate(&grid_b, &[], dec!(0));
        assert_eq!(agg1.to_ob(), agg2.to_ob());
    }
}
