// src/limits.rs
//
// Balance-limit plugins: pure functions from an order book plus a
// balance snapshot to per-side quoting limits. The strategy feeds these
// into Orderbook::adjust_volume_simple.

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::orderbook::Orderbook;
use crate::types::{Balance, Price, Side};

/// What one account allows the engine to quote: the top of the book it
/// sees and how much base/quote is free to commit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SideLimits {
    pub top_bid_price: Option<Price>,
    pub top_ask_price: Option<Price>,
    pub limit_in_base: Option<Decimal>,
    pub limit_in_quote: Option<Decimal>,
}

/// Standard plugin: free balances bound the quoting volume, the book
/// supplies the top of both sides.
pub fn balance_limits(
    orderbook: &Orderbook,
    balances: &HashMap<String, Balance>,
    base: &str,
    quote: &str,
) -> SideLimits {
    SideLimits {
        top_bid_price: orderbook.best(Side::Buy).map(|(price, _)| price),
        top_ask_price: orderbook.best(Side::Sell).map(|(price, _)| price),
        limit_in_base: balances.get(base).map(|b| b.free),
        limit_in_quote: balances.get(quote).map(|b| b.free),
    }
}
