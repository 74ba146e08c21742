// src/actions.rs
//
// Scheduler output: intents the executor converts into exchange requests.

use serde::{Deserialize, Serialize};

use crate::types::{MarketId, Order, Price, Side};

/// One scheduled intent. Ordering within a batch is significant: the
/// scheduler emits cancels before creates so freed balance can back the
/// new orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    /// Place a new order.
    OrderCreate { order: Order },
    /// Cancel one resting order by exchange id.
    OrderCancel {
        market: MarketId,
        side: Side,
        order_id: String,
    },
    /// Cancel every resting order at one (side, price) slot.
    OrderStop {
        market: MarketId,
        side: Side,
        price: Price,
    },
    /// Flush a whole side, or the whole market when `side` is None.
    OrderStopAll {
        market: MarketId,
        side: Option<Side>,
    },
}

impl Action {
    pub fn market(&self) -> MarketId {
        match self {
            Action::OrderCreate { order } => order.market,
            Action::OrderCancel { market, .. }
            | Action::OrderStop { market, .. }
            | Action::OrderStopAll { market, .. } => *market,
        }
    }

    /// Stable label for logs and metric dimensions.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Action::OrderCreate { .. } => "order_create",
            Action::OrderCancel { .. } => "order_cancel",
            Action::OrderStop { .. } => "order_stop",
            Action::OrderStopAll { .. } => "order_stop_all",
        }
    }

    pub fn is_cancel(&self) -> bool {
        !matches!(self, Action::OrderCreate { .. })
    }
}
