// src/fx.rs
//
// FX conversion seam. A provider produces a quote/quote rate; the
// strategy multiplies desired target prices by it and the order-back
// path divides hedge prices back into the source currency. A provider
// that has not produced a rate yet makes dependent work reschedule.

use std::sync::{Arc, Mutex};

use rust_decimal::Decimal;

use crate::errors::{EngineError, EngineResult};
use crate::orderbook::Orderbook;
use crate::strategy::PriceLevels;
use crate::types::PricePoint;

pub trait Fx: Send + Sync {
    /// Current conversion rate, None until the provider has produced one.
    fn rate(&self) -> Option<Decimal>;

    /// Convert a desired book and its price grids into the target
    /// currency. Fails with `FxUnavailable` until a rate exists.
    fn apply(
        &self,
        book: &Orderbook,
        levels: &PriceLevels,
    ) -> EngineResult<(Orderbook, PriceLevels)> {
        let rate = self.rate().ok_or(EngineError::FxUnavailable)?;
        let mut converted = Orderbook::new();
        for (price, amount) in book.bids_desc() {
            converted.update(crate::types::Side::Buy, price * rate, amount)?;
        }
        for (price, amount) in book.asks_asc() {
            converted.update(crate::types::Side::Sell, price * rate, amount)?;
        }
        let scale = |points: &[PricePoint]| {
            points
                .iter()
                .map(|p| PricePoint::new(p.price * rate))
                .collect()
        };
        Ok((
            converted,
            PriceLevels {
                bids: scale(&levels.bids),
                asks: scale(&levels.asks),
            },
        ))
    }
}

/// Rate holder fed by an external provider task. Doubles as a static
/// rate when constructed with one.
#[derive(Debug, Clone, Default)]
pub struct SharedFxRate {
    rate: Arc<Mutex<Option<Decimal>>>,
}

impl SharedFxRate {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn fixed(rate: Decimal) -> Self {
        let holder = Self::default();
        holder.set_rate(rate);
        holder
    }

    pub fn set_rate(&self, rate: Decimal) {
        *self.rate.lock().expect("fx rate lock") = Some(rate);
    }
}

impl Fx for SharedFxRate {
    fn rate(&self) -> Option<Decimal> {
        *self.rate.lock().expect("fx rate lock")
    }
}
