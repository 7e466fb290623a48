//! Strategy contract shared by the backtest and live agents.
//!
//! A strategy sees the ledger status, the newest closed candle and a window of recent
//! candles, and answers with a list of intents. It never learns which backend runs it.

use serde::{Deserialize, Serialize};
use ta::Next;
use ta::indicators::{MovingAverageConvergenceDivergence, MovingAverageConvergenceDivergenceOutput};

use crate::engine::{Candle, Status};
use crate::errors::{Error, Result};

/// What a strategy wants done with the position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Intent {
    /// Change the size by a signed quantity.
    Open(f64),
    /// Reduce the exposure by a magnitude, or flatten it with `None`.
    Close(Option<f64>),
}

impl Intent {
    pub fn long(quantity: f64) -> Self {
        Self::Open(quantity.abs())
    }

    pub fn short(quantity: f64) -> Self {
        Self::Open(-quantity.abs())
    }

    pub fn close(quantity: f64) -> Self {
        Self::Close(Some(quantity))
    }

    pub fn close_all() -> Self {
        Self::Close(None)
    }
}

/// Signed delta that closes `quantity` of an exposure of `size`, or all of it.
pub(crate) fn close_delta(size: f64, quantity: Option<f64>) -> Result<f64> {
    if size == 0.0 {
        return Err(Error::NoOpenPosition);
    }
    match quantity {
        None => Ok(-size),
        Some(q) if q.is_finite() && q > 0.0 => Ok(-size.signum() * q),
        Some(q) => Err(Error::InvalidQuantity(q)),
    }
}

/// Called once per closed candle by either agent.
pub trait Strategy {
    /// ### Arguments
    /// * `status` - Ledger snapshot valued at `candle`'s close.
    /// * `candle` - The newest closed candle.
    /// * `window` - Recent candles, oldest first, ending with `candle`.
    fn on_candle(&mut self, status: &Status, candle: &Candle, window: &[Candle]) -> Result<Vec<Intent>>;
}

impl<F> Strategy for F
where
    F: FnMut(&Status, &Candle, &[Candle]) -> Result<Vec<Intent>>,
{
    fn on_candle(&mut self, status: &Status, candle: &Candle, window: &[Candle]) -> Result<Vec<Intent>> {
        self(status, candle, window)
    }
}

/// MACD histogram crossover.
///
/// Crossing above zero closes a short and opens a long; crossing below zero closes a long
/// and opens a short when `allow_short` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacdCross {
    pub fast_period: usize,
    pub slow_period: usize,
    pub signal_period: usize,
    /// Fixed order size; `None` sizes from the available capital.
    pub quantity: Option<f64>,
    pub allow_short: bool,
}

impl Default for MacdCross {
    fn default() -> Self {
        Self {
            fast_period: 12,
            slow_period: 26,
            signal_period: 9,
            quantity: None,
            allow_short: false,
        }
    }
}

impl MacdCross {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Result<Self> {
        // surfaces invalid periods at construction instead of on the first candle
        MovingAverageConvergenceDivergence::new(fast_period, slow_period, signal_period)
            .map_err(|e| Error::Msg(e.to_string()))?;
        Ok(Self {
            fast_period,
            slow_period,
            signal_period,
            ..Self::default()
        })
    }

    pub fn with_quantity(mut self, quantity: Option<f64>) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_short(mut self, allow_short: bool) -> Self {
        self.allow_short = allow_short;
        self
    }

    /// Histograms of the last two candles of `window`.
    fn histograms(&self, window: &[Candle]) -> Result<Option<(f64, f64)>> {
        if window.len() < 2 {
            return Ok(None);
        }
        let mut macd = MovingAverageConvergenceDivergence::new(self.fast_period, self.slow_period, self.signal_period)
            .map_err(|e| Error::Msg(e.to_string()))?;

        let mut previous = 0.0;
        let mut current = 0.0;
        for candle in window {
            let MovingAverageConvergenceDivergenceOutput { histogram, .. } = macd.next(candle.close());
            previous = current;
            current = histogram;
        }
        Ok(Some((previous, current)))
    }

    fn size(&self, status: &Status, price: f64, after_close: bool) -> f64 {
        match self.quantity {
            Some(quantity) => quantity,
            // closing first frees the margin held by the current exposure
            None if after_close => status.equity.max(0.0) * status.leverage / price,
            None => status.max_quantity(price),
        }
    }
}

impl Strategy for MacdCross {
    fn on_candle(&mut self, status: &Status, candle: &Candle, window: &[Candle]) -> Result<Vec<Intent>> {
        let Some((previous, current)) = self.histograms(window)? else {
            return Ok(Vec::new());
        };
        let size = status.position.size();
        let price = candle.close();
        let mut intents = Vec::new();

        if previous <= 0.0 && current > 0.0 {
            if size < 0.0 {
                intents.push(Intent::close_all());
            }
            if size <= 0.0 {
                let quantity = self.size(status, price, size < 0.0);
                if quantity > 0.0 {
                    intents.push(Intent::long(quantity));
                }
            }
        } else if previous >= 0.0 && current < 0.0 {
            if size > 0.0 {
                intents.push(Intent::close_all());
            }
            if self.allow_short && size >= 0.0 {
                let quantity = self.size(status, price, size > 0.0);
                if quantity > 0.0 {
                    intents.push(Intent::short(quantity));
                }
            }
        }

        Ok(intents)
    }
}
