use serde::{Deserialize, Serialize};

/// Sizes closer to zero than this are treated as flat.
pub(crate) const FLAT_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

/// Net exposure in one symbol. `size > 0` is long, `size < 0` is short, `0` is flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    symbol: String,
    size: f64,
    entry_price: Option<f64>,
    realized_pnl: f64,
}

impl Position {
    /// A flat position.
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            size: 0.0,
            entry_price: None,
            realized_pnl: 0.0,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    /// Size-weighted average entry; `None` while flat.
    pub fn entry_price(&self) -> Option<f64> {
        self.entry_price
    }

    /// Cumulative PnL locked in by closed portions.
    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn is_flat(&self) -> bool {
        self.size == 0.0
    }

    pub fn side(&self) -> Option<PositionSide> {
        if self.size > 0.0 {
            Some(PositionSide::Long)
        } else if self.size < 0.0 {
            Some(PositionSide::Short)
        } else {
            None
        }
    }

    /// Estimates the open exposure's PnL at `mark_price`.
    pub fn unrealized_pnl(&self, mark_price: f64) -> f64 {
        match self.entry_price {
            Some(entry) => self.size * (mark_price - entry),
            None => 0.0,
        }
    }

    /// Applies a signed size change at `price` and returns the realized PnL of the closed portion.
    ///
    /// Callers validate `delta` and `price` beforehand; only the ledger calls this.
    pub(crate) fn apply(&mut self, delta: f64, price: f64) -> f64 {
        let old = self.size;
        let mut new = old + delta;
        if new.abs() < FLAT_EPSILON {
            new = 0.0;
        }

        let mut realized = 0.0;
        if old == 0.0 {
            self.entry_price = Some(price);
        } else {
            let entry = self.entry_price.unwrap_or(price);
            if old.signum() == delta.signum() {
                self.entry_price = Some((entry * old.abs() + price * delta.abs()) / new.abs());
            } else {
                let closed = delta.abs().min(old.abs());
                realized = closed * (price - entry) * old.signum();
                if new == 0.0 {
                    self.entry_price = None;
                } else if new.signum() != old.signum() {
                    // flipped through zero, the remainder opens at the fill price
                    self.entry_price = Some(price);
                } else {
                    self.entry_price = Some(entry);
                }
            }
        }

        self.size = new;
        self.realized_pnl += realized;
        realized
    }

    /// Overwrites size and entry with an externally reported state.
    pub(crate) fn overwrite(&mut self, size: f64, entry_price: Option<f64>) {
        if size.abs() < FLAT_EPSILON {
            self.size = 0.0;
            self.entry_price = None;
        } else {
            self.size = size;
            self.entry_price = entry_price;
        }
    }
}
