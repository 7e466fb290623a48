use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Quantity and price increments accepted by an exchange for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolPrecision {
    pub quantity_decimals: u32,
    pub price_decimals: u32,
}

impl Default for SymbolPrecision {
    fn default() -> Self {
        Self {
            quantity_decimals: 3,
            price_decimals: 2,
        }
    }
}

impl SymbolPrecision {
    pub fn new(quantity_decimals: u32, price_decimals: u32) -> Self {
        Self {
            quantity_decimals,
            price_decimals,
        }
    }

    /// Truncates a signed quantity toward zero at the quantity precision.
    ///
    /// ### Returns
    /// `Error::InvalidQuantity` for zero or non-finite input,
    /// `Error::PrecisionMismatch` when the result would be zero.
    ///
    /// ### Example
    /// ```
    /// use trade_agent::engine::SymbolPrecision;
    ///
    /// let precision = SymbolPrecision::new(3, 2);
    /// assert_eq!(precision.round_quantity(0.12345).unwrap(), 0.123);
    /// assert!(precision.round_quantity(0.0001).is_err());
    /// ```
    pub fn round_quantity(&self, quantity: f64) -> Result<f64> {
        if !quantity.is_finite() || quantity == 0.0 {
            return Err(Error::InvalidQuantity(quantity));
        }
        let factor = 10f64.powi(self.quantity_decimals as i32);
        // the nudge absorbs binary noise such as 0.3 * 1000 = 299.99999999999994
        let steps = (quantity.abs() * factor + 1e-9).floor();
        if steps == 0.0 {
            return Err(Error::PrecisionMismatch {
                quantity,
                decimals: self.quantity_decimals,
            });
        }
        Ok(quantity.signum() * steps / factor)
    }

    /// Rounds a price to the nearest price increment.
    pub fn round_price(&self, price: f64) -> Result<f64> {
        if !price.is_finite() || price <= 0.0 {
            return Err(Error::InvalidPrice(price));
        }
        let factor = 10f64.powi(self.price_decimals as i32);
        let rounded = (price * factor).round() / factor;
        if rounded <= 0.0 {
            return Err(Error::InvalidPrice(price));
        }
        Ok(rounded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_quantity() {
        let precision = SymbolPrecision::new(3, 2);
        assert_eq!(precision.round_quantity(0.12345).unwrap(), 0.123);
        assert_eq!(precision.round_quantity(-0.12399).unwrap(), -0.123);
        assert_eq!(precision.round_quantity(0.3).unwrap(), 0.3);
        assert_eq!(precision.round_quantity(2.0).unwrap(), 2.0);
    }

    #[test]
    fn below_increment_is_mismatch() {
        let precision = SymbolPrecision::new(3, 2);
        assert!(matches!(
            precision.round_quantity(0.0001),
            Err(Error::PrecisionMismatch { decimals: 3, .. })
        ));
    }

    #[test]
    fn zero_or_nan_quantity_is_invalid() {
        let precision = SymbolPrecision::default();
        assert!(matches!(precision.round_quantity(0.0), Err(Error::InvalidQuantity(_))));
        assert!(matches!(precision.round_quantity(f64::NAN), Err(Error::InvalidQuantity(_))));
    }

    #[test]
    fn rounds_price_to_nearest() {
        let precision = SymbolPrecision::new(3, 2);
        assert_eq!(precision.round_price(101.236).unwrap(), 101.24);
        assert_eq!(precision.round_price(101.234).unwrap(), 101.23);
        assert!(matches!(precision.round_price(-1.0), Err(Error::InvalidPrice(_))));
        assert!(matches!(precision.round_price(0.001), Err(Error::InvalidPrice(_))));
    }
}
