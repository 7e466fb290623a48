use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Capital backing one ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    // Capital at ledger creation
    initial_balance: f64,
    // Initial balance plus realized P&L
    balance: f64,
    leverage: f64,
}

impl Wallet {
    /// Creates a new wallet.
    ///
    /// ### Arguments
    /// * `balance` - Starting capital, must be positive.
    /// * `leverage` - Margin multiplier, must be positive and finite.
    pub fn new(balance: f64, leverage: f64) -> Result<Self> {
        if !balance.is_finite() || balance <= 0.0 {
            return Err(Error::NegZeroBalance(balance));
        }
        if !leverage.is_finite() || leverage <= 0.0 {
            return Err(Error::NegZeroLeverage(leverage));
        }

        Ok(Self {
            initial_balance: balance,
            balance,
            leverage,
        })
    }

    pub fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    /// Returns the balance (initial capital plus realized P&L).
    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn leverage(&self) -> f64 {
        self.leverage
    }

    /// Margin held by an exposure of `notional`.
    pub fn margin_for(&self, notional: f64) -> f64 {
        notional.abs() / self.leverage
    }

    /// Returns the free balance once `margin` is held.
    pub fn free_balance(&self, margin: f64) -> f64 {
        (self.balance - margin).max(0.0)
    }

    /// Books realized P&L.
    pub(crate) fn add_pnl(&mut self, pnl: f64) {
        self.balance += pnl;
    }
}

#[cfg(test)]
#[test]
fn new_wallet_valid_balance() {
    let wallet = Wallet::new(100.0, 2.0).unwrap();
    assert_eq!(wallet.balance(), 100.0);
    assert_eq!(wallet.initial_balance(), 100.0);
    assert_eq!(wallet.leverage(), 2.0);
    assert_eq!(wallet.free_balance(0.0), 100.0);
}

#[cfg(test)]
#[test]
fn new_wallet_invalid_balance() {
    let result = Wallet::new(0.0, 1.0);
    assert!(matches!(result, Err(Error::NegZeroBalance(_))));

    let result = Wallet::new(-10.0, 1.0);
    assert!(matches!(result, Err(Error::NegZeroBalance(_))));
}

#[cfg(test)]
#[test]
fn new_wallet_invalid_leverage() {
    let result = Wallet::new(100.0, 0.0);
    assert!(matches!(result, Err(Error::NegZeroLeverage(_))));

    let result = Wallet::new(100.0, f64::NAN);
    assert!(matches!(result, Err(Error::NegZeroLeverage(_))));
}

#[cfg(test)]
#[test]
fn margin_and_free_balance() {
    let mut wallet = Wallet::new(1_000.0, 5.0).unwrap();
    let margin = wallet.margin_for(-2.0 * 1_000.0);
    assert_eq!(margin, 400.0);
    assert_eq!(wallet.free_balance(margin), 600.0);

    // loss
    wallet.add_pnl(-700.0);
    assert_eq!(wallet.balance(), 300.0);
    assert_eq!(wallet.free_balance(margin), 0.0);
}
