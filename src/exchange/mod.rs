//! Exchange capability consumed by the live agent.
//!
//! The agent only speaks to `ExchangeApi`; `BinanceFutures` is one implementation.
//! New venues plug in by implementing the trait.

mod binance;
mod error;
mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{Candle, Interval, SymbolPrecision};

pub use binance::*;
pub use error::*;
pub use retry::*;

/// Confirmed execution of a market order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillResult {
    pub order_id: String,
    /// Signed executed quantity.
    pub executed_quantity: f64,
    pub average_price: f64,
    pub timestamp: DateTime<Utc>,
}

/// One asset of the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub balance: f64,
    pub available: f64,
}

/// Position as the exchange reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    /// Signed size; zero when flat.
    pub size: f64,
    pub entry_price: Option<f64>,
}

/// What the live agent needs from an exchange.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Executes a market order for the signed `quantity` (positive buys, negative sells).
    async fn place_market_order(&self, symbol: &str, quantity: f64) -> Result<FillResult, ExchangeError>;

    /// Candles of the last `days` at `interval`, oldest first. The newest one may still be open.
    async fn fetch_historical_data(
        &self,
        symbol: &str,
        interval: Interval,
        days: u32,
    ) -> Result<Vec<Candle>, ExchangeError>;

    async fn get_symbol_precision(&self, symbol: &str) -> Result<SymbolPrecision, ExchangeError>;

    async fn check_account_balance(&self) -> Result<Vec<Balance>, ExchangeError>;

    /// Current position in `symbol`, or `None` when the exchange cannot report it.
    async fn position(&self, _symbol: &str) -> Result<Option<ExchangePosition>, ExchangeError> {
        Ok(None)
    }

    /// Account setup before trading `symbol` (leverage, margin mode).
    async fn prepare_symbol(&self, _symbol: &str, _leverage: f64) -> Result<(), ExchangeError> {
        Ok(())
    }
}
