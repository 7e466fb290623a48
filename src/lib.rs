//! # Trade Agent: one strategy, backtested or live
//!
//! **Trade Agent** runs a single trading strategy either against historical candles or
//! against a live futures account, with the same position accounting in both cases.
//! A strategy that behaves a certain way in a backtest behaves the same way live.
//!
//! ## Core Components
//! | Component            | Description                                                                          |
//! |----------------------|--------------------------------------------------------------------------------------|
//! | **`Candle`**         | OHLCV bar with open and close times.                                                 |
//! | **`PositionLedger`** | Signed net position, entry price, realized P&L and the ordered trade history.        |
//! | **`BacktestEngine`** | Replays candles through a strategy, filling at each candle's close.                  |
//! | **`TradingAgent`**   | Drives the same strategy against an `ExchangeApi`, one tick per closed bar.          |
//! | **`Agent`**          | Picks one of the two backends at startup and exposes their shared contract.          |
//! | **`Metrics`**        | Win rate, profit factor, drawdown and returns computed from a trade history.         |
//! | **`Notifier`**       | Best-effort operator messages (fills, errors, periodic reports).                     |
//!
//! ## Position semantics
//! - Positive sizes are long, negative sizes are short.
//! - Growing the exposure averages the entry price.
//! - Reducing it realizes `closed * (price - entry) * sign`.
//! - Crossing zero reopens the remainder at the fill price.
//! - Quantities are truncated to the symbol's precision before any order; a quantity
//!   that truncates to zero is rejected without contacting anyone.
//!
//! ## Running a backtest
//! ```rust
//! use trade_agent::prelude::*;
//! use trade_agent::utils::generate_sample_candles;
//!
//! let candles = generate_sample_candles(200, 42, 100.0);
//! let config = BacktestConfig::new("BTCUSDT", Interval::H1).initial_capital(10_000.0);
//! let mut engine = BacktestEngine::new(config, candles).unwrap();
//!
//! let mut strategy = MacdCross::default().with_quantity(Some(1.0));
//! engine.run(&mut strategy).unwrap();
//!
//! let metrics = engine.analyze();
//! assert_eq!(metrics.trade_count(), engine.trades().len());
//! println!("{metrics}");
//! ```
//!
//! ### Output:
//! ```bash
//! === BTCUSDT Strategy Report ===
//! Initial Capital: 10000.00
//! Final Capital: 10012.41
//! Profit & Loss (P&L): 12.41
//! Earn Rate: 0.12%
//! Origin Increase Rate: 98.71%
//! ...
//! ```
//!
//! ## Features
//! | Feature       | Description                                                                    |
//! |---------------|--------------------------------------------------------------------------------|
//! | `optimizer`   | Parallel parameter sweeps with [`rayon`](https://crates.io/crates/rayon).      |
//! | `draws`       | Charts of a finished backtest with [`plotters`](https://crates.io/crates/plotters). |
//!
//! ## Error Handling
//! Every fallible call returns [`errors::Result`]. Validation failures
//! (`InvalidQuantity`, `NoOpenPosition`, `PrecisionMismatch`) happen before any state
//! change or network request; exchange failures arrive as `Error::Exchange`.

/// Candles, positions, trades, the ledger and the backtest engine.
pub mod engine;

/// Error types for the library.
pub mod errors;

/// Performance metrics: P&L, drawdown, win rate, profit factor.
pub mod metrics;

/// The strategy contract and the built-in MACD strategy.
pub mod strategy;

/// Exchange capability and the Binance futures client.
pub mod exchange;

/// Operator notifications.
pub mod notify;

/// The live trading agent.
pub mod live;

/// Backend dispatch between backtest and live.
pub mod agent;

/// Credentials from the environment.
pub mod config;

/// Candle loading, sample data and logging setup.
pub mod utils;

/// Strategy parameter optimization.
#[cfg(feature = "optimizer")]
pub mod optimizer;

/// Charts of backtest results.
#[cfg(feature = "draws")]
pub mod draws;

#[cfg(test)]
mod testing;

/// Re-exports of commonly used types and traits for convenience.
pub mod prelude {
    pub use crate::agent::*;
    pub use crate::engine::*;
    pub use crate::errors::*;
    pub use crate::exchange::{ExchangeApi, ExchangeError, FillResult, RetryPolicy};
    pub use crate::live::*;
    pub use crate::metrics::*;
    pub use crate::notify::{Notifier, NotifyHandle};
    pub use crate::strategy::*;

    #[cfg(feature = "optimizer")]
    pub use crate::optimizer::*;

    #[cfg(feature = "draws")]
    pub use crate::draws::*;
}
