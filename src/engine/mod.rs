//! Core trading engine components.
//!
//! This module provides the fundamental types shared by both backends:
//! - `Candle`: OHLCV data and the supported intervals.
//! - `Position`: Net signed exposure in one symbol.
//! - `Trade`: Append-only record of every fill.
//! - `Wallet`: Capital and leverage.
//! - `SymbolPrecision`: Exchange rounding rules.
//! - `PositionLedger`: The single writer of position state.
//! - `BacktestEngine`: Deterministic replay of candles through a strategy.

mod backtest;
mod candle;
mod ledger;
mod position;
mod precision;
mod trade;
mod wallet;

pub use backtest::*;
pub use candle::*;
pub use ledger::*;
pub use position::*;
pub use precision::*;
pub use trade::*;
pub use wallet::*;
