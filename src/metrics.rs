//! Performance metrics over a trade history.
//!
//! This module provides tools to calculate:
//! - Total return and final capital
//! - Max drawdown
//! - Profit factor and risk/reward
//! - Win rate
//! - Sharpe ratio
//!
//! `Metrics` is a pure function of the trades and the starting capital: the backtest and
//! live agents build it the same way, and the same history always gives the same report.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::{Candle, Trade, TradeKind};

/// Performance report of one ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    symbol: String,
    initial_capital: f64,
    final_capital: f64,
    total_pnl: f64,
    total_return: f64,
    trade_count: usize,
    closing_trades: usize,
    wins: usize,
    losses: usize,
    win_rate: f64,
    profit_factor: f64,
    risk_reward: f64,
    max_win: f64,
    max_loss: f64,
    max_drawdown: f64,
    max_drawdown_pct: f64,
    benchmark_return: Option<f64>,
    // balance after each trade, oldest first
    balances: Vec<f64>,
}

impl Metrics {
    /// Computes the metrics of `trades`.
    ///
    /// ### Arguments
    /// * `symbol` - Instrument the trades belong to.
    /// * `trades` - Trade history, oldest first.
    /// * `initial_capital` - Capital before the first trade.
    pub fn from_trades(symbol: impl Into<String>, trades: &[Trade], initial_capital: f64) -> Self {
        let mut balances = Vec::with_capacity(trades.len());
        let mut cumulative = 0.0;
        let mut peak_pnl = 0.0_f64;
        let mut peak_balance = initial_capital;
        let mut max_drawdown = 0.0_f64;
        let mut max_drawdown_pct = 0.0_f64;

        for trade in trades {
            cumulative += trade.realized_pnl();
            let balance = initial_capital + cumulative;
            balances.push(balance);

            peak_pnl = peak_pnl.max(cumulative);
            max_drawdown = max_drawdown.max(peak_pnl - cumulative);

            peak_balance = peak_balance.max(balance);
            if peak_balance > 0.0 {
                max_drawdown_pct = max_drawdown_pct.max((peak_balance - balance) / peak_balance * 100.0);
            }
        }

        let closed = trades
            .iter()
            .filter(|t| t.kind() == TradeKind::Fill && t.is_closing())
            .map(|t| t.realized_pnl())
            .collect::<Vec<_>>();

        let gains = closed.iter().filter(|p| **p > 0.0).sum::<f64>();
        let pains = closed.iter().filter(|p| **p < 0.0).map(|p| p.abs()).sum::<f64>();
        let wins = closed.iter().filter(|p| **p > 0.0).count();
        let losses = closed.len() - wins;

        let profit_factor = if pains == 0.0 {
            if gains > 0.0 { f64::INFINITY } else { 0.0 }
        } else {
            gains / pains
        };

        let negative = closed.iter().filter(|p| **p < 0.0).count();
        let average_win = if wins > 0 { gains / wins as f64 } else { 0.0 };
        let average_loss = if negative > 0 { pains / negative as f64 } else { 0.0 };
        let risk_reward = if average_loss > 0.0 {
            average_win / average_loss
        } else if average_win > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let win_rate = if closed.is_empty() {
            0.0
        } else {
            wins as f64 / closed.len() as f64
        };

        Self {
            symbol: symbol.into(),
            initial_capital,
            final_capital: initial_capital + cumulative,
            total_pnl: cumulative,
            total_return: cumulative / initial_capital,
            trade_count: trades.len(),
            closing_trades: closed.len(),
            wins,
            losses,
            win_rate,
            profit_factor,
            risk_reward,
            max_win: closed.iter().copied().fold(0.0, f64::max),
            max_loss: closed.iter().copied().fold(0.0, f64::min),
            max_drawdown,
            max_drawdown_pct,
            benchmark_return: None,
            balances,
        }
    }

    /// Adds the buy-and-hold return over `candles` (first close to last close).
    pub fn with_benchmark(mut self, candles: &[Candle]) -> Self {
        if let (Some(first), Some(last)) = (candles.first(), candles.last()) {
            self.benchmark_return = Some((last.close() - first.close()) / first.close());
        }
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    /// Initial capital plus realized P&L.
    pub fn final_capital(&self) -> f64 {
        self.final_capital
    }

    pub fn total_pnl(&self) -> f64 {
        self.total_pnl
    }

    /// Total P&L over initial capital, as a fraction.
    pub fn total_return(&self) -> f64 {
        self.total_return
    }

    /// Number of recorded trades, adjustments included.
    pub fn trade_count(&self) -> usize {
        self.trade_count
    }

    /// Number of fills that reduced an exposure.
    pub fn closing_trades(&self) -> usize {
        self.closing_trades
    }

    pub fn wins(&self) -> usize {
        self.wins
    }

    pub fn losses(&self) -> usize {
        self.losses
    }

    /// Fraction of closing trades with a positive realized P&L.
    pub fn win_rate(&self) -> f64 {
        self.win_rate
    }

    /// Gross profit over gross loss.
    pub fn profit_factor(&self) -> f64 {
        self.profit_factor
    }

    /// Average win over average loss.
    pub fn risk_reward(&self) -> f64 {
        self.risk_reward
    }

    pub fn max_win(&self) -> f64 {
        self.max_win
    }

    pub fn max_loss(&self) -> f64 {
        self.max_loss
    }

    /// Largest peak-to-trough decline of the cumulative realized P&L.
    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }

    /// Largest peak-to-trough decline of the balance, in percent of the peak.
    pub fn max_drawdown_pct(&self) -> f64 {
        self.max_drawdown_pct
    }

    /// Buy-and-hold return over the same candles, as a fraction.
    pub fn benchmark_return(&self) -> Option<f64> {
        self.benchmark_return
    }

    /// Balance after each trade, oldest first.
    pub fn balances(&self) -> &[f64] {
        &self.balances
    }

    /// Computes the Sharpe ratio of per-trade balance returns.
    ///
    /// `risk_free_rate` is the per-trade risk-free return (e.g., 0.0 for simplicity).
    /// Returns `NaN` when fewer than two returns exist or they do not vary.
    pub fn sharpe_ratio(&self, risk_free_rate: f64) -> f64 {
        let mut returns = Vec::with_capacity(self.balances.len());
        let mut previous_balance = self.initial_capital;
        for &balance in &self.balances {
            if balance != previous_balance {
                returns.push((balance - previous_balance) / previous_balance);
            }
            previous_balance = balance;
        }

        if returns.len() < 2 {
            return f64::NAN;
        }

        let mean_return = returns.iter().sum::<f64>() / returns.len() as f64;
        let std_dev = (returns.iter().map(|r| (r - mean_return).powi(2)).sum::<f64>() / returns.len() as f64).sqrt();
        if std_dev == 0.0 {
            return f64::NAN;
        }

        (mean_return - risk_free_rate) / std_dev
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} Strategy Report ===", self.symbol)?;
        writeln!(f, "Initial Capital: {:.2}", self.initial_capital)?;
        writeln!(f, "Final Capital: {:.2}", self.final_capital)?;
        writeln!(f, "Profit & Loss (P&L): {:.2}", self.total_pnl)?;
        writeln!(f, "Earn Rate: {:.2}%", self.total_return * 100.0)?;
        if let Some(benchmark) = self.benchmark_return {
            writeln!(f, "Origin Increase Rate: {:.2}%", benchmark * 100.0)?;
        }
        #[allow(clippy::writeln_empty_string)]
        writeln!(f, "")?;
        writeln!(f, "Trades: {} (closing: {})", self.trade_count, self.closing_trades)?;
        writeln!(f, "Win / Lose: {} / {}", self.wins, self.losses)?;
        writeln!(f, "Win Rate: {:.2}%", self.win_rate * 100.0)?;
        writeln!(f, "Profit Factor: {:.2}", self.profit_factor)?;
        writeln!(f, "Risk/Reward: {:.2}", self.risk_reward)?;
        writeln!(f, "Max Win: {:.2}", self.max_win)?;
        writeln!(f, "Max Loss: {:.2}", self.max_loss)?;
        write!(f, "Max Drawdown: {:.2} ({:.2}%)", self.max_drawdown, self.max_drawdown_pct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{PositionLedger, TradeSource, Wallet};
    use chrono::DateTime;

    fn ledger() -> PositionLedger {
        PositionLedger::new("BTCUSDT", Wallet::new(10_000.0, 1.0).unwrap(), TradeSource::Backtest)
    }

    // +20, -10 on two round trips
    fn sample_trades() -> Vec<Trade> {
        let mut ledger = ledger();
        let t = DateTime::default();
        ledger.open_position(1.0, 100.0, t).unwrap();
        ledger.close_position(-1.0, 120.0, t).unwrap();
        ledger.open_position(-1.0, 100.0, t).unwrap();
        ledger.close_position(1.0, 110.0, t).unwrap();
        ledger.trades().to_vec()
    }

    #[test]
    fn empty_history() {
        let metrics = Metrics::from_trades("BTCUSDT", &[], 1_000.0);
        assert_eq!(metrics.trade_count(), 0);
        assert_eq!(metrics.final_capital(), 1_000.0);
        assert_eq!(metrics.total_return(), 0.0);
        assert_eq!(metrics.win_rate(), 0.0);
        assert_eq!(metrics.profit_factor(), 0.0);
        assert_eq!(metrics.max_drawdown(), 0.0);
        assert!(metrics.sharpe_ratio(0.0).is_nan());
    }

    #[test]
    fn counts_and_ratios() {
        let metrics = Metrics::from_trades("BTCUSDT", &sample_trades(), 10_000.0);
        assert_eq!(metrics.trade_count(), 4);
        assert_eq!(metrics.closing_trades(), 2);
        assert_eq!(metrics.wins(), 1);
        assert_eq!(metrics.losses(), 1);
        assert_eq!(metrics.win_rate(), 0.5);
        assert_eq!(metrics.profit_factor(), 2.0);
        assert_eq!(metrics.risk_reward(), 2.0);
        assert_eq!(metrics.max_win(), 20.0);
        assert_eq!(metrics.max_loss(), -10.0);
        assert_eq!(metrics.total_pnl(), 10.0);
        assert_eq!(metrics.final_capital(), 10_010.0);
        assert_eq!(metrics.total_return(), 0.001);
    }

    #[test]
    fn drawdown_on_cumulative_pnl() {
        let metrics = Metrics::from_trades("BTCUSDT", &sample_trades(), 10_000.0);
        // peak +20, trough +10
        assert_eq!(metrics.max_drawdown(), 10.0);
        assert!((metrics.max_drawdown_pct() - 10.0 / 10_020.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn profit_factor_no_losses() {
        let trades = sample_trades();
        let metrics = Metrics::from_trades("BTCUSDT", &trades[..2], 10_000.0);
        assert_eq!(metrics.profit_factor(), f64::INFINITY);
        assert_eq!(metrics.win_rate(), 1.0);
    }

    #[test]
    fn analysis_is_idempotent() {
        let trades = sample_trades();
        let first = Metrics::from_trades("BTCUSDT", &trades, 10_000.0);
        let second = Metrics::from_trades("BTCUSDT", &trades, 10_000.0);
        assert_eq!(first, second);
        assert_eq!(first.to_string(), second.to_string());
    }

    #[test]
    fn benchmark_from_candles() {
        let candles = crate::utils::generate_sample_candles(10, 3, 100.0);
        let first = candles.first().unwrap().close();
        let last = candles.last().unwrap().close();
        let metrics = Metrics::from_trades("BTCUSDT", &[], 1_000.0).with_benchmark(&candles);
        assert_eq!(metrics.benchmark_return(), Some((last - first) / first));
    }

    #[test]
    fn report_block() {
        let report = Metrics::from_trades("ETHUSDT", &sample_trades(), 10_000.0).to_string();
        assert!(report.starts_with("=== ETHUSDT Strategy Report ==="));
        assert!(report.contains("Win Rate: 50.00%"));
        assert!(report.contains("Win / Lose: 1 / 1"));
    }

    #[test]
    fn sharpe_ratio_positive_for_winning_mix() {
        let mut ledger = ledger();
        let t = DateTime::default();
        for (entry, exit) in [(100.0, 150.0), (100.0, 130.0), (100.0, 90.0), (100.0, 160.0)] {
            ledger.open_position(1.0, entry, t).unwrap();
            ledger.close_position(-1.0, exit, t).unwrap();
        }
        let metrics = Metrics::from_trades("BTCUSDT", ledger.trades(), 10_000.0);
        assert!(metrics.sharpe_ratio(0.0) > 0.0);
    }
}
