//! Backend selection.
//!
//! Callers that must not care whether they trade history or a live account hold an
//! `Agent`. The backend is chosen once, at construction.

use crate::engine::{BacktestEngine, Candle, Interval, Status, Trade};
use crate::errors::Result;
use crate::live::TradingAgent;
use crate::metrics::Metrics;
use crate::strategy::Intent;

/// One of the two backends behind the shared trading contract.
pub enum Agent {
    Backtest(BacktestEngine),
    Live(TradingAgent),
}

impl From<BacktestEngine> for Agent {
    fn from(engine: BacktestEngine) -> Self {
        Self::Backtest(engine)
    }
}

impl From<TradingAgent> for Agent {
    fn from(agent: TradingAgent) -> Self {
        Self::Live(agent)
    }
}

impl Agent {
    pub fn symbol(&self) -> &str {
        match self {
            Self::Backtest(engine) => engine.symbol(),
            Self::Live(agent) => agent.symbol(),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }

    pub fn trades(&self) -> &[Trade] {
        match self {
            Self::Backtest(engine) => engine.trades(),
            Self::Live(agent) => agent.trades(),
        }
    }

    /// Changes the position by the signed `delta`.
    pub async fn open_position(&mut self, delta: f64) -> Result<Trade> {
        match self {
            Self::Backtest(engine) => engine.open_position(delta),
            Self::Live(agent) => agent.open_position(delta).await,
        }
    }

    /// Reduces the position by the signed `delta`.
    pub async fn close_position(&mut self, delta: f64) -> Result<Trade> {
        match self {
            Self::Backtest(engine) => engine.close_position(delta),
            Self::Live(agent) => agent.close_position(delta).await,
        }
    }

    pub async fn apply(&mut self, intent: Intent) -> Result<Trade> {
        match self {
            Self::Backtest(engine) => engine.apply(intent),
            Self::Live(agent) => agent.apply(intent).await,
        }
    }

    pub async fn fetch_historical_data(&self, symbol: &str, interval: Interval, days: u32) -> Result<Vec<Candle>> {
        match self {
            Self::Backtest(engine) => engine.fetch_historical_data(symbol, interval, days),
            Self::Live(agent) => agent.fetch_historical_data(symbol, interval, days).await,
        }
    }

    /// Current status. The live backend reconciles with the exchange first.
    pub async fn get_status(&mut self) -> Result<Status> {
        match self {
            Self::Backtest(engine) => Ok(engine.get_status()),
            Self::Live(agent) => agent.get_status().await,
        }
    }

    pub fn analyze(&self) -> Metrics {
        match self {
            Self::Backtest(engine) => engine.analyze(),
            Self::Live(agent) => agent.analyze(),
        }
    }
}
