use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::{
    Candle, Interval, PositionLedger, Status, SymbolPrecision, Trade, TradeSource, Wallet, validate_sequence,
};
use crate::errors::{Error, Result};
use crate::exchange::ExchangeError;
use crate::metrics::Metrics;
use crate::strategy::{Intent, Strategy, close_delta};

/// Settings of one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub symbol: String,
    /// Interval of the loaded candles.
    pub interval: Interval,
    pub initial_capital: f64,
    pub leverage: f64,
    pub precision: SymbolPrecision,
    /// Number of candles handed to the strategy, current one included.
    pub window: usize,
    /// Flatten any open exposure at the last candle's close.
    pub close_at_end: bool,
}

impl BacktestConfig {
    pub fn new(symbol: impl Into<String>, interval: Interval) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            initial_capital: 1_000.0,
            leverage: 1.0,
            precision: SymbolPrecision::default(),
            window: 100,
            close_at_end: true,
        }
    }

    pub fn initial_capital(mut self, initial_capital: f64) -> Self {
        self.initial_capital = initial_capital;
        self
    }

    pub fn leverage(mut self, leverage: f64) -> Self {
        self.leverage = leverage;
        self
    }

    pub fn precision(mut self, precision: SymbolPrecision) -> Self {
        self.precision = precision;
        self
    }

    pub fn window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn close_at_end(mut self, close_at_end: bool) -> Self {
        self.close_at_end = close_at_end;
        self
    }
}

/// Replays historical candles through a strategy.
///
/// Every intent fills in full at the current candle's close (rounded to the price
/// precision), with no fees and no slippage. Quantities are rounded exactly as the
/// live agent rounds them.
#[derive(Debug, Clone)]
pub struct BacktestEngine {
    config: BacktestConfig,
    data: Arc<[Candle]>,
    index: usize,
    // next candle `step` replays
    next: usize,
    // candles visible to `fetch_historical_data`
    visible: usize,
    ledger: PositionLedger,
}

impl BacktestEngine {
    /// Creates a new backtest instance.
    ///
    /// ### Arguments
    /// * `config` - Symbol, interval, capital and rounding settings.
    /// * `data` - Candles, strictly increasing in open time.
    ///
    /// ### Returns
    /// The new engine, or an error when the candles are empty or out of order,
    /// or when the capital or leverage is not positive.
    pub fn new(config: BacktestConfig, data: impl Into<Arc<[Candle]>>) -> Result<Self> {
        let data = data.into();
        validate_sequence(&data)?;
        let wallet = Wallet::new(config.initial_capital, config.leverage)?;
        let ledger = PositionLedger::new(config.symbol.clone(), wallet, TradeSource::Backtest);

        Ok(Self {
            visible: data.len(),
            index: 0,
            next: 0,
            config,
            data,
            ledger,
        })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    /// Loaded candles.
    pub fn candles(&self) -> &[Candle] {
        &self.data
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn trades(&self) -> &[Trade] {
        self.ledger.trades()
    }

    /// Candle fills currently execute against.
    pub fn current_candle(&self) -> Option<&Candle> {
        self.data.get(self.index)
    }

    /// Returns the last `days` of candles at `interval`, ending at the newest candle the
    /// replay has reached. Before the first `step` and after `finish` that is the whole
    /// dataset.
    ///
    /// A coarser interval that is an exact multiple of the loaded one is built by
    /// aggregating complete groups of candles.
    ///
    /// ### Returns
    /// `Error::InsufficientHistory` when fewer candles exist than `days` requires,
    /// `Error::IntervalMismatch` when `interval` cannot be built from the loaded data.
    pub fn fetch_historical_data(&self, symbol: &str, interval: Interval, days: u32) -> Result<Vec<Candle>> {
        if symbol != self.config.symbol {
            return Err(ExchangeError::UnknownSymbol(symbol.to_string()).into());
        }

        let visible = &self.data[..self.visible];
        let candles = if interval == self.config.interval {
            visible.to_vec()
        } else {
            resample(visible, self.config.interval, interval)?
        };

        let requested = days as usize * interval.bars_per_day();
        if candles.len() < requested {
            return Err(Error::InsufficientHistory {
                requested,
                available: candles.len(),
            });
        }
        Ok(candles[candles.len() - requested..].to_vec())
    }

    /// Changes the position by the signed `delta` at the current candle.
    pub fn open_position(&mut self, delta: f64) -> Result<Trade> {
        let (timestamp, price) = self.fill_price()?;
        let quantity = self.config.precision.round_quantity(delta)?;
        let trade = self.ledger.open_position(quantity, price, timestamp)?;
        debug!(id = trade.id(), quantity, price, "backtest fill");
        Ok(trade)
    }

    /// Reduces the position by the signed `delta` at the current candle.
    pub fn close_position(&mut self, delta: f64) -> Result<Trade> {
        self.ledger.validate_close(delta)?;
        let (timestamp, price) = self.fill_price()?;
        let quantity = self.config.precision.round_quantity(delta)?;
        let trade = self.ledger.close_position(quantity, price, timestamp)?;
        debug!(id = trade.id(), quantity, price, "backtest fill");
        Ok(trade)
    }

    /// Applies one strategy intent at the current candle.
    pub fn apply(&mut self, intent: Intent) -> Result<Trade> {
        match intent {
            Intent::Open(delta) => self.open_position(delta),
            Intent::Close(quantity) => {
                let delta = close_delta(self.ledger.position().size(), quantity)?;
                self.close_position(delta)
            }
        }
    }

    /// Status valued at the current candle's close.
    pub fn get_status(&self) -> Status {
        self.ledger.get_status(self.current_candle().map(|c| c.close()))
    }

    /// Replays the next candle: the strategy sees it, then its intents are applied in order.
    ///
    /// Between two steps `fetch_historical_data` ends at the stepped candle and direct
    /// `open_position`/`close_position` calls fill at its close.
    ///
    /// ### Returns
    /// `false` once every candle was replayed, or the first strategy or ledger error.
    pub fn step<S: Strategy + ?Sized>(&mut self, strategy: &mut S) -> Result<bool> {
        let i = self.next;
        let Some(candle) = self.data.get(i).copied() else {
            return Ok(false);
        };
        self.index = i;
        self.visible = i + 1;
        self.next = i + 1;

        let data = Arc::clone(&self.data);
        let start = (i + 1).saturating_sub(self.config.window.max(1));
        let status = self.get_status();
        let intents = strategy.on_candle(&status, &candle, &data[start..=i])?;
        for intent in intents {
            self.apply(intent)?;
        }
        Ok(true)
    }

    /// Ends the replay: the whole dataset becomes visible again and, with `close_at_end`,
    /// any open exposure is flattened at the current candle.
    pub fn finish(&mut self) -> Result<()> {
        self.visible = self.data.len();
        if self.config.close_at_end && !self.ledger.position().is_flat() {
            self.apply(Intent::close_all())?;
        }

        info!(
            symbol = %self.config.symbol,
            trades = self.ledger.trades().len(),
            balance = self.ledger.wallet().balance(),
            "backtest finished"
        );
        Ok(())
    }

    /// Runs the strategy over every remaining candle, oldest first, then `finish`es.
    ///
    /// ### Arguments
    /// * `strategy` - Called once per candle; its intents are applied in order.
    ///
    /// ### Returns
    /// Ok once every candle was replayed, or the first strategy or ledger error.
    pub fn run<S: Strategy + ?Sized>(&mut self, strategy: &mut S) -> Result<()> {
        info!(symbol = %self.config.symbol, candles = self.data.len() - self.next, "backtest started");
        while self.step(strategy)? {}
        self.finish()
    }

    /// Metrics over the trades so far, benchmarked against the loaded candles.
    pub fn analyze(&self) -> Metrics {
        Metrics::from_trades(&self.config.symbol, self.ledger.trades(), self.config.initial_capital)
            .with_benchmark(&self.data)
    }

    /// Discards every trade and rewinds to the first candle.
    pub fn reset(&mut self) -> Result<()> {
        let wallet = Wallet::new(self.config.initial_capital, self.config.leverage)?;
        self.ledger = PositionLedger::new(self.config.symbol.clone(), wallet, TradeSource::Backtest);
        self.index = 0;
        self.next = 0;
        self.visible = self.data.len();
        Ok(())
    }

    fn fill_price(&self) -> Result<(chrono::DateTime<chrono::Utc>, f64)> {
        let candle = self.current_candle().ok_or(Error::CandleDataEmpty)?;
        let price = self.config.precision.round_price(candle.close())?;
        Ok((candle.close_time(), price))
    }
}

/// Aggregates `candles` of interval `from` into complete `to` candles aligned on `to` boundaries.
pub(crate) fn resample(candles: &[Candle], from: Interval, to: Interval) -> Result<Vec<Candle>> {
    let factor = to.minutes() / from.minutes();
    if to.minutes() <= from.minutes() || to.minutes() % from.minutes() != 0 {
        return Err(Error::IntervalMismatch {
            requested: to.to_string(),
            loaded: from.to_string(),
        });
    }

    let step = to.minutes() * 60;
    let mut resampled = Vec::new();
    let mut group: Vec<Candle> = Vec::with_capacity(factor as usize);
    let mut bucket = None;

    for candle in candles {
        let key = candle.open_time().timestamp().div_euclid(step);
        if bucket != Some(key) {
            if group.len() == factor as usize {
                resampled.push(Candle::aggregate(&group)?);
            }
            group.clear();
            bucket = Some(key);
        }
        group.push(*candle);
    }
    if group.len() == factor as usize {
        resampled.push(Candle::aggregate(&group)?);
    }

    Ok(resampled)
}
