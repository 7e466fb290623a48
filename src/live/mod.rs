//! Live trading agent.
//!
//! Drives the same strategy contract as the backtest against an `ExchangeApi`. The ledger
//! only changes after the exchange confirms a fill, and every failure past local
//! validation is reported through the notifier before it is returned.

mod shutdown;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use crate::engine::{
    Candle, FLAT_EPSILON, Interval, PositionLedger, Status, SymbolPrecision, Trade, TradeSource, Wallet,
    validate_sequence,
};
use crate::errors::{Error, Result};
use crate::exchange::{ExchangeApi, ExchangeError, FillResult, RetryPolicy};
use crate::metrics::Metrics;
use crate::notify::NotifyHandle;
use crate::strategy::{Intent, Strategy, close_delta};

pub use shutdown::*;

/// Relative gap between the exchange balance and the ledger capital tolerated before warning.
const BALANCE_TOLERANCE: f64 = 1e-3;

/// Settings of the live agent.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveConfig {
    pub symbol: String,
    pub interval: Interval,
    pub leverage: f64,
    /// Capital the ledger starts from.
    pub initial_capital: f64,
    /// Days of history fetched on every tick.
    pub lookback_days: u32,
    /// Number of candles handed to the strategy, current one included.
    pub window: usize,
    pub retry: RetryPolicy,
    /// Ticks between two reports; 0 disables reports.
    pub report_every: u32,
    /// Wait after a bar boundary so the exchange has closed the candle.
    pub settle_delay: Duration,
    /// Bound on waiting for pending notifications when stopping.
    pub flush_timeout: Duration,
}

impl LiveConfig {
    pub fn new(symbol: impl Into<String>, interval: Interval) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            leverage: 1.0,
            initial_capital: 1_000.0,
            lookback_days: 7,
            window: 100,
            retry: RetryPolicy::default(),
            report_every: 24,
            settle_delay: Duration::from_secs(2),
            flush_timeout: Duration::from_secs(5),
        }
    }
}

/// Runs a strategy against a live exchange.
pub struct TradingAgent {
    config: LiveConfig,
    exchange: Arc<dyn ExchangeApi>,
    notifier: NotifyHandle,
    ledger: PositionLedger,
    precision: SymbolPrecision,
    last_price: Option<f64>,
    ticks: u64,
    // whether the last balance check found a divergence
    balance_diverged: bool,
}

impl TradingAgent {
    /// Creates a flat agent. Call `start` before trading.
    ///
    /// ### Returns
    /// An error when the capital is not positive or the leverage is not a whole number
    /// of at least 1, since the exchange accepts nothing else.
    pub fn new(config: LiveConfig, exchange: Arc<dyn ExchangeApi>, notifier: NotifyHandle) -> Result<Self> {
        let wallet = Wallet::new(config.initial_capital, config.leverage)?;
        if config.leverage < 1.0 || config.leverage.fract() != 0.0 {
            return Err(Error::InvalidLeverage(config.leverage));
        }
        let ledger = PositionLedger::new(config.symbol.clone(), wallet, TradeSource::Live);
        Ok(Self {
            config,
            exchange,
            notifier,
            ledger,
            precision: SymbolPrecision::default(),
            last_price: None,
            ticks: 0,
            balance_diverged: false,
        })
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn trades(&self) -> &[Trade] {
        self.ledger.trades()
    }

    pub fn precision(&self) -> SymbolPrecision {
        self.precision
    }

    /// Loads the symbol precision, prepares leverage and margin mode, and logs balances.
    ///
    /// Only a missing precision is fatal.
    #[instrument(skip(self), fields(symbol = %self.config.symbol))]
    pub async fn start(&mut self) -> Result<()> {
        let exchange = Arc::clone(&self.exchange);
        let symbol = self.config.symbol.clone();

        let precision = self
            .config
            .retry
            .run("get_symbol_precision", ExchangeError::is_retryable, || {
                exchange.get_symbol_precision(&symbol)
            })
            .await;
        self.precision = self.report(precision, "loading symbol precision")?;
        info!(precision = ?self.precision, "symbol precision loaded");

        if let Err(e) = exchange.prepare_symbol(&symbol, self.config.leverage).await {
            warn!(error = %e, "could not set leverage and margin type");
            self.notifier
                .send(format!("[{symbol}] could not set leverage {}x: {e}", self.config.leverage));
        }

        match exchange.check_account_balance().await {
            Ok(balances) => {
                for balance in balances.iter().filter(|b| b.balance != 0.0) {
                    info!(asset = %balance.asset, balance = balance.balance, available = balance.available, "account balance");
                }
            }
            Err(e) => warn!(error = %e, "could not read account balance"),
        }

        self.notifier.send(format!(
            "[{symbol}] trading agent started on {} (leverage {}x)",
            self.config.interval, self.config.leverage
        ));
        Ok(())
    }

    /// Buys `quantity`.
    pub async fn open_long(&mut self, quantity: f64) -> Result<Trade> {
        self.open_position(quantity.abs()).await
    }

    /// Sells `quantity`.
    pub async fn open_short(&mut self, quantity: f64) -> Result<Trade> {
        self.open_position(-quantity.abs()).await
    }

    /// Submits a market order for the signed `delta` and records the confirmed fill.
    pub async fn open_position(&mut self, delta: f64) -> Result<Trade> {
        let quantity = self.precision.round_quantity(delta)?;
        self.execute(quantity).await
    }

    /// Submits a market order reducing the exposure by the signed `delta`.
    pub async fn close_position(&mut self, delta: f64) -> Result<Trade> {
        self.ledger.validate_close(delta)?;
        let quantity = self.precision.round_quantity(delta)?;
        self.execute(quantity).await
    }

    /// Applies one strategy intent.
    pub async fn apply(&mut self, intent: Intent) -> Result<Trade> {
        match intent {
            Intent::Open(delta) => self.open_position(delta).await,
            Intent::Close(quantity) => {
                let delta = close_delta(self.ledger.position().size(), quantity)?;
                self.close_position(delta).await
            }
        }
    }

    /// Submits `quantity`, already validated and rounded, and books the fill.
    #[instrument(skip(self), fields(symbol = %self.config.symbol))]
    async fn execute(&mut self, quantity: f64) -> Result<Trade> {
        let fill = self.submit(quantity).await;
        let fill = self.report(fill, "placing market order")?;

        let booked = self
            .ledger
            .open_position(fill.executed_quantity, fill.average_price, fill.timestamp);
        let trade = self.report(booked, "booking fill")?;
        self.last_price = Some(fill.average_price);

        info!(
            id = trade.id(),
            order_id = %fill.order_id,
            quantity = trade.quantity(),
            price = trade.price(),
            realized_pnl = trade.realized_pnl(),
            size = trade.size_after(),
            "order filled"
        );
        self.notifier.send(format!(
            "[{}] filled {:+} @ {} (pnl {:.2}, position {})",
            self.config.symbol,
            trade.quantity(),
            trade.price(),
            trade.realized_pnl(),
            trade.size_after()
        ));
        Ok(trade)
    }

    async fn submit(&self, quantity: f64) -> std::result::Result<FillResult, ExchangeError> {
        let exchange = Arc::clone(&self.exchange);
        let symbol = self.config.symbol.as_str();
        // only errors that prove the order never executed are resubmitted
        self.config
            .retry
            .run("place_market_order", ExchangeError::is_retryable_for_order, || {
                exchange.place_market_order(symbol, quantity)
            })
            .await
    }

    /// Returns the last `days` of closed candles at `interval`.
    ///
    /// ### Returns
    /// `Error::InsufficientHistory` when the exchange holds fewer closed candles than requested.
    pub async fn fetch_historical_data(&self, symbol: &str, interval: Interval, days: u32) -> Result<Vec<Candle>> {
        let exchange = Arc::clone(&self.exchange);
        let fetched = self
            .config
            .retry
            .run("fetch_historical_data", ExchangeError::is_retryable, || {
                exchange.fetch_historical_data(symbol, interval, days)
            })
            .await;
        let candles = self.report(fetched, "fetching candles")?;
        let candles = closed_candles(candles, Utc::now());

        let requested = days as usize * interval.bars_per_day();
        if candles.len() < requested {
            return Err(Error::InsufficientHistory {
                requested,
                available: candles.len(),
            });
        }
        let candles = candles[candles.len() - requested..].to_vec();
        validate_sequence(&candles)?;
        Ok(candles)
    }

    /// Reconciles the ledger with the exchange's position, then returns the status.
    ///
    /// On a mismatch the exchange wins: the ledger records an adjustment trade and the
    /// discrepancy is logged and notified. The account balance is compared with the
    /// ledger capital too, see `check_balance`.
    #[instrument(skip(self), fields(symbol = %self.config.symbol))]
    pub async fn get_status(&mut self) -> Result<Status> {
        let exchange = Arc::clone(&self.exchange);
        let symbol = self.config.symbol.clone();
        let remote = self
            .config
            .retry
            .run("position", ExchangeError::is_retryable, || exchange.position(&symbol))
            .await;

        if let Some(remote) = self.report(remote, "reading position")? {
            let local = self.ledger.position().size();
            if (remote.size - local).abs() > FLAT_EPSILON {
                warn!(local, remote = remote.size, "position mismatch, adopting exchange state");
                self.notifier.send(format!(
                    "[{symbol}] position mismatch: local {local}, exchange {}; adopting exchange state",
                    remote.size
                ));
                let mark = self.last_price.or(remote.entry_price).unwrap_or(0.0);
                self.ledger.adjust(remote.size, remote.entry_price, mark, Utc::now());
            }
        }
        self.check_balance().await;

        Ok(self.status())
    }

    /// Compares the balance of the symbol's quote asset with the ledger capital.
    ///
    /// A divergence is logged and notified once, when it appears; the ledger keeps its own
    /// capital so the metrics stay a function of the fills. Read failures only warn.
    async fn check_balance(&mut self) {
        let exchange = Arc::clone(&self.exchange);
        let balances = self
            .config
            .retry
            .run("check_account_balance", ExchangeError::is_retryable, || {
                exchange.check_account_balance()
            })
            .await;
        let balances = match balances {
            Ok(balances) => balances,
            Err(e) => {
                warn!(error = %e, "could not read account balance");
                return;
            }
        };

        let symbol = self.config.symbol.as_str();
        let Some(quote) = balances
            .iter()
            .find(|b| !b.asset.is_empty() && symbol.ends_with(b.asset.as_str()))
        else {
            return;
        };

        let capital = self.ledger.wallet().balance();
        let diverged = (quote.balance - capital).abs() > capital.abs() * BALANCE_TOLERANCE;
        if diverged && !self.balance_diverged {
            warn!(capital, exchange = quote.balance, asset = %quote.asset, "balance mismatch");
            self.notifier.send(format!(
                "[{symbol}] balance mismatch: ledger capital {capital:.2}, exchange {:.2} {}",
                quote.balance, quote.asset
            ));
        }
        self.balance_diverged = diverged;
    }

    /// Ledger status at the last seen price, without asking the exchange.
    pub fn status(&self) -> Status {
        self.ledger.get_status(self.last_price)
    }

    /// Metrics over every trade since start.
    pub fn analyze(&self) -> Metrics {
        Metrics::from_trades(&self.config.symbol, self.ledger.trades(), self.config.initial_capital)
    }

    /// One step: fetch candles, reconcile, run the strategy, apply its intents in order.
    #[instrument(skip_all, fields(symbol = %self.config.symbol, tick = self.ticks + 1))]
    pub async fn tick<S: Strategy + ?Sized>(&mut self, strategy: &mut S) -> Result<()> {
        let symbol = self.config.symbol.clone();
        let candles = self
            .fetch_historical_data(&symbol, self.config.interval, self.config.lookback_days)
            .await?;
        let candle = *candles.last().ok_or(Error::CandleDataEmpty)?;
        self.last_price = Some(candle.close());

        let status = self.get_status().await?;
        let start = candles.len().saturating_sub(self.config.window.max(1));
        let intents = strategy.on_candle(&status, &candle, &candles[start..])?;
        for intent in intents {
            self.apply(intent).await?;
        }

        self.ticks += 1;
        if self.config.report_every > 0 && self.ticks % self.config.report_every as u64 == 0 {
            self.notifier.send(self.analyze().to_string());
        }
        Ok(())
    }

    /// Ticks once per bar until `shutdown` triggers.
    ///
    /// A stop is honored only between ticks: an order already sent always gets its answer
    /// first. Tick errors are logged and notified, and the loop carries on.
    pub async fn run<S: Strategy + ?Sized>(&mut self, strategy: &mut S, shutdown: &ShutdownSignal) -> Result<()> {
        info!(symbol = %self.config.symbol, interval = %self.config.interval, "trading loop started");

        loop {
            let wait = until_next_tick(self.config.interval, self.config.settle_delay, Utc::now());
            if !shutdown.sleep(wait).await {
                break;
            }
            if let Err(e) = self.tick(strategy).await {
                error!(error = %e, "tick failed");
                // exchange failures were reported where they happened
                if !matches!(e, Error::Exchange(_)) {
                    self.notifier.send(format!("[{}] tick failed: {e}", self.config.symbol));
                }
            }
            if shutdown.triggered() {
                break;
            }
        }

        info!(symbol = %self.config.symbol, trades = self.ledger.trades().len(), "trading loop stopped");
        self.notifier.send(format!("[{}] trading agent stopped\n{}", self.config.symbol, self.analyze()));
        self.notifier.flush(self.config.flush_timeout).await;
        Ok(())
    }

    /// Logs and notifies a failure before handing it back.
    fn report<T, E: Into<Error>>(&self, result: std::result::Result<T, E>, action: &str) -> Result<T> {
        result.map_err(|e| {
            let e = e.into();
            error!(error = %e, action, "live operation failed");
            self.notifier.send(format!("[{}] {action} failed: {e}", self.config.symbol));
            e
        })
    }
}

/// Drops candles that have not closed yet at `now`.
fn closed_candles(mut candles: Vec<Candle>, now: DateTime<Utc>) -> Vec<Candle> {
    candles.retain(|c| c.close_time() < now);
    candles
}

/// Time left until the next bar boundary plus `settle`.
fn until_next_tick(interval: Interval, settle: Duration, now: DateTime<Utc>) -> Duration {
    (interval.next_boundary(now) - now).to_std().unwrap_or_default() + settle
}

#[cfg(test)]
mod tests;
