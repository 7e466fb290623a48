//! In-memory exchange and notifier used by the tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::engine::{Candle, Interval, Position, SymbolPrecision};
use crate::exchange::{Balance, ExchangeApi, ExchangeError, ExchangePosition, FillResult};
use crate::notify::{Notifier, NotifyError};

/// USDT held by a fresh mock account, equal to the default initial capital.
const MOCK_BALANCE: f64 = 1_000.0;

struct MockState {
    candles: Vec<Candle>,
    // newest closed candle
    cursor: usize,
    precision: SymbolPrecision,
    remote: Position,
    report_position: bool,
    order_errors: VecDeque<ExchangeError>,
    fetch_errors: VecDeque<ExchangeError>,
    prepare_error: Option<ExchangeError>,
    orders: Vec<f64>,
    order_attempts: usize,
    // added on top of the realized PnL of the fills
    balance_shift: f64,
}

/// Exchange replaying scripted candles and filling every order at the newest close.
pub(crate) struct MockExchange {
    symbol: String,
    state: Mutex<MockState>,
}

impl MockExchange {
    pub fn new(symbol: &str, candles: Vec<Candle>) -> Self {
        let cursor = candles.len().saturating_sub(1);
        Self {
            symbol: symbol.to_string(),
            state: Mutex::new(MockState {
                candles,
                cursor,
                precision: SymbolPrecision::default(),
                remote: Position::flat(symbol),
                report_position: true,
                order_errors: VecDeque::new(),
                fetch_errors: VecDeque::new(),
                prepare_error: None,
                orders: Vec::new(),
                order_attempts: 0,
                balance_shift: 0.0,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn with_precision(self, precision: SymbolPrecision) -> Self {
        self.state().precision = precision;
        self
    }

    pub fn without_position_reports(self) -> Self {
        self.state().report_position = false;
        self
    }

    pub fn set_cursor(&self, cursor: usize) {
        self.state().cursor = cursor;
    }

    pub fn fail_next_order(&self, error: ExchangeError) {
        self.state().order_errors.push_back(error);
    }

    pub fn fail_next_fetch(&self, error: ExchangeError) {
        self.state().fetch_errors.push_back(error);
    }

    pub fn fail_prepare(&self, error: ExchangeError) {
        self.state().prepare_error = Some(error);
    }

    /// Simulates a manual change on the exchange.
    pub fn set_remote_position(&self, size: f64, entry_price: Option<f64>) {
        self.state().remote.overwrite(size, entry_price);
    }

    /// Simulates a deposit, a withdrawal or fees the ledger never saw.
    pub fn shift_balance(&self, delta: f64) {
        self.state().balance_shift += delta;
    }

    pub fn remote_size(&self) -> f64 {
        self.state().remote.size()
    }

    /// Quantities of every executed order.
    pub fn orders(&self) -> Vec<f64> {
        self.state().orders.clone()
    }

    pub fn order_attempts(&self) -> usize {
        self.state().order_attempts
    }

    fn check_symbol(&self, symbol: &str) -> Result<(), ExchangeError> {
        if symbol != self.symbol {
            return Err(ExchangeError::UnknownSymbol(symbol.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeApi for MockExchange {
    async fn place_market_order(&self, symbol: &str, quantity: f64) -> Result<FillResult, ExchangeError> {
        self.check_symbol(symbol)?;
        let mut state = self.state();
        state.order_attempts += 1;
        if let Some(error) = state.order_errors.pop_front() {
            return Err(error);
        }

        let candle = state.candles[state.cursor];
        let price = state
            .precision
            .round_price(candle.close())
            .map_err(|e| ExchangeError::Decode(e.to_string()))?;
        state.remote.apply(quantity, price);
        state.orders.push(quantity);

        Ok(FillResult {
            order_id: state.order_attempts.to_string(),
            executed_quantity: quantity,
            average_price: price,
            timestamp: candle.close_time(),
        })
    }

    async fn fetch_historical_data(
        &self,
        symbol: &str,
        interval: Interval,
        days: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.check_symbol(symbol)?;
        let mut state = self.state();
        if let Some(error) = state.fetch_errors.pop_front() {
            return Err(error);
        }
        let visible = &state.candles[..=state.cursor];
        let wanted = days as usize * interval.bars_per_day();
        Ok(visible[visible.len().saturating_sub(wanted)..].to_vec())
    }

    async fn get_symbol_precision(&self, symbol: &str) -> Result<SymbolPrecision, ExchangeError> {
        self.check_symbol(symbol)?;
        Ok(self.state().precision)
    }

    async fn check_account_balance(&self) -> Result<Vec<Balance>, ExchangeError> {
        let state = self.state();
        let balance = MOCK_BALANCE + state.remote.realized_pnl() + state.balance_shift;
        Ok(vec![
            Balance {
                asset: "BNB".to_string(),
                balance: 0.5,
                available: 0.5,
            },
            Balance {
                asset: "USDT".to_string(),
                balance,
                available: balance,
            },
        ])
    }

    async fn position(&self, symbol: &str) -> Result<Option<ExchangePosition>, ExchangeError> {
        self.check_symbol(symbol)?;
        let state = self.state();
        if !state.report_position {
            return Ok(None);
        }
        Ok(Some(ExchangePosition {
            symbol: symbol.to_string(),
            size: state.remote.size(),
            entry_price: state.remote.entry_price(),
        }))
    }

    async fn prepare_symbol(&self, symbol: &str, _leverage: f64) -> Result<(), ExchangeError> {
        self.check_symbol(symbol)?;
        match self.state().prepare_error.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Notifier that records what it delivers.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
    attempts: AtomicUsize,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.contains(needle))
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(NotifyError::Rejected {
                status: 500,
                body: "unavailable".to_string(),
            });
        }
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}
