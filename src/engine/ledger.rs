use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{FLAT_EPSILON, Position, Trade, TradeKind, TradeSource, Wallet};
use crate::errors::{Error, Result};

/// Read-only snapshot of a ledger, computed on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub symbol: String,
    pub position: Position,
    /// Price used to value the open exposure, if one was supplied.
    pub mark_price: Option<f64>,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    /// Initial capital plus realized P&L.
    pub capital: f64,
    /// Capital plus unrealized P&L.
    pub equity: f64,
    /// Capital not held as margin by the open exposure.
    pub available_capital: f64,
    /// Fills since the position was last flat.
    pub open_trade_count: usize,
    pub leverage: f64,
}

impl Status {
    /// Largest quantity the available capital can open at `price`, before rounding.
    ///
    /// ### Example
    /// ```
    /// use trade_agent::engine::{PositionLedger, TradeSource, Wallet};
    ///
    /// let ledger = PositionLedger::new("BTCUSDT", Wallet::new(1_000.0, 2.0).unwrap(), TradeSource::Backtest);
    /// assert_eq!(ledger.get_status(None).max_quantity(100.0), 20.0);
    /// ```
    pub fn max_quantity(&self, price: f64) -> f64 {
        if !price.is_finite() || price <= 0.0 {
            return 0.0;
        }
        self.available_capital * self.leverage / price
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_flat()
    }
}

/// Authoritative record of one symbol's position, capital and fills.
///
/// Every mutation validates first and then appends exactly one trade, so a failed
/// call leaves the ledger untouched and history order is fill order.
#[derive(Debug, Clone)]
pub struct PositionLedger {
    position: Position,
    wallet: Wallet,
    trades: Vec<Trade>,
    source: TradeSource,
}

impl PositionLedger {
    /// Creates a flat ledger.
    pub fn new(symbol: impl Into<String>, wallet: Wallet, source: TradeSource) -> Self {
        Self {
            position: Position::flat(symbol),
            wallet,
            trades: Vec::new(),
            source,
        }
    }

    pub fn symbol(&self) -> &str {
        self.position.symbol()
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    /// Trade history, oldest first.
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Checks that `open_position(delta, price)` would succeed.
    pub fn validate_open(&self, delta: f64, price: f64) -> Result<()> {
        if !delta.is_finite() || delta == 0.0 {
            return Err(Error::InvalidQuantity(delta));
        }
        if !price.is_finite() || price <= 0.0 {
            return Err(Error::InvalidPrice(price));
        }
        Ok(())
    }

    /// Checks that `close_position(delta, _)` would succeed, ignoring the price.
    pub fn validate_close(&self, delta: f64) -> Result<()> {
        if self.position.is_flat() {
            return Err(Error::NoOpenPosition);
        }
        if !delta.is_finite() || delta == 0.0 {
            return Err(Error::InvalidQuantity(delta));
        }
        // a close must point against the exposure
        if delta.signum() == self.position.size().signum() {
            return Err(Error::InvalidQuantity(delta));
        }
        Ok(())
    }

    /// Changes the size by `delta` at `price`.
    ///
    /// Adding to the exposure averages the entry price. Reducing it realizes P&L on the
    /// closed part; crossing zero reopens the remainder at `price`.
    ///
    /// ### Returns
    /// The recorded trade, or `Error::InvalidQuantity` when `delta` is zero.
    pub fn open_position(&mut self, delta: f64, price: f64, timestamp: DateTime<Utc>) -> Result<Trade> {
        self.validate_open(delta, price)?;
        Ok(self.fill(delta, price, timestamp))
    }

    /// Reduces the exposure by `delta` at `price`.
    ///
    /// Same arithmetic as `open_position`; a delta larger than the exposure flips it.
    ///
    /// ### Returns
    /// `Error::NoOpenPosition` when flat, `Error::InvalidQuantity` when `delta` is zero
    /// or would grow the exposure.
    pub fn close_position(&mut self, delta: f64, price: f64, timestamp: DateTime<Utc>) -> Result<Trade> {
        self.validate_close(delta)?;
        self.validate_open(delta, price)?;
        Ok(self.fill(delta, price, timestamp))
    }

    /// Adopts an externally reported position, recording the difference as an adjustment trade.
    ///
    /// A missing `entry_price` on a non-flat report is taken as `mark_price`.
    /// Returns `None` when the sizes already agree.
    pub fn adjust(
        &mut self,
        size: f64,
        entry_price: Option<f64>,
        mark_price: f64,
        timestamp: DateTime<Utc>,
    ) -> Option<Trade> {
        let delta = size - self.position.size();
        if delta.abs() < FLAT_EPSILON {
            return None;
        }

        self.position.overwrite(size, entry_price.or(Some(mark_price)));
        let trade = Trade::new(
            self.next_id(),
            timestamp,
            self.position.symbol(),
            delta,
            mark_price,
            0.0,
            self.position.size(),
            self.source,
            TradeKind::Adjustment,
        );
        self.record_trade(trade.clone());
        Some(trade)
    }

    /// Snapshot valued at `mark_price`, or at the entry price when none is given.
    pub fn get_status(&self, mark_price: Option<f64>) -> Status {
        let position = self.position.clone();
        let unrealized_pnl = mark_price.map(|p| position.unrealized_pnl(p)).unwrap_or(0.0);
        let margin = position
            .entry_price()
            .map(|entry| self.wallet.margin_for(position.size() * entry))
            .unwrap_or(0.0);
        let capital = self.wallet.balance();

        Status {
            symbol: position.symbol().to_string(),
            mark_price,
            unrealized_pnl,
            realized_pnl: position.realized_pnl(),
            capital,
            equity: capital + unrealized_pnl,
            available_capital: self.wallet.free_balance(margin),
            open_trade_count: self.open_trade_count(),
            leverage: self.wallet.leverage(),
            position,
        }
    }

    fn open_trade_count(&self) -> usize {
        if self.position.is_flat() {
            return 0;
        }
        self.trades.iter().rev().take_while(|t| t.size_after() != 0.0).count()
    }

    fn fill(&mut self, delta: f64, price: f64, timestamp: DateTime<Utc>) -> Trade {
        let realized = self.position.apply(delta, price);
        self.wallet.add_pnl(realized);

        let trade = Trade::new(
            self.next_id(),
            timestamp,
            self.position.symbol(),
            delta,
            price,
            realized,
            self.position.size(),
            self.source,
            TradeKind::Fill,
        );
        self.record_trade(trade.clone());
        trade
    }

    fn next_id(&self) -> u64 {
        self.trades.len() as u64 + 1
    }

    fn record_trade(&mut self, trade: Trade) {
        self.trades.push(trade);
    }
}
