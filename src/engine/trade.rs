use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which backend produced a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSource {
    Backtest,
    Live,
}

/// Why a trade was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    /// A simulated or confirmed order fill.
    Fill,
    /// The ledger adopted the exchange's reported position.
    Adjustment,
}

/// Immutable record of one change to the position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    id: u64,
    timestamp: DateTime<Utc>,
    symbol: String,
    quantity: f64,
    price: f64,
    realized_pnl: f64,
    size_after: f64,
    source: TradeSource,
    kind: TradeKind,
}

impl Trade {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u64,
        timestamp: DateTime<Utc>,
        symbol: impl Into<String>,
        quantity: f64,
        price: f64,
        realized_pnl: f64,
        size_after: f64,
        source: TradeSource,
        kind: TradeKind,
    ) -> Self {
        Self {
            id,
            timestamp,
            symbol: symbol.into(),
            quantity,
            price,
            realized_pnl,
            size_after,
            source,
            kind,
        }
    }

    /// Sequence number, starting at 1 for each ledger.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Signed size change.
    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    /// PnL realized by this trade alone.
    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    /// Position size once this trade was applied.
    pub fn size_after(&self) -> f64 {
        self.size_after
    }

    pub fn source(&self) -> TradeSource {
        self.source
    }

    pub fn kind(&self) -> TradeKind {
        self.kind
    }

    /// True when the trade reduced an existing exposure.
    pub fn is_closing(&self) -> bool {
        let before = self.size_after - self.quantity;
        before != 0.0 && before.signum() != self.quantity.signum()
    }
}
