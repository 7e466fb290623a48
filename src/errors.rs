use crate::exchange::ExchangeError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A zero, non-finite or otherwise malformed order size was requested.
    /// Rejected before any state change or I/O.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(f64),

    /// A close was requested while the position is flat.
    #[error("No open position to close")]
    NoOpenPosition,

    /// More history was requested than the data source holds.
    #[error("Insufficient history: requested {requested} candles, available {available}")]
    InsufficientHistory {
        /// Candles needed to cover the requested window.
        requested: usize,
        /// Candles actually available.
        available: usize,
    },

    /// The exchange failed to execute or answer a request.
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    /// The requested quantity rounds to zero at the symbol's quantity precision.
    #[error("Quantity {quantity} is below the minimum increment for {decimals} decimals")]
    PrecisionMismatch {
        /// Quantity as requested by the strategy.
        quantity: f64,
        /// Quantity decimals accepted by the exchange.
        decimals: u32,
    },

    /// A fill or mark price is not a positive finite number.
    #[error("Invalid price: {0}")]
    InvalidPrice(f64),

    /// The initial capital is not positive.
    #[error("Balance must be positive (got: {0})")]
    NegZeroBalance(f64),

    /// The leverage is not a positive finite number.
    #[error("Leverage must be positive (got: {0})")]
    NegZeroLeverage(f64),

    /// Futures leverage is set in whole steps of at least 1x.
    #[error("Leverage must be a whole number of at least 1 (got: {0})")]
    InvalidLeverage(f64),

    /// The candle data provided is empty. Backtesting requires at least one candle.
    #[error("Candle data is empty: backtesting requires at least one candle")]
    CandleDataEmpty,

    /// Candle open times are not strictly increasing.
    #[error("Candles out of order at index {0}")]
    UnorderedCandles(usize),

    /// A candle failed validation while being built.
    #[error("Invalid candle: {0}")]
    InvalidCandle(String),

    /// An interval string is not one of the supported intervals.
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    /// The requested interval cannot be derived from the loaded data.
    #[error("Interval {requested} cannot be built from {loaded} candles")]
    IntervalMismatch {
        /// Interval asked for.
        requested: String,
        /// Interval of the loaded data.
        loaded: String,
    },

    /// A required configuration value is absent.
    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error occurred.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Chart rendering failed.
    #[cfg(feature = "draws")]
    #[error("Plotters error: {0}")]
    Plotters(String),

    /// Free-form error raised by strategies or indicator setup.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Returns true for errors raised by local validation, before any I/O or state change.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::InvalidQuantity(_) | Self::NoOpenPosition | Self::PrecisionMismatch { .. } | Self::InvalidPrice(_)
        )
    }
}

#[cfg(test)]
#[test]
fn local_errors_are_classified() {
    assert!(Error::NoOpenPosition.is_local());
    assert!(Error::InvalidQuantity(0.0).is_local());
    assert!(
        Error::PrecisionMismatch {
            quantity: 0.0001,
            decimals: 3
        }
        .is_local()
    );
    assert!(!Error::Exchange(ExchangeError::Timeout).is_local());
    assert!(!Error::CandleDataEmpty.is_local());
}
