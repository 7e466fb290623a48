use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Mutex;

use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::engine::{Candle, CandleBuilder, validate_sequence};
use crate::errors::{Error, Result};
use crate::exchange::parse_kline;

// {
//   "open_time": 1759813200000,
//   "open_price": 124499.99,
//   "high_price": 124640.76,
//   "low_price": 124240.37,
//   "close_price": 124414.17,
//   "volume": 424.20697,
//   "close_time": 1759816799999,
//   ...
// }
#[derive(Debug, Deserialize)]
struct KlineRecord {
    #[serde(alias = "open_price")]
    open: f64,
    #[serde(alias = "high_price")]
    high: f64,
    #[serde(alias = "low_price")]
    low: f64,
    #[serde(alias = "close_price")]
    close: f64,
    volume: f64,
    #[serde(with = "ts_milliseconds")]
    open_time: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    close_time: DateTime<Utc>,
}

/// A kline either as a named object or as the REST API's positional array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum KlineRow {
    Record(KlineRecord),
    Raw(Vec<Value>),
}

impl KlineRow {
    fn into_candle(self) -> Result<Candle> {
        match self {
            Self::Record(k) => CandleBuilder::builder()
                .open(k.open)
                .high(k.high)
                .low(k.low)
                .close(k.close)
                .volume(k.volume)
                .open_time(k.open_time)
                .close_time(k.close_time)
                .build(),
            Self::Raw(row) => Ok(parse_kline(&row)?),
        }
    }
}

/// Reads candles from a JSON array of Binance klines, oldest first.
///
/// ### Arguments
/// * `path` - File holding kline objects (`open_time`, `open_price`, ...) or raw kline arrays.
///
/// ### Returns
/// The validated candles, or an error when the file is unreadable, malformed or unordered.
pub fn load_candles(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let file = File::open(path)?;
    let rows: Vec<KlineRow> = serde_json::from_reader(BufReader::new(file))?;
    let candles = rows.into_iter().map(KlineRow::into_candle).collect::<Result<Vec<_>>>()?;
    validate_sequence(&candles)?;
    Ok(candles)
}

/// Generates `max + 1` deterministic hourly candles starting 2024-01-01T00:00Z.
///
/// Prices trend upward by 0.5 per candle around `base_price` with a sine wave
/// shifted by `seed`.
pub fn generate_sample_candles(max: i32, seed: i32, base_price: f64) -> Vec<Candle> {
    let mut open_time = DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_default();
    let mut open = base_price;

    (0..=max)
        .filter_map(|i| {
            let trend = base_price + 0.5 * (i as f64);
            let variation = 5.0 * ((i as f64 * 0.3 + seed as f64).sin() * 0.5 + 0.5);

            let close = trend + variation;
            let high = (close + 0.3 * variation).max(open).max(close);
            let low = (close - 0.3 * variation).min(open).min(close);
            let volume = 1000.0 + 500.0 * ((i as f64 * 0.2).sin()).abs();
            let close_time = open_time + Duration::hours(1) - Duration::milliseconds(1);

            let candle = CandleBuilder::builder()
                .open(open)
                .high(high)
                .low(low)
                .close(close)
                .volume(volume)
                .open_time(open_time)
                .close_time(close_time)
                .build()
                .ok();

            open_time += Duration::hours(1);
            open = close;
            candle
        })
        .collect()
}

/// Installs the global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. With `log_dir`, events are
/// written as JSON lines to `<log_dir>/<SYMBOL>.log`; otherwise they go to stdout.
pub fn init_subscriber(log_dir: Option<&Path>, symbol: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(format!("{}.log", symbol.to_uppercase())))?;
            let layer = fmt::layer().json().with_writer(Mutex::new(file)).with_current_span(true);
            registry.with(layer).try_init()
        }
        None => registry.with(fmt::layer().with_target(false)).try_init(),
    };
    installed.map_err(|e| Error::Msg(format!("cannot install log subscriber: {e}")))
}
