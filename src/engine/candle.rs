use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// One OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    open_time: DateTime<Utc>,
    close_time: DateTime<Utc>,
}

impl Candle {
    pub fn open(&self) -> f64 {
        self.open
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn close(&self) -> f64 {
        self.close
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn open_time(&self) -> DateTime<Utc> {
        self.open_time
    }

    pub fn close_time(&self) -> DateTime<Utc> {
        self.close_time
    }

    /// Merges consecutive candles into one: first open, highest high, lowest low,
    /// last close, summed volume.
    pub fn aggregate(candles: &[Candle]) -> Result<Candle> {
        let first = candles.first().ok_or(Error::CandleDataEmpty)?;
        let last = candles.last().ok_or(Error::CandleDataEmpty)?;

        let high = candles.iter().map(|c| c.high()).fold(f64::NEG_INFINITY, f64::max);
        let low = candles.iter().map(|c| c.low()).fold(f64::INFINITY, f64::min);
        let volume = candles.iter().map(|c| c.volume()).sum::<f64>();

        CandleBuilder::builder()
            .open(first.open())
            .high(high)
            .low(low)
            .close(last.close())
            .volume(volume)
            .open_time(first.open_time())
            .close_time(last.close_time())
            .build()
    }
}

/// Builder that validates a candle before handing it out.
#[derive(Debug, Default)]
pub struct CandleBuilder {
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
    open_time: Option<DateTime<Utc>>,
    close_time: Option<DateTime<Utc>>,
}

impl CandleBuilder {
    pub fn builder() -> Self {
        Self::default()
    }

    pub fn open(mut self, open: f64) -> Self {
        self.open = Some(open);
        self
    }

    pub fn high(mut self, high: f64) -> Self {
        self.high = Some(high);
        self
    }

    pub fn low(mut self, low: f64) -> Self {
        self.low = Some(low);
        self
    }

    pub fn close(mut self, close: f64) -> Self {
        self.close = Some(close);
        self
    }

    pub fn volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn open_time(mut self, open_time: DateTime<Utc>) -> Self {
        self.open_time = Some(open_time);
        self
    }

    pub fn close_time(mut self, close_time: DateTime<Utc>) -> Self {
        self.close_time = Some(close_time);
        self
    }

    /// Builds the candle.
    ///
    /// ### Returns
    /// `Error::InvalidCandle` when a field is missing, a price is not finite and positive,
    /// the high/low do not enclose open and close, or the times are reversed.
    pub fn build(self) -> Result<Candle> {
        let missing = |name: &str| Error::InvalidCandle(format!("missing {name}"));
        let open = self.open.ok_or_else(|| missing("open"))?;
        let high = self.high.ok_or_else(|| missing("high"))?;
        let low = self.low.ok_or_else(|| missing("low"))?;
        let close = self.close.ok_or_else(|| missing("close"))?;
        let volume = self.volume.unwrap_or(0.0);
        let open_time = self.open_time.ok_or_else(|| missing("open_time"))?;
        let close_time = self.close_time.ok_or_else(|| missing("close_time"))?;

        if [open, high, low, close].iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(Error::InvalidCandle(format!(
                "prices must be positive (o={open}, h={high}, l={low}, c={close})"
            )));
        }
        if high < open.max(close) || low > open.min(close) || low > high {
            return Err(Error::InvalidCandle(format!(
                "high/low do not enclose the body (o={open}, h={high}, l={low}, c={close})"
            )));
        }
        if !volume.is_finite() || volume < 0.0 {
            return Err(Error::InvalidCandle(format!("negative volume {volume}")));
        }
        if close_time < open_time {
            return Err(Error::InvalidCandle(format!("close time {close_time} before open time {open_time}")));
        }

        Ok(Candle {
            open,
            high,
            low,
            close,
            volume,
            open_time,
            close_time,
        })
    }
}

/// Bar interval supported by both backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Interval {
    pub fn minutes(&self) -> i64 {
        match self {
            Self::M1 => 1,
            Self::M5 => 5,
            Self::M15 => 15,
            Self::H1 => 60,
            Self::H4 => 240,
            Self::D1 => 1440,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.minutes())
    }

    /// Number of bars in one day.
    pub fn bars_per_day(&self) -> usize {
        (1440 / self.minutes()) as usize
    }

    /// Exchange code, e.g. `"1h"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    /// Start of the next bar strictly after `now`.
    pub fn next_boundary(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let step = self.minutes() * 60;
        let secs = now.timestamp();
        let next = (secs.div_euclid(step) + 1) * step;
        DateTime::from_timestamp(next, 0).unwrap_or(now + self.duration())
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1m" => Ok(Self::M1),
            "5m" => Ok(Self::M5),
            "15m" => Ok(Self::M15),
            "1h" => Ok(Self::H1),
            "4h" => Ok(Self::H4),
            "1d" => Ok(Self::D1),
            other => Err(Error::InvalidInterval(other.to_string())),
        }
    }
}

/// Checks that candles are non-empty and strictly increasing in open time.
pub(crate) fn validate_sequence(candles: &[Candle]) -> Result<()> {
    if candles.is_empty() {
        return Err(Error::CandleDataEmpty);
    }
    for (i, pair) in candles.windows(2).enumerate() {
        if pair[1].open_time() <= pair[0].open_time() {
            return Err(Error::UnorderedCandles(i + 1));
        }
    }
    Ok(())
}
