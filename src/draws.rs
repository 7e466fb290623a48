//! Charts of a finished backtest: candles, fills and the balance curve.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use plotters::backend::{BitMapBackend, DrawingBackend, SVGBackend};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::WHITE;

use crate::engine::{BacktestEngine, Candle, Trade, TradeKind};
use crate::errors::{Error, Result};
use crate::metrics::Metrics;

/// Aspect ratio for the generated charts.
const ASPECT_RATIO: f64 = 0.5625;
const X_LABEL_SIZE: i32 = 20;
const Y_LABEL_SIZE: i32 = 20;

/// Chart file format and path.
#[derive(Debug, Clone)]
pub enum DrawOutput {
    Svg(PathBuf),
    Png(PathBuf),
}

/// Configuration options for chart generation.
#[derive(Debug, Clone)]
pub struct DrawOptions {
    title: Option<String>,
    output: DrawOutput,
    show_volume: bool,
    show_metrics: bool,
}

impl DrawOptions {
    pub fn new(output: DrawOutput) -> Self {
        Self {
            title: None,
            output,
            show_volume: false,
            show_metrics: true,
        }
    }

    pub fn title(mut self, title: impl ToString) -> Self {
        self.title = Some(title.to_string());
        self
    }

    /// Adds a volume panel under the prices.
    pub fn show_volume(mut self, show: bool) -> Self {
        self.show_volume = show;
        self
    }

    /// Draws the balance curve and a summary line.
    pub fn show_metrics(mut self, show: bool) -> Self {
        self.show_metrics = show;
        self
    }
}

/// A fill drawn on the price chart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct FillMarker {
    pub time: DateTime<Utc>,
    pub price: f64,
    pub buy: bool,
}

/// Fills of `trades`, adjustments excluded.
pub(crate) fn fill_markers(trades: &[Trade]) -> Vec<FillMarker> {
    trades
        .iter()
        .filter(|t| t.kind() == TradeKind::Fill)
        .map(|t| FillMarker {
            time: t.timestamp(),
            price: t.price(),
            buy: t.quantity() > 0.0,
        })
        .collect()
}

/// Balance after each trade, starting from the initial capital at `start`.
pub(crate) fn balance_points(start: DateTime<Utc>, trades: &[Trade], metrics: &Metrics) -> Vec<(DateTime<Utc>, f64)> {
    std::iter::once((start, metrics.initial_capital()))
        .chain(trades.iter().map(|t| t.timestamp()).zip(metrics.balances().iter().copied()))
        .collect()
}

/// Renders one backtest to a file.
pub struct Draw<'d> {
    engine: &'d BacktestEngine,
    options: DrawOptions,
}

impl<'d> Draw<'d> {
    pub fn new(engine: &'d BacktestEngine, options: DrawOptions) -> Self {
        Self { engine, options }
    }

    /// Writes the chart to the configured output.
    pub fn plot(&self) -> Result<()> {
        let candles = self.engine.candles();
        if candles.is_empty() {
            return Err(Error::CandleDataEmpty);
        }

        let mut height_factor = 1.0;
        if self.options.show_volume {
            height_factor += 0.4;
        }
        let width = 1280.max(10 * candles.len() as u32);
        let height = ((width as f64 * ASPECT_RATIO * height_factor) as u32).min(900);

        match &self.options.output {
            DrawOutput::Svg(path) => {
                let root = SVGBackend::new(path, (width, height)).into_drawing_area();
                self.draw_chart(&root, candles)
            }
            DrawOutput::Png(path) => {
                let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
                self.draw_chart(&root, candles)
            }
        }
    }

    fn draw_chart<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>, candles: &[Candle]) -> Result<()> {
        root.fill(&WHITE).map_err(|e| Error::Plotters(e.to_string()))?;

        let total_height = root.dim_in_pixel().1 as f64;
        let (price_area, volume_area) = if self.options.show_volume {
            root.split_vertically((total_height * 0.75) as u32)
        } else {
            (root.clone(), root.clone())
        };

        self.draw_price_chart(&price_area, candles)?;
        if self.options.show_volume {
            self.draw_volume_chart(&volume_area, candles)?;
        }
        root.present().map_err(|e| Error::Plotters(e.to_string()))
    }

    fn draw_price_chart<DB: DrawingBackend>(&self, area: &DrawingArea<DB, Shift>, candles: &[Candle]) -> Result<()> {
        let first = candles.first().ok_or(Error::CandleDataEmpty)?;
        let last = candles.last().ok_or(Error::CandleDataEmpty)?;
        let (first_time, last_time) = (first.open_time(), last.close_time());

        let min_price = candles.iter().map(|c| c.low()).fold(f64::INFINITY, f64::min);
        let max_price = candles.iter().map(|c| c.high()).fold(f64::NEG_INFINITY, f64::max);
        let padding = (max_price - min_price) * 0.1;

        let trades = self.engine.trades();
        let metrics = self.engine.analyze();
        let balances = balance_points(first_time, trades, &metrics);
        let min_balance = balances.iter().map(|(_, b)| *b).fold(f64::INFINITY, f64::min);
        let max_balance = balances.iter().map(|(_, b)| *b).fold(f64::NEG_INFINITY, f64::max);
        // flat curve still needs a non-empty range
        let balance_padding = ((max_balance - min_balance) * 0.1).max(1.0);

        let title = self.options.title.clone().unwrap_or_else(|| format!("{} backtest", self.engine.symbol()));
        let area = area.margin(10, 10, 70, 70);
        let mut builder = ChartBuilder::on(&area);
        if !self.options.show_volume {
            builder.x_label_area_size(X_LABEL_SIZE);
        }

        let mut chart = builder
            .caption(title, ("sans-serif", 30).into_font())
            .y_label_area_size(Y_LABEL_SIZE)
            .right_y_label_area_size(Y_LABEL_SIZE)
            .build_cartesian_2d(first_time..last_time, min_price - padding..max_price + padding)
            .map_err(|e| Error::Plotters(e.to_string()))?
            .set_secondary_coord(
                first_time..last_time,
                min_balance - balance_padding..max_balance + balance_padding,
            );

        {
            let mut mesh = chart.configure_mesh();
            mesh.y_desc("Price").y_label_style(("sans-serif", Y_LABEL_SIZE)).y_labels(5);
            if self.options.show_volume {
                mesh.disable_x_axis();
            } else {
                mesh.x_desc("Time")
                    .x_label_style(("sans-serif", X_LABEL_SIZE))
                    .x_labels(candles.len() / 15);
            }
            mesh.draw().map_err(|e| Error::Plotters(e.to_string()))?;
        }

        let candle_width = {
            let available = area.dim_in_pixel().0 as f64 - (X_LABEL_SIZE * 2) as f64;
            (available / candles.len() as f64).max(3.0) as u32
        };
        chart
            .draw_series(candles.iter().map(|c| {
                let color = if c.close() >= c.open() { GREEN.filled() } else { RED.filled() };
                CandleStick::new(c.open_time(), c.open(), c.high(), c.low(), c.close(), color, color, candle_width)
            }))
            .map_err(|e| Error::Plotters(e.to_string()))?;

        let markers = fill_markers(trades);
        chart
            .draw_series(
                markers
                    .iter()
                    .filter(|m| m.buy)
                    .map(|m| TriangleMarker::new((m.time, m.price), 6, BLUE.filled())),
            )
            .map_err(|e| Error::Plotters(e.to_string()))?;
        chart
            .draw_series(
                markers
                    .iter()
                    .filter(|m| !m.buy)
                    .map(|m| Cross::new((m.time, m.price), 5, MAGENTA.stroke_width(2))),
            )
            .map_err(|e| Error::Plotters(e.to_string()))?;

        if self.options.show_metrics {
            chart
                .configure_secondary_axes()
                .y_desc("Balance")
                .label_style(("sans-serif", Y_LABEL_SIZE))
                .y_labels(5)
                .draw()
                .map_err(|e| Error::Plotters(e.to_string()))?;
            chart
                .draw_secondary_series(LineSeries::new(balances, BLACK.stroke_width(2)))
                .map_err(|e| Error::Plotters(e.to_string()))?;

            let summary = format!(
                "P&L: {:.2} | Win Rate: {:.2}% | Profit Factor: {:.2} | Max Drawdown: {:.2}%",
                metrics.total_pnl(),
                metrics.win_rate() * 100.0,
                metrics.profit_factor(),
                metrics.max_drawdown_pct()
            );
            area.draw(&Text::new(summary, (80, 40), ("sans-serif", 18).into_font()))
                .map_err(|e| Error::Plotters(e.to_string()))?;
        }

        Ok(())
    }

    fn draw_volume_chart<DB: DrawingBackend>(&self, area: &DrawingArea<DB, Shift>, candles: &[Candle]) -> Result<()> {
        let first_time = candles.first().ok_or(Error::CandleDataEmpty)?.open_time();
        let last_time = candles.last().ok_or(Error::CandleDataEmpty)?.close_time();
        let max_volume = candles.iter().map(|c| c.volume()).fold(0.0, f64::max);
        let bar = self.engine.config().interval.duration();
        let area = area.margin(0, 10, 70, 70);

        let mut chart = ChartBuilder::on(&area)
            .x_label_area_size(X_LABEL_SIZE)
            .y_label_area_size(Y_LABEL_SIZE)
            .build_cartesian_2d(first_time..last_time, 0.0..(max_volume * 1.1).max(1.0))
            .map_err(|e| Error::Plotters(e.to_string()))?;

        chart
            .configure_mesh()
            .x_desc("Time")
            .x_label_style(("sans-serif", X_LABEL_SIZE))
            .y_label_style(("sans-serif", Y_LABEL_SIZE))
            .x_labels(candles.len() / 15)
            .y_labels(3)
            .draw()
            .map_err(|e| Error::Plotters(e.to_string()))?;

        chart
            .draw_series(candles.iter().map(|c| {
                let color = if c.close() >= c.open() { GREEN.mix(0.3) } else { RED.mix(0.3) };
                Rectangle::new([(c.open_time(), 0.0), (c.open_time() + bar, c.volume())], color.filled())
            }))
            .map(|_| ())
            .map_err(|e| Error::Plotters(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BacktestConfig, Interval};
    use crate::strategy::Intent;
    use crate::utils::generate_sample_candles;

    fn engine() -> BacktestEngine {
        let candles = generate_sample_candles(30, 2, 100.0);
        let mut engine = BacktestEngine::new(BacktestConfig::new("BTCUSDT", Interval::H1), candles).unwrap();
        let mut step = 0;
        let mut strategy = |_: &crate::engine::Status, _: &Candle, _: &[Candle]| -> Result<Vec<Intent>> {
            step += 1;
            Ok(match step {
                5 => vec![Intent::long(2.0)],
                15 => vec![Intent::close_all()],
                _ => Vec::new(),
            })
        };
        engine.run(&mut strategy).unwrap();
        engine
    }

    #[test]
    fn markers_follow_fills() {
        let engine = engine();
        let markers = fill_markers(engine.trades());
        assert_eq!(markers.len(), 2);
        assert!(markers[0].buy);
        assert!(!markers[1].buy);
        assert_eq!(markers[1].time, engine.trades()[1].timestamp());
    }

    #[test]
    fn balance_curve_starts_at_capital() {
        let engine = engine();
        let metrics = engine.analyze();
        let start = engine.candles()[0].open_time();
        let points = balance_points(start, engine.trades(), &metrics);

        assert_eq!(points.len(), 3);
        assert_eq!(points[0], (start, 1_000.0));
        assert_eq!(points[2].1, metrics.final_capital());
    }
}
