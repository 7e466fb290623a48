//! Backtest of the MACD crossover on a kline file, or on generated candles without one.
//!
//! ```bash
//! cargo run --example backtest_macd -- data/btc.json
//! ```
use trade_agent::prelude::*;
use trade_agent::utils::{generate_sample_candles, load_candles};

fn main() -> anyhow::Result<()> {
    let candles = match std::env::args().nth(1) {
        Some(path) => load_candles(path)?,
        None => generate_sample_candles(1_000, 42, 100.0),
    };

    let config = BacktestConfig::new("BTCUSDT", Interval::H1)
        .initial_capital(1_000.0)
        .leverage(2.0);
    let mut engine = BacktestEngine::new(config, candles)?;
    let mut strategy = MacdCross::default().with_short(true);
    engine.run(&mut strategy)?;

    for trade in engine.trades().iter().take(10) {
        println!("{}", serde_json::to_string(trade)?);
    }

    let metrics = engine.analyze();
    println!("{metrics}");
    println!("Sharpe Ratio: {:.3}", metrics.sharpe_ratio(0.0));

    Ok(())
}
