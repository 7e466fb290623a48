//! Renders a MACD backtest to `chart.svg`.
use trade_agent::prelude::*;
use trade_agent::utils::generate_sample_candles;

fn main() -> anyhow::Result<()> {
    let candles = generate_sample_candles(300, 3, 100.0);
    let mut engine = BacktestEngine::new(BacktestConfig::new("BTCUSDT", Interval::H1), candles)?;
    engine.run(&mut MacdCross::default().with_quantity(Some(2.0)).with_short(true))?;

    let options = DrawOptions::new(DrawOutput::Svg("chart.svg".into()))
        .title("BTCUSDT MACD crossover")
        .show_volume(true);
    Draw::new(&engine, options).plot()?;

    println!("{}", engine.analyze());
    Ok(())
}
