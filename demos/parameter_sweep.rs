//! # Parallel MACD Parameters Optimization
//!
//! Replays the same candles once per MACD period triple and prints the ten best runs.
use trade_agent::optimizer::best_by_pnl;
use trade_agent::prelude::*;
use trade_agent::utils::generate_sample_candles;

const START: usize = 6;
const END: usize = 30;

struct MacdPeriods;

impl ParameterCombination for MacdPeriods {
    type Output = (usize, usize, usize);

    fn generate() -> Vec<Self::Output> {
        (START..=END)
            .step_by(2)
            .flat_map(|fast| {
                (fast + 2..=END + 10)
                    .step_by(2)
                    .flat_map(move |slow| (3..=12).step_by(3).map(move |signal| (fast, slow, signal)))
            })
            .collect()
    }
}

fn main() -> anyhow::Result<()> {
    let candles = generate_sample_candles(2_000, 7, 100.0);
    let config = BacktestConfig::new("BTCUSDT", Interval::H1).initial_capital(1_000.0);
    let optimizer = Optimizer::<MacdPeriods>::new(config, candles)?;

    let mut results = optimizer.with(|&(fast, slow, signal)| {
        Ok(MacdCross::new(fast, slow, signal)?.with_quantity(Some(1.0)))
    })?;

    if let Some(((fast, slow, signal), best)) = best_by_pnl(&results) {
        println!("best: fast {fast}, slow {slow}, signal {signal}");
        println!("{best}");
    }

    results.sort_by(|(_, a), (_, b)| b.total_pnl().total_cmp(&a.total_pnl()));
    println!("\n{:>4} {:>4} {:>6} {:>10} {:>8} {:>6}", "fast", "slow", "signal", "pnl", "win %", "trades");
    for ((fast, slow, signal), metrics) in results.iter().take(10) {
        println!(
            "{fast:>4} {slow:>4} {signal:>6} {:>10.2} {:>8.2} {:>6}",
            metrics.total_pnl(),
            metrics.win_rate() * 100.0,
            metrics.trade_count()
        );
    }

    Ok(())
}
