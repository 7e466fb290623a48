//! Strategy parameter optimization.
//!
//! The `Optimizer` replays the same candles once per parameter combination, spread over
//! all cores. Every replay owns its engine and ledger, so runs cannot observe each other.
//! `ParameterCombination` defines which combinations are tried.

use std::marker::PhantomData;
use std::sync::Arc;

use rayon::prelude::*;

use crate::engine::{BacktestConfig, BacktestEngine, Candle, validate_sequence};
use crate::errors::Result;
use crate::metrics::Metrics;
use crate::strategy::Strategy;

/// Trait defining how to generate parameter combinations for optimization.
///
/// The associated type `Output` is a single combination, e.g. a tuple of periods.
pub trait ParameterCombination: Sync {
    type Output: Clone + Send + Sync;

    /// Every combination to test.
    fn generate() -> Vec<Self::Output>;
}

/// Runs one backtest per parameter combination, in parallel.
pub struct Optimizer<PC: ParameterCombination> {
    config: BacktestConfig,
    data: Arc<[Candle]>,
    _marker: PhantomData<PC>,
}

impl<PC: ParameterCombination> From<&BacktestEngine> for Optimizer<PC> {
    fn from(engine: &BacktestEngine) -> Self {
        Self {
            config: engine.config().clone(),
            data: Arc::from(engine.candles()),
            _marker: PhantomData,
        }
    }
}

impl<PC: ParameterCombination> Optimizer<PC> {
    /// ### Arguments
    /// * `config` - Settings shared by every run.
    /// * `data` - Candles, strictly increasing in open time.
    pub fn new(config: BacktestConfig, data: impl Into<Arc<[Candle]>>) -> Result<Self> {
        let data = data.into();
        validate_sequence(&data)?;
        Ok(Self {
            config,
            data,
            _marker: PhantomData,
        })
    }

    /// Builds a strategy from each combination and replays the candles through it.
    ///
    /// ### Arguments
    /// * `build` - Turns one combination into a fresh strategy.
    ///
    /// ### Returns
    /// Each combination with the metrics of its run, in generation order, or the
    /// first error raised by a build or a run.
    pub fn with<S, C>(&self, build: C) -> Result<Vec<(PC::Output, Metrics)>>
    where
        S: Strategy,
        C: Fn(&PC::Output) -> Result<S> + Sync,
    {
        let combinations = PC::generate();
        let chunk_size = combinations.len().div_ceil(num_cpus::get()).max(1);

        combinations
            .par_chunks(chunk_size)
            .map(|chunk| {
                let mut engine = BacktestEngine::new(self.config.clone(), Arc::clone(&self.data))?;
                let mut results = Vec::with_capacity(chunk.len());

                for params in chunk {
                    let mut strategy = build(params)?;
                    engine.run(&mut strategy)?;
                    results.push((params.clone(), engine.analyze()));
                    engine.reset()?;
                }
                Ok(results)
            })
            .collect::<Result<Vec<_>>>()
            .map(|chunks| chunks.into_iter().flatten().collect())
    }
}

/// Result with the highest total P&L.
pub fn best_by_pnl<P>(results: &[(P, Metrics)]) -> Option<&(P, Metrics)> {
    results
        .iter()
        .max_by(|(_, a), (_, b)| a.total_pnl().total_cmp(&b.total_pnl()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Interval;
    use crate::errors::Error;
    use crate::strategy::MacdCross;
    use crate::utils::generate_sample_candles;

    struct MacdPeriods;

    impl ParameterCombination for MacdPeriods {
        type Output = (usize, usize, usize);

        fn generate() -> Vec<Self::Output> {
            (3..=5)
                .flat_map(|fast| (8..=10).flat_map(move |slow| (3..=4).map(move |signal| (fast, slow, signal))))
                .collect()
        }
    }

    fn config() -> BacktestConfig {
        BacktestConfig::new("BTCUSDT", Interval::H1).window(50)
    }

    fn build(&(fast, slow, signal): &(usize, usize, usize)) -> Result<MacdCross> {
        Ok(MacdCross::new(fast, slow, signal)?.with_quantity(Some(1.0)).with_short(true))
    }

    #[test]
    fn every_combination_is_replayed() {
        let optimizer = Optimizer::<MacdPeriods>::new(config(), generate_sample_candles(300, 3, 100.0)).unwrap();
        let results = optimizer.with(build).unwrap();

        assert_eq!(results.len(), 18);
        let params = results.iter().map(|(p, _)| *p).collect::<Vec<_>>();
        assert_eq!(params, MacdPeriods::generate());
        assert!(results.iter().any(|(_, m)| m.trade_count() > 0));
    }

    #[test]
    fn runs_match_a_standalone_backtest() {
        let candles = generate_sample_candles(300, 3, 100.0);
        let optimizer = Optimizer::<MacdPeriods>::new(config(), candles.clone()).unwrap();
        let results = optimizer.with(build).unwrap();

        for (params, metrics) in results.iter().step_by(5) {
            let mut engine = BacktestEngine::new(config(), candles.clone()).unwrap();
            engine.run(&mut build(params).unwrap()).unwrap();
            assert_eq!(metrics, &engine.analyze());
        }
    }

    #[test]
    fn build_errors_surface() {
        let optimizer = Optimizer::<MacdPeriods>::new(config(), generate_sample_candles(50, 3, 100.0)).unwrap();
        let result = optimizer.with(|_| -> Result<MacdCross> { Err(Error::Msg("no".to_string())) });
        assert!(matches!(result, Err(Error::Msg(_))));
    }

    #[test]
    fn best_result() {
        let engine = BacktestEngine::new(config(), generate_sample_candles(300, 3, 100.0)).unwrap();
        let results = Optimizer::<MacdPeriods>::from(&engine).with(build).unwrap();
        let (_, best) = best_by_pnl(&results).unwrap();
        assert!(results.iter().all(|(_, m)| m.total_pnl() <= best.total_pnl()));
    }
}
