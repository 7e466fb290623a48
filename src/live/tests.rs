use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use super::*;
use crate::engine::{BacktestConfig, BacktestEngine, CandleBuilder, TradeKind};
use crate::strategy::MacdCross;
use crate::testing::{MockExchange, RecordingNotifier};
use crate::utils::generate_sample_candles;

const SYMBOL: &str = "BTCUSDT";

fn config() -> LiveConfig {
    let mut config = LiveConfig::new(SYMBOL, Interval::H1);
    config.lookback_days = 1;
    config.window = 24;
    config.retry = RetryPolicy::none();
    config.report_every = 0;
    config
}

fn mock() -> Arc<MockExchange> {
    Arc::new(MockExchange::new(SYMBOL, generate_sample_candles(47, 1, 100.0)))
}

async fn started(config: LiveConfig, exchange: Arc<MockExchange>, recorder: Arc<RecordingNotifier>) -> TradingAgent {
    let mut agent = TradingAgent::new(config, exchange, NotifyHandle::new(recorder)).unwrap();
    agent.start().await.unwrap();
    agent
}

async fn flushed(agent: &TradingAgent) {
    assert!(agent.notifier.flush(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn start_loads_precision_and_announces() {
    let exchange = Arc::new(
        MockExchange::new(SYMBOL, generate_sample_candles(47, 1, 100.0)).with_precision(SymbolPrecision::new(1, 1)),
    );
    let recorder = Arc::new(RecordingNotifier::default());
    let agent = started(config(), exchange, recorder.clone()).await;

    assert_eq!(agent.precision(), SymbolPrecision::new(1, 1));
    flushed(&agent).await;
    assert!(recorder.contains("trading agent started"));
}

#[tokio::test]
async fn start_survives_leverage_failure() {
    let exchange = mock();
    exchange.fail_prepare(ExchangeError::Rejected {
        code: -4028,
        msg: "Leverage is not valid".to_string(),
    });
    let recorder = Arc::new(RecordingNotifier::default());
    let agent = started(config(), exchange, recorder.clone()).await;

    flushed(&agent).await;
    assert!(recorder.contains("could not set leverage"));
    assert!(recorder.contains("trading agent started"));
}

#[tokio::test]
async fn start_fails_on_unknown_symbol() {
    let mut config = config();
    config.symbol = "DOGEUSDT".to_string();
    let recorder = Arc::new(RecordingNotifier::default());
    let mut agent = TradingAgent::new(config, mock(), NotifyHandle::new(recorder.clone())).unwrap();

    let result = agent.start().await;
    assert!(matches!(result, Err(Error::Exchange(ExchangeError::UnknownSymbol(_)))));
    flushed(&agent).await;
    assert!(recorder.contains("loading symbol precision failed"));
}

#[tokio::test]
async fn quantity_is_rounded_before_submission() {
    let exchange = mock();
    let mut agent = started(config(), exchange.clone(), Arc::new(RecordingNotifier::default())).await;

    let trade = agent.open_position(0.12345).await.unwrap();
    assert_eq!(exchange.orders(), vec![0.123]);
    assert_eq!(trade.quantity(), 0.123);
    assert_eq!(trade.source(), TradeSource::Live);
    assert_eq!(agent.ledger().position().size(), 0.123);
}

#[tokio::test]
async fn quantity_below_step_never_reaches_exchange() {
    let exchange = mock();
    let recorder = Arc::new(RecordingNotifier::default());
    let mut agent = started(config(), exchange.clone(), recorder.clone()).await;

    let result = agent.open_position(0.0001).await;
    assert!(matches!(result, Err(Error::PrecisionMismatch { .. })));
    assert_eq!(exchange.order_attempts(), 0);
    assert!(agent.trades().is_empty());

    flushed(&agent).await;
    assert!(!recorder.contains("failed"));
}

#[tokio::test]
async fn close_when_flat_fails_locally() {
    let exchange = mock();
    let mut agent = started(config(), exchange.clone(), Arc::new(RecordingNotifier::default())).await;

    assert!(matches!(agent.close_position(-1.0).await, Err(Error::NoOpenPosition)));
    assert!(matches!(agent.apply(Intent::close_all()).await, Err(Error::NoOpenPosition)));
    assert_eq!(exchange.order_attempts(), 0);
}

#[tokio::test]
async fn long_then_close_realizes_pnl() {
    let exchange = mock();
    let mut agent = started(config(), exchange.clone(), Arc::new(RecordingNotifier::default())).await;

    exchange.set_cursor(10);
    let open = agent.open_long(2.0).await.unwrap();
    exchange.set_cursor(20);
    let close = agent.apply(Intent::close_all()).await.unwrap();

    assert_eq!(close.quantity(), -2.0);
    assert_eq!(close.size_after(), 0.0);
    let expected = 2.0 * (close.price() - open.price());
    assert!((close.realized_pnl() - expected).abs() < 1e-9);
    assert!(agent.status().is_flat());
    assert_eq!(exchange.remote_size(), 0.0);
}

#[tokio::test]
async fn rejected_order_leaves_ledger_unchanged() {
    let exchange = mock();
    let recorder = Arc::new(RecordingNotifier::default());
    let mut config = config();
    config.retry = RetryPolicy::new(3);
    let mut agent = started(config, exchange.clone(), recorder.clone()).await;

    agent.open_long(1.0).await.unwrap();
    let before = agent.status();

    exchange.fail_next_order(ExchangeError::Rejected {
        code: -2019,
        msg: "Margin is insufficient.".to_string(),
    });
    let result = agent.open_long(1.0).await;
    assert!(matches!(result, Err(Error::Exchange(ExchangeError::Rejected { code: -2019, .. }))));

    // a rejection is final, nothing was resubmitted
    assert_eq!(exchange.order_attempts(), 2);
    assert_eq!(agent.trades().len(), 1);
    assert_eq!(agent.status(), before);

    flushed(&agent).await;
    assert!(recorder.contains("placing market order failed"));
}

#[tokio::test(start_paused = true)]
async fn connection_failure_is_resubmitted() {
    let exchange = mock();
    let mut config = config();
    config.retry = RetryPolicy::new(3);
    let mut agent = started(config, exchange.clone(), Arc::new(RecordingNotifier::default())).await;

    exchange.fail_next_order(ExchangeError::Connect("connection refused".to_string()));
    let trade = agent.open_long(1.0).await.unwrap();

    assert_eq!(exchange.order_attempts(), 2);
    assert_eq!(exchange.orders(), vec![1.0]);
    assert_eq!(trade.size_after(), 1.0);
}

#[tokio::test(start_paused = true)]
async fn timeout_is_never_resubmitted() {
    let exchange = mock();
    let mut config = config();
    config.retry = RetryPolicy::new(3);
    let mut agent = started(config, exchange.clone(), Arc::new(RecordingNotifier::default())).await;

    exchange.fail_next_order(ExchangeError::Timeout);
    assert!(matches!(
        agent.open_long(1.0).await,
        Err(Error::Exchange(ExchangeError::Timeout))
    ));
    assert_eq!(exchange.order_attempts(), 1);
    assert!(agent.trades().is_empty());
}

#[tokio::test]
async fn status_adopts_exchange_position() {
    let exchange = mock();
    let recorder = Arc::new(RecordingNotifier::default());
    let mut agent = started(config(), exchange.clone(), recorder.clone()).await;

    let fill = agent.open_long(1.0).await.unwrap();
    exchange.set_remote_position(0.5, Some(fill.price()));

    let status = agent.get_status().await.unwrap();
    assert_eq!(status.position.size(), 0.5);

    let adjustment = agent.trades().last().unwrap();
    assert_eq!(adjustment.kind(), TradeKind::Adjustment);
    assert_eq!(adjustment.quantity(), -0.5);
    assert_eq!(agent.trades().len(), 2);

    flushed(&agent).await;
    assert!(recorder.contains("position mismatch"));
}

#[tokio::test]
async fn status_matches_exchange_without_adjustment() {
    let exchange = mock();
    let mut agent = started(config(), exchange.clone(), Arc::new(RecordingNotifier::default())).await;

    agent.open_short(1.5).await.unwrap();
    let status = agent.get_status().await.unwrap();
    assert_eq!(status.position.size(), -1.5);
    assert_eq!(agent.trades().len(), 1);
}

#[tokio::test]
async fn silent_exchange_keeps_local_state() {
    let exchange = Arc::new(MockExchange::new(SYMBOL, generate_sample_candles(47, 1, 100.0)).without_position_reports());
    let mut agent = started(config(), exchange.clone(), Arc::new(RecordingNotifier::default())).await;

    agent.open_long(1.0).await.unwrap();
    exchange.set_remote_position(0.0, None);
    let status = agent.get_status().await.unwrap();
    assert_eq!(status.position.size(), 1.0);
}

#[tokio::test]
async fn fractional_leverage_is_rejected() {
    for leverage in [0.5, 2.5] {
        let mut config = config();
        config.leverage = leverage;
        let result = TradingAgent::new(config, mock(), NotifyHandle::new(Arc::new(RecordingNotifier::default())));
        assert!(matches!(result, Err(Error::InvalidLeverage(l)) if l == leverage));
    }

    let mut config = config();
    config.leverage = 3.0;
    let agent = TradingAgent::new(config, mock(), NotifyHandle::new(Arc::new(RecordingNotifier::default()))).unwrap();
    assert_eq!(agent.status().leverage, 3.0);
}

#[tokio::test]
async fn balance_divergence_is_notified_once() {
    let exchange = mock();
    let recorder = Arc::new(RecordingNotifier::default());
    let mut agent = started(config(), exchange.clone(), recorder.clone()).await;

    // fills move both sides by the same realized pnl
    exchange.set_cursor(10);
    agent.open_long(2.0).await.unwrap();
    exchange.set_cursor(30);
    agent.apply(Intent::close_all()).await.unwrap();
    agent.get_status().await.unwrap();
    flushed(&agent).await;
    assert!(!recorder.contains("balance mismatch"));

    exchange.shift_balance(-25.0);
    let status = agent.get_status().await.unwrap();
    agent.get_status().await.unwrap();
    flushed(&agent).await;

    let warnings = recorder.messages().iter().filter(|m| m.contains("balance mismatch")).count();
    assert_eq!(warnings, 1);
    // the ledger keeps its own capital
    assert_eq!(status.capital, agent.ledger().wallet().balance());
    assert_eq!(agent.trades().len(), 2);
}

#[tokio::test]
async fn failing_notifier_never_blocks_orders() {
    let exchange = mock();
    let recorder = Arc::new(RecordingNotifier::failing());
    let mut agent = started(config(), exchange.clone(), recorder.clone()).await;

    let trade = agent.open_long(1.0).await.unwrap();
    assert_eq!(trade.size_after(), 1.0);
    assert_eq!(exchange.orders(), vec![1.0]);
    assert_eq!(agent.trades().len(), 1);

    flushed(&agent).await;
    assert!(recorder.attempts() >= 2);
    assert!(recorder.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn slow_notifier_never_delays_orders() {
    let exchange = mock();
    let recorder = Arc::new(RecordingNotifier::slow(Duration::from_secs(60)));
    let mut agent = started(config(), exchange.clone(), recorder.clone()).await;

    let started_at = tokio::time::Instant::now();
    agent.open_long(1.0).await.unwrap();
    agent.apply(Intent::close_all()).await.unwrap();
    assert!(started_at.elapsed() < Duration::from_secs(60));
    assert_eq!(agent.trades().len(), 2);
    assert!(agent.status().is_flat());
}

#[tokio::test]
async fn fetch_returns_requested_days() {
    let exchange = mock();
    let agent = started(config(), exchange.clone(), Arc::new(RecordingNotifier::default())).await;

    let candles = agent.fetch_historical_data(SYMBOL, Interval::H1, 1).await.unwrap();
    assert_eq!(candles.len(), 24);

    let too_much = agent.fetch_historical_data(SYMBOL, Interval::H1, 3).await;
    assert!(matches!(
        too_much,
        Err(Error::InsufficientHistory {
            requested: 72,
            available: 48
        })
    ));
}

#[tokio::test]
async fn fetch_failure_is_reported() {
    let exchange = mock();
    let recorder = Arc::new(RecordingNotifier::default());
    let agent = started(config(), exchange.clone(), recorder.clone()).await;

    exchange.fail_next_fetch(ExchangeError::Server {
        status: 503,
        body: "busy".to_string(),
    });
    assert!(agent.fetch_historical_data(SYMBOL, Interval::H1, 1).await.is_err());

    flushed(&agent).await;
    assert!(recorder.contains("fetching candles failed"));
}

#[test]
fn open_candle_is_dropped() {
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap();
    let closed = CandleBuilder::builder()
        .open(100.0)
        .high(101.0)
        .low(99.0)
        .close(100.5)
        .open_time(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap())
        .close_time(Utc.with_ymd_and_hms(2024, 1, 1, 9, 59, 59).unwrap())
        .build()
        .unwrap();
    let open = CandleBuilder::builder()
        .open(100.5)
        .high(101.0)
        .low(100.0)
        .close(100.8)
        .open_time(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap())
        .close_time(Utc.with_ymd_and_hms(2024, 1, 1, 10, 59, 59).unwrap())
        .build()
        .unwrap();

    assert_eq!(closed_candles(vec![closed, open], now), vec![closed]);
}

#[test]
fn next_tick_waits_for_boundary_and_settle() {
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 15, 0).unwrap();
    let wait = until_next_tick(Interval::H1, Duration::from_secs(2), now);
    assert_eq!(wait, Duration::from_secs(45 * 60 + 2));

    let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 4, 30).unwrap();
    let wait = until_next_tick(Interval::M5, Duration::ZERO, now);
    assert_eq!(wait, Duration::from_secs(30));
}

#[tokio::test]
async fn tick_applies_intents_in_order() {
    let exchange = mock();
    let mut agent = started(config(), exchange.clone(), Arc::new(RecordingNotifier::default())).await;

    let mut seen = Vec::new();
    let mut strategy = |status: &Status, candle: &Candle, window: &[Candle]| -> Result<Vec<Intent>> {
        seen.push((window.len(), window.last() == Some(candle)));
        if status.is_flat() {
            Ok(vec![Intent::short(1.0), Intent::close(0.4)])
        } else {
            Ok(Vec::new())
        }
    };
    agent.tick(&mut strategy).await.unwrap();
    agent.tick(&mut strategy).await.unwrap();

    assert_eq!(seen, vec![(24, true), (24, true)]);
    assert_eq!(exchange.orders(), vec![-1.0, 0.4]);
    assert!((agent.ledger().position().size() + 0.6).abs() < 1e-12);
}

#[tokio::test]
async fn report_every_n_ticks() {
    let exchange = mock();
    let recorder = Arc::new(RecordingNotifier::default());
    let mut config = config();
    config.report_every = 2;
    let mut agent = started(config, exchange, recorder.clone()).await;

    let mut idle = |_: &Status, _: &Candle, _: &[Candle]| -> Result<Vec<Intent>> { Ok(Vec::new()) };
    agent.tick(&mut idle).await.unwrap();
    flushed(&agent).await;
    assert!(!recorder.contains("Strategy Report"));

    agent.tick(&mut idle).await.unwrap();
    flushed(&agent).await;
    assert!(recorder.contains("=== BTCUSDT Strategy Report ==="));
}

#[tokio::test(start_paused = true)]
async fn stop_waits_for_the_order_in_flight() {
    let exchange = mock();
    let recorder = Arc::new(RecordingNotifier::default());
    let mut agent = started(config(), exchange.clone(), recorder.clone()).await;

    let shutdown = ShutdownSignal::new();
    let stopper = shutdown.clone();
    let mut calls = 0;
    let mut strategy = |_: &Status, _: &Candle, _: &[Candle]| -> Result<Vec<Intent>> {
        calls += 1;
        // the stop arrives while this tick still has an order to send
        stopper.trigger();
        Ok(vec![Intent::long(1.0)])
    };
    agent.run(&mut strategy, &shutdown).await.unwrap();

    assert_eq!(calls, 1);
    assert_eq!(exchange.orders(), vec![1.0]);
    assert_eq!(agent.ledger().position().size(), 1.0);
    assert!(recorder.contains("trading agent stopped"));
}

#[tokio::test(start_paused = true)]
async fn tick_errors_do_not_stop_the_loop() {
    let exchange = mock();
    let mut agent = started(config(), exchange.clone(), Arc::new(RecordingNotifier::default())).await;
    exchange.fail_next_fetch(ExchangeError::Timeout);

    let shutdown = ShutdownSignal::new();
    let stopper = shutdown.clone();
    let mut calls = 0;
    let mut strategy = |_: &Status, _: &Candle, _: &[Candle]| -> Result<Vec<Intent>> {
        calls += 1;
        stopper.trigger();
        Ok(Vec::new())
    };
    agent.run(&mut strategy, &shutdown).await.unwrap();

    // first tick failed on fetch, second one reached the strategy
    assert_eq!(calls, 1);
}

#[tokio::test]
async fn live_replay_matches_backtest() {
    let candles = generate_sample_candles(200, 42, 100.0);
    let window = 24;

    // both sides only act on a full window so early candles cannot diverge
    let gated = move |mut inner: MacdCross| {
        move |status: &Status, candle: &Candle, recent: &[Candle]| -> Result<Vec<Intent>> {
            if recent.len() < window {
                return Ok(Vec::new());
            }
            inner.on_candle(status, candle, recent)
        }
    };
    let macd = MacdCross::new(6, 13, 5).unwrap().with_short(true);

    let mut backtest = BacktestEngine::new(
        BacktestConfig::new(SYMBOL, Interval::H1).window(window).close_at_end(false),
        candles.clone(),
    )
    .unwrap();
    backtest.run(&mut gated(macd.clone())).unwrap();
    assert!(backtest.trades().len() > 2);

    let exchange = Arc::new(MockExchange::new(SYMBOL, candles.clone()));
    let mut agent = started(config(), exchange.clone(), Arc::new(RecordingNotifier::default())).await;
    let mut strategy = gated(macd);
    for cursor in window - 1..candles.len() {
        exchange.set_cursor(cursor);
        agent.tick(&mut strategy).await.unwrap();
    }

    assert_eq!(agent.trades().len(), backtest.trades().len());
    for (live, replay) in agent.trades().iter().zip(backtest.trades()) {
        assert_eq!(live.timestamp(), replay.timestamp());
        assert_eq!(live.quantity(), replay.quantity());
        assert_eq!(live.price(), replay.price());
        assert_eq!(live.size_after(), replay.size_after());
        assert!((live.realized_pnl() - replay.realized_pnl()).abs() < 1e-9);
    }
    assert_eq!(agent.status().position, backtest.get_status().position);
}
