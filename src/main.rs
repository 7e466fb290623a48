use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use trade_agent::agent::Agent;
use trade_agent::config::Credentials;
use trade_agent::engine::{BacktestConfig, BacktestEngine, Interval};
use trade_agent::exchange::{BinanceFutures, RetryPolicy};
use trade_agent::live::{LiveConfig, ShutdownSignal, TradingAgent};
use trade_agent::notify::{NotifyHandle, TelegramNotifier};
use trade_agent::strategy::MacdCross;
use trade_agent::utils::{init_subscriber, load_candles};

/// Trade one symbol with a MACD crossover, live or over a kline file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Futures symbol, e.g. BTCUSDT.
    #[arg(short, long, default_value = "BTCUSDT")]
    symbol: String,
    /// Bar interval: 1m, 5m, 15m, 1h, 4h or 1d.
    #[arg(short, long, default_value = "1h")]
    interval: Interval,
    #[arg(long, default_value_t = 1.0)]
    leverage: f64,
    /// Capital the ledger starts from.
    #[arg(long, default_value_t = 1_000.0)]
    capital: f64,
    /// Days of candles fetched on every tick.
    #[arg(long, default_value_t = 7)]
    lookback_days: u32,
    /// Fixed order size. Without it every entry uses all available capital.
    #[arg(short, long)]
    quantity: Option<f64>,
    #[arg(long, default_value_t = 12)]
    fast: usize,
    #[arg(long, default_value_t = 26)]
    slow: usize,
    #[arg(long, default_value_t = 9)]
    signal: usize,
    /// Open shorts on bearish crossings.
    #[arg(long)]
    allow_short: bool,
    /// Ticks between two reports, 0 disables them.
    #[arg(long, default_value_t = 24)]
    report_every: u32,
    /// Attempts per exchange request.
    #[arg(long, default_value_t = 3)]
    retries: u32,
    /// Use the futures testnet.
    #[arg(long)]
    testnet: bool,
    /// Write JSON logs to <LOG_DIR>/<SYMBOL>.log instead of stdout.
    #[arg(long)]
    log_dir: Option<PathBuf>,
    /// Replay a kline JSON file instead of trading live.
    #[arg(long, value_name = "FILE")]
    backtest: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_subscriber(cli.log_dir.as_deref(), &cli.symbol)?;

    let mut strategy = MacdCross::new(cli.fast, cli.slow, cli.signal)?
        .with_quantity(cli.quantity)
        .with_short(cli.allow_short);

    let agent = match &cli.backtest {
        Some(path) => backtest_agent(&cli, path)?,
        None => live_agent(&cli)?,
    };

    match agent {
        Agent::Backtest(mut engine) => {
            engine.run(&mut strategy)?;
            println!("{}", engine.analyze());
        }
        Agent::Live(mut agent) => {
            let shutdown = ShutdownSignal::with_ctrl_c();
            agent.start().await.context("starting the trading agent")?;
            agent.run(&mut strategy, &shutdown).await?;
        }
    }
    Ok(())
}

fn backtest_agent(cli: &Cli, path: &Path) -> Result<Agent> {
    let candles = load_candles(path).with_context(|| format!("loading {}", path.display()))?;
    info!(candles = candles.len(), file = %path.display(), "replaying klines");
    let config = BacktestConfig::new(&cli.symbol, cli.interval)
        .initial_capital(cli.capital)
        .leverage(cli.leverage);
    Ok(BacktestEngine::new(config, candles)?.into())
}

fn live_agent(cli: &Cli) -> Result<Agent> {
    // fail before any network I/O when a secret is missing
    let credentials = Credentials::from_env()?;

    let exchange = if cli.testnet {
        BinanceFutures::testnet(&credentials.api_key, &credentials.secret_key)?
    } else {
        BinanceFutures::new(&credentials.api_key, &credentials.secret_key)?
    };
    let notifier = TelegramNotifier::new(&credentials.chat_token, &credentials.chat_id)?;

    let mut config = LiveConfig::new(&cli.symbol, cli.interval);
    config.leverage = cli.leverage;
    config.initial_capital = cli.capital;
    config.lookback_days = cli.lookback_days;
    config.report_every = cli.report_every;
    config.retry = RetryPolicy::new(cli.retries);

    let agent = TradingAgent::new(config, Arc::new(exchange), NotifyHandle::new(Arc::new(notifier)))?;
    Ok(agent.into())
}
