use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use regime_bot::config::{self, BotConfig};
use regime_bot::core::backtest::{BacktestData, BacktestEngine, SymbolSeries};
use regime_bot::logging;
use regime_bot::types::{Timeframe, OHLCV};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignore if missing).
    let _ = dotenvy::dotenv();

    let config_dir = std::env::var("BOT_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"));

    let config = config::load_config(&config_dir)?;

    // Hold the guard for the process lifetime so the file writer flushes.
    let _guard = logging::init_tracing(&config.app.logging)?;

    info!(
        symbols = ?config.app.symbols,
        primary = %config.app.primary_timeframe,
        leverage = %config.risk.leverage,
        adaptive = config.adaptive.enabled,
        "regime bot starting"
    );

    // -----------------------------------------------------------------------
    // Market data
    // -----------------------------------------------------------------------

    let data = load_backtest_data(&config).await?;

    // -----------------------------------------------------------------------
    // Engine and persisted trade history
    // -----------------------------------------------------------------------

    let mut engine = BacktestEngine::new(&config);

    if let Some(path) = config.adaptive.state_file.as_deref() {
        if Path::new(path).exists() {
            let restored = engine
                .pipeline_mut()
                .tracker_mut()
                .load_from_file(path)
                .with_context(|| format!("failed to restore trade history from {path}"))?;
            info!(path, trades = restored, "trade history restored");
        } else {
            info!(path, "no trade history to restore");
        }
    }

    // -----------------------------------------------------------------------
    // Run, with Ctrl+C stopping the replay early
    // -----------------------------------------------------------------------

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received, stopping replay...");
                signal_token.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for Ctrl+C"),
        }
    });

    let run_token = shutdown.clone();
    let (engine, report) = tokio::task::spawn_blocking(move || {
        let report = engine.run(&data, &run_token);
        (engine, report)
    })
    .await
    .context("backtest task panicked")?;
    let report = report?;

    println!("{report}");
    for line in engine.pipeline().adaptive_state().status.lines() {
        info!("{line}");
    }

    if let Some(path) = config.adaptive.state_file.as_deref() {
        engine
            .pipeline()
            .tracker()
            .save_to_file(path)
            .with_context(|| format!("failed to save trade history to {path}"))?;
    }

    info!("shutdown complete");
    Ok(())
}

// ---------------------------------------------------------------------------
// Candle loading
// ---------------------------------------------------------------------------

/// Load every configured symbol concurrently. Files are named
/// `<data_dir>/<SYMBOL>_<interval>.json` and hold an array of candles.
async fn load_backtest_data(config: &BotConfig) -> Result<BacktestData> {
    let data_dir = PathBuf::from(&config.backtest.data_dir);

    let loads = config.app.symbols.iter().map(|symbol| {
        let data_dir = data_dir.clone();
        async move {
            let primary = read_candles(&data_dir, symbol, config.app.primary_timeframe)
                .await?
                .with_context(|| {
                    format!(
                        "missing {} candles for {symbol} in {}",
                        config.app.primary_timeframe,
                        data_dir.display()
                    )
                })?;

            let mut higher = BTreeMap::new();
            for &tf in &config.app.higher_timeframes {
                match read_candles(&data_dir, symbol, tf).await? {
                    Some(candles) => {
                        higher.insert(tf, candles);
                    }
                    None => warn!(symbol = %symbol, timeframe = %tf, "no higher-timeframe candles"),
                }
            }

            info!(
                symbol = %symbol,
                bars = primary.len(),
                higher_timeframes = higher.len(),
                "candles loaded"
            );
            Ok::<_, anyhow::Error>((symbol.clone(), SymbolSeries { primary, higher }))
        }
    });

    let series = try_join_all(loads).await?;
    Ok(series.into_iter().collect())
}

/// `Ok(None)` when the file does not exist.
async fn read_candles(data_dir: &Path, symbol: &str, tf: Timeframe) -> Result<Option<Vec<OHLCV>>> {
    let path = data_dir.join(format!("{symbol}_{}.json", tf.as_binance_interval()));
    let raw = match tokio::fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    let candles: Vec<OHLCV> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(candles))
}
