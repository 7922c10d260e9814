pub mod types;
pub mod validate;

pub use types::*;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Load and merge all config JSON files into a single [`BotConfig`],
/// then apply environment variable overrides and validate.
///
/// Expected directory layout:
/// ```text
/// config/
///   app.json
///   indicators.json
///   strategy.json
///   risk.json
///   adaptive.json
///   backtest.json   (optional, defaults apply)
/// ```
///
/// # Environment variable overrides
///
/// | Env Var                    | Config Field                               |
/// |----------------------------|--------------------------------------------|
/// | `BOT_LEVERAGE`             | `risk.leverage`                            |
/// | `MAX_POSITION_PCT`         | `risk.max_position_pct`                    |
/// | `DAILY_LOSS_LIMIT_PCT`     | `risk.daily_loss_limit_pct`                |
/// | `MAX_DRAWDOWN_PCT`         | `risk.max_drawdown_pct`                    |
/// | `MAX_OPEN_POSITIONS`       | `risk.max_open_positions`                  |
/// | `ADAPTIVE_ENABLED`         | `adaptive.enabled`                         |
/// | `MTF_REGIME_CONFIRMATION`  | `strategy.mtf_confirmation.enabled`        |
/// | `MTF_REGIME_MODE`          | `strategy.mtf_confirmation.mode`           |
/// | `REGIME_CHANGE_WAIT_BARS`  | `strategy.regime_change_wait_bars`         |
/// | `BACKTEST_DATA_DIR`        | `backtest.data_dir`                        |
/// | `BOT_LOG_DIR`              | `app.logging.log_dir`                      |
pub fn load_config(config_dir: &Path) -> Result<BotConfig> {
    let read = |name: &str| -> Result<String> {
        let path = config_dir.join(name);
        std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))
    };

    let app: AppConfig =
        serde_json::from_str(&read("app.json")?).context("parsing app.json")?;

    let indicators: IndicatorParams =
        serde_json::from_str(&read("indicators.json")?).context("parsing indicators.json")?;

    let strategy: StrategyConfig =
        serde_json::from_str(&read("strategy.json")?).context("parsing strategy.json")?;

    let risk: RiskConfig =
        serde_json::from_str(&read("risk.json")?).context("parsing risk.json")?;

    let adaptive: AdaptiveConfig =
        serde_json::from_str(&read("adaptive.json")?).context("parsing adaptive.json")?;

    // Backtest config is optional.
    let backtest: BacktestConfig = match read("backtest.json") {
        Ok(contents) => serde_json::from_str(&contents).context("parsing backtest.json")?,
        Err(_) => BacktestConfig::default(),
    };

    let mut config = BotConfig {
        app,
        indicators,
        strategy,
        risk,
        adaptive,
        backtest,
    };

    apply_env_overrides(&mut config);
    validate::validate_config(&config)?;

    Ok(config)
}

// ---------------------------------------------------------------------------
// Environment variable overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides to the loaded config.
///
/// Only non-empty env vars take effect. Parse failures are skipped
/// (the JSON value remains).
fn apply_env_overrides(config: &mut BotConfig) {
    // -- Risk ----------------------------------------------------------------
    if let Some(val) = env_decimal("BOT_LEVERAGE") {
        info!(%val, "env override: BOT_LEVERAGE");
        config.risk.leverage = val;
    }

    if let Some(val) = env_decimal("MAX_POSITION_PCT") {
        info!(%val, "env override: MAX_POSITION_PCT");
        config.risk.max_position_pct = val;
    }

    if let Some(val) = env_decimal("DAILY_LOSS_LIMIT_PCT") {
        info!(%val, "env override: DAILY_LOSS_LIMIT_PCT");
        config.risk.daily_loss_limit_pct = val;
    }

    if let Some(val) = env_decimal("MAX_DRAWDOWN_PCT") {
        info!(%val, "env override: MAX_DRAWDOWN_PCT");
        config.risk.max_drawdown_pct = val;
    }

    if let Some(val) = env_parse::<usize>("MAX_OPEN_POSITIONS") {
        info!(val, "env override: MAX_OPEN_POSITIONS");
        config.risk.max_open_positions = val;
    }

    // -- Adaptive / regime ---------------------------------------------------
    if let Some(val) = env_bool("ADAPTIVE_ENABLED") {
        info!(enabled = val, "env override: ADAPTIVE_ENABLED");
        config.adaptive.enabled = val;
    }

    if let Some(val) = env_bool("MTF_REGIME_CONFIRMATION") {
        info!(enabled = val, "env override: MTF_REGIME_CONFIRMATION");
        config.strategy.mtf_confirmation.enabled = val;
    }

    if let Some(val) = env_string("MTF_REGIME_MODE") {
        let mode = match val.to_lowercase().as_str() {
            "binary" => Some(MtfMode::Binary),
            "graduated" => Some(MtfMode::Graduated),
            _ => None,
        };
        if let Some(mode) = mode {
            info!(?mode, "env override: MTF_REGIME_MODE");
            config.strategy.mtf_confirmation.mode = mode;
        }
    }

    if let Some(val) = env_parse::<u64>("REGIME_CHANGE_WAIT_BARS") {
        info!(val, "env override: REGIME_CHANGE_WAIT_BARS");
        config.strategy.regime_change_wait_bars = val;
    }

    // -- Paths ---------------------------------------------------------------
    if let Some(val) = env_string("BACKTEST_DATA_DIR") {
        info!(dir = %val, "env override: BACKTEST_DATA_DIR");
        config.backtest.data_dir = val;
    }

    if let Some(val) = env_string("BOT_LOG_DIR") {
        info!(dir = %val, "env override: BOT_LOG_DIR");
        config.app.logging.log_dir = val;
    }
}

/// Read a non-empty env var as a `String`.
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Read a non-empty env var as a bool (`true`, `1`, `yes` → true).
fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

/// Read a non-empty env var and parse it as `T`.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

/// Read a non-empty env var and parse it as `Decimal`.
fn env_decimal(key: &str) -> Option<Decimal> {
    env_string(key).and_then(|v| Decimal::from_str(&v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serial_test::serial;
    use std::path::PathBuf;

    fn project_config_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("config")
    }

    // -----------------------------------------------------------------------
    // Helper: write a minimal set of config JSON files to a temp dir.
    // -----------------------------------------------------------------------

    fn write_test_configs(dir: &Path) {
        std::fs::write(
            dir.join("app.json"),
            r#"{
                "logging": { "log_dir": "logs" },
                "symbols": ["BTCUSDT", "ETHUSDT"],
                "primary_timeframe": "15m",
                "higher_timeframes": ["1h", "4h"]
            }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("indicators.json"),
            r#"{
                "ema_fast": 5, "ema_slow": 13, "ema_trend": 21,
                "rsi_period": 8, "rsi_oversold": "25", "rsi_overbought": "75",
                "macd_fast": 5, "macd_slow": 13, "macd_signal": 5,
                "bb_period": 10, "bb_std": "2.0",
                "atr_period": 14, "adx_period": 14,
                "volume_sma_period": 20, "obv_ema_period": 13,
                "divergence_lookback": 20, "sr_lookback": 50
            }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("strategy.json"),
            r#"{
                "regime": {
                    "adx_trending_threshold": "25",
                    "atr_volatile_multiplier": "1.5",
                    "squeeze_atr_multiplier": "1.2",
                    "squeeze_oi_threshold": "0.6",
                    "trend_exhaustion_threshold": "-3.0"
                },
                "mtf_confirmation": {
                    "enabled": false,
                    "mode": "binary",
                    "regime_timeframe": "4h",
                    "fallback_timeframe": "1h",
                    "binary_adx_threshold": "22",
                    "strong_adx_threshold": "25",
                    "weak_adx_threshold": "18",
                    "rejection_confirmations": 3
                },
                "trending_weak_penalty": "0.08",
                "filters": {},
                "params": {
                    "momentum": { "sl_atr_multiplier": "1.5", "rr_ratio": "2.0" },
                    "mean_reversion": { "sl_atr_multiplier": "1.5", "rr_ratio": "2.0" },
                    "breakout": { "sl_atr_multiplier": "1.5", "rr_ratio": "2.0" }
                }
            }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("risk.json"),
            r#"{
                "leverage": "15",
                "max_position_pct": "0.08",
                "daily_loss_limit_pct": "0.12",
                "max_drawdown_pct": "0.35",
                "max_open_positions": 3,
                "min_signal_confidence": "0.75",
                "strategy_min_confidence": { "momentum": "0.85", "mean_reversion": "0.72", "breakout": "0.70" },
                "reward_risk_ratio": "2.0",
                "min_sl_distance_pct": "0.015",
                "cooldown_bars": 5,
                "max_consecutive_losses": 2,
                "max_trades_per_hour": 2,
                "max_trades_per_day": 12,
                "max_entries_per_tick": 2,
                "max_same_direction_positions": 1,
                "volatile_size_multiplier": "0.67",
                "min_notional": "5",
                "confidence_size_floor": "0.60",
                "drawdown_sizing_start": "0.10",
                "drawdown_sizing_slope": "7.5",
                "drawdown_sizing_floor": "0.25"
            }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("adaptive.json"),
            r#"{
                "enabled": true,
                "lookback_trades": 30,
                "min_trades": 8,
                "base_confidence": { "momentum": "0.78", "mean_reversion": "0.72", "breakout": "0.70" },
                "base_sl_atr_multiplier": "1.5",
                "base_rr_ratio": "2.0"
            }"#,
        )
        .unwrap();
    }

    // -----------------------------------------------------------------------
    // Env cleanup helper, shared by the serial tests.
    // -----------------------------------------------------------------------

    /// Remove all bot-related env vars so tests don't interfere with each other.
    fn clean_bot_env() {
        for key in [
            "BOT_LEVERAGE",
            "MAX_POSITION_PCT",
            "DAILY_LOSS_LIMIT_PCT",
            "MAX_DRAWDOWN_PCT",
            "MAX_OPEN_POSITIONS",
            "ADAPTIVE_ENABLED",
            "MTF_REGIME_CONFIRMATION",
            "MTF_REGIME_MODE",
            "REGIME_CHANGE_WAIT_BARS",
            "BACKTEST_DATA_DIR",
            "BOT_LOG_DIR",
        ] {
            std::env::remove_var(key);
        }
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[test]
    #[serial]
    fn test_load_real_configs() {
        clean_bot_env();
        let dir = project_config_dir();
        if !dir.exists() {
            eprintln!("skipping: config dir not found at {}", dir.display());
            return;
        }
        let config = load_config(&dir).expect("config should load and validate");
        assert_eq!(config.app.primary_timeframe, crate::types::Timeframe::M15);
        assert!(!config.app.symbols.is_empty());
        assert_eq!(config.risk.leverage, dec!(15));
        clean_bot_env();
    }

    #[test]
    #[serial]
    fn test_load_test_configs() {
        clean_bot_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        let config = load_config(tmp.path()).expect("test config should load");
        assert_eq!(config.app.symbols, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(config.indicators.atr_sma_period, 20);
        assert_eq!(config.risk.rr_tolerance, dec!(0.01));
        assert_eq!(config.strategy.filters.choppy.penalty, dec!(0.12));
        // backtest.json absent -> defaults
        assert_eq!(config.backtest.fee_rate, dec!(0.0004));
        clean_bot_env();
    }

    #[test]
    #[serial]
    fn test_missing_config_file_errors() {
        clean_bot_env();
        let tmp = tempfile::tempdir().unwrap();
        let err = load_config(tmp.path()).unwrap_err();
        assert!(
            err.to_string().contains("failed to read config file"),
            "expected file-not-found error, got: {err}"
        );
        clean_bot_env();
    }

    #[test]
    #[serial]
    fn test_env_override_leverage() {
        clean_bot_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("BOT_LEVERAGE", "10");
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.risk.leverage, dec!(10));
        clean_bot_env();
    }

    #[test]
    #[serial]
    fn test_env_override_mtf_mode() {
        clean_bot_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("MTF_REGIME_CONFIRMATION", "true");
        std::env::set_var("MTF_REGIME_MODE", "graduated");
        let config = load_config(tmp.path()).unwrap();
        assert!(config.strategy.mtf_confirmation.enabled);
        assert_eq!(config.strategy.mtf_confirmation.mode, MtfMode::Graduated);
        clean_bot_env();
    }

    #[test]
    #[serial]
    fn test_env_override_empty_string_ignored() {
        clean_bot_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("MAX_OPEN_POSITIONS", "");
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.risk.max_open_positions, 3);
        clean_bot_env();
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_parse_ignored() {
        clean_bot_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("REGIME_CHANGE_WAIT_BARS", "soon");
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.strategy.regime_change_wait_bars, 0);
        clean_bot_env();
    }

    #[test]
    #[serial]
    fn test_env_override_failing_validation_is_reported() {
        clean_bot_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("DAILY_LOSS_LIMIT_PCT", "1.5");
        let err = load_config(tmp.path()).unwrap_err();
        assert!(
            err.to_string().contains("daily_loss_limit_pct"),
            "expected validation error, got: {err}"
        );
        clean_bot_env();
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::types::*;
    use crate::types::Timeframe;

    /// Defaults for every section, trading BTCUSDT on 15m.
    pub fn bot_config() -> BotConfig {
        BotConfig {
            app: AppConfig {
                logging: LoggingConfig {
                    log_dir: "logs".into(),
                    log_file: "regime-bot.log".into(),
                },
                symbols: vec!["BTCUSDT".into()],
                primary_timeframe: Timeframe::M15,
                higher_timeframes: vec![Timeframe::H1, Timeframe::H4],
                candle_window: 200,
            },
            indicators: IndicatorParams::default(),
            strategy: StrategyConfig::default(),
            risk: RiskConfig::default(),
            adaptive: AdaptiveConfig::default(),
            backtest: BacktestConfig::default(),
        }
    }
}
