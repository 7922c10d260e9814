use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashMap;

use crate::types::{StrategyKind, Timeframe};

// ---------------------------------------------------------------------------
// Top-level aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub app: AppConfig,
    pub indicators: IndicatorParams,
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
    pub adaptive: AdaptiveConfig,
    pub backtest: BacktestConfig,
}

/// One value per strategy, addressed by [`StrategyKind`].
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PerStrategy<T> {
    pub momentum: T,
    pub mean_reversion: T,
    pub breakout: T,
}

impl<T> PerStrategy<T> {
    #[must_use]
    pub fn get(&self, kind: StrategyKind) -> &T {
        match kind {
            StrategyKind::Momentum => &self.momentum,
            StrategyKind::MeanReversion => &self.mean_reversion,
            StrategyKind::Breakout => &self.breakout,
        }
    }

    pub fn get_mut(&mut self, kind: StrategyKind) -> &mut T {
        match kind {
            StrategyKind::Momentum => &mut self.momentum,
            StrategyKind::MeanReversion => &mut self.mean_reversion,
            StrategyKind::Breakout => &mut self.breakout,
        }
    }
}

// ---------------------------------------------------------------------------
// app.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub symbols: Vec<String>,
    pub primary_timeframe: Timeframe,
    /// Timeframes used for regime confirmation and trend alignment.
    #[serde(default)]
    pub higher_timeframes: Vec<Timeframe>,
    /// Bars handed to the indicator layer per evaluation.
    #[serde(default = "default_candle_window")]
    pub candle_window: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub log_dir: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

fn default_candle_window() -> usize {
    200
}

fn default_log_file() -> String {
    "regime-bot.log".into()
}

// ---------------------------------------------------------------------------
// indicators.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct IndicatorParams {
    pub ema_fast: u32,
    pub ema_slow: u32,
    pub ema_trend: u32,
    pub rsi_period: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub rsi_oversold: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub rsi_overbought: Decimal,
    pub macd_fast: u32,
    pub macd_slow: u32,
    pub macd_signal: u32,
    pub bb_period: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub bb_std: Decimal,
    pub atr_period: u32,
    #[serde(default = "default_atr_sma_period")]
    pub atr_sma_period: u32,
    pub adx_period: u32,
    pub volume_sma_period: u32,
    pub obv_ema_period: u32,
    pub divergence_lookback: u32,
    pub sr_lookback: u32,
    #[serde(default = "default_sr_levels")]
    pub sr_levels: u32,
}

fn default_atr_sma_period() -> u32 {
    20
}

fn default_sr_levels() -> u32 {
    3
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            ema_fast: 5,
            ema_slow: 13,
            ema_trend: 21,
            rsi_period: 8,
            rsi_oversold: dec!(25),
            rsi_overbought: dec!(75),
            macd_fast: 5,
            macd_slow: 13,
            macd_signal: 5,
            bb_period: 10,
            bb_std: dec!(2.0),
            atr_period: 14,
            atr_sma_period: default_atr_sma_period(),
            adx_period: 14,
            volume_sma_period: 20,
            obv_ema_period: 13,
            divergence_lookback: 20,
            sr_lookback: 50,
            sr_levels: default_sr_levels(),
        }
    }
}

// ---------------------------------------------------------------------------
// strategy.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    pub regime: RegimeConfig,
    pub mtf_confirmation: MtfConfirmationConfig,
    /// Bars to stay flat after a regime change (0 = off).
    #[serde(default)]
    pub regime_change_wait_bars: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub trending_weak_penalty: Decimal,
    pub filters: FilterConfig,
    pub params: PerStrategy<StrategyParams>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            regime: RegimeConfig::default(),
            mtf_confirmation: MtfConfirmationConfig::default(),
            regime_change_wait_bars: 0,
            trending_weak_penalty: dec!(0.08),
            filters: FilterConfig::default(),
            params: PerStrategy {
                momentum: StrategyParams::default(),
                mean_reversion: StrategyParams::default(),
                breakout: StrategyParams::default(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegimeConfig {
    #[serde(with = "rust_decimal::serde::str")]
    pub adx_trending_threshold: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub atr_volatile_multiplier: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub squeeze_atr_multiplier: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub squeeze_oi_threshold: Decimal,
    /// OI change (percent) below which a trend is treated as exhausted.
    #[serde(with = "rust_decimal::serde::str")]
    pub trend_exhaustion_threshold: Decimal,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            adx_trending_threshold: dec!(25),
            atr_volatile_multiplier: dec!(1.5),
            squeeze_atr_multiplier: dec!(1.2),
            squeeze_oi_threshold: dec!(0.6),
            trend_exhaustion_threshold: dec!(-3.0),
        }
    }
}

/// Hysteresis variant for higher-timeframe regime confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MtfMode {
    /// Weak higher-timeframe ADX downgrades straight to ranging.
    Binary,
    /// Strong/weak tiers plus a rejection counter before downgrading.
    Graduated,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MtfConfirmationConfig {
    pub enabled: bool,
    pub mode: MtfMode,
    pub regime_timeframe: Timeframe,
    pub fallback_timeframe: Timeframe,
    #[serde(with = "rust_decimal::serde::str")]
    pub binary_adx_threshold: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub strong_adx_threshold: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub weak_adx_threshold: Decimal,
    pub rejection_confirmations: u32,
}

impl Default for MtfConfirmationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: MtfMode::Binary,
            regime_timeframe: Timeframe::H4,
            fallback_timeframe: Timeframe::H1,
            binary_adx_threshold: dec!(22),
            strong_adx_threshold: dec!(25),
            weak_adx_threshold: dec!(18),
            rejection_confirmations: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub choppy: ChoppyFilterConfig,
    #[serde(default)]
    pub mtf_alignment: MtfAlignmentConfig,
    #[serde(default)]
    pub funding: FundingFilterConfig,
    #[serde(default)]
    pub order_book: OrderBookFilterConfig,
    #[serde(default)]
    pub news: NewsFilterConfig,
    #[serde(default)]
    pub derivatives: DerivativesFilterConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoppyFilterConfig {
    pub enabled: bool,
    #[serde(with = "rust_decimal::serde::str")]
    pub atr_ratio_threshold: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub adx_ceiling: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub penalty: Decimal,
}

impl Default for ChoppyFilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            atr_ratio_threshold: dec!(1.15),
            adx_ceiling: dec!(30),
            penalty: dec!(0.12),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MtfAlignmentConfig {
    pub enabled: bool,
    #[serde(with = "rust_decimal::serde::str")]
    pub boost_per_timeframe: Decimal,
}

impl Default for MtfAlignmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            boost_per_timeframe: dec!(0.10),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FundingFilterConfig {
    /// Funding beyond this (in the crowded direction) penalises the trade.
    #[serde(with = "rust_decimal::serde::str")]
    pub penalty_threshold: Decimal,
    /// Funding beyond this (in the contrarian direction) rewards the trade.
    #[serde(with = "rust_decimal::serde::str")]
    pub reward_threshold: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub penalty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub reward: Decimal,
}

impl Default for FundingFilterConfig {
    fn default() -> Self {
        Self {
            penalty_threshold: dec!(0.001),
            reward_threshold: dec!(0.0005),
            penalty: dec!(0.15),
            reward: dec!(0.08),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookFilterConfig {
    #[serde(with = "rust_decimal::serde::str")]
    pub threshold: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub reward: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub penalty: Decimal,
}

impl Default for OrderBookFilterConfig {
    fn default() -> Self {
        Self {
            threshold: dec!(0.15),
            reward: dec!(0.08),
            penalty: dec!(0.10),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewsFilterConfig {
    #[serde(with = "rust_decimal::serde::str")]
    pub threshold: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub weight: Decimal,
}

impl Default for NewsFilterConfig {
    fn default() -> Self {
        Self {
            threshold: dec!(0.3),
            weight: dec!(0.15),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DerivativesFilterConfig {
    pub enabled: bool,
    /// Absolute OI change (percent) that counts as rising or falling.
    #[serde(with = "rust_decimal::serde::str")]
    pub oi_change_threshold: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub falling_oi_breakout_penalty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub rising_oi_reward: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub funding_zscore_threshold: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub crowded_funding_penalty: Decimal,
}

impl Default for DerivativesFilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            oi_change_threshold: dec!(2.0),
            falling_oi_breakout_penalty: dec!(0.15),
            rising_oi_reward: dec!(0.10),
            funding_zscore_threshold: dec!(2.0),
            crowded_funding_penalty: dec!(0.12),
        }
    }
}

/// Protective-level parameters for one strategy.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct StrategyParams {
    #[serde(with = "rust_decimal::serde::str")]
    pub sl_atr_multiplier: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub rr_ratio: Decimal,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            sl_atr_multiplier: dec!(1.5),
            rr_ratio: dec!(2.0),
        }
    }
}

// ---------------------------------------------------------------------------
// risk.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(with = "rust_decimal::serde::str")]
    pub leverage: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub max_position_pct: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub daily_loss_limit_pct: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub max_drawdown_pct: Decimal,
    pub max_open_positions: usize,

    // -- Signal validation ----------------------------------------------------
    #[serde(with = "rust_decimal::serde::str")]
    pub min_signal_confidence: Decimal,
    /// Per-strategy minimum confidence; the global minimum applies otherwise.
    #[serde(default)]
    pub strategy_min_confidence: Option<PerStrategy<Decimal>>,
    #[serde(with = "rust_decimal::serde::str")]
    pub reward_risk_ratio: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub min_sl_distance_pct: Decimal,
    #[serde(with = "rust_decimal::serde::str", default = "default_rr_tolerance")]
    pub rr_tolerance: Decimal,

    // -- Gating ---------------------------------------------------------------
    pub cooldown_bars: u64,
    pub max_consecutive_losses: u32,
    pub max_trades_per_hour: u32,
    pub max_trades_per_day: u32,
    #[serde(default)]
    pub post_profit_cooldown_bars: u64,
    pub max_entries_per_tick: u32,
    pub max_same_direction_positions: usize,

    // -- Sizing ---------------------------------------------------------------
    #[serde(with = "rust_decimal::serde::str")]
    pub volatile_size_multiplier: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub min_notional: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub confidence_size_floor: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub drawdown_sizing_start: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub drawdown_sizing_slope: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub drawdown_sizing_floor: Decimal,
    /// Fraction of the daily start below which a portfolio value is a glitch.
    #[serde(with = "rust_decimal::serde::str", default = "default_glitch_ratio")]
    pub glitch_value_ratio: Decimal,

    #[serde(default)]
    pub exits: ExitConfig,
}

fn default_rr_tolerance() -> Decimal {
    dec!(0.01)
}

fn default_glitch_ratio() -> Decimal {
    dec!(0.5)
}

impl RiskConfig {
    /// Minimum confidence for a strategy, falling back to the global value.
    #[must_use]
    pub fn min_confidence_for(&self, strategy: StrategyKind) -> Decimal {
        self.strategy_min_confidence
            .as_ref()
            .map_or(self.min_signal_confidence, |m| *m.get(strategy))
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            leverage: dec!(15),
            max_position_pct: dec!(0.08),
            daily_loss_limit_pct: dec!(0.12),
            max_drawdown_pct: dec!(0.35),
            max_open_positions: 3,
            min_signal_confidence: dec!(0.75),
            strategy_min_confidence: Some(PerStrategy {
                momentum: dec!(0.85),
                mean_reversion: dec!(0.72),
                breakout: dec!(0.70),
            }),
            reward_risk_ratio: dec!(2.0),
            min_sl_distance_pct: dec!(0.015),
            rr_tolerance: default_rr_tolerance(),
            cooldown_bars: 5,
            max_consecutive_losses: 2,
            max_trades_per_hour: 2,
            max_trades_per_day: 12,
            post_profit_cooldown_bars: 0,
            max_entries_per_tick: 2,
            max_same_direction_positions: 1,
            volatile_size_multiplier: dec!(0.67),
            min_notional: dec!(5),
            confidence_size_floor: dec!(0.60),
            drawdown_sizing_start: dec!(0.10),
            drawdown_sizing_slope: dec!(7.5),
            drawdown_sizing_floor: dec!(0.25),
            glitch_value_ratio: default_glitch_ratio(),
            exits: ExitConfig::default(),
        }
    }
}

/// Open-position exit management.
#[derive(Debug, Clone, Deserialize)]
pub struct ExitConfig {
    pub trailing_enabled: bool,
    /// On TP hit, lock the stop at TP and keep trailing instead of closing.
    pub trailing_hybrid: bool,
    /// Profit (in multiples of initial risk) that moves the stop to entry.
    #[serde(with = "rust_decimal::serde::str")]
    pub breakeven_rr: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub trailing_atr_multiplier: Decimal,
    /// Trail distance multiplier keyed by entry regime (`"volatile"` etc).
    #[serde(default)]
    pub trail_vol_scale: HashMap<String, Decimal>,
    #[serde(default)]
    pub staircase_enabled: bool,
    #[serde(with = "rust_decimal::serde::str", default = "default_staircase_pct")]
    pub staircase_close_pct: Decimal,
}

fn default_staircase_pct() -> Decimal {
    dec!(0.5)
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            trailing_enabled: true,
            trailing_hybrid: true,
            breakeven_rr: dec!(1.5),
            trailing_atr_multiplier: dec!(1.5),
            trail_vol_scale: HashMap::new(),
            staircase_enabled: false,
            staircase_close_pct: default_staircase_pct(),
        }
    }
}

// ---------------------------------------------------------------------------
// adaptive.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    pub lookback_trades: usize,
    pub min_trades: usize,
    /// Emit the adaptive state block every N bars (0 = never).
    #[serde(default)]
    pub log_interval_bars: u64,
    pub base_confidence: PerStrategy<Decimal>,
    #[serde(with = "rust_decimal::serde::str")]
    pub base_sl_atr_multiplier: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub base_rr_ratio: Decimal,
    /// Trade history file restored at startup and saved at shutdown.
    #[serde(default)]
    pub state_file: Option<String>,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lookback_trades: 30,
            min_trades: 8,
            log_interval_bars: 16,
            base_confidence: PerStrategy {
                momentum: dec!(0.78),
                mean_reversion: dec!(0.72),
                breakout: dec!(0.70),
            },
            base_sl_atr_multiplier: dec!(1.5),
            base_rr_ratio: dec!(2.0),
            state_file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// backtest.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct BacktestConfig {
    pub data_dir: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub initial_balance: Decimal,
    /// Taker fee per side, as a fraction of notional.
    #[serde(with = "rust_decimal::serde::str")]
    pub fee_rate: Decimal,
    /// Adverse price slippage per fill, as a fraction of price.
    #[serde(with = "rust_decimal::serde::str")]
    pub slippage_rate: Decimal,
    #[serde(default = "default_htf_window")]
    pub htf_window: usize,
    #[serde(default = "default_htf_min_bars")]
    pub htf_min_bars: usize,
}

fn default_htf_window() -> usize {
    100
}

fn default_htf_min_bars() -> usize {
    50
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".into(),
            initial_balance: dec!(100),
            fee_rate: dec!(0.0004),
            slippage_rate: dec!(0.0005),
            htf_window: default_htf_window(),
            htf_min_bars: default_htf_min_bars(),
        }
    }
}
