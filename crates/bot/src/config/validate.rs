use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::types::{BotConfig, PerStrategy};
use crate::types::StrategyKind;

/// Validate invariants across the merged config that serde alone cannot enforce.
///
/// Every violation is collected so one run reports them all. Called
/// automatically by [`super::load_config`].
pub fn validate_config(config: &BotConfig) -> Result<()> {
    let mut errors: Vec<String> = Vec::new();

    validate_app_config(config, &mut errors);
    validate_indicator_config(config, &mut errors);
    validate_strategy_config(config, &mut errors);
    validate_risk_config(config, &mut errors);
    validate_adaptive_config(config, &mut errors);
    validate_backtest_config(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        let msg = format!(
            "Configuration validation failed ({} error{}):\n  - {}",
            errors.len(),
            if errors.len() == 1 { "" } else { "s" },
            errors.join("\n  - ")
        );
        bail!("{msg}");
    }
}

fn in_unit_interval(value: Decimal) -> bool {
    value > Decimal::ZERO && value < Decimal::ONE
}

fn check_fraction(name: &str, value: Decimal, errors: &mut Vec<String>) {
    if !in_unit_interval(value) {
        errors.push(format!("{name} must be in (0, 1), got {value}"));
    }
}

fn check_confidences(name: &str, values: &PerStrategy<Decimal>, errors: &mut Vec<String>) {
    for kind in StrategyKind::ALL {
        let v = *values.get(kind);
        if v < Decimal::ZERO || v > Decimal::ONE {
            errors.push(format!("{name}.{kind} must be in [0, 1], got {v}"));
        }
    }
}

// ---------------------------------------------------------------------------
// App config
// ---------------------------------------------------------------------------

fn validate_app_config(config: &BotConfig, errors: &mut Vec<String>) {
    let app = &config.app;

    if app.symbols.is_empty() {
        errors.push("app.symbols: at least one symbol is required".into());
    }

    if app.higher_timeframes.contains(&app.primary_timeframe) {
        errors.push(format!(
            "app.higher_timeframes must not contain the primary timeframe {}",
            app.primary_timeframe
        ));
    }

    if let Some(tf) = app
        .higher_timeframes
        .iter()
        .find(|tf| **tf < app.primary_timeframe)
    {
        errors.push(format!(
            "app.higher_timeframes: {tf} is shorter than the primary timeframe {}",
            app.primary_timeframe
        ));
    }

    if app.candle_window < 60 {
        errors.push(format!(
            "app.candle_window must be at least 60 bars, got {}",
            app.candle_window
        ));
    }
}

// ---------------------------------------------------------------------------
// Indicator config
// ---------------------------------------------------------------------------

fn validate_indicator_config(config: &BotConfig, errors: &mut Vec<String>) {
    let ind = &config.indicators;

    if ind.ema_fast >= ind.ema_slow || ind.ema_slow > ind.ema_trend {
        errors.push(format!(
            "indicators: EMA periods must satisfy fast < slow <= trend, got {}/{}/{}",
            ind.ema_fast, ind.ema_slow, ind.ema_trend
        ));
    }

    if ind.macd_fast >= ind.macd_slow {
        errors.push(format!(
            "indicators: macd_fast ({}) must be less than macd_slow ({})",
            ind.macd_fast, ind.macd_slow
        ));
    }

    if ind.rsi_oversold >= ind.rsi_overbought {
        errors.push(format!(
            "indicators: rsi_oversold ({}) must be below rsi_overbought ({})",
            ind.rsi_oversold, ind.rsi_overbought
        ));
    }

    let periods = [
        ("ema_fast", ind.ema_fast),
        ("rsi_period", ind.rsi_period),
        ("macd_signal", ind.macd_signal),
        ("bb_period", ind.bb_period),
        ("atr_period", ind.atr_period),
        ("atr_sma_period", ind.atr_sma_period),
        ("adx_period", ind.adx_period),
        ("volume_sma_period", ind.volume_sma_period),
        ("obv_ema_period", ind.obv_ema_period),
        ("divergence_lookback", ind.divergence_lookback),
        ("sr_lookback", ind.sr_lookback),
    ];
    for (name, period) in periods {
        if period == 0 {
            errors.push(format!("indicators.{name} must be positive"));
        }
    }

    if ind.bb_std <= Decimal::ZERO {
        errors.push(format!("indicators.bb_std must be positive, got {}", ind.bb_std));
    }
}

// ---------------------------------------------------------------------------
// Strategy config
// ---------------------------------------------------------------------------

fn validate_strategy_config(config: &BotConfig, errors: &mut Vec<String>) {
    let strat = &config.strategy;
    let mtf = &strat.mtf_confirmation;

    if mtf.weak_adx_threshold >= mtf.strong_adx_threshold {
        errors.push(format!(
            "strategy.mtf_confirmation: weak_adx_threshold ({}) must be below strong_adx_threshold ({})",
            mtf.weak_adx_threshold, mtf.strong_adx_threshold
        ));
    }

    if mtf.rejection_confirmations == 0 {
        errors.push("strategy.mtf_confirmation.rejection_confirmations must be positive".into());
    }

    if strat.regime.atr_volatile_multiplier <= Decimal::ONE {
        errors.push(format!(
            "strategy.regime.atr_volatile_multiplier must exceed 1, got {}",
            strat.regime.atr_volatile_multiplier
        ));
    }

    if strat.trending_weak_penalty < Decimal::ZERO || strat.trending_weak_penalty > dec!(0.5) {
        errors.push(format!(
            "strategy.trending_weak_penalty must be in [0, 0.5], got {}",
            strat.trending_weak_penalty
        ));
    }

    for kind in StrategyKind::ALL {
        let params = strat.params.get(kind);
        if params.sl_atr_multiplier <= Decimal::ZERO {
            errors.push(format!("strategy.params.{kind}.sl_atr_multiplier must be positive"));
        }
        if params.rr_ratio < Decimal::ONE {
            errors.push(format!(
                "strategy.params.{kind}.rr_ratio must be at least 1, got {}",
                params.rr_ratio
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Risk config
// ---------------------------------------------------------------------------

fn validate_risk_config(config: &BotConfig, errors: &mut Vec<String>) {
    let risk = &config.risk;

    if risk.leverage < Decimal::ONE || risk.leverage > dec!(125) {
        errors.push(format!("risk.leverage must be in [1, 125], got {}", risk.leverage));
    }

    check_fraction("risk.max_position_pct", risk.max_position_pct, errors);
    check_fraction("risk.daily_loss_limit_pct", risk.daily_loss_limit_pct, errors);
    check_fraction("risk.max_drawdown_pct", risk.max_drawdown_pct, errors);
    check_fraction("risk.min_sl_distance_pct", risk.min_sl_distance_pct, errors);
    check_fraction("risk.glitch_value_ratio", risk.glitch_value_ratio, errors);
    check_fraction("risk.confidence_size_floor", risk.confidence_size_floor, errors);
    check_fraction("risk.drawdown_sizing_floor", risk.drawdown_sizing_floor, errors);

    if risk.max_open_positions == 0 {
        errors.push("risk.max_open_positions must be positive".into());
    }

    if risk.min_signal_confidence < Decimal::ZERO || risk.min_signal_confidence > Decimal::ONE {
        errors.push(format!(
            "risk.min_signal_confidence must be in [0, 1], got {}",
            risk.min_signal_confidence
        ));
    }

    if let Some(per_strategy) = &risk.strategy_min_confidence {
        check_confidences("risk.strategy_min_confidence", per_strategy, errors);
    }

    if risk.reward_risk_ratio < Decimal::ONE {
        errors.push(format!(
            "risk.reward_risk_ratio must be at least 1, got {}",
            risk.reward_risk_ratio
        ));
    }

    if risk.max_entries_per_tick == 0 || risk.max_trades_per_hour == 0 {
        errors.push("risk: max_entries_per_tick and max_trades_per_hour must be positive".into());
    }

    if risk.max_trades_per_day < risk.max_trades_per_hour {
        errors.push(format!(
            "risk.max_trades_per_day ({}) must be at least max_trades_per_hour ({})",
            risk.max_trades_per_day, risk.max_trades_per_hour
        ));
    }

    if risk.min_notional < Decimal::ZERO {
        errors.push("risk.min_notional must not be negative".into());
    }

    let exits = &risk.exits;
    if exits.trailing_atr_multiplier <= Decimal::ZERO || exits.breakeven_rr <= Decimal::ZERO {
        errors.push("risk.exits: trailing_atr_multiplier and breakeven_rr must be positive".into());
    }
    check_fraction("risk.exits.staircase_close_pct", exits.staircase_close_pct, errors);
}

// ---------------------------------------------------------------------------
// Adaptive config
// ---------------------------------------------------------------------------

fn validate_adaptive_config(config: &BotConfig, errors: &mut Vec<String>) {
    let adaptive = &config.adaptive;

    if adaptive.lookback_trades == 0 {
        errors.push("adaptive.lookback_trades must be positive".into());
    }

    if adaptive.min_trades > adaptive.lookback_trades {
        errors.push(format!(
            "adaptive.min_trades ({}) cannot exceed lookback_trades ({})",
            adaptive.min_trades, adaptive.lookback_trades
        ));
    }

    check_confidences("adaptive.base_confidence", &adaptive.base_confidence, errors);
}

// ---------------------------------------------------------------------------
// Backtest config
// ---------------------------------------------------------------------------

fn validate_backtest_config(config: &BotConfig, errors: &mut Vec<String>) {
    let bt = &config.backtest;

    if bt.initial_balance <= Decimal::ZERO {
        errors.push(format!(
            "backtest.initial_balance must be positive, got {}",
            bt.initial_balance
        ));
    }

    for (name, rate) in [("fee_rate", bt.fee_rate), ("slippage_rate", bt.slippage_rate)] {
        if rate < Decimal::ZERO || rate >= dec!(0.01) {
            errors.push(format!("backtest.{name} must be in [0, 0.01), got {rate}"));
        }
    }

    if bt.htf_min_bars > bt.htf_window {
        errors.push(format!(
            "backtest.htf_min_bars ({}) cannot exceed htf_window ({})",
            bt.htf_min_bars, bt.htf_window
        ));
    }
}
