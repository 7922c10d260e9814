//! Post-strategy confidence filters.
//!
//! Every stage is a pure `Signal -> Signal` transform. HOLD passes through
//! untouched, confidence is clamped to [0, 1] by [`Signal::adjust`] and every
//! change appends a reason. A stage whose input is absent is a no-op.

use rust_decimal::Decimal;
use tracing::debug;

use crate::config::{
    ChoppyFilterConfig, DerivativesFilterConfig, FilterConfig, FundingFilterConfig,
    MtfAlignmentConfig, NewsFilterConfig, OrderBookFilterConfig,
};
use crate::types::{
    DerivativesSnapshot, IndicatorSnapshot, MarketContext, OiDirection, Signal, SignalDirection,
    StrategyKind, Timeframe, TrendDirection,
};

/// Everything the chain reads besides the signal itself.
#[derive(Debug, Clone, Copy)]
pub struct FilterInputs<'a> {
    pub snapshot: &'a IndicatorSnapshot,
    /// Trend of each non-primary timeframe that had data.
    pub htf_trends: &'a [(Timeframe, TrendDirection)],
    pub context: &'a MarketContext,
}

/// Run the full chain in its fixed order.
pub fn apply_chain(signal: Signal, inputs: &FilterInputs<'_>, config: &FilterConfig) -> Signal {
    let signal = choppy(signal, inputs.snapshot, &config.choppy);
    let signal = mtf_alignment(signal, inputs.htf_trends, &config.mtf_alignment);
    let signal = funding(signal, inputs.context.funding_rate, &config.funding);
    let signal = order_book(signal, inputs.context.order_book_imbalance, &config.order_book);
    let signal = news(signal, inputs.context.news_score, &config.news);
    derivatives(signal, inputs.context.derivatives.as_ref(), &config.derivatives)
}

// ═══════════════════════════════════════════════════════════════════════════
// Stages
// ═══════════════════════════════════════════════════════════════════════════

/// High ATR without a strong ADX: momentum entries into chop are penalised.
pub fn choppy(signal: Signal, snap: &IndicatorSnapshot, cfg: &ChoppyFilterConfig) -> Signal {
    if signal.is_hold() || !cfg.enabled || signal.strategy != StrategyKind::Momentum {
        return signal;
    }
    if snap.atr_sma <= Decimal::ZERO {
        return signal;
    }
    let atr_ratio = snap.atr / snap.atr_sma;
    if atr_ratio > cfg.atr_ratio_threshold && snap.adx < cfg.adx_ceiling {
        debug!(atr_ratio = %atr_ratio, adx = %snap.adx, "choppy market penalty");
        return signal.adjust(
            -cfg.penalty,
            format!(
                "Choppy market (ATR ratio {:.2}, ADX {:.1}) -{}",
                atr_ratio, snap.adx, cfg.penalty
            ),
        );
    }
    signal
}

/// Higher-timeframe trend agreement. Off when `cfg.enabled` is false.
pub fn mtf_alignment(
    signal: Signal,
    trends: &[(Timeframe, TrendDirection)],
    cfg: &MtfAlignmentConfig,
) -> Signal {
    if signal.is_hold() || !cfg.enabled || trends.is_empty() {
        return signal;
    }

    let mut aligned = 0u32;
    let mut opposed = 0u32;
    for (_, trend) in trends {
        match trend.agrees_with(signal.direction) {
            Some(true) => aligned += 1,
            Some(false) => opposed += 1,
            None => {}
        }
    }

    if opposed > 0 && aligned == 0 {
        debug!(opposed, "signal blocked by higher timeframes");
        return signal.into_hold(format!("Blocked by higher TF ({opposed} opposed)"));
    }
    if aligned > 0 {
        let boost = cfg.boost_per_timeframe * Decimal::from(aligned);
        return signal.adjust(boost, format!("MTF aligned ({aligned} TFs)"));
    }
    signal
}

/// Perpetual funding: crowded side penalised, contrarian side rewarded.
pub fn funding(signal: Signal, rate: Option<Decimal>, cfg: &FundingFilterConfig) -> Signal {
    let Some(rate) = rate else {
        return signal;
    };
    let delta = match signal.direction {
        SignalDirection::Buy if rate > cfg.penalty_threshold => -cfg.penalty,
        SignalDirection::Buy if rate < -cfg.reward_threshold => cfg.reward,
        SignalDirection::Sell if rate < -cfg.penalty_threshold => -cfg.penalty,
        SignalDirection::Sell if rate > cfg.reward_threshold => cfg.reward,
        _ => return signal,
    };
    signal.adjust(delta, format!("Funding {rate} ({delta:+})"))
}

/// Order-book imbalance in [-1, 1], positive = bid heavy.
pub fn order_book(
    signal: Signal,
    imbalance: Option<Decimal>,
    cfg: &OrderBookFilterConfig,
) -> Signal {
    let Some(imbalance) = imbalance else {
        return signal;
    };
    if signal.is_hold() || imbalance.abs() <= cfg.threshold {
        return signal;
    }
    let agrees = (imbalance > Decimal::ZERO) == (signal.direction == SignalDirection::Buy);
    if agrees {
        signal.adjust(cfg.reward, format!("Order book agrees ({imbalance:+})"))
    } else {
        signal.adjust(-cfg.penalty, format!("Order book opposes ({imbalance:+})"))
    }
}

/// News sentiment in [-1, 1].
pub fn news(signal: Signal, score: Option<Decimal>, cfg: &NewsFilterConfig) -> Signal {
    let Some(score) = score else {
        return signal;
    };
    if signal.is_hold() || score.abs() <= cfg.threshold {
        return signal;
    }
    let agrees = (score > Decimal::ZERO) == (signal.direction == SignalDirection::Buy);
    let delta = if agrees { cfg.weight } else { -cfg.weight };
    signal.adjust(delta, format!("News sentiment {score:+} ({delta:+})"))
}

/// Open interest and funding positioning. A cascade blocks outright; other
/// adjustments are summed and applied once.
pub fn derivatives(
    signal: Signal,
    deriv: Option<&DerivativesSnapshot>,
    cfg: &DerivativesFilterConfig,
) -> Signal {
    let Some(deriv) = deriv else {
        return signal;
    };
    if signal.is_hold() || !cfg.enabled {
        return signal;
    }
    if deriv.is_cascade {
        debug!(symbol = %signal.symbol, "liquidation cascade, blocking entry");
        return signal.into_hold("Blocked: liquidation cascade");
    }

    let buy = signal.direction == SignalDirection::Buy;
    let mut delta = Decimal::ZERO;
    let mut notes = Vec::new();

    if signal.strategy == StrategyKind::Breakout && deriv.oi_delta_pct < -cfg.oi_change_threshold {
        delta -= cfg.falling_oi_breakout_penalty;
        notes.push(format!("OI falling ({:+}%), weak breakout", deriv.oi_delta_pct));
    } else if deriv.oi_delta_pct > cfg.oi_change_threshold {
        let aligned = (buy && deriv.oi_direction == OiDirection::Bullish)
            || (!buy && deriv.oi_direction == OiDirection::Bearish);
        if aligned {
            delta += cfg.rising_oi_reward;
            notes.push(format!("OI rising ({:+}%), conviction", deriv.oi_delta_pct));
        }
    }

    let z = deriv.funding_zscore;
    if z.abs() > cfg.funding_zscore_threshold
        && ((buy && z > Decimal::ZERO) || (!buy && z < Decimal::ZERO))
    {
        delta -= cfg.crowded_funding_penalty;
        notes.push(format!("Crowded funding (z={z:+})"));
    }

    if delta.is_zero() {
        return signal;
    }
    signal.adjust(delta, notes.join(", "))
}
