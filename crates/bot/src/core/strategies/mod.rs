//! Entry strategies.
//!
//! Each strategy is a deterministic scorer: a structural trigger sets the
//! direction and base confidence, then bounded confirmations add or
//! subtract. No trigger yields HOLD with zero confidence and no levels.
//! Dispatch is a closed match on [`StrategyKind`].

pub mod breakout;
pub mod mean_reversion;
pub mod momentum;

use rust_decimal::Decimal;

use crate::config::{IndicatorParams, StrategyParams};
use crate::constants::{
    BREAKOUT_MIN_BARS_MARGIN, MEAN_REVERSION_MIN_BARS_MARGIN, MOMENTUM_MIN_BARS_MARGIN,
};
use crate::types::{IndicatorSnapshot, Signal, SignalDirection, StrategyKind};

/// Bars of history a strategy needs before it will score anything.
#[must_use]
pub fn min_bars(kind: StrategyKind, params: &IndicatorParams) -> usize {
    match kind {
        StrategyKind::Momentum => params.ema_trend as usize + MOMENTUM_MIN_BARS_MARGIN,
        StrategyKind::MeanReversion => params.bb_period as usize + MEAN_REVERSION_MIN_BARS_MARGIN,
        StrategyKind::Breakout => params.sr_lookback as usize + BREAKOUT_MIN_BARS_MARGIN,
    }
}

/// Run one strategy against the latest snapshot.
pub fn analyze(
    kind: StrategyKind,
    symbol: &str,
    snapshot: &IndicatorSnapshot,
    params: &StrategyParams,
    indicators: &IndicatorParams,
) -> Signal {
    let needed = min_bars(kind, indicators);
    if snapshot.bar_count < needed {
        return Signal::hold(
            symbol,
            kind,
            snapshot.price,
            format!("Insufficient data ({}/{} bars)", snapshot.bar_count, needed),
        );
    }

    match kind {
        StrategyKind::Momentum => momentum::analyze(symbol, snapshot, params, indicators),
        StrategyKind::MeanReversion => {
            mean_reversion::analyze(symbol, snapshot, params, indicators)
        }
        StrategyKind::Breakout => breakout::analyze(symbol, snapshot, params, indicators),
    }
}

/// Open a directional signal at the snapshot price with ATR-based levels.
///
/// Returns HOLD when ATR is unavailable, since no stop can be placed.
pub(crate) fn entry(
    symbol: &str,
    kind: StrategyKind,
    direction: SignalDirection,
    snapshot: &IndicatorSnapshot,
    params: &StrategyParams,
    base_confidence: Decimal,
    trigger: impl Into<String>,
) -> Signal {
    if snapshot.atr <= Decimal::ZERO {
        return Signal::hold(symbol, kind, snapshot.price, "ATR unavailable");
    }
    let risk = snapshot.atr * params.sl_atr_multiplier;
    Signal {
        direction,
        confidence: Decimal::ZERO,
        strategy: kind,
        symbol: symbol.to_string(),
        entry_price: snapshot.price,
        stop_loss: Decimal::ZERO,
        take_profit: Decimal::ZERO,
        reasons: Vec::new(),
    }
    .with_levels(risk, params.rr_ratio)
    .adjust(base_confidence, trigger)
}

/// Volume confirmation tiers: `(min ratio, bonus)`, highest first.
pub(crate) fn volume_bonus(volume_ratio: Decimal, tiers: &[(Decimal, Decimal)]) -> Option<Decimal> {
    tiers
        .iter()
        .find(|(min_ratio, _)| volume_ratio >= *min_ratio)
        .map(|(_, bonus)| *bonus)
}
