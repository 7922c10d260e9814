//! Derives adaptive overrides from tracker metrics.
//!
//! Strategies are throttled through confidence thresholds and size scales,
//! never switched off. Every output is clamped to the hard bounds in
//! [`crate::constants`]; without enough trades each output is its base.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::types::AdaptiveConfig;
use crate::constants::{
    ADAPTIVE_CONFIDENCE_MAX, ADAPTIVE_CONFIDENCE_MIN, LEVERAGE_SCALE_MAX, LEVERAGE_SCALE_MIN,
    MIN_TRADES_FOR_RR_ADAPTATION, RR_RATIO_MAX, RR_RATIO_MIN, SIZE_SCALE_MAX, SIZE_SCALE_MIN,
    SL_MULTIPLIER_MAX, SL_MULTIPLIER_MIN,
};
use crate::core::performance_tracker::PerformanceTracker;
use crate::types::{AdaptiveOverrides, StrategyKind, StrategyMetrics, StrategyOverrides};

pub struct AdaptiveController {
    config: AdaptiveConfig,
}

impl AdaptiveController {
    pub fn new(config: AdaptiveConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    /// Recompute every override from the tracker's current windows.
    #[must_use]
    pub fn compute_overrides(&self, tracker: &PerformanceTracker) -> AdaptiveOverrides {
        let strategies: BTreeMap<StrategyKind, StrategyOverrides> = StrategyKind::ALL
            .into_iter()
            .map(|kind| {
                let metrics = tracker.strategy_metrics(kind);
                let has_data = tracker.has_enough_data(kind);
                let overrides = StrategyOverrides {
                    min_confidence: self.confidence(kind, &metrics, has_data),
                    position_size_scale: size_scale(&metrics, has_data),
                    strategy_enabled: true,
                };
                (kind, overrides)
            })
            .collect();

        let overall = tracker.overall_metrics();
        let has_overall = tracker.has_enough_overall_data();

        AdaptiveOverrides {
            strategies,
            leverage_scale: leverage_scale(&overall, has_overall),
            sl_atr_multiplier: self.sl_multiplier(&overall, has_overall),
            rr_ratio: self.rr_ratio(tracker, has_overall),
        }
    }

    /// Multi-line status block: header, one line per strategy, one OVERALL line.
    #[must_use]
    pub fn format_state(&self, tracker: &PerformanceTracker, overrides: &AdaptiveOverrides) -> String {
        let mut out = String::from("ADAPTIVE STATE:");
        for (kind, o) in &overrides.strategies {
            let m = tracker.strategy_metrics(*kind);
            let _ = write!(
                out,
                "\n  {:<16} conf={:.2} size={:.2}x | WR={:.0}% PF={:.2} trades={} streak={:+}",
                kind.as_str(),
                o.min_confidence,
                o.position_size_scale,
                m.win_rate * 100.0,
                m.profit_factor,
                m.trade_count,
                m.current_streak,
            );
        }
        let m = tracker.overall_metrics();
        let _ = write!(
            out,
            "\n  {:<16}lev={:.2}x SL={:.2} R:R={:.2} | WR={:.0}% PF={:.2} trades={} trend={:+.2}",
            "OVERALL",
            overrides.leverage_scale,
            overrides.sl_atr_multiplier,
            overrides.rr_ratio,
            m.win_rate * 100.0,
            m.profit_factor,
            m.trade_count,
            m.recent_trend,
        );
        out
    }

    // -----------------------------------------------------------------------
    // Individual levers
    // -----------------------------------------------------------------------

    fn confidence(&self, kind: StrategyKind, m: &StrategyMetrics, has_data: bool) -> Decimal {
        let base = *self.config.base_confidence.get(kind);
        if !has_data {
            return base;
        }

        let mut adj = 0.0_f64;
        if m.win_rate > 0.5 {
            adj -= 0.10 * (m.win_rate - 0.5).min(0.15) / 0.15;
        } else if m.win_rate < 0.4 {
            adj += 0.05 * (0.4 - m.win_rate).min(0.15) / 0.15;
        }
        if m.profit_factor > 1.5 {
            adj -= 0.03;
        } else if m.profit_factor < 0.7 {
            adj += 0.03;
        }
        if m.recent_trend > 0.5 {
            adj -= 0.03;
        }
        let adj = adj.clamp(-0.10, 0.08);

        (base + to_decimal(adj)).clamp(ADAPTIVE_CONFIDENCE_MIN, ADAPTIVE_CONFIDENCE_MAX)
    }

    fn sl_multiplier(&self, overall: &StrategyMetrics, has_data: bool) -> Decimal {
        let base = self.config.base_sl_atr_multiplier;
        if !has_data {
            return base;
        }
        let wr = overall.win_rate;
        let delta = if wr > 0.5 {
            -0.15 * (wr - 0.5).min(0.15) / 0.15
        } else if wr < 0.35 {
            0.2 * (0.35 - wr).min(0.15) / 0.15
        } else {
            0.0
        };
        (base + to_decimal(delta)).clamp(SL_MULTIPLIER_MIN, SL_MULTIPLIER_MAX)
    }

    fn rr_ratio(&self, tracker: &PerformanceTracker, has_data: bool) -> Decimal {
        let base = self.config.base_rr_ratio;
        if !has_data {
            return base;
        }
        let best = StrategyKind::ALL
            .into_iter()
            .map(|kind| tracker.strategy_metrics(kind))
            .filter(|m| m.trade_count >= MIN_TRADES_FOR_RR_ADAPTATION)
            .map(|m| m.avg_rr_achieved)
            .fold(0.0_f64, f64::max);

        let delta = if best > 2.5 {
            0.3 * (best - 2.5).min(1.0)
        } else if best > 0.0 && best < 1.5 {
            -0.3 * (1.5 - best).min(1.0)
        } else {
            0.0
        };
        (base + to_decimal(delta)).clamp(RR_RATIO_MIN, RR_RATIO_MAX)
    }
}

fn size_scale(m: &StrategyMetrics, has_data: bool) -> Decimal {
    if !has_data {
        return Decimal::ONE;
    }
    let pf = m.profit_factor;
    let mut scale: f64 = if pf > 2.0 {
        2.0
    } else if pf > 1.5 {
        1.2 + 0.8 * (pf - 1.5) / 0.5
    } else if pf > 1.0 {
        1.0 + 0.2 * (pf - 1.0) / 0.5
    } else if pf > 0.5 {
        0.3 + 0.7 * (pf - 0.5) / 0.5
    } else {
        0.25
    };

    if m.current_streak <= -4 {
        scale *= 0.5;
    }
    if m.current_streak >= 4 {
        scale *= 1.25;
    }
    if m.recent_trend > 0.6 {
        scale *= 1.2;
    } else if m.recent_trend < -0.6 {
        scale *= 0.7;
    }

    to_decimal(scale).clamp(SIZE_SCALE_MIN, SIZE_SCALE_MAX)
}

fn leverage_scale(overall: &StrategyMetrics, has_data: bool) -> Decimal {
    if !has_data {
        return Decimal::ONE;
    }
    let pf = overall.profit_factor;
    let mut scale: f64 = if pf > 1.2 {
        1.0
    } else if pf > 0.8 {
        0.7 + 0.3 * (pf - 0.8) / 0.4
    } else {
        0.7
    };
    if overall.current_streak <= -6 {
        scale = scale.min(0.6);
    }
    to_decimal(scale).clamp(LEVERAGE_SCALE_MIN, LEVERAGE_SCALE_MAX)
}

/// f64 to a 4dp Decimal. Non-finite values collapse to zero and are then
/// caught by the caller's clamp.
fn to_decimal(x: f64) -> Decimal {
    Decimal::from_f64(x)
        .map(|d| d.round_dp(4))
        .unwrap_or(dec!(0))
}
