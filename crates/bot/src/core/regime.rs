//! Market regime classification.
//!
//! A pure function of the latest indicator snapshot and, when available,
//! the derivatives snapshot. First matching rule wins:
//!
//! 1. Too little history for ATR + ADX → `Ranging`
//! 2. Elevated ATR with high squeeze risk → `SqueezeRisk`
//! 3. ATR far above its average → `Volatile`
//! 4. ADX above threshold → `Trending` (or `Ranging` when open interest is
//!    collapsing, i.e. the trend is exhausted)
//! 5. Otherwise → `Ranging`

use rust_decimal::Decimal;
use tracing::debug;

use crate::config::{IndicatorParams, RegimeConfig};
use crate::types::{DerivativesSnapshot, IndicatorSnapshot, MarketRegime};

/// Regime classifier. Holds only configuration.
#[derive(Debug, Clone)]
pub struct RegimeClassifier {
    config: RegimeConfig,
    min_bars: usize,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig, indicators: &IndicatorParams) -> Self {
        Self {
            config,
            min_bars: (indicators.atr_period + indicators.adx_period) as usize,
        }
    }

    /// Classify the current bar.
    pub fn classify(
        &self,
        snapshot: &IndicatorSnapshot,
        derivatives: Option<&DerivativesSnapshot>,
    ) -> MarketRegime {
        let regime = self.decide(snapshot, derivatives);
        debug!(
            regime = %regime,
            adx = %snapshot.adx,
            atr = %snapshot.atr,
            atr_sma = %snapshot.atr_sma,
            bars = snapshot.bar_count,
            "regime classified"
        );
        regime
    }

    fn decide(
        &self,
        snapshot: &IndicatorSnapshot,
        derivatives: Option<&DerivativesSnapshot>,
    ) -> MarketRegime {
        if snapshot.bar_count < self.min_bars {
            return MarketRegime::Ranging;
        }

        let cfg = &self.config;
        let atr_sma = snapshot.atr_sma;
        let has_atr_baseline = atr_sma > Decimal::ZERO;

        if let Some(deriv) = derivatives {
            if has_atr_baseline
                && snapshot.atr > atr_sma * cfg.squeeze_atr_multiplier
                && deriv.squeeze_risk >= cfg.squeeze_oi_threshold
            {
                return MarketRegime::SqueezeRisk;
            }
        }

        if has_atr_baseline && snapshot.atr > atr_sma * cfg.atr_volatile_multiplier {
            return MarketRegime::Volatile;
        }

        if snapshot.adx > cfg.adx_trending_threshold {
            let exhausted = derivatives
                .map_or(false, |d| d.oi_delta_pct < cfg.trend_exhaustion_threshold);
            if exhausted {
                debug!(adx = %snapshot.adx, "trend exhaustion: open interest collapsing");
                return MarketRegime::Ranging;
            }
            return MarketRegime::Trending;
        }

        MarketRegime::Ranging
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn classifier() -> RegimeClassifier {
        RegimeClassifier::new(RegimeConfig::default(), &IndicatorParams::default())
    }

    fn snapshot(atr: Decimal, atr_sma: Decimal, adx: Decimal) -> IndicatorSnapshot {
        IndicatorSnapshot {
            bar_count: 200,
            price: dec!(100),
            atr,
            atr_sma,
            adx,
            ..Default::default()
        }
    }

    fn derivs(squeeze: Decimal, oi_delta: Decimal) -> DerivativesSnapshot {
        DerivativesSnapshot {
            squeeze_risk: squeeze,
            oi_delta_pct: oi_delta,
            ..Default::default()
        }
    }

    #[test]
    fn test_insufficient_bars_is_ranging() {
        let mut snap = snapshot(dec!(5), dec!(1), dec!(40));
        snap.bar_count = 27; // atr 14 + adx 14 = 28
        assert_eq!(classifier().classify(&snap, None), MarketRegime::Ranging);
    }

    #[test]
    fn test_squeeze_requires_derivatives() {
        let snap = snapshot(dec!(1.3), dec!(1), dec!(10));
        let c = classifier();
        assert_eq!(c.classify(&snap, None), MarketRegime::Ranging);
        assert_eq!(
            c.classify(&snap, Some(&derivs(dec!(0.6), dec!(0)))),
            MarketRegime::SqueezeRisk
        );
        assert_eq!(
            c.classify(&snap, Some(&derivs(dec!(0.5), dec!(0)))),
            MarketRegime::Ranging
        );
    }

    #[test]
    fn test_squeeze_takes_precedence_over_volatile() {
        let snap = snapshot(dec!(2), dec!(1), dec!(40));
        let c = classifier();
        assert_eq!(c.classify(&snap, None), MarketRegime::Volatile);
        assert_eq!(
            c.classify(&snap, Some(&derivs(dec!(0.9), dec!(0)))),
            MarketRegime::SqueezeRisk
        );
    }

    #[test]
    fn test_volatile_before_trending() {
        let snap = snapshot(dec!(1.6), dec!(1), dec!(40));
        assert_eq!(classifier().classify(&snap, None), MarketRegime::Volatile);
    }

    #[test]
    fn test_trending_and_exhaustion() {
        let snap = snapshot(dec!(1), dec!(1), dec!(30));
        let c = classifier();
        assert_eq!(c.classify(&snap, None), MarketRegime::Trending);
        assert_eq!(
            c.classify(&snap, Some(&derivs(dec!(0), dec!(-3.5)))),
            MarketRegime::Ranging
        );
        assert_eq!(
            c.classify(&snap, Some(&derivs(dec!(0), dec!(-2.5)))),
            MarketRegime::Trending
        );
    }

    #[test]
    fn test_adx_at_threshold_is_not_trending() {
        let snap = snapshot(dec!(1), dec!(1), dec!(25));
        assert_eq!(classifier().classify(&snap, None), MarketRegime::Ranging);
    }

    #[test]
    fn test_classification_is_idempotent() {
        let snap = snapshot(dec!(1.25), dec!(1), dec!(27));
        let d = derivs(dec!(0.7), dec!(1));
        let c = classifier();
        let first = c.classify(&snap, Some(&d));
        let second = c.classify(&snap, Some(&d));
        assert_eq!(first, second);
        assert_eq!(first, MarketRegime::SqueezeRisk);
    }
}
