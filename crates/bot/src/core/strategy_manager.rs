//! Regime-driven strategy selection.
//!
//! Per bar and symbol: classify the regime, optionally confirm a trend on a
//! higher timeframe, hold off after regime changes, dispatch to the regime's
//! strategy and run the filter chain over its signal.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::config::{IndicatorParams, MtfMode, StrategyConfig};
use crate::core::filters::{self, FilterInputs};
use crate::core::indicators;
use crate::core::regime::RegimeClassifier;
use crate::core::strategies;
use crate::types::{
    IndicatorSnapshot, MarketContext, MarketRegime, Signal, Timeframe, TrendDirection, OHLCV,
};

/// Inputs for one signal request.
#[derive(Debug, Clone, Copy)]
pub struct SignalInputs<'a> {
    pub symbol: &'a str,
    pub snapshot: &'a IndicatorSnapshot,
    pub higher_timeframes: &'a BTreeMap<Timeframe, Vec<OHLCV>>,
    pub context: &'a MarketContext,
    pub bar_index: u64,
}

pub struct StrategyManager {
    config: StrategyConfig,
    indicators: IndicatorParams,
    primary_timeframe: Timeframe,
    classifier: RegimeClassifier,
    /// Consecutive weak higher-timeframe readings (graduated mode).
    rejection_counts: HashMap<String, u32>,
    last_regime: HashMap<String, MarketRegime>,
    regime_change_bar: HashMap<String, u64>,
}

impl StrategyManager {
    pub fn new(
        config: StrategyConfig,
        indicators: IndicatorParams,
        primary_timeframe: Timeframe,
    ) -> Self {
        let classifier = RegimeClassifier::new(config.regime.clone(), &indicators);
        Self {
            config,
            indicators,
            primary_timeframe,
            classifier,
            rejection_counts: HashMap::new(),
            last_regime: HashMap::new(),
            regime_change_bar: HashMap::new(),
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Produce the filtered signal and the regime it was generated under.
    pub fn get_signal(&mut self, inputs: &SignalInputs<'_>) -> (Signal, MarketRegime) {
        let symbol = inputs.symbol;
        let snapshot = inputs.snapshot;

        let mut regime = self
            .classifier
            .classify(snapshot, inputs.context.derivatives.as_ref());

        if regime == MarketRegime::Trending && self.config.mtf_confirmation.enabled {
            if let Some(htf_adx) = self.higher_timeframe_adx(inputs.higher_timeframes) {
                regime = self.confirm_regime(symbol, regime, htf_adx);
            }
        }

        if let Some(hold) = self.regime_change_wait(symbol, regime, snapshot.price, inputs.bar_index)
        {
            return (hold, regime);
        }

        let kind = regime.strategy();
        let signal = strategies::analyze(
            kind,
            symbol,
            snapshot,
            self.config.params.get(kind),
            &self.indicators,
        );
        let signal = self.weak_trend_penalty(signal, regime);

        let htf_trends = self.higher_timeframe_trends(inputs.higher_timeframes);
        let filter_inputs = FilterInputs {
            snapshot,
            htf_trends: &htf_trends,
            context: inputs.context,
        };
        let signal = filters::apply_chain(signal, &filter_inputs, &self.config.filters);

        if signal.is_hold() {
            debug!(
                symbol,
                regime = %regime,
                strategy = %kind,
                reasons = %signal.reason_text(),
                "no entry"
            );
        } else {
            info!(
                symbol,
                regime = %regime,
                strategy = %kind,
                direction = %signal.direction,
                confidence = %signal.confidence,
                reasons = %signal.reason_text(),
                "strategy signal"
            );
        }

        (signal, regime)
    }

    // -----------------------------------------------------------------------
    // Higher-timeframe regime confirmation
    // -----------------------------------------------------------------------

    /// ADX of the confirmation timeframe, falling back to the secondary one.
    /// `None` when neither has data.
    fn higher_timeframe_adx(&self, htf: &BTreeMap<Timeframe, Vec<OHLCV>>) -> Option<Decimal> {
        let mtf = &self.config.mtf_confirmation;
        let candles = htf
            .get(&mtf.regime_timeframe)
            .filter(|c| !c.is_empty())
            .or_else(|| htf.get(&mtf.fallback_timeframe).filter(|c| !c.is_empty()))?;

        let highs: Vec<Decimal> = candles.iter().map(|c| c.high).collect();
        let lows: Vec<Decimal> = candles.iter().map(|c| c.low).collect();
        let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
        let (adx, _, _) = indicators::adx(&highs, &lows, &closes, self.indicators.adx_period as usize);
        Some(adx)
    }

    /// Apply the hysteresis policy to a primary-timeframe `Trending` regime.
    fn confirm_regime(&mut self, symbol: &str, regime: MarketRegime, htf_adx: Decimal) -> MarketRegime {
        let mtf = &self.config.mtf_confirmation;
        match mtf.mode {
            MtfMode::Binary => {
                if htf_adx < mtf.binary_adx_threshold {
                    info!(symbol, htf_adx = %htf_adx, "MTF regime: trending downgraded to ranging");
                    return MarketRegime::Ranging;
                }
                regime
            }
            MtfMode::Graduated => {
                if htf_adx >= mtf.strong_adx_threshold {
                    self.rejection_counts.insert(symbol.to_string(), 0);
                    return MarketRegime::TrendingStrong;
                }
                if htf_adx >= mtf.weak_adx_threshold {
                    self.rejection_counts.insert(symbol.to_string(), 0);
                    return MarketRegime::TrendingWeak;
                }
                let count = self.rejection_counts.entry(symbol.to_string()).or_insert(0);
                *count += 1;
                if *count >= mtf.rejection_confirmations {
                    info!(
                        symbol,
                        htf_adx = %htf_adx,
                        confirmations = *count,
                        "MTF regime: trending downgraded to ranging"
                    );
                    MarketRegime::Ranging
                } else {
                    debug!(
                        symbol,
                        htf_adx = %htf_adx,
                        count = *count,
                        needed = mtf.rejection_confirmations,
                        "MTF regime: weak trend, hysteresis pending"
                    );
                    MarketRegime::TrendingWeak
                }
            }
        }
    }

    /// Trend of every non-primary timeframe with data.
    fn higher_timeframe_trends(
        &self,
        htf: &BTreeMap<Timeframe, Vec<OHLCV>>,
    ) -> Vec<(Timeframe, TrendDirection)> {
        htf.iter()
            .filter(|(tf, candles)| **tf != self.primary_timeframe && !candles.is_empty())
            .map(|(tf, candles)| {
                (
                    *tf,
                    indicators::trend_direction(
                        candles,
                        self.indicators.ema_fast as usize,
                        self.indicators.ema_slow as usize,
                    ),
                )
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Regime-change wait and weak-trend penalty
    // -----------------------------------------------------------------------

    /// Record regime transitions and hold while inside the wait window.
    fn regime_change_wait(
        &mut self,
        symbol: &str,
        regime: MarketRegime,
        price: Decimal,
        bar: u64,
    ) -> Option<Signal> {
        let wait = self.config.regime_change_wait_bars;
        if wait == 0 || bar == 0 {
            return None;
        }

        if let Some(prev) = self.last_regime.insert(symbol.to_string(), regime) {
            if prev != regime {
                info!(symbol, from = %prev, to = %regime, wait_bars = wait, "regime change");
                self.regime_change_bar.insert(symbol.to_string(), bar);
            }
        }

        let change_bar = *self.regime_change_bar.get(symbol)?;
        let elapsed = bar.saturating_sub(change_bar);
        if elapsed < wait {
            return Some(Signal::hold(
                symbol,
                regime.strategy(),
                price,
                format!("Regime change wait ({elapsed}/{wait})"),
            ));
        }
        None
    }

    fn weak_trend_penalty(&self, signal: Signal, regime: MarketRegime) -> Signal {
        if regime != MarketRegime::TrendingWeak || signal.is_hold() {
            return signal;
        }
        let penalty = self.config.trending_weak_penalty;
        signal.adjust(-penalty, format!("trending_weak penalty (-{penalty})"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::strategies::test_support::neutral_snapshot;
    use crate::types::{SignalDirection, StrategyKind};
    use rust_decimal_macros::dec;

    fn manager(config: StrategyConfig) -> StrategyManager {
        StrategyManager::new(config, IndicatorParams::default(), Timeframe::M15)
    }

    fn graduated() -> StrategyConfig {
        let mut config = StrategyConfig::default();
        config.mtf_confirmation.enabled = true;
        config.mtf_confirmation.mode = MtfMode::Graduated;
        config
    }

    fn rising_candles(n: usize) -> Vec<OHLCV> {
        (0..n)
            .map(|i| {
                let base = Decimal::from(100 + i as i64);
                OHLCV {
                    timestamp: i as i64 * 3_600_000,
                    open: base,
                    high: base + dec!(1.5),
                    low: base - dec!(0.5),
                    close: base + dec!(1),
                    volume: dec!(1000),
                }
            })
            .collect()
    }

    #[test]
    fn test_graduated_tiers_and_hysteresis() {
        let mut m = manager(graduated());
        let t = MarketRegime::Trending;
        assert_eq!(m.confirm_regime("BTC", t, dec!(30)), MarketRegime::TrendingStrong);
        assert_eq!(m.confirm_regime("BTC", t, dec!(20)), MarketRegime::TrendingWeak);

        // Needs three consecutive weak readings to downgrade.
        assert_eq!(m.confirm_regime("BTC", t, dec!(10)), MarketRegime::TrendingWeak);
        assert_eq!(m.confirm_regime("BTC", t, dec!(10)), MarketRegime::TrendingWeak);
        assert_eq!(m.confirm_regime("BTC", t, dec!(10)), MarketRegime::Ranging);

        // A weak-tier reading resets the counter.
        assert_eq!(m.confirm_regime("BTC", t, dec!(19)), MarketRegime::TrendingWeak);
        assert_eq!(m.confirm_regime("BTC", t, dec!(10)), MarketRegime::TrendingWeak);

        // Counters are per symbol.
        assert_eq!(m.confirm_regime("ETH", t, dec!(10)), MarketRegime::TrendingWeak);
    }

    #[test]
    fn test_binary_mode_threshold() {
        let mut config = StrategyConfig::default();
        config.mtf_confirmation.enabled = true;
        let mut m = manager(config);
        let t = MarketRegime::Trending;
        assert_eq!(m.confirm_regime("BTC", t, dec!(21.9)), MarketRegime::Ranging);
        assert_eq!(m.confirm_regime("BTC", t, dec!(22)), MarketRegime::Trending);
    }

    #[test]
    fn test_htf_adx_falls_back_to_secondary_timeframe() {
        let m = manager(graduated());
        let mut htf = BTreeMap::new();
        assert_eq!(m.higher_timeframe_adx(&htf), None);

        htf.insert(Timeframe::H4, Vec::new());
        htf.insert(Timeframe::H1, rising_candles(80));
        let adx = m.higher_timeframe_adx(&htf);
        assert!(matches!(adx, Some(v) if v > dec!(25)), "adx {adx:?}");
    }

    #[test]
    fn test_higher_timeframe_trends_skip_primary() {
        let m = manager(StrategyConfig::default());
        let mut htf = BTreeMap::new();
        htf.insert(Timeframe::M15, rising_candles(40));
        htf.insert(Timeframe::H1, rising_candles(40));
        let trends = m.higher_timeframe_trends(&htf);
        assert_eq!(trends, vec![(Timeframe::H1, TrendDirection::Bullish)]);
    }

    #[test]
    fn test_regime_change_wait_guard() {
        let mut config = StrategyConfig::default();
        config.regime_change_wait_bars = 3;
        let mut m = manager(config);
        let htf = BTreeMap::new();
        let context = MarketContext::default();

        let mut trending = neutral_snapshot();
        trending.adx = dec!(30);
        let ranging = neutral_snapshot();

        let mut run = |snap: &IndicatorSnapshot, bar: u64| {
            let inputs = SignalInputs {
                symbol: "BTCUSDT",
                snapshot: snap,
                higher_timeframes: &htf,
                context: &context,
                bar_index: bar,
            };
            m.get_signal(&inputs)
        };

        let (s, regime) = run(&trending, 1);
        assert_eq!(regime, MarketRegime::Trending);
        assert!(!s.reason_text().starts_with("Regime change wait"));

        let (s, regime) = run(&ranging, 2);
        assert_eq!(regime, MarketRegime::Ranging);
        assert_eq!(s.reason_text(), "Regime change wait (0/3)");

        let (s, _) = run(&ranging, 4);
        assert_eq!(s.reason_text(), "Regime change wait (2/3)");

        let (s, _) = run(&ranging, 5);
        assert!(!s.reason_text().starts_with("Regime change wait"));
    }

    #[test]
    fn test_wait_guard_inactive_at_bar_zero() {
        let mut config = StrategyConfig::default();
        config.regime_change_wait_bars = 3;
        let mut m = manager(config);
        assert!(m
            .regime_change_wait("BTC", MarketRegime::Ranging, dec!(100), 0)
            .is_none());
        assert!(m.last_regime.is_empty());
    }

    #[test]
    fn test_weak_trend_penalty() {
        let m = manager(StrategyConfig::default());
        let buy = Signal {
            direction: SignalDirection::Buy,
            confidence: dec!(0.8),
            strategy: StrategyKind::Momentum,
            symbol: "BTCUSDT".into(),
            entry_price: dec!(100),
            stop_loss: dec!(97),
            take_profit: dec!(106),
            reasons: vec![],
        };
        let weak = m.weak_trend_penalty(buy.clone(), MarketRegime::TrendingWeak);
        assert_eq!(weak.confidence, dec!(0.72));
        let strong = m.weak_trend_penalty(buy, MarketRegime::TrendingStrong);
        assert_eq!(strong.confidence, dec!(0.8));
    }

    #[test]
    fn test_dispatches_by_regime() {
        let mut m = manager(StrategyConfig::default());
        let htf = BTreeMap::new();
        let context = MarketContext::default();

        // Ranging + price below the lower band: mean reversion buys.
        let mut snap = neutral_snapshot();
        snap.price = dec!(95.5);
        snap.open = dec!(95);
        let inputs = SignalInputs {
            symbol: "BTCUSDT",
            snapshot: &snap,
            higher_timeframes: &htf,
            context: &context,
            bar_index: 10,
        };
        let (s, regime) = m.get_signal(&inputs);
        assert_eq!(regime, MarketRegime::Ranging);
        assert_eq!(s.strategy, StrategyKind::MeanReversion);
        assert_eq!(s.direction, SignalDirection::Buy);
    }
}
