//! Trend-following entries on fast/slow EMA structure.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::{entry, volume_bonus};
use crate::config::{IndicatorParams, StrategyParams};
use crate::types::{IndicatorSnapshot, Signal, SignalDirection, StrategyKind};

const CROSS_SCORE: Decimal = dec!(0.20);
const CONTINUATION_SCORE: Decimal = dec!(0.15);
const RSI_ZONE_BONUS: Decimal = dec!(0.15);
const RSI_EXHAUSTED_PENALTY: Decimal = dec!(-0.10);
const MACD_SIDE_BONUS: Decimal = dec!(0.10);
const MACD_SLOPE_BONUS: Decimal = dec!(0.05);
const OBV_BONUS: Decimal = dec!(0.10);
const DIVERGENCE_PENALTY: Decimal = dec!(-0.10);
const BODY_BONUS: Decimal = dec!(0.05);
const BODY_RATIO_MIN: Decimal = dec!(0.6);

/// RSI band (exclusive) in which momentum still has room to run.
const RSI_BUY_FLOOR: Decimal = dec!(40);
const RSI_SELL_CEILING: Decimal = dec!(60);

const VOLUME_TIERS: [(Decimal, Decimal); 3] = [
    (dec!(2.0), dec!(0.20)),
    (dec!(1.5), dec!(0.15)),
    (dec!(1.2), dec!(0.08)),
];

pub fn analyze(
    symbol: &str,
    snap: &IndicatorSnapshot,
    params: &StrategyParams,
    indicators: &IndicatorParams,
) -> Signal {
    let Some((direction, base, trigger)) = trigger(snap) else {
        return Signal::hold(
            symbol,
            StrategyKind::Momentum,
            snap.price,
            "No momentum trigger",
        );
    };

    let mut signal = entry(
        symbol,
        StrategyKind::Momentum,
        direction,
        snap,
        params,
        base,
        trigger,
    );
    if signal.is_hold() {
        return signal;
    }

    let buy = direction == SignalDirection::Buy;

    // RSI: room to run vs exhausted.
    let (in_zone, exhausted) = if buy {
        (
            snap.rsi > RSI_BUY_FLOOR && snap.rsi < indicators.rsi_overbought,
            snap.rsi >= indicators.rsi_overbought,
        )
    } else {
        (
            snap.rsi > indicators.rsi_oversold && snap.rsi < RSI_SELL_CEILING,
            snap.rsi <= indicators.rsi_oversold,
        )
    };
    if in_zone {
        signal = signal.adjust(RSI_ZONE_BONUS, format!("RSI {:.1} in momentum zone", snap.rsi));
    } else if exhausted {
        signal = signal.adjust(RSI_EXHAUSTED_PENALTY, format!("RSI {:.1} exhausted", snap.rsi));
    }

    // MACD histogram side and slope.
    let hist = snap.macd_histogram;
    let prev_hist = snap.prev_macd_histogram;
    if (buy && hist > Decimal::ZERO) || (!buy && hist < Decimal::ZERO) {
        signal = signal.adjust(MACD_SIDE_BONUS, "MACD histogram confirms");
    }
    if (buy && hist > prev_hist) || (!buy && hist < prev_hist) {
        signal = signal.adjust(MACD_SLOPE_BONUS, "MACD histogram accelerating");
    }

    if let Some(bonus) = volume_bonus(snap.volume_ratio, &VOLUME_TIERS) {
        signal = signal.adjust(bonus, format!("Volume {:.2}x average", snap.volume_ratio));
    }

    if (buy && snap.obv > snap.obv_ema) || (!buy && snap.obv < snap.obv_ema) {
        signal = signal.adjust(OBV_BONUS, "OBV confirms");
    }

    if (buy && snap.bearish_divergence) || (!buy && snap.bullish_divergence) {
        signal = signal.adjust(DIVERGENCE_PENALTY, "Opposing divergence");
    }

    let body_in_direction = if buy {
        snap.is_bullish_candle()
    } else {
        snap.is_bearish_candle()
    };
    if body_in_direction && snap.body_ratio() > BODY_RATIO_MIN {
        signal = signal.adjust(BODY_BONUS, "Strong candle body");
    }

    signal
}

/// Structural trigger: direction, base score and description.
fn trigger(snap: &IndicatorSnapshot) -> Option<(SignalDirection, Decimal, &'static str)> {
    let fast = snap.ema_fast;
    let slow = snap.ema_slow;
    let trend = snap.ema_trend;
    let price = snap.price;

    let crossed_up = snap.prev_ema_fast <= snap.prev_ema_slow && fast > slow;
    let crossed_down = snap.prev_ema_fast >= snap.prev_ema_slow && fast < slow;

    if crossed_up && price > trend {
        return Some((SignalDirection::Buy, CROSS_SCORE, "EMA bullish cross"));
    }
    if crossed_down && price < trend {
        return Some((SignalDirection::Sell, CROSS_SCORE, "EMA bearish cross"));
    }
    if fast > slow && price > fast && price > trend {
        return Some((SignalDirection::Buy, CONTINUATION_SCORE, "Bullish EMA continuation"));
    }
    if fast < slow && price < fast && price < trend {
        return Some((SignalDirection::Sell, CONTINUATION_SCORE, "Bearish EMA continuation"));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::strategies::test_support::neutral_snapshot;

    fn bullish_cross() -> IndicatorSnapshot {
        let mut s = neutral_snapshot();
        s.price = dec!(104);
        s.open = dec!(101);
        s.high = dec!(104.5);
        s.low = dec!(100.5);
        s.prev_ema_fast = dec!(100);
        s.prev_ema_slow = dec!(100.2);
        s.ema_fast = dec!(101.5);
        s.ema_slow = dec!(100.8);
        s.ema_trend = dec!(100);
        s.rsi = dec!(62);
        s.macd_histogram = dec!(0.4);
        s.prev_macd_histogram = dec!(0.1);
        s.volume_ratio = dec!(2.1);
        s.obv = dec!(5000);
        s.obv_ema = dec!(4000);
        s
    }

    fn run(snap: &IndicatorSnapshot) -> Signal {
        analyze(
            "BTCUSDT",
            snap,
            &StrategyParams::default(),
            &IndicatorParams::default(),
        )
    }

    #[test]
    fn test_bullish_cross_scenario() {
        let s = run(&bullish_cross());
        assert_eq!(s.direction, SignalDirection::Buy);
        assert!(s.confidence >= dec!(0.70), "confidence {}", s.confidence);
        assert!(s.stop_loss < s.entry_price);
        assert!(s.take_profit > s.entry_price);
        // 0.20 + 0.15 + 0.10 + 0.05 + 0.20 + 0.10 + 0.05
        assert_eq!(s.confidence, dec!(0.85));
        assert_eq!(s.reasons[0], "EMA bullish cross");
    }

    #[test]
    fn test_overbought_and_divergence_penalised() {
        let mut snap = bullish_cross();
        snap.rsi = dec!(80);
        snap.bearish_divergence = true;
        let s = run(&snap);
        // 0.85 - 0.15 (zone lost) - 0.10 (exhausted) - 0.10 (divergence)
        assert_eq!(s.confidence, dec!(0.50));
    }

    #[test]
    fn test_bearish_continuation_mirrors() {
        let mut snap = neutral_snapshot();
        snap.price = dec!(96);
        snap.open = dec!(96.5);
        snap.high = dec!(97);
        snap.low = dec!(95.5);
        snap.ema_fast = dec!(98);
        snap.ema_slow = dec!(99);
        snap.prev_ema_fast = dec!(98.2);
        snap.prev_ema_slow = dec!(99.1);
        snap.ema_trend = dec!(100);
        snap.rsi = dec!(35);
        snap.macd_histogram = dec!(-0.3);
        snap.prev_macd_histogram = dec!(-0.1);
        let s = run(&snap);
        assert_eq!(s.direction, SignalDirection::Sell);
        // continuation 0.15 + RSI zone 0.15 + hist 0.10 + falling 0.05
        assert_eq!(s.confidence, dec!(0.45));
        assert!(s.stop_loss > s.entry_price);
    }

    #[test]
    fn test_flat_emas_hold() {
        let s = run(&neutral_snapshot());
        assert!(s.is_hold());
        assert_eq!(s.confidence, Decimal::ZERO);
    }
}
