//! Entries on a close through a clustered support/resistance level.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::{entry, volume_bonus};
use crate::config::{IndicatorParams, StrategyParams};
use crate::types::{IndicatorSnapshot, Signal, SignalDirection, StrategyKind};

const BREAK_SCORE: Decimal = dec!(0.30);
const BODY_RATIO_MIN: Decimal = dec!(0.6);
const BODY_BONUS: Decimal = dec!(0.15);
const RSI_BONUS: Decimal = dec!(0.10);
const MACD_BONUS: Decimal = dec!(0.05);
const OBV_BONUS: Decimal = dec!(0.05);

const RSI_BUY_BAND: (Decimal, Decimal) = (dec!(50), dec!(75));
const RSI_SELL_BAND: (Decimal, Decimal) = (dec!(25), dec!(50));

const VOLUME_TIERS: [(Decimal, Decimal); 3] = [
    (dec!(2.0), dec!(0.25)),
    (dec!(1.5), dec!(0.20)),
    (dec!(1.2), dec!(0.10)),
];

pub fn analyze(
    symbol: &str,
    snap: &IndicatorSnapshot,
    params: &StrategyParams,
    _indicators: &IndicatorParams,
) -> Signal {
    if snap.support_levels.is_empty() && snap.resistance_levels.is_empty() {
        return Signal::hold(symbol, StrategyKind::Breakout, snap.price, "No S/R levels");
    }

    let (direction, level) = if let Some(r) = broken_resistance(snap) {
        (SignalDirection::Buy, r)
    } else if let Some(s) = broken_support(snap) {
        (SignalDirection::Sell, s)
    } else {
        return Signal::hold(symbol, StrategyKind::Breakout, snap.price, "No level broken");
    };
    let buy = direction == SignalDirection::Buy;

    let trigger = if buy {
        format!("Broke resistance {level}")
    } else {
        format!("Broke support {level}")
    };
    let mut signal = entry(
        symbol,
        StrategyKind::Breakout,
        direction,
        snap,
        params,
        BREAK_SCORE,
        trigger,
    );
    if signal.is_hold() {
        return signal;
    }

    if let Some(bonus) = volume_bonus(snap.volume_ratio, &VOLUME_TIERS) {
        signal = signal.adjust(bonus, format!("Volume {:.2}x average", snap.volume_ratio));
    }

    let body_in_direction = if buy {
        snap.is_bullish_candle()
    } else {
        snap.is_bearish_candle()
    };
    if body_in_direction && snap.body_ratio() > BODY_RATIO_MIN {
        signal = signal.adjust(BODY_BONUS, "Decisive candle body");
    }

    let (lo, hi) = if buy { RSI_BUY_BAND } else { RSI_SELL_BAND };
    if snap.rsi > lo && snap.rsi < hi {
        signal = signal.adjust(RSI_BONUS, format!("RSI {:.1} supports break", snap.rsi));
    }

    if (buy && snap.macd_histogram > Decimal::ZERO) || (!buy && snap.macd_histogram < Decimal::ZERO)
    {
        signal = signal.adjust(MACD_BONUS, "MACD confirms");
    }

    if (buy && snap.obv > snap.obv_ema) || (!buy && snap.obv < snap.obv_ema) {
        signal = signal.adjust(OBV_BONUS, "OBV confirms");
    }

    signal
}

/// Highest resistance crossed upward by this bar's close.
fn broken_resistance(snap: &IndicatorSnapshot) -> Option<Decimal> {
    snap.resistance_levels
        .iter()
        .copied()
        .filter(|r| snap.prev_close <= *r && snap.price > *r)
        .max()
}

/// Lowest support crossed downward by this bar's close.
fn broken_support(snap: &IndicatorSnapshot) -> Option<Decimal> {
    snap.support_levels
        .iter()
        .copied()
        .filter(|s| snap.prev_close >= *s && snap.price < *s)
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::strategies::test_support::neutral_snapshot;

    fn run(snap: &IndicatorSnapshot) -> Signal {
        analyze(
            "SOLUSDT",
            snap,
            &StrategyParams::default(),
            &IndicatorParams::default(),
        )
    }

    #[test]
    fn test_resistance_break_scores() {
        let mut snap = neutral_snapshot();
        snap.resistance_levels = vec![dec!(101), dec!(102.5), dec!(110)];
        snap.support_levels = vec![dec!(95)];
        snap.prev_close = dec!(100.5);
        snap.open = dec!(100.6);
        snap.price = dec!(103);
        snap.high = dec!(103.2);
        snap.low = dec!(100.4);
        snap.volume_ratio = dec!(2.2);
        snap.rsi = dec!(62);
        snap.macd_histogram = dec!(0.2);
        let s = run(&snap);
        assert_eq!(s.direction, SignalDirection::Buy);
        assert_eq!(s.reasons[0], "Broke resistance 102.5");
        // 0.30 + 0.25 + 0.15 + 0.10 + 0.05
        assert_eq!(s.confidence, dec!(0.85));
    }

    #[test]
    fn test_support_break_mirrors() {
        let mut snap = neutral_snapshot();
        snap.support_levels = vec![dec!(97), dec!(99)];
        snap.prev_close = dec!(99.5);
        snap.open = dec!(99.4);
        snap.price = dec!(96.5);
        snap.high = dec!(99.6);
        snap.low = dec!(96.3);
        snap.rsi = dec!(40);
        snap.obv = dec!(-10);
        let s = run(&snap);
        assert_eq!(s.direction, SignalDirection::Sell);
        assert_eq!(s.reasons[0], "Broke support 97");
        // 0.30 + body 0.15 + RSI 0.10 + OBV 0.05
        assert_eq!(s.confidence, dec!(0.60));
        assert!(s.stop_loss > s.entry_price);
    }

    #[test]
    fn test_already_above_level_is_not_a_break() {
        let mut snap = neutral_snapshot();
        snap.resistance_levels = vec![dec!(99)];
        snap.prev_close = dec!(99.5);
        snap.price = dec!(100);
        assert!(run(&snap).is_hold());
    }

    #[test]
    fn test_no_levels_holds() {
        let s = run(&neutral_snapshot());
        assert!(s.is_hold());
        assert_eq!(s.reason_text(), "No S/R levels");
    }
}
