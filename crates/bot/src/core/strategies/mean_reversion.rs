//! Fade moves that close outside the Bollinger Bands.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::entry;
use crate::config::{IndicatorParams, StrategyParams};
use crate::types::{IndicatorSnapshot, Signal, SignalDirection, StrategyKind};

const BAND_TOUCH_SCORE: Decimal = dec!(0.30);
const RSI_EXTREME_BONUS: Decimal = dec!(0.25);
const RSI_LEANING_BONUS: Decimal = dec!(0.12);
const RSI_LEANING_BUY: Decimal = dec!(40);
const RSI_LEANING_SELL: Decimal = dec!(60);
const REVERSAL_CANDLE_BONUS: Decimal = dec!(0.12);
const VOLUME_RATIO_MIN: Decimal = dec!(1.2);
const VOLUME_BONUS: Decimal = dec!(0.08);
const DIVERGENCE_BONUS: Decimal = dec!(0.10);

pub fn analyze(
    symbol: &str,
    snap: &IndicatorSnapshot,
    params: &StrategyParams,
    indicators: &IndicatorParams,
) -> Signal {
    let direction = if snap.bb_lower > Decimal::ZERO && snap.price <= snap.bb_lower {
        SignalDirection::Buy
    } else if snap.bb_upper > Decimal::ZERO && snap.price >= snap.bb_upper {
        SignalDirection::Sell
    } else {
        return Signal::hold(
            symbol,
            StrategyKind::MeanReversion,
            snap.price,
            "Price inside Bollinger Bands",
        );
    };
    let buy = direction == SignalDirection::Buy;

    let trigger = if buy {
        "Close at or below lower band"
    } else {
        "Close at or above upper band"
    };
    let mut signal = entry(
        symbol,
        StrategyKind::MeanReversion,
        direction,
        snap,
        params,
        BAND_TOUCH_SCORE,
        trigger,
    );
    if signal.is_hold() {
        return signal;
    }

    let rsi = snap.rsi;
    if buy {
        if rsi <= indicators.rsi_oversold {
            signal = signal.adjust(RSI_EXTREME_BONUS, format!("RSI {rsi:.1} oversold"));
        } else if rsi <= RSI_LEANING_BUY {
            signal = signal.adjust(RSI_LEANING_BONUS, format!("RSI {rsi:.1} weak"));
        }
    } else if rsi >= indicators.rsi_overbought {
        signal = signal.adjust(RSI_EXTREME_BONUS, format!("RSI {rsi:.1} overbought"));
    } else if rsi >= RSI_LEANING_SELL {
        signal = signal.adjust(RSI_LEANING_BONUS, format!("RSI {rsi:.1} strong"));
    }

    if (buy && snap.is_bullish_candle()) || (!buy && snap.is_bearish_candle()) {
        signal = signal.adjust(REVERSAL_CANDLE_BONUS, "Reversal candle");
    }

    if snap.volume_ratio >= VOLUME_RATIO_MIN {
        signal = signal.adjust(VOLUME_BONUS, format!("Volume {:.2}x average", snap.volume_ratio));
    }

    if (buy && snap.bullish_divergence) || (!buy && snap.bearish_divergence) {
        signal = signal.adjust(DIVERGENCE_BONUS, "Supporting divergence");
    }

    signal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::strategies::test_support::neutral_snapshot;

    fn run(snap: &IndicatorSnapshot) -> Signal {
        analyze(
            "ETHUSDT",
            snap,
            &StrategyParams::default(),
            &IndicatorParams::default(),
        )
    }

    #[test]
    fn test_lower_band_full_confirmation() {
        let mut snap = neutral_snapshot();
        snap.price = dec!(95.5);
        snap.open = dec!(95);
        snap.rsi = dec!(22);
        snap.volume_ratio = dec!(1.3);
        snap.bullish_divergence = true;
        let s = run(&snap);
        assert_eq!(s.direction, SignalDirection::Buy);
        // 0.30 + 0.25 + 0.12 + 0.08 + 0.10
        assert_eq!(s.confidence, dec!(0.85));
        assert_eq!(s.stop_loss, dec!(92.5));
    }

    #[test]
    fn test_upper_band_leaning_rsi() {
        let mut snap = neutral_snapshot();
        snap.price = dec!(104.2);
        snap.open = dec!(104.5);
        snap.rsi = dec!(65);
        let s = run(&snap);
        assert_eq!(s.direction, SignalDirection::Sell);
        // 0.30 + 0.12 + 0.12 (bearish candle)
        assert_eq!(s.confidence, dec!(0.54));
        assert!(s.stop_loss > s.entry_price);
    }

    #[test]
    fn test_inside_bands_holds() {
        let s = run(&neutral_snapshot());
        assert!(s.is_hold());
    }
}
