//! Candle and config fixtures shared by the pipeline and backtest tests.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::test_support::bot_config;
use crate::config::BotConfig;
use crate::types::OHLCV;

pub const BAR_MS: i64 = 900_000;

/// A deterministic zig-zag: 40-bar legs of +/-0.5 per bar around 100.
pub fn zigzag(bars: usize) -> Vec<OHLCV> {
    let mut price = dec!(100);
    (0..bars)
        .map(|i| {
            let up = (i / 40) % 2 == 0;
            let open = price;
            price += if up { dec!(0.5) } else { dec!(-0.5) };
            OHLCV {
                timestamp: i as i64 * BAR_MS,
                open,
                high: open.max(price) + dec!(0.3),
                low: open.min(price) - dec!(0.3),
                close: price,
                volume: dec!(100) + Decimal::from(i % 7) * dec!(20),
            }
        })
        .collect()
}

/// Fixed thresholds low enough for the zig-zag legs to trade, with
/// plain stop/target exits.
pub fn trading_config() -> BotConfig {
    let mut config = bot_config();
    config.adaptive.enabled = false;
    config.risk.strategy_min_confidence = None;
    config.risk.min_signal_confidence = dec!(0.10);
    config.risk.exits.trailing_enabled = false;
    config.risk.exits.trailing_hybrid = false;
    config.backtest.initial_balance = dec!(1000);
    config
}
