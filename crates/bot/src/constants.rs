use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Milliseconds in one UTC day. Candle timestamps are epoch milliseconds.
pub const MS_PER_DAY: i64 = 86_400_000;

// ---------------------------------------------------------------------------
// Strategy minimum history (bars beyond the defining indicator period)
// ---------------------------------------------------------------------------

pub const MOMENTUM_MIN_BARS_MARGIN: usize = 5;
pub const MEAN_REVERSION_MIN_BARS_MARGIN: usize = 5;
pub const BREAKOUT_MIN_BARS_MARGIN: usize = 10;

// ---------------------------------------------------------------------------
// Adaptive controller hard bounds
// ---------------------------------------------------------------------------

pub const ADAPTIVE_CONFIDENCE_MIN: Decimal = dec!(0.60);
pub const ADAPTIVE_CONFIDENCE_MAX: Decimal = dec!(0.90);

pub const SIZE_SCALE_MIN: Decimal = dec!(0.15);
pub const SIZE_SCALE_MAX: Decimal = dec!(2.0);

pub const LEVERAGE_SCALE_MIN: Decimal = dec!(0.6);
pub const LEVERAGE_SCALE_MAX: Decimal = dec!(1.0);

pub const SL_MULTIPLIER_MIN: Decimal = dec!(1.2);
pub const SL_MULTIPLIER_MAX: Decimal = dec!(2.0);

pub const RR_RATIO_MIN: Decimal = dec!(1.5);
pub const RR_RATIO_MAX: Decimal = dec!(2.5);

/// Strategies need this many trades before their achieved R:R can steer
/// the global R:R target.
pub const MIN_TRADES_FOR_RR_ADAPTATION: usize = 5;

/// Adaptive stop multipliers closer than this to the strategy's own are
/// treated as unchanged.
pub const SL_MULTIPLIER_EPSILON: Decimal = dec!(0.01);
