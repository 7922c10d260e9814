//! Pure computation module for technical indicators.
//!
//! No I/O, no side effects. Takes OHLCV arrays and returns indicator values.
//! All computations use `Decimal` for precision.
//!
//! Indicators implemented:
//! - Trend: EMA (SMA-seeded), ADX with +DI/-DI (Wilder), higher-timeframe
//!   trend direction from a fast/slow EMA pair
//! - Oscillators: RSI (Wilder's smoothing), MACD histogram
//! - Volatility: Bollinger Bands, ATR (Wilder) and its moving average
//! - Volume: volume SMA / ratio, On-Balance Volume and its EMA
//! - Structure: clustered support/resistance from 5-bar pivots,
//!   RSI / MACD divergence
//!
//! References:
//!     Wilder (1978), "New Concepts in Technical Trading Systems".
//!     Granville (1963), "Granville's New Key to Stock Market Profits" (OBV).

use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;

use crate::config::IndicatorParams;
use crate::errors::BotError;
use crate::types::{IndicatorSnapshot, TrendDirection, OHLCV};

/// Bars on each side of a pivot high/low.
const PIVOT_WING: usize = 2;

/// Pivot values closer than this fraction of their mean share a cluster.
const SR_CLUSTER_THRESHOLD: Decimal = dec!(0.005);

// ═══════════════════════════════════════════════════════════════════════════
// Moving Averages
// ═══════════════════════════════════════════════════════════════════════════

/// Exponential Moving Average.
///
/// Multiplier `k = 2 / (period + 1)`. First value seeded with SMA of the
/// first `period` prices. Returns empty `Vec` if insufficient data; otherwise
/// `prices.len() - period + 1` values, the last aligned with the last price.
pub fn ema(prices: &[Decimal], period: usize) -> Vec<Decimal> {
    if prices.len() < period || period == 0 {
        return Vec::new();
    }

    let k = dec!(2) / Decimal::from(period as u64 + 1);
    let one_minus_k = dec!(1) - k;

    // Seed with SMA of first `period` values.
    let mut prev: Decimal =
        prices[..period].iter().copied().sum::<Decimal>() / Decimal::from(period as u64);

    let mut result = Vec::with_capacity(prices.len() - period + 1);
    result.push(prev);

    for &price in &prices[period..] {
        prev = price * k + prev * one_minus_k;
        result.push(prev);
    }

    result
}

/// Simple moving average of the last `period` values. Zero if insufficient.
pub fn sma(values: &[Decimal], period: usize) -> Decimal {
    if values.len() < period || period == 0 {
        return Decimal::ZERO;
    }
    values[values.len() - period..].iter().copied().sum::<Decimal>() / Decimal::from(period as u64)
}

// ═══════════════════════════════════════════════════════════════════════════
// Oscillators
// ═══════════════════════════════════════════════════════════════════════════

/// RSI series (Wilder's smoothing), one value per bar from index `period`.
///
/// Uses smoothing factor `1/period` (not the standard EMA `2/(period+1)`).
/// Empty if insufficient data.
pub fn rsi_series(prices: &[Decimal], period: usize) -> Vec<Decimal> {
    if prices.len() < period + 1 || period == 0 {
        return Vec::new();
    }

    let period_d = Decimal::from(period as u64);
    let period_minus_1 = Decimal::from(period as u64 - 1);

    let changes: Vec<Decimal> = prices.windows(2).map(|w| w[1] - w[0]).collect();

    // Initial average gain/loss from first `period` changes.
    let mut avg_gain = changes[..period]
        .iter()
        .map(|&c| c.max(Decimal::ZERO))
        .sum::<Decimal>()
        / period_d;

    let mut avg_loss = changes[..period]
        .iter()
        .map(|&c| (-c).max(Decimal::ZERO))
        .sum::<Decimal>()
        / period_d;

    let mut result = Vec::with_capacity(changes.len() - period + 1);
    result.push(rsi_from_averages(avg_gain, avg_loss));

    for &c in &changes[period..] {
        let gain = c.max(Decimal::ZERO);
        let loss = (-c).max(Decimal::ZERO);
        avg_gain = (avg_gain * period_minus_1 + gain) / period_d;
        avg_loss = (avg_loss * period_minus_1 + loss) / period_d;
        result.push(rsi_from_averages(avg_gain, avg_loss));
    }

    result
}

fn rsi_from_averages(avg_gain: Decimal, avg_loss: Decimal) -> Decimal {
    if avg_loss == Decimal::ZERO {
        return dec!(100);
    }
    let rs = avg_gain / avg_loss;
    dec!(100) - (dec!(100) / (dec!(1) + rs))
}

/// Relative Strength Index for the last bar. Returns 50 if insufficient data.
pub fn rsi(prices: &[Decimal], period: usize) -> Decimal {
    rsi_series(prices, period).last().copied().unwrap_or(dec!(50))
}

/// MACD histogram series (`macd_line - signal_line`), last value aligned
/// with the last price. Empty if insufficient data.
pub fn macd_histogram(
    prices: &[Decimal],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Vec<Decimal> {
    if fast == 0 || fast >= slow || prices.len() < slow + signal {
        return Vec::new();
    }

    let fast_ema = ema(prices, fast);
    let slow_ema = ema(prices, slow);

    // Align: MACD line = fast_ema - slow_ema, from the slow-start onward.
    let offset = slow - fast;
    let macd_values: Vec<Decimal> = (0..slow_ema.len())
        .map(|i| fast_ema[i + offset] - slow_ema[i])
        .collect();

    let signal_ema = ema(&macd_values, signal);
    let skip = macd_values.len() - signal_ema.len();

    macd_values[skip..]
        .iter()
        .zip(&signal_ema)
        .map(|(&line, &sig)| line - sig)
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// Volatility
// ═══════════════════════════════════════════════════════════════════════════

/// Bollinger Bands (SMA-based with population standard deviation).
///
/// Returns `(upper, middle, lower)`.  Falls back to `(price, price, price)`
/// if insufficient data.
pub fn bollinger_bands(
    prices: &[Decimal],
    period: usize,
    std_mult: Decimal,
) -> (Decimal, Decimal, Decimal) {
    let fallback = prices.last().copied().unwrap_or(Decimal::ZERO);
    if prices.len() < period || period == 0 {
        return (fallback, fallback, fallback);
    }

    let window = &prices[prices.len() - period..];
    let period_d = Decimal::from(period as u64);
    let middle: Decimal = window.iter().copied().sum::<Decimal>() / period_d;

    // Population variance.
    let variance: Decimal = window
        .iter()
        .map(|&p| {
            let diff = p - middle;
            diff * diff
        })
        .sum::<Decimal>()
        / period_d;

    let std_dev = variance.sqrt().unwrap_or(Decimal::ZERO);
    let upper = middle + std_mult * std_dev;
    let lower = middle - std_mult * std_dev;

    (upper, middle, lower)
}

/// True ranges from bar 1 onward: `max(H-L, |H-prevC|, |L-prevC|)`.
fn true_ranges(highs: &[Decimal], lows: &[Decimal], closes: &[Decimal]) -> Vec<Decimal> {
    (1..highs.len())
        .map(|i| {
            let hl = highs[i] - lows[i];
            let hc = (highs[i] - closes[i - 1]).abs();
            let lc = (lows[i] - closes[i - 1]).abs();
            hl.max(hc).max(lc)
        })
        .collect()
}

/// ATR series (Wilder's smoothing), one value per bar from index `period`.
///
/// Empty on mismatched or insufficient data.
pub fn atr_series(
    highs: &[Decimal],
    lows: &[Decimal],
    closes: &[Decimal],
    period: usize,
) -> Vec<Decimal> {
    let n = highs.len();
    if n < period + 1 || lows.len() != n || closes.len() != n || period == 0 {
        return Vec::new();
    }

    let trs = true_ranges(highs, lows, closes);
    let period_d = Decimal::from(period as u64);
    let period_m1 = Decimal::from(period as u64 - 1);

    // First ATR = simple average of first `period` TRs.
    let mut atr_val: Decimal = trs[..period].iter().copied().sum::<Decimal>() / period_d;
    let mut result = Vec::with_capacity(trs.len() - period + 1);
    result.push(atr_val);

    for &tr in &trs[period..] {
        atr_val = (atr_val * period_m1 + tr) / period_d;
        result.push(atr_val);
    }

    result
}

/// Average True Range for the last bar. `Decimal::ZERO` if insufficient.
pub fn atr(highs: &[Decimal], lows: &[Decimal], closes: &[Decimal], period: usize) -> Decimal {
    atr_series(highs, lows, closes, period)
        .last()
        .copied()
        .unwrap_or(Decimal::ZERO)
}

// ═══════════════════════════════════════════════════════════════════════════
// Trend Strength
// ═══════════════════════════════════════════════════════════════════════════

/// Average Directional Index with the directional indicators.
///
/// Returns `(adx, +DI, -DI)`, all zero when fewer than `2 * period + 1` bars
/// are available.
pub fn adx(
    highs: &[Decimal],
    lows: &[Decimal],
    closes: &[Decimal],
    period: usize,
) -> (Decimal, Decimal, Decimal) {
    let zero = (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO);
    let n = highs.len();
    if period == 0 || n < 2 * period + 1 || lows.len() != n || closes.len() != n {
        return zero;
    }

    let trs = true_ranges(highs, lows, closes);
    let mut plus_dm = Vec::with_capacity(n - 1);
    let mut minus_dm = Vec::with_capacity(n - 1);
    for i in 1..n {
        let up = highs[i] - highs[i - 1];
        let down = lows[i - 1] - lows[i];
        plus_dm.push(if up > down && up > Decimal::ZERO { up } else { Decimal::ZERO });
        minus_dm.push(if down > up && down > Decimal::ZERO { down } else { Decimal::ZERO });
    }

    let period_d = Decimal::from(period as u64);
    let hundred = dec!(100);

    let mut s_tr: Decimal = trs[..period].iter().copied().sum();
    let mut s_plus: Decimal = plus_dm[..period].iter().copied().sum();
    let mut s_minus: Decimal = minus_dm[..period].iter().copied().sum();

    let directional = |s_tr: Decimal, s_plus: Decimal, s_minus: Decimal| {
        if s_tr.is_zero() {
            return (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO);
        }
        let pdi = hundred * s_plus / s_tr;
        let mdi = hundred * s_minus / s_tr;
        let sum = pdi + mdi;
        let dx = if sum.is_zero() {
            Decimal::ZERO
        } else {
            hundred * (pdi - mdi).abs() / sum
        };
        (pdi, mdi, dx)
    };

    let (mut pdi, mut mdi, first_dx) = directional(s_tr, s_plus, s_minus);
    let mut dxs = vec![first_dx];

    for i in period..trs.len() {
        s_tr = s_tr - s_tr / period_d + trs[i];
        s_plus = s_plus - s_plus / period_d + plus_dm[i];
        s_minus = s_minus - s_minus / period_d + minus_dm[i];
        let (p, m, dx) = directional(s_tr, s_plus, s_minus);
        pdi = p;
        mdi = m;
        dxs.push(dx);
    }

    // First ADX = mean of the first `period` DX values, then Wilder smoothing.
    let mut adx_val: Decimal = dxs[..period].iter().copied().sum::<Decimal>() / period_d;
    for &dx in &dxs[period..] {
        adx_val = (adx_val * (period_d - Decimal::ONE) + dx) / period_d;
    }

    (adx_val, pdi, mdi)
}

/// Trend of a series from its fast/slow EMA pair. Neutral when either EMA is
/// unavailable or they are equal.
pub fn trend_direction(candles: &[OHLCV], fast: usize, slow: usize) -> TrendDirection {
    let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
    let fast_ema = ema(&closes, fast);
    let slow_ema = ema(&closes, slow);
    let (Some(&f), Some(&s)) = (fast_ema.last(), slow_ema.last()) else {
        return TrendDirection::Neutral;
    };
    if f > s {
        TrendDirection::Bullish
    } else if f < s {
        TrendDirection::Bearish
    } else {
        TrendDirection::Neutral
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Volume
// ═══════════════════════════════════════════════════════════════════════════

/// On-Balance Volume series, starting at zero on the first bar.
pub fn obv_series(closes: &[Decimal], volumes: &[Decimal]) -> Vec<Decimal> {
    if closes.is_empty() || closes.len() != volumes.len() {
        return Vec::new();
    }

    let mut running = Decimal::ZERO;
    let mut result = Vec::with_capacity(closes.len());
    result.push(running);
    for i in 1..closes.len() {
        if closes[i] > closes[i - 1] {
            running += volumes[i];
        } else if closes[i] < closes[i - 1] {
            running -= volumes[i];
        }
        result.push(running);
    }
    result
}

// ═══════════════════════════════════════════════════════════════════════════
// Market Structure
// ═══════════════════════════════════════════════════════════════════════════

/// Clustered support and resistance levels over the last `lookback` bars.
///
/// Pivot highs/lows are bars that are the extreme of the two bars on each
/// side. Nearby pivots are merged (gap threshold `mean * 0.005`) and the
/// `levels` most-touched clusters are kept. Returns `(supports, resistances)`
/// sorted ascending; both empty when fewer than `lookback` bars exist.
pub fn support_resistance(
    highs: &[Decimal],
    lows: &[Decimal],
    lookback: usize,
    levels: usize,
) -> (Vec<Decimal>, Vec<Decimal>) {
    let n = highs.len();
    if lookback < 2 * PIVOT_WING + 1 || n < lookback || lows.len() != n || levels == 0 {
        return (Vec::new(), Vec::new());
    }

    let highs = &highs[n - lookback..];
    let lows = &lows[n - lookback..];

    let mut pivot_highs = Vec::new();
    let mut pivot_lows = Vec::new();
    for i in PIVOT_WING..lookback - PIVOT_WING {
        let window = i - PIVOT_WING..=i + PIVOT_WING;
        if window.clone().all(|j| highs[j] <= highs[i]) {
            pivot_highs.push(highs[i]);
        }
        if window.clone().all(|j| lows[j] >= lows[i]) {
            pivot_lows.push(lows[i]);
        }
    }

    (
        cluster_levels(pivot_lows, levels),
        cluster_levels(pivot_highs, levels),
    )
}

fn cluster_levels(mut values: Vec<Decimal>, keep: usize) -> Vec<Decimal> {
    if values.is_empty() {
        return Vec::new();
    }
    values.sort();

    let mean = values.iter().copied().sum::<Decimal>() / Decimal::from(values.len() as u64);
    let threshold = mean * SR_CLUSTER_THRESHOLD;

    let mut clusters: Vec<Vec<Decimal>> = Vec::new();
    for v in values {
        let joins = clusters
            .last()
            .and_then(|c| c.last())
            .map_or(false, |&last| v - last <= threshold);
        match clusters.last_mut() {
            Some(cluster) if joins => cluster.push(v),
            _ => clusters.push(vec![v]),
        }
    }

    // Most touches first; ties keep the higher level.
    clusters.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| b[0].cmp(&a[0])));

    let mut out: Vec<Decimal> = clusters
        .iter()
        .take(keep)
        .map(|c| c.iter().copied().sum::<Decimal>() / Decimal::from(c.len() as u64))
        .collect();
    out.sort();
    out
}

/// Regular divergence between price and an oscillator over the last
/// `lookback` bars, split into an earlier and a later half.
///
/// Returns `(bullish, bearish)`: bullish when price makes a lower low while
/// the oscillator makes a higher low, bearish for the mirrored highs. Both
/// slices must be aligned on their last element.
pub fn divergence(prices: &[Decimal], oscillator: &[Decimal], lookback: usize) -> (bool, bool) {
    if lookback < 4 || prices.len() < lookback || oscillator.len() < lookback {
        return (false, false);
    }

    let p = &prices[prices.len() - lookback..];
    let o = &oscillator[oscillator.len() - lookback..];
    let half = lookback / 2;

    let min = |s: &[Decimal]| s.iter().copied().min().unwrap_or(Decimal::ZERO);
    let max = |s: &[Decimal]| s.iter().copied().max().unwrap_or(Decimal::ZERO);

    let bullish = min(&p[half..]) < min(&p[..half]) && min(&o[half..]) > min(&o[..half]);
    let bearish = max(&p[half..]) > max(&p[..half]) && max(&o[half..]) < max(&o[..half]);

    (bullish, bearish)
}

// ═══════════════════════════════════════════════════════════════════════════
// Input checks
// ═══════════════════════════════════════════════════════════════════════════

/// Timestamps must be strictly increasing.
pub fn validate_series(name: &str, candles: &[OHLCV]) -> Result<(), BotError> {
    for (i, pair) in candles.windows(2).enumerate() {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(BotError::InvalidSeries {
                name: name.to_string(),
                reason: format!(
                    "timestamp {} at index {} does not follow {}",
                    pair[1].timestamp,
                    i + 1,
                    pair[0].timestamp
                ),
            });
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// Snapshot
// ═══════════════════════════════════════════════════════════════════════════

/// `(current, previous)` of a series; `fallback` for both when empty.
fn last_two(series: &[Decimal], fallback: Decimal) -> (Decimal, Decimal) {
    match series {
        [.., prev, cur] => (*cur, *prev),
        [cur] => (*cur, *cur),
        [] => (fallback, fallback),
    }
}

/// Compute every indicator for the latest bar of `candles`.
///
/// Never fails: insufficient history leaves the affected fields at their
/// neutral values and `bar_count` tells consumers how much data there was.
pub fn compute_snapshot(candles: &[OHLCV], params: &IndicatorParams) -> IndicatorSnapshot {
    let Some(last) = candles.last() else {
        return IndicatorSnapshot::default();
    };

    let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
    let highs: Vec<Decimal> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<Decimal> = candles.iter().map(|c| c.low).collect();
    let volumes: Vec<Decimal> = candles.iter().map(|c| c.volume).collect();

    let price = last.close;
    let prev_close = closes.len().checked_sub(2).map_or(price, |i| closes[i]);

    // EMA.
    let (ema_fast, prev_ema_fast) = last_two(&ema(&closes, params.ema_fast as usize), price);
    let (ema_slow, prev_ema_slow) = last_two(&ema(&closes, params.ema_slow as usize), price);
    let ema_trend = ema(&closes, params.ema_trend as usize)
        .last()
        .copied()
        .unwrap_or(price);

    // RSI.
    let rsi_vals = rsi_series(&closes, params.rsi_period as usize);
    let rsi_val = rsi_vals.last().copied().unwrap_or(dec!(50));

    // MACD histogram.
    let hist = macd_histogram(
        &closes,
        params.macd_fast as usize,
        params.macd_slow as usize,
        params.macd_signal as usize,
    );
    let (macd_hist, prev_macd_hist) = last_two(&hist, Decimal::ZERO);

    // Bollinger Bands.
    let (bb_upper, bb_middle, bb_lower) =
        bollinger_bands(&closes, params.bb_period as usize, params.bb_std);

    // ATR and its average.
    let atr_vals = atr_series(&highs, &lows, &closes, params.atr_period as usize);
    let atr_val = atr_vals.last().copied().unwrap_or(Decimal::ZERO);
    let atr_sma = sma(&atr_vals, params.atr_sma_period as usize);

    // ADX.
    let (adx_val, plus_di, minus_di) = adx(&highs, &lows, &closes, params.adx_period as usize);

    // Volume.
    let volume_sma = sma(&volumes, params.volume_sma_period as usize);
    let volume_ratio = if volume_sma > Decimal::ZERO {
        last.volume / volume_sma
    } else {
        Decimal::ZERO
    };

    // OBV.
    let obv_vals = obv_series(&closes, &volumes);
    let obv = obv_vals.last().copied().unwrap_or(Decimal::ZERO);
    let obv_ema = ema(&obv_vals, params.obv_ema_period as usize)
        .last()
        .copied()
        .unwrap_or(obv);

    // Structure.
    let (support_levels, resistance_levels) = support_resistance(
        &highs,
        &lows,
        params.sr_lookback as usize,
        params.sr_levels as usize,
    );

    let lookback = params.divergence_lookback as usize;
    let (rsi_bull, rsi_bear) = divergence(&closes, &rsi_vals, lookback);
    let (macd_bull, macd_bear) = divergence(&closes, &hist, lookback);

    IndicatorSnapshot {
        bar_count: candles.len(),
        price,
        open: last.open,
        high: last.high,
        low: last.low,
        prev_close,
        ema_fast,
        ema_slow,
        ema_trend,
        prev_ema_fast,
        prev_ema_slow,
        rsi: rsi_val,
        macd_histogram: macd_hist,
        prev_macd_histogram: prev_macd_hist,
        bb_upper,
        bb_middle,
        bb_lower,
        atr: atr_val,
        atr_sma,
        adx: adx_val,
        plus_di,
        minus_di,
        volume: last.volume,
        volume_sma,
        volume_ratio,
        obv,
        obv_ema,
        support_levels,
        resistance_levels,
        bullish_divergence: rsi_bull || macd_bull,
        bearish_divergence: rsi_bear || macd_bear,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
