use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::position::PositionDirection;

/// Market character classified once per (symbol, bar).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    /// ADX above the trending threshold on the primary timeframe.
    Trending,
    /// Trending, confirmed by a strong higher-timeframe ADX.
    TrendingStrong,
    /// Trending, higher-timeframe ADX only moderate. Confidence is penalised.
    TrendingWeak,
    Ranging,
    /// ATR well above its own average.
    Volatile,
    /// Elevated ATR together with crowded derivatives positioning.
    SqueezeRisk,
}

impl MarketRegime {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trending => "trending",
            Self::TrendingStrong => "trending_strong",
            Self::TrendingWeak => "trending_weak",
            Self::Ranging => "ranging",
            Self::Volatile => "volatile",
            Self::SqueezeRisk => "squeeze_risk",
        }
    }

    /// Strategy dispatched for this regime.
    #[must_use]
    pub fn strategy(&self) -> StrategyKind {
        match self {
            Self::Trending | Self::TrendingStrong | Self::TrendingWeak => StrategyKind::Momentum,
            Self::Ranging | Self::SqueezeRisk => StrategyKind::MeanReversion,
            Self::Volatile => StrategyKind::Breakout,
        }
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed set of entry strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Momentum,
    MeanReversion,
    Breakout,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::Momentum,
        StrategyKind::MeanReversion,
        StrategyKind::Breakout,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Momentum => "momentum",
            Self::MeanReversion => "mean_reversion",
            Self::Breakout => "breakout",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trade direction proposed by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalDirection {
    Buy,
    Sell,
    Hold,
}

impl SignalDirection {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Hold => "HOLD",
        }
    }

    /// Position side this direction would open, `None` for HOLD.
    #[must_use]
    pub fn position_direction(&self) -> Option<PositionDirection> {
        match self {
            Self::Buy => Some(PositionDirection::Long),
            Self::Sell => Some(PositionDirection::Short),
            Self::Hold => None,
        }
    }
}

impl fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fast/slow EMA trend of a (higher-timeframe) series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Bullish,
    Bearish,
    Neutral,
}

impl TrendDirection {
    /// Whether this trend agrees (`Some(true)`) or disagrees (`Some(false)`)
    /// with a trade direction. Neutral trends and HOLD have no opinion.
    #[must_use]
    pub fn agrees_with(&self, direction: SignalDirection) -> Option<bool> {
        match (self, direction) {
            (Self::Bullish, SignalDirection::Buy) | (Self::Bearish, SignalDirection::Sell) => {
                Some(true)
            }
            (Self::Bullish, SignalDirection::Sell) | (Self::Bearish, SignalDirection::Buy) => {
                Some(false)
            }
            _ => None,
        }
    }
}

/// A directional proposal flowing through the filter chain.
///
/// Every adjustment returns a new `Signal` with the reason appended, so the
/// final `reasons` list is the audit trail of the whole chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub direction: SignalDirection,
    /// In [0, 1] after every stage.
    #[serde(with = "rust_decimal::serde::str")]
    pub confidence: Decimal,
    pub strategy: StrategyKind,
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub stop_loss: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub take_profit: Decimal,
    pub reasons: Vec<String>,
}

impl Signal {
    /// A HOLD with zero confidence and no protective levels.
    pub fn hold(
        symbol: impl Into<String>,
        strategy: StrategyKind,
        entry_price: Decimal,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            direction: SignalDirection::Hold,
            confidence: Decimal::ZERO,
            strategy,
            symbol: symbol.into(),
            entry_price,
            stop_loss: Decimal::ZERO,
            take_profit: Decimal::ZERO,
            reasons: vec![reason.into()],
        }
    }

    #[must_use]
    pub fn is_hold(&self) -> bool {
        self.direction == SignalDirection::Hold
    }

    /// Add `delta` to the confidence, clamp to [0, 1] and record why.
    #[must_use]
    pub fn adjust(mut self, delta: Decimal, reason: impl Into<String>) -> Self {
        self.confidence = (self.confidence + delta).clamp(Decimal::ZERO, Decimal::ONE);
        self.reasons.push(reason.into());
        self
    }

    /// Force HOLD, zeroing confidence and protective levels.
    #[must_use]
    pub fn into_hold(mut self, reason: impl Into<String>) -> Self {
        self.direction = SignalDirection::Hold;
        self.confidence = Decimal::ZERO;
        self.stop_loss = Decimal::ZERO;
        self.take_profit = Decimal::ZERO;
        self.reasons.push(reason.into());
        self
    }

    /// Append a reason without touching confidence.
    #[must_use]
    pub fn note(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    /// Distance between entry and stop.
    #[must_use]
    pub fn risk_per_unit(&self) -> Decimal {
        (self.entry_price - self.stop_loss).abs()
    }

    /// Reward:risk implied by the current levels (zero when risk is zero).
    #[must_use]
    pub fn reward_risk(&self) -> Decimal {
        let risk = self.risk_per_unit();
        if risk.is_zero() {
            return Decimal::ZERO;
        }
        (self.take_profit - self.entry_price).abs() / risk
    }

    /// Rebuild stop and take-profit around the entry from a risk distance.
    #[must_use]
    pub fn with_levels(mut self, risk: Decimal, rr_ratio: Decimal) -> Self {
        match self.direction {
            SignalDirection::Buy => {
                self.stop_loss = self.entry_price - risk;
                self.take_profit = self.entry_price + risk * rr_ratio;
            }
            SignalDirection::Sell => {
                self.stop_loss = self.entry_price + risk;
                self.take_profit = self.entry_price - risk * rr_ratio;
            }
            SignalDirection::Hold => {}
        }
        self
    }

    /// Reasons joined for logs and refusals.
    #[must_use]
    pub fn reason_text(&self) -> String {
        self.reasons.join("; ")
    }
}

/// Indicator values for the latest bar of a candle window.
///
/// Zero-valued fields mean "not enough history"; strategies check
/// `bar_count` against their own minimum before reading anything else.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorSnapshot {
    pub bar_count: usize,
    pub price: Decimal,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub prev_close: Decimal,
    pub ema_fast: Decimal,
    pub ema_slow: Decimal,
    pub ema_trend: Decimal,
    pub prev_ema_fast: Decimal,
    pub prev_ema_slow: Decimal,
    pub rsi: Decimal,
    pub macd_histogram: Decimal,
    pub prev_macd_histogram: Decimal,
    pub bb_upper: Decimal,
    pub bb_middle: Decimal,
    pub bb_lower: Decimal,
    pub atr: Decimal,
    /// Mean of the most recent ATR values.
    pub atr_sma: Decimal,
    pub adx: Decimal,
    pub plus_di: Decimal,
    pub minus_di: Decimal,
    pub volume: Decimal,
    pub volume_sma: Decimal,
    /// Current volume / volume SMA.
    pub volume_ratio: Decimal,
    pub obv: Decimal,
    pub obv_ema: Decimal,
    /// Clustered support levels, ascending.
    pub support_levels: Vec<Decimal>,
    /// Clustered resistance levels, ascending.
    pub resistance_levels: Vec<Decimal>,
    pub bullish_divergence: bool,
    pub bearish_divergence: bool,
}

impl IndicatorSnapshot {
    /// Candle body as a fraction of the bar's range (0 for a flat bar).
    #[must_use]
    pub fn body_ratio(&self) -> Decimal {
        let range = self.high - self.low;
        if range <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.price - self.open).abs() / range
    }

    #[must_use]
    pub fn is_bullish_candle(&self) -> bool {
        self.price > self.open
    }

    #[must_use]
    pub fn is_bearish_candle(&self) -> bool {
        self.price < self.open
    }
}
