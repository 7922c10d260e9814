use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// A single OHLCV candle. `timestamp` is the open time in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OHLCV {
    pub timestamp: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub close: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
}

/// Direction implied by the open-interest change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OiDirection {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl OiDirection {
    /// Classify an open-interest change in percent (±1% dead band).
    #[must_use]
    pub fn from_oi_delta(oi_delta_pct: Decimal) -> Self {
        if oi_delta_pct > dec!(1) {
            Self::Bullish
        } else if oi_delta_pct < dec!(-1) {
            Self::Bearish
        } else {
            Self::Neutral
        }
    }
}

/// Open-interest and funding positioning for one symbol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DerivativesSnapshot {
    /// Open-interest change over the lookback window, in percent.
    #[serde(with = "rust_decimal::serde::str")]
    pub oi_delta_pct: Decimal,
    pub oi_direction: OiDirection,
    #[serde(with = "rust_decimal::serde::str")]
    pub oi_zscore: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub funding_zscore: Decimal,
    /// Short/long squeeze likelihood in [0, 1].
    #[serde(with = "rust_decimal::serde::str")]
    pub squeeze_risk: Decimal,
    pub is_cascade: bool,
}

/// Open-interest drop (percent) that marks a liquidation cascade.
const CASCADE_OI_DROP_PCT: Decimal = dec!(-5);

impl DerivativesSnapshot {
    /// Build from raw open-interest statistics, deriving the direction and
    /// cascade flag from the OI change.
    #[must_use]
    pub fn from_open_interest(
        oi_delta_pct: Decimal,
        oi_zscore: Decimal,
        funding_zscore: Decimal,
        squeeze_risk: Decimal,
    ) -> Self {
        Self {
            oi_delta_pct,
            oi_direction: OiDirection::from_oi_delta(oi_delta_pct),
            oi_zscore,
            funding_zscore,
            squeeze_risk: squeeze_risk.clamp(Decimal::ZERO, Decimal::ONE),
            is_cascade: oi_delta_pct < CASCADE_OI_DROP_PCT,
        }
    }
}

/// Optional scalar inputs for the filter chain. A `None` suppresses the
/// corresponding stage.
#[derive(Debug, Clone, Default)]
pub struct MarketContext {
    /// Perpetual funding rate as a fraction (0.0004 = 0.04%).
    pub funding_rate: Option<Decimal>,
    /// Order-book imbalance in [-1, 1], positive = bid heavy.
    pub order_book_imbalance: Option<Decimal>,
    /// News sentiment in [-1, 1].
    pub news_score: Option<Decimal>,
    pub derivatives: Option<DerivativesSnapshot>,
}
