use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::signal::{MarketRegime, StrategyKind};

/// Direction of a leveraged position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionDirection {
    Long,
    Short,
}

impl PositionDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }

    /// `+1` for long, `-1` for short.
    #[must_use]
    pub fn sign(&self) -> Decimal {
        match self {
            Self::Long => Decimal::ONE,
            Self::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

/// An open position, including trailing-stop state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub direction: PositionDirection,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
    /// Effective leverage the position was opened with.
    #[serde(with = "rust_decimal::serde::str")]
    pub leverage: Decimal,
    /// Current stop; moves only in the position's favour.
    #[serde(with = "rust_decimal::serde::str")]
    pub stop_loss: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub take_profit: Decimal,
    pub strategy: StrategyKind,
    #[serde(with = "rust_decimal::serde::str")]
    pub confidence: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub highest_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub lowest_price: Decimal,
    pub trailing_activated: bool,
    pub partial_closed: bool,
    /// |entry - stop| at open. Never changes afterwards.
    #[serde(with = "rust_decimal::serde::str")]
    pub initial_risk: Decimal,
    pub entry_regime: MarketRegime,
    /// ATR multiplier the stop was built with.
    #[serde(with = "rust_decimal::serde::str")]
    pub sl_atr_multiplier: Decimal,
    /// Open time in epoch milliseconds.
    pub opened_at: i64,
    /// Bar index at open.
    pub opened_bar: u64,
}

impl Position {
    /// Notional value at entry.
    #[must_use]
    pub fn cost(&self) -> Decimal {
        self.entry_price * self.quantity
    }

    /// Margin locked by this position.
    #[must_use]
    pub fn margin(&self) -> Decimal {
        if self.leverage <= Decimal::ZERO {
            return self.cost();
        }
        self.cost() / self.leverage
    }

    #[must_use]
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.quantity * self.direction.sign()
    }

    /// Unrealized PnL as a fraction of entry notional.
    #[must_use]
    pub fn unrealized_pnl_pct(&self, price: Decimal) -> Decimal {
        let cost = self.cost();
        if cost.is_zero() {
            return Decimal::ZERO;
        }
        self.unrealized_pnl(price) / cost
    }
}
