use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::position::PositionDirection;
use super::signal::{MarketRegime, StrategyKind};

/// Stage of the evaluation that refused a candidate trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    /// Malformed request data, such as an out-of-order candle window.
    InvalidInput,
    CircuitBreaker,
    PositionOpen,
    Cooldown,
    TradeFrequency,
    PostProfitCooldown,
    Clustering,
    Strategy,
    Validation,
    Correlation,
    Sizing,
}

impl Gate {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::CircuitBreaker => "circuit_breaker",
            Self::PositionOpen => "position_open",
            Self::Cooldown => "cooldown",
            Self::TradeFrequency => "trade_frequency",
            Self::PostProfitCooldown => "post_profit_cooldown",
            Self::Clustering => "clustering",
            Self::Strategy => "strategy",
            Self::Validation => "validation",
            Self::Correlation => "correlation",
            Self::Sizing => "sizing",
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An approved entry, handed to the execution collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub symbol: String,
    pub direction: PositionDirection,
    #[serde(with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    /// Effective leverage after adaptive scaling.
    #[serde(with = "rust_decimal::serde::str")]
    pub leverage: Decimal,
    /// Margin reserved for the position.
    #[serde(with = "rust_decimal::serde::str")]
    pub margin: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub stop_loss: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub take_profit: Decimal,
    pub strategy: StrategyKind,
    #[serde(with = "rust_decimal::serde::str")]
    pub confidence: Decimal,
    pub regime: MarketRegime,
    /// ATR multiplier the stop was built with (after adaptive overrides).
    #[serde(with = "rust_decimal::serde::str")]
    pub sl_atr_multiplier: Decimal,
    pub reasons: Vec<String>,
}

impl OrderIntent {
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.quantity * self.entry_price
    }
}

/// A refused evaluation with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refusal {
    pub symbol: String,
    pub gate: Gate,
    pub reason: String,
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} refused at {}: {}", self.symbol, self.gate, self.reason)
    }
}

/// Outcome of one pipeline evaluation.
#[derive(Debug, Clone)]
pub enum Evaluation {
    Order(OrderIntent),
    Refused(Refusal),
}

impl Evaluation {
    pub fn refused(symbol: &str, gate: Gate, reason: impl Into<String>) -> Self {
        Self::Refused(Refusal {
            symbol: symbol.to_string(),
            gate,
            reason: reason.into(),
        })
    }

    #[must_use]
    pub fn order(&self) -> Option<&OrderIntent> {
        match self {
            Self::Order(intent) => Some(intent),
            Self::Refused(_) => None,
        }
    }

    #[must_use]
    pub fn refusal(&self) -> Option<&Refusal> {
        match self {
            Self::Order(_) => None,
            Self::Refused(refusal) => Some(refusal),
        }
    }
}
