use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::position::PositionDirection;
use super::signal::StrategyKind;

/// Why a position (or part of it) was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    TakeProfit,
    PartialTakeProfit,
    EndOfBacktest,
}

impl ExitReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StopLoss => "stop_loss",
            Self::TrailingStop => "trailing_stop",
            Self::TakeProfit => "take_profit",
            Self::PartialTakeProfit => "partial_take_profit",
            Self::EndOfBacktest => "end_of_backtest",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A closed trade as recorded by the performance tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub strategy: StrategyKind,
    pub symbol: String,
    pub direction: PositionDirection,
    #[serde(with = "rust_decimal::serde::str")]
    pub pnl: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub pnl_pct: Decimal,
    pub entry_time: i64,
    pub exit_time: i64,
    pub exit_reason: ExitReason,
    #[serde(with = "rust_decimal::serde::str")]
    pub confidence: Decimal,
    /// Money at risk at entry: |entry - stop| x quantity.
    #[serde(with = "rust_decimal::serde::str")]
    pub risk: Decimal,
    /// Planned reward at entry: |take_profit - entry| x quantity.
    #[serde(with = "rust_decimal::serde::str")]
    pub reward: Decimal,
}

/// A realized exit, full or partial, reported back to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: String,
    pub strategy: StrategyKind,
    pub direction: PositionDirection,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub exit_price: Decimal,
    /// Quantity closed by this exit.
    #[serde(with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
    /// Realized PnL net of fees.
    #[serde(with = "rust_decimal::serde::str")]
    pub pnl: Decimal,
    /// Per-unit stop distance at entry.
    #[serde(with = "rust_decimal::serde::str")]
    pub initial_risk: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub take_profit: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub confidence: Decimal,
    pub entry_time: i64,
    pub exit_time: i64,
    pub exit_bar: u64,
    pub exit_reason: ExitReason,
}

impl ClosedTrade {
    /// The tracker's view of this exit.
    #[must_use]
    pub fn to_record(&self) -> TradeRecord {
        let cost = self.entry_price * self.quantity;
        let pnl_pct = if cost.is_zero() {
            Decimal::ZERO
        } else {
            self.pnl / cost
        };
        TradeRecord {
            strategy: self.strategy,
            symbol: self.symbol.clone(),
            direction: self.direction,
            pnl: self.pnl,
            pnl_pct,
            entry_time: self.entry_time,
            exit_time: self.exit_time,
            exit_reason: self.exit_reason,
            confidence: self.confidence,
            risk: self.initial_risk * self.quantity,
            reward: (self.take_profit - self.entry_price).abs() * self.quantity,
        }
    }
}

/// Rolling-window statistics for one strategy or for all trades combined.
///
/// Computed in `f64`; `profit_factor` is `f64::INFINITY` when there are
/// gains and no losses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyMetrics {
    pub trade_count: usize,
    pub win_count: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_pnl: f64,
    pub avg_rr_achieved: f64,
    pub total_pnl: f64,
    /// Positive = consecutive wins, negative = consecutive losses.
    pub current_streak: i64,
    pub max_losing_streak: usize,
    /// Normalised equity-curve slope in [-1, 1].
    pub recent_trend: f64,
}

impl Default for StrategyMetrics {
    fn default() -> Self {
        Self {
            trade_count: 0,
            win_count: 0,
            win_rate: 0.0,
            profit_factor: 1.0,
            avg_pnl: 0.0,
            avg_rr_achieved: 0.0,
            total_pnl: 0.0,
            current_streak: 0,
            max_losing_streak: 0,
            recent_trend: 0.0,
        }
    }
}

/// Per-strategy knobs set by the adaptive controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyOverrides {
    #[serde(with = "rust_decimal::serde::str")]
    pub min_confidence: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub position_size_scale: Decimal,
    /// Always true: strategies are throttled, never switched off.
    pub strategy_enabled: bool,
}

/// Snapshot of every adaptive knob. Derived from tracker metrics on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveOverrides {
    pub strategies: BTreeMap<StrategyKind, StrategyOverrides>,
    #[serde(with = "rust_decimal::serde::str")]
    pub leverage_scale: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub sl_atr_multiplier: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub rr_ratio: Decimal,
}

impl AdaptiveOverrides {
    #[must_use]
    pub fn for_strategy(&self, strategy: StrategyKind) -> Option<&StrategyOverrides> {
        self.strategies.get(&strategy)
    }
}

/// Overrides plus the human-readable status block for logs and dashboards.
#[derive(Debug, Clone)]
pub struct AdaptiveState {
    pub overrides: AdaptiveOverrides,
    pub status: String,
}
