//! Open-position exit management.
//!
//! Per bar, for each open position:
//! 1. Stop-loss (checked first, worst case): exit at the stop.
//! 2. Take-profit: a staircase partial close, a hybrid switch to trailing
//!    with the stop locked at the target, or a plain close at the target.
//! 3. Otherwise, when trailing is enabled, track the favourable extreme,
//!    arm breakeven and ratchet the trailing stop.
//!
//! The stop only ever moves in the position's favour.

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::config::ExitConfig;
use crate::core::risk_manager::RiskManager;
use crate::types::{ExitReason, OrderIntent, Position, PositionDirection, OHLCV};

/// An exit to execute against a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitDecision {
    pub reason: ExitReason,
    pub price: Decimal,
    /// Quantity to close. Less than the position size for a partial exit.
    pub quantity: Decimal,
}

impl ExitDecision {
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.reason == ExitReason::PartialTakeProfit
    }
}

pub struct PositionManager {
    config: ExitConfig,
}

impl PositionManager {
    pub fn new(config: ExitConfig) -> Self {
        Self { config }
    }

    /// Build the tracked position for a filled order.
    #[must_use]
    pub fn open_position(intent: &OrderIntent, fill_price: Decimal, opened_at: i64, bar: u64) -> Position {
        Position {
            symbol: intent.symbol.clone(),
            direction: intent.direction,
            entry_price: fill_price,
            quantity: intent.quantity,
            leverage: intent.leverage,
            stop_loss: intent.stop_loss,
            take_profit: intent.take_profit,
            strategy: intent.strategy,
            confidence: intent.confidence,
            highest_price: fill_price,
            lowest_price: fill_price,
            trailing_activated: false,
            partial_closed: false,
            initial_risk: (fill_price - intent.stop_loss).abs(),
            entry_regime: intent.regime,
            sl_atr_multiplier: intent.sl_atr_multiplier,
            opened_at,
            opened_bar: bar,
        }
    }

    /// Check one bar against the position. May move the stop.
    pub fn check_position(&self, position: &mut Position, candle: &OHLCV) -> Option<ExitDecision> {
        let (adverse, favourable) = match position.direction {
            PositionDirection::Long => (candle.low, candle.high),
            PositionDirection::Short => (candle.high, candle.low),
        };

        if RiskManager::check_stop_loss(position.direction, position.stop_loss, adverse) {
            let reason = if position.trailing_activated {
                ExitReason::TrailingStop
            } else {
                ExitReason::StopLoss
            };
            return Some(ExitDecision {
                reason,
                price: position.stop_loss,
                quantity: position.quantity,
            });
        }

        let cfg = &self.config;
        if RiskManager::check_take_profit(position.direction, position.take_profit, favourable) {
            if cfg.staircase_enabled && !position.partial_closed {
                return Some(ExitDecision {
                    reason: ExitReason::PartialTakeProfit,
                    price: position.take_profit,
                    quantity: position.quantity * cfg.staircase_close_pct,
                });
            }
            if cfg.trailing_enabled && cfg.trailing_hybrid {
                if !position.trailing_activated {
                    position.trailing_activated = true;
                    position.stop_loss = position.take_profit;
                    info!(
                        symbol = %position.symbol,
                        stop = %position.stop_loss,
                        "target hit, trailing from target"
                    );
                }
            } else {
                return Some(ExitDecision {
                    reason: ExitReason::TakeProfit,
                    price: position.take_profit,
                    quantity: position.quantity,
                });
            }
        }

        if cfg.trailing_enabled {
            self.update_trailing_stop(position, favourable);
        }
        None
    }

    /// Close part of the position at `price`: the remainder trails from
    /// breakeven.
    pub fn apply_partial_close(&self, position: &mut Position, decision: &ExitDecision) {
        position.quantity -= decision.quantity;
        position.partial_closed = true;
        position.trailing_activated = true;
        position.stop_loss = position.entry_price;
        track_extreme(position, decision.price);
        info!(
            symbol = %position.symbol,
            closed = %decision.quantity,
            remaining = %position.quantity,
            "partial take-profit, stop to breakeven"
        );
    }

    fn trail_distance(&self, position: &Position) -> Option<Decimal> {
        if position.initial_risk <= Decimal::ZERO || position.sl_atr_multiplier <= Decimal::ZERO {
            return None;
        }
        let vol_scale = self
            .config
            .trail_vol_scale
            .get(position.entry_regime.as_str())
            .copied()
            .unwrap_or(Decimal::ONE);
        Some(
            position.initial_risk * self.config.trailing_atr_multiplier / position.sl_atr_multiplier
                * vol_scale,
        )
    }

    fn update_trailing_stop(&self, position: &mut Position, price: Decimal) {
        let Some(distance) = self.trail_distance(position) else {
            return;
        };
        track_extreme(position, price);

        let profit = match position.direction {
            PositionDirection::Long => position.highest_price - position.entry_price,
            PositionDirection::Short => position.entry_price - position.lowest_price,
        };
        if !position.trailing_activated && profit >= self.config.breakeven_rr * position.initial_risk {
            position.trailing_activated = true;
            let old = position.stop_loss;
            position.stop_loss = match position.direction {
                PositionDirection::Long => position.stop_loss.max(position.entry_price),
                PositionDirection::Short => position.stop_loss.min(position.entry_price),
            };
            info!(symbol = %position.symbol, from = %old, to = %position.stop_loss, "breakeven armed");
        }

        if !position.trailing_activated {
            return;
        }
        let candidate = match position.direction {
            PositionDirection::Long => position.highest_price - distance,
            PositionDirection::Short => position.lowest_price + distance,
        };
        let tighter = match position.direction {
            PositionDirection::Long => candidate > position.stop_loss,
            PositionDirection::Short => candidate < position.stop_loss,
        };
        if tighter {
            debug!(
                symbol = %position.symbol,
                from = %position.stop_loss,
                to = %candidate,
                "trailing stop moved"
            );
            position.stop_loss = candidate;
        }
    }
}

fn track_extreme(position: &mut Position, price: Decimal) {
    match position.direction {
        PositionDirection::Long => position.highest_price = position.highest_price.max(price),
        PositionDirection::Short => position.lowest_price = position.lowest_price.min(price),
    }
}
