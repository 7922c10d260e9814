//! Risk gating, circuit breakers and position sizing.
//!
//! Every gate returns `Err(BotError::Blocked { .. })` when it refuses, so a
//! caller chains them with `?` and a refusal always carries the gate and a
//! reason. All mutable state lives in [`RiskState`], owned by one
//! [`RiskManager`].

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::config::RiskConfig;
use crate::errors::BotError;
use crate::types::{Gate, MarketRegime, Position, PositionDirection, Signal, Timeframe};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Why trading is halted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltKind {
    /// Cleared by the next daily reset.
    DailyLoss,
    /// Persists until restart.
    Drawdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Halt {
    pub kind: HaltKind,
    pub reason: String,
}

/// Mutable risk bookkeeping. Bar indices are the shared monotonic bar
/// counter of the primary timeframe.
#[derive(Debug, Clone, Default)]
pub struct RiskState {
    pub peak_value: Decimal,
    pub daily_start_value: Decimal,
    pub halt: Option<Halt>,
    pub last_stop_loss_bar: HashMap<String, u64>,
    pub last_win_bar: HashMap<String, u64>,
    pub consecutive_losses: u32,
    pub trades_this_hour: u32,
    pub hour_start_bar: u64,
    pub trades_today: u32,
    pub entries_this_tick: u32,
    pub current_tick_bar: Option<u64>,
}

/// Inputs to [`RiskManager::calculate_position_size`].
#[derive(Debug, Clone, Copy)]
pub struct SizingRequest<'a> {
    pub signal: &'a Signal,
    pub portfolio_value: Decimal,
    pub regime: MarketRegime,
    /// Confidence threshold the signal was validated against.
    pub min_confidence: Decimal,
    /// Adaptive per-strategy size multiplier (1 when not adapting).
    pub size_scale: Decimal,
    /// Adaptive leverage multiplier (1 when not adapting).
    pub leverage_scale: Decimal,
    /// Portfolio value minus margin already locked in open positions.
    pub available_margin: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionSize {
    pub quantity: Decimal,
    pub notional: Decimal,
    pub margin: Decimal,
    pub leverage: Decimal,
}

pub struct RiskManager {
    config: RiskConfig,
    bars_per_hour: u64,
    state: RiskState,
}

impl RiskManager {
    pub fn new(config: RiskConfig, primary_timeframe: Timeframe) -> Self {
        Self {
            config,
            bars_per_hour: primary_timeframe.bars_per_hour(),
            state: RiskState::default(),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    pub fn is_halted(&self) -> bool {
        self.state.halt.is_some()
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.state.halt.as_ref().map(|h| h.reason.as_str())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start a new trading day at `portfolio_value`. Clears a daily-loss halt
    /// and the daily trade counter; a drawdown halt persists.
    pub fn reset_daily(&mut self, portfolio_value: Decimal) {
        self.state.daily_start_value = portfolio_value;
        self.state.trades_today = 0;
        if matches!(&self.state.halt, Some(h) if h.kind == HaltKind::DailyLoss) {
            info!("daily reset clears daily-loss halt");
            self.state.halt = None;
        }
        info!(daily_start = %portfolio_value, "daily risk reset");
    }

    pub fn update_peak(&mut self, portfolio_value: Decimal) {
        if portfolio_value > self.state.peak_value {
            self.state.peak_value = portfolio_value;
        }
    }

    pub fn register_stop_loss(&mut self, symbol: &str, bar: u64) {
        self.state.last_stop_loss_bar.insert(symbol.to_string(), bar);
        self.state.consecutive_losses += 1;
        info!(
            symbol,
            bar,
            consecutive_losses = self.state.consecutive_losses,
            "stop-loss registered"
        );
    }

    pub fn register_win(&mut self, symbol: &str, bar: u64) {
        self.state.consecutive_losses = 0;
        self.state.last_win_bar.insert(symbol.to_string(), bar);
    }

    /// Count an entry against the hourly, daily and per-tick caps.
    pub fn record_trade_opened(&mut self) {
        self.state.trades_this_hour += 1;
        self.state.trades_today += 1;
        self.state.entries_this_tick += 1;
    }

    // -----------------------------------------------------------------------
    // Gates
    // -----------------------------------------------------------------------

    /// Bars since the symbol's last stop-loss must reach the cooldown, which
    /// doubles after a run of consecutive losses.
    pub fn check_cooldown(&self, symbol: &str, bar: u64) -> Result<(), BotError> {
        let Some(&last_sl) = self.state.last_stop_loss_bar.get(symbol) else {
            return Ok(());
        };
        let mut cooldown = self.config.cooldown_bars;
        if self.state.consecutive_losses >= self.config.max_consecutive_losses {
            cooldown *= 2;
        }
        let since = bar.saturating_sub(last_sl);
        if since < cooldown {
            return Err(BotError::blocked(
                Gate::Cooldown,
                format!("{symbol} in cooldown: {since}/{cooldown} bars since stop-loss"),
            ));
        }
        Ok(())
    }

    /// Hourly and daily trade caps. Rolls the hour window forward.
    pub fn check_trade_frequency(&mut self, bar: u64) -> Result<(), BotError> {
        if bar.saturating_sub(self.state.hour_start_bar) >= self.bars_per_hour {
            self.state.hour_start_bar = bar;
            self.state.trades_this_hour = 0;
        }
        if self.state.trades_this_hour >= self.config.max_trades_per_hour {
            return Err(BotError::blocked(
                Gate::TradeFrequency,
                format!("{} trades this hour", self.state.trades_this_hour),
            ));
        }
        if self.state.trades_today >= self.config.max_trades_per_day {
            return Err(BotError::blocked(
                Gate::TradeFrequency,
                format!("{} trades today", self.state.trades_today),
            ));
        }
        Ok(())
    }

    pub fn check_post_profit_cooldown(&self, symbol: &str, bar: u64) -> Result<(), BotError> {
        let cooldown = self.config.post_profit_cooldown_bars;
        if cooldown == 0 {
            return Ok(());
        }
        let Some(&last_win) = self.state.last_win_bar.get(symbol) else {
            return Ok(());
        };
        let since = bar.saturating_sub(last_win);
        if since < cooldown {
            return Err(BotError::blocked(
                Gate::PostProfitCooldown,
                format!("{symbol} post-profit cooldown: {since}/{cooldown} bars since win"),
            ));
        }
        Ok(())
    }

    /// Cap entries within a single bar. Resets the counter on a new bar.
    pub fn check_trade_clustering(&mut self, bar: u64) -> Result<(), BotError> {
        if self.state.current_tick_bar != Some(bar) {
            self.state.current_tick_bar = Some(bar);
            self.state.entries_this_tick = 0;
        }
        if self.state.entries_this_tick >= self.config.max_entries_per_tick {
            return Err(BotError::blocked(
                Gate::Clustering,
                format!("{} entries on bar {bar}", self.state.entries_this_tick),
            ));
        }
        Ok(())
    }

    /// Traded symbols are correlated: cap same-direction exposure.
    pub fn check_correlation_exposure(
        &self,
        direction: PositionDirection,
        positions: &HashMap<String, Position>,
    ) -> Result<(), BotError> {
        let same = positions
            .values()
            .filter(|p| p.direction == direction)
            .count();
        if same >= self.config.max_same_direction_positions {
            return Err(BotError::blocked(
                Gate::Correlation,
                format!(
                    "already {same} {} position(s), max {}",
                    direction.as_str(),
                    self.config.max_same_direction_positions
                ),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Circuit breakers
    // -----------------------------------------------------------------------

    /// `true` when new entries are allowed. May latch a halt.
    pub fn check_circuit_breakers(&mut self, portfolio_value: Decimal, open_positions: usize) -> bool {
        match self.circuit_breaker_status(portfolio_value, open_positions) {
            Ok(()) => true,
            Err(e) => {
                info!(error = %e, "circuit breaker");
                false
            }
        }
    }

    pub(crate) fn circuit_breaker_status(
        &mut self,
        portfolio_value: Decimal,
        open_positions: usize,
    ) -> Result<(), BotError> {
        if let Some(halt) = &self.state.halt {
            return Err(BotError::blocked(
                Gate::CircuitBreaker,
                format!("Trading halted: {}", halt.reason),
            ));
        }

        let daily_start = self.state.daily_start_value;

        // Implausible readings are skipped without halting.
        if portfolio_value <= Decimal::ZERO {
            warn!(value = %portfolio_value, "non-positive portfolio value, skipping check");
            return Err(BotError::blocked(
                Gate::CircuitBreaker,
                "Portfolio value unavailable",
            ));
        }
        if daily_start > Decimal::ZERO && portfolio_value < daily_start * self.config.glitch_value_ratio
        {
            warn!(
                value = %portfolio_value,
                daily_start = %daily_start,
                "portfolio value implausibly low, skipping check"
            );
            return Err(BotError::blocked(
                Gate::CircuitBreaker,
                "Portfolio value glitch",
            ));
        }

        if daily_start > Decimal::ZERO {
            let daily_pnl = (portfolio_value - daily_start) / daily_start;
            if daily_pnl <= -self.config.daily_loss_limit_pct {
                let reason = format!("Daily loss limit hit: {:.1}%", daily_pnl * HUNDRED);
                return Err(self.halt(HaltKind::DailyLoss, reason));
            }
        }

        let peak = self.state.peak_value;
        if peak > Decimal::ZERO {
            let drawdown = (peak - portfolio_value) / peak;
            if drawdown >= self.config.max_drawdown_pct {
                let reason = format!(
                    "Max drawdown circuit breaker: {:.1}% from peak {}",
                    drawdown * HUNDRED,
                    peak.round_dp(2)
                );
                return Err(self.halt(HaltKind::Drawdown, reason));
            }
        }

        if open_positions >= self.config.max_open_positions {
            return Err(BotError::blocked(
                Gate::CircuitBreaker,
                format!("Max open positions reached ({open_positions})"),
            ));
        }
        Ok(())
    }

    fn halt(&mut self, kind: HaltKind, reason: String) -> BotError {
        error!(
            reason = %reason,
            daily_start = %self.state.daily_start_value,
            peak = %self.state.peak_value,
            "trading halted"
        );
        self.state.halt = Some(Halt {
            kind,
            reason: reason.clone(),
        });
        BotError::blocked(Gate::CircuitBreaker, reason)
    }

    /// Drawdown from peak as a fraction, never negative.
    #[must_use]
    pub fn current_drawdown(&self, portfolio_value: Decimal) -> Decimal {
        let peak = self.state.peak_value;
        if peak <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((peak - portfolio_value) / peak).max(Decimal::ZERO)
    }

    // -----------------------------------------------------------------------
    // Validation and sizing
    // -----------------------------------------------------------------------

    /// Validate a signal against a confidence threshold and R:R target.
    ///
    /// A stop closer than the minimum distance is widened to it and the
    /// take-profit rebuilt at `rr_ratio`. Returns the possibly adjusted signal.
    pub fn validate_signal(
        &self,
        signal: Signal,
        min_confidence: Decimal,
        rr_ratio: Decimal,
    ) -> Result<Signal, BotError> {
        if signal.is_hold() {
            return Err(BotError::blocked(Gate::Validation, "HOLD signal"));
        }
        if signal.confidence < min_confidence {
            return Err(BotError::blocked(
                Gate::Validation,
                format!(
                    "confidence {} below {} ({})",
                    signal.confidence.round_dp(2),
                    min_confidence,
                    signal.strategy
                ),
            ));
        }
        if signal.stop_loss <= Decimal::ZERO || signal.entry_price <= Decimal::ZERO {
            return Err(BotError::blocked(Gate::Validation, "no valid stop-loss"));
        }

        let mut signal = signal;
        let distance_pct = signal.risk_per_unit() / signal.entry_price;
        if distance_pct < self.config.min_sl_distance_pct {
            let floor = signal.entry_price * self.config.min_sl_distance_pct;
            info!(
                symbol = %signal.symbol,
                strategy = %signal.strategy,
                from_pct = %(distance_pct * HUNDRED).round_dp(3),
                to_pct = %(self.config.min_sl_distance_pct * HUNDRED),
                "stop widened to floor"
            );
            signal = signal
                .with_levels(floor, rr_ratio)
                .note(format!("SL widened to {}%", self.config.min_sl_distance_pct * HUNDRED));
        }

        let achieved = signal.reward_risk();
        if achieved < rr_ratio - self.config.rr_tolerance {
            return Err(BotError::blocked(
                Gate::Validation,
                format!("R:R {} below {rr_ratio}", achieved.round_dp(2)),
            ));
        }
        Ok(signal)
    }

    /// Size an entry so the loss at the stop never exceeds the allocated
    /// margin.
    pub fn calculate_position_size(&self, req: &SizingRequest<'_>) -> Result<PositionSize, BotError> {
        let cfg = &self.config;
        let signal = req.signal;
        let price = signal.entry_price;

        if signal.is_hold() || price <= Decimal::ZERO {
            return Err(BotError::blocked(Gate::Sizing, "nothing to size"));
        }

        let mut margin = req.portfolio_value * cfg.max_position_pct;

        if req.regime == MarketRegime::Volatile {
            margin *= cfg.volatile_size_multiplier;
        }

        // Confidence scale: floor at the threshold, full size at 1.0.
        let conf_range = Decimal::ONE - req.min_confidence;
        if conf_range > Decimal::ZERO {
            let excess = ((signal.confidence - req.min_confidence) / conf_range)
                .clamp(Decimal::ZERO, Decimal::ONE);
            let floor = cfg.confidence_size_floor;
            margin *= floor + (Decimal::ONE - floor) * excess;
        }

        let drawdown = self.current_drawdown(req.portfolio_value);
        if drawdown > cfg.drawdown_sizing_start {
            let dd_scale = (Decimal::ONE - (drawdown - cfg.drawdown_sizing_start) * cfg.drawdown_sizing_slope)
                .max(cfg.drawdown_sizing_floor);
            info!(
                drawdown_pct = %(drawdown * HUNDRED).round_dp(1),
                scale = %dd_scale.round_dp(2),
                "drawdown sizing"
            );
            margin *= dd_scale;
        }

        margin *= req.size_scale;

        let risk_per_unit = signal.risk_per_unit();
        if risk_per_unit.is_zero() {
            return Err(BotError::blocked(Gate::Sizing, "zero stop distance"));
        }

        let leverage = cfg.leverage * req.leverage_scale;
        let max_notional = margin * leverage;
        let quantity = (max_notional / price).min(margin / risk_per_unit);
        let notional = quantity * price;

        if notional < cfg.min_notional {
            return Err(BotError::blocked(
                Gate::Sizing,
                format!("notional {} below minimum {}", notional.round_dp(2), cfg.min_notional),
            ));
        }

        let required_margin = if leverage > Decimal::ZERO {
            notional / leverage
        } else {
            notional
        };
        if required_margin > req.available_margin {
            return Err(BotError::blocked(
                Gate::Sizing,
                format!(
                    "margin {} exceeds available {}",
                    required_margin.round_dp(2),
                    req.available_margin.round_dp(2)
                ),
            ));
        }

        Ok(PositionSize {
            quantity,
            notional,
            margin: required_margin,
            leverage,
        })
    }

    // -----------------------------------------------------------------------
    // Exit helpers
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn check_stop_loss(direction: PositionDirection, stop_loss: Decimal, price: Decimal) -> bool {
        match direction {
            PositionDirection::Long => price <= stop_loss,
            PositionDirection::Short => price >= stop_loss,
        }
    }

    #[must_use]
    pub fn check_take_profit(
        direction: PositionDirection,
        take_profit: Decimal,
        price: Decimal,
    ) -> bool {
        match direction {
            PositionDirection::Long => price >= take_profit,
            PositionDirection::Short => price <= take_profit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SignalDirection, StrategyKind};
    use rust_decimal_macros::dec;

    fn manager() -> RiskManager {
        RiskManager::new(RiskConfig::default(), Timeframe::M15)
    }

    fn buy(confidence: Decimal, stop: Decimal, tp: Decimal) -> Signal {
        Signal {
            direction: SignalDirection::Buy,
            confidence,
            strategy: StrategyKind::MeanReversion,
            symbol: "BTCUSDT".into(),
            entry_price: dec!(100),
            stop_loss: stop,
            take_profit: tp,
            reasons: vec![],
        }
    }

    fn position(symbol: &str, direction: PositionDirection) -> Position {
        Position {
            symbol: symbol.into(),
            direction,
            entry_price: dec!(100),
            quantity: dec!(1),
            leverage: dec!(15),
            stop_loss: dec!(97),
            take_profit: dec!(106),
            strategy: StrategyKind::Momentum,
            confidence: dec!(0.8),
            highest_price: dec!(100),
            lowest_price: dec!(100),
            trailing_activated: false,
            partial_closed: false,
            initial_risk: dec!(3),
            entry_regime: MarketRegime::Trending,
            sl_atr_multiplier: dec!(1.5),
            opened_at: 0,
            opened_bar: 0,
        }
    }

    #[test]
    fn test_daily_loss_breaker_scenario() {
        let mut rm = manager();
        rm.reset_daily(dec!(100));
        rm.update_peak(dec!(100));
        assert!(rm.check_circuit_breakers(dec!(100), 0));

        assert!(!rm.check_circuit_breakers(dec!(87), 0));
        assert!(rm.halt_reason().is_some_and(|r| r.starts_with("Daily loss limit")));

        // Stays halted even after recovery.
        assert!(!rm.check_circuit_breakers(dec!(100), 0));

        rm.reset_daily(dec!(87));
        assert!(!rm.is_halted());
        assert!(rm.check_circuit_breakers(dec!(87), 0));
    }

    #[test]
    fn test_drawdown_halt_survives_daily_reset() {
        let mut rm = manager();
        rm.reset_daily(dec!(100));
        rm.update_peak(dec!(160));
        assert!(!rm.check_circuit_breakers(dec!(100), 0));
        assert!(rm.halt_reason().is_some_and(|r| r.starts_with("Max drawdown circuit breaker")));
        rm.reset_daily(dec!(100));
        assert!(rm.is_halted());
    }

    #[test]
    fn test_glitch_values_skip_without_halting() {
        let mut rm = manager();
        rm.reset_daily(dec!(100));
        rm.update_peak(dec!(100));
        assert!(!rm.check_circuit_breakers(dec!(0), 0));
        assert!(!rm.check_circuit_breakers(dec!(40), 0));
        assert!(!rm.is_halted());
        assert_eq!(rm.state().daily_start_value, dec!(100));
        assert!(rm.check_circuit_breakers(dec!(99), 0));
    }

    #[test]
    fn test_max_open_positions() {
        let mut rm = manager();
        rm.reset_daily(dec!(100));
        assert!(!rm.check_circuit_breakers(dec!(100), 3));
        assert!(!rm.is_halted());
    }

    #[test]
    fn test_cooldown_exact_and_doubled() {
        let mut rm = manager();
        rm.register_stop_loss("BTCUSDT", 10);
        for bar in 10..15 {
            assert!(rm.check_cooldown("BTCUSDT", bar).is_err(), "bar {bar}");
        }
        assert!(rm.check_cooldown("BTCUSDT", 15).is_ok());
        assert!(rm.check_cooldown("ETHUSDT", 11).is_ok());

        // Second consecutive loss doubles the cooldown.
        rm.register_stop_loss("BTCUSDT", 20);
        assert!(rm.check_cooldown("BTCUSDT", 29).is_err());
        assert!(rm.check_cooldown("BTCUSDT", 30).is_ok());

        rm.register_win("ETHUSDT", 31);
        assert_eq!(rm.state().consecutive_losses, 0);
    }

    #[test]
    fn test_trade_frequency_hour_window() {
        let mut rm = manager();
        assert!(rm.check_trade_frequency(0).is_ok());
        rm.record_trade_opened();
        rm.record_trade_opened();
        assert!(rm.check_trade_frequency(3).is_err());
        // 15m bars: a new hour window at bar 4.
        assert!(rm.check_trade_frequency(4).is_ok());
    }

    #[test]
    fn test_daily_trade_cap() {
        let mut rm = manager();
        for i in 0..12u64 {
            assert!(rm.check_trade_frequency(i * 4).is_ok());
            rm.record_trade_opened();
        }
        let err = rm.check_trade_frequency(100).unwrap_err();
        assert_eq!(err.gate(), Some(Gate::TradeFrequency));
        rm.reset_daily(dec!(100));
        assert!(rm.check_trade_frequency(104).is_ok());
    }

    #[test]
    fn test_clustering_resets_per_bar() {
        let mut rm = manager();
        assert!(rm.check_trade_clustering(7).is_ok());
        rm.record_trade_opened();
        rm.record_trade_opened();
        assert!(rm.check_trade_clustering(7).is_err());
        assert!(rm.check_trade_clustering(8).is_ok());
    }

    #[test]
    fn test_post_profit_cooldown() {
        let mut config = RiskConfig::default();
        config.post_profit_cooldown_bars = 3;
        let mut rm = RiskManager::new(config, Timeframe::M15);
        rm.register_win("BTCUSDT", 5);
        assert!(rm.check_post_profit_cooldown("BTCUSDT", 7).is_err());
        assert!(rm.check_post_profit_cooldown("BTCUSDT", 8).is_ok());
        assert!(manager().check_post_profit_cooldown("BTCUSDT", 5).is_ok());
    }

    #[test]
    fn test_correlation_cap() {
        let rm = manager();
        let mut positions = HashMap::new();
        assert!(rm
            .check_correlation_exposure(PositionDirection::Long, &positions)
            .is_ok());
        positions.insert("ETHUSDT".to_string(), position("ETHUSDT", PositionDirection::Long));
        assert!(rm
            .check_correlation_exposure(PositionDirection::Long, &positions)
            .is_err());
        assert!(rm
            .check_correlation_exposure(PositionDirection::Short, &positions)
            .is_ok());
    }

    #[test]
    fn test_validate_widens_tight_stop() {
        let rm = manager();
        let s = buy(dec!(0.8), dec!(99.5), dec!(101));
        let out = rm.validate_signal(s, dec!(0.72), dec!(2)).unwrap();
        assert_eq!(out.stop_loss, dec!(98.5));
        assert_eq!(out.take_profit, dec!(103));
    }

    #[test]
    fn test_validate_rejections() {
        let rm = manager();
        let low = rm.validate_signal(buy(dec!(0.5), dec!(97), dec!(106)), dec!(0.72), dec!(2));
        assert!(matches!(low, Err(BotError::Blocked { gate: Gate::Validation, .. })));

        let no_stop = rm.validate_signal(buy(dec!(0.9), dec!(0), dec!(106)), dec!(0.72), dec!(2));
        assert!(no_stop.is_err());

        // R:R 1.5 against a 2.0 target.
        let poor_rr = rm.validate_signal(buy(dec!(0.9), dec!(96), dec!(106)), dec!(0.72), dec!(2));
        assert!(poor_rr.is_err());

        // 1.995 is inside the tolerance.
        let near = rm.validate_signal(buy(dec!(0.9), dec!(96), dec!(107.98)), dec!(0.72), dec!(2));
        assert!(near.is_ok());

        let hold = Signal::hold("BTCUSDT", StrategyKind::Momentum, dec!(100), "none");
        assert!(rm.validate_signal(hold, dec!(0.72), dec!(2)).is_err());
    }

    #[test]
    fn test_sizing_caps_loss_at_margin() {
        let mut rm = manager();
        rm.update_peak(dec!(1000));
        let s = buy(dec!(0.86), dec!(97), dec!(106));
        let req = SizingRequest {
            signal: &s,
            portfolio_value: dec!(1000),
            regime: MarketRegime::Ranging,
            min_confidence: dec!(0.72),
            size_scale: Decimal::ONE,
            leverage_scale: Decimal::ONE,
            available_margin: dec!(1000),
        };
        let size = rm.calculate_position_size(&req).unwrap();
        // margin 80 * (0.6 + 0.4 * 0.5) = 64; risk-capped qty = 64 / 3.
        let allocated = dec!(64);
        assert!(size.quantity * s.risk_per_unit() <= allocated);
        assert!(size.notional <= allocated * dec!(15));
    }

    #[test]
    fn test_sizing_loss_bound_across_inputs() {
        let mut rm = manager();
        rm.update_peak(dec!(1200));
        for stop in [dec!(99.9), dec!(98), dec!(90), dec!(50)] {
            for regime in [MarketRegime::Volatile, MarketRegime::Trending] {
                let s = buy(dec!(0.9), stop, dec!(200));
                let req = SizingRequest {
                    signal: &s,
                    portfolio_value: dec!(1000),
                    regime,
                    min_confidence: dec!(0.75),
                    size_scale: dec!(1.6),
                    leverage_scale: dec!(0.8),
                    available_margin: dec!(1000),
                };
                if let Ok(size) = rm.calculate_position_size(&req) {
                    // Allocated margin before scaling never exceeds 8% x 1.6.
                    assert!(size.quantity * s.risk_per_unit() <= dec!(128));
                    assert!(size.margin <= dec!(128));
                }
            }
        }
    }

    #[test]
    fn test_sizing_rejections() {
        let rm = manager();
        let s = buy(dec!(0.9), dec!(97), dec!(106));
        let tiny = SizingRequest {
            signal: &s,
            portfolio_value: dec!(3),
            regime: MarketRegime::Ranging,
            min_confidence: dec!(0.75),
            size_scale: Decimal::ONE,
            leverage_scale: Decimal::ONE,
            available_margin: dec!(3),
        };
        assert!(rm.calculate_position_size(&tiny).is_err());

        let starved = SizingRequest {
            portfolio_value: dec!(1000),
            available_margin: dec!(1),
            ..tiny
        };
        let err = rm.calculate_position_size(&starved).unwrap_err();
        assert_eq!(err.gate(), Some(Gate::Sizing));
    }

    #[test]
    fn test_exit_helpers() {
        assert!(RiskManager::check_stop_loss(PositionDirection::Long, dec!(97), dec!(96.9)));
        assert!(!RiskManager::check_stop_loss(PositionDirection::Short, dec!(103), dec!(102)));
        assert!(RiskManager::check_take_profit(PositionDirection::Short, dec!(94), dec!(94)));
    }
}
