//! The per-bar decision pipeline.
//!
//! `evaluate` runs the circuit breakers, the pre-signal risk gates, the
//! strategy manager, adaptive level overrides, validation, the correlation
//! cap and sizing, in that order. The first block becomes a [`Refusal`].
//! Lifecycle hooks feed fills and exits back into the risk manager and the
//! performance tracker.
//!
//! [`Refusal`]: crate::types::Refusal

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::{BotConfig, IndicatorParams, PerStrategy, StrategyParams};
use crate::constants::SL_MULTIPLIER_EPSILON;
use crate::core::adaptive_controller::AdaptiveController;
use crate::core::indicators;
use crate::core::performance_tracker::PerformanceTracker;
use crate::core::risk_manager::{RiskManager, SizingRequest};
use crate::core::strategy_manager::{SignalInputs, StrategyManager};
use crate::errors::BotError;
use crate::types::{
    AdaptiveOverrides, AdaptiveState, ClosedTrade, Evaluation, ExitReason, Gate, MarketContext,
    MarketRegime, OrderIntent, Position, Signal, Timeframe, OHLCV,
};

/// Everything one evaluation needs, borrowed from the caller.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationRequest<'a> {
    pub symbol: &'a str,
    /// Primary-timeframe window, oldest first, ending at the current bar.
    pub candles: &'a [OHLCV],
    pub higher_timeframes: &'a BTreeMap<Timeframe, Vec<OHLCV>>,
    pub context: &'a MarketContext,
    pub bar_index: u64,
    pub portfolio_value: Decimal,
    pub positions: &'a HashMap<String, Position>,
}

/// Thresholds and scales in force for one candidate trade.
#[derive(Debug, Clone, Copy)]
struct Levers {
    min_confidence: Decimal,
    rr_ratio: Decimal,
    sl_atr_multiplier: Decimal,
    size_scale: Decimal,
    leverage_scale: Decimal,
}

pub struct TradingPipeline {
    indicators: IndicatorParams,
    strategy_params: PerStrategy<StrategyParams>,
    strategy_manager: StrategyManager,
    risk_manager: RiskManager,
    tracker: PerformanceTracker,
    controller: AdaptiveController,
    adaptive_enabled: bool,
    log_interval_bars: u64,
    last_state_log_bar: Option<u64>,
}

impl TradingPipeline {
    pub fn new(config: &BotConfig) -> Self {
        let primary = config.app.primary_timeframe;
        Self {
            indicators: config.indicators.clone(),
            strategy_params: config.strategy.params,
            strategy_manager: StrategyManager::new(
                config.strategy.clone(),
                config.indicators.clone(),
                primary,
            ),
            risk_manager: RiskManager::new(config.risk.clone(), primary),
            tracker: PerformanceTracker::new(
                config.adaptive.lookback_trades,
                config.adaptive.min_trades,
            ),
            controller: AdaptiveController::new(config.adaptive.clone()),
            adaptive_enabled: config.adaptive.enabled,
            log_interval_bars: config.adaptive.log_interval_bars,
            last_state_log_bar: None,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn risk_manager(&self) -> &RiskManager {
        &self.risk_manager
    }

    pub fn tracker(&self) -> &PerformanceTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut PerformanceTracker {
        &mut self.tracker
    }

    /// Current overrides and the formatted status block.
    pub fn adaptive_state(&self) -> AdaptiveState {
        let overrides = self.controller.compute_overrides(&self.tracker);
        let status = self.controller.format_state(&self.tracker, &overrides);
        AdaptiveState { overrides, status }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Evaluation
    // ═══════════════════════════════════════════════════════════════════════

    /// Decide whether to open a position on `req.symbol` at this bar.
    ///
    /// Does not count the entry against the frequency caps; call
    /// [`Self::on_position_opened`] once the order is filled.
    pub fn evaluate(&mut self, req: &EvaluationRequest<'_>) -> Evaluation {
        match self.try_evaluate(req) {
            Ok(intent) => {
                info!(
                    symbol = %intent.symbol,
                    direction = intent.direction.as_str(),
                    strategy = %intent.strategy,
                    regime = %intent.regime,
                    confidence = %intent.confidence.round_dp(3),
                    quantity = %intent.quantity,
                    entry = %intent.entry_price,
                    stop = %intent.stop_loss,
                    target = %intent.take_profit,
                    leverage = %intent.leverage,
                    "entry approved"
                );
                Evaluation::Order(intent)
            }
            Err(BotError::Blocked { gate, reason }) => {
                debug!(symbol = req.symbol, gate = %gate, reason = %reason, "entry refused");
                Evaluation::refused(req.symbol, gate, reason)
            }
            Err(other) => {
                warn!(symbol = req.symbol, error = %other, "evaluation failed");
                Evaluation::refused(req.symbol, Gate::InvalidInput, other.to_string())
            }
        }
    }

    fn try_evaluate(&mut self, req: &EvaluationRequest<'_>) -> Result<OrderIntent, BotError> {
        let symbol = req.symbol;
        let bar = req.bar_index;

        indicators::validate_series(symbol, req.candles)?;
        for (tf, candles) in req.higher_timeframes {
            indicators::validate_series(&format!("{symbol} {tf}"), candles)?;
        }

        self.risk_manager
            .circuit_breaker_status(req.portfolio_value, req.positions.len())?;

        if req.positions.contains_key(symbol) {
            return Err(BotError::blocked(
                Gate::PositionOpen,
                format!("{symbol} already has an open position"),
            ));
        }

        self.risk_manager.check_cooldown(symbol, bar)?;
        self.risk_manager.check_trade_frequency(bar)?;
        self.risk_manager.check_post_profit_cooldown(symbol, bar)?;
        self.risk_manager.check_trade_clustering(bar)?;

        let snapshot = indicators::compute_snapshot(req.candles, &self.indicators);
        let (signal, regime) = self.strategy_manager.get_signal(&SignalInputs {
            symbol,
            snapshot: &snapshot,
            higher_timeframes: req.higher_timeframes,
            context: req.context,
            bar_index: bar,
        });
        if signal.is_hold() {
            return Err(BotError::blocked(Gate::Strategy, signal.reason_text()));
        }

        self.approve(req, signal, regime, snapshot.atr)
    }

    /// Post-signal stages: adaptive levels, validation, correlation, sizing.
    fn approve(
        &self,
        req: &EvaluationRequest<'_>,
        signal: Signal,
        regime: MarketRegime,
        atr: Decimal,
    ) -> Result<OrderIntent, BotError> {
        let levers = self.levers(&signal);
        let params = self.strategy_params.get(signal.strategy);

        let rebuild = self.adaptive_enabled && atr > Decimal::ZERO && levels_changed(&levers, params);
        let signal = if rebuild {
            let risk = atr * levers.sl_atr_multiplier;
            debug!(
                symbol = req.symbol,
                sl_mult = %levers.sl_atr_multiplier,
                rr = %levers.rr_ratio,
                "adaptive levels applied"
            );
            signal.with_levels(risk, levers.rr_ratio).note(format!(
                "Adaptive SL {}x ATR, R:R {}",
                levers.sl_atr_multiplier, levers.rr_ratio
            ))
        } else {
            signal
        };

        let signal = self
            .risk_manager
            .validate_signal(signal, levers.min_confidence, levers.rr_ratio)?;

        let Some(direction) = signal.direction.position_direction() else {
            return Err(BotError::blocked(Gate::Validation, "HOLD signal"));
        };
        self.risk_manager
            .check_correlation_exposure(direction, req.positions)?;

        let used_margin: Decimal = req.positions.values().map(Position::margin).sum();
        let size = self.risk_manager.calculate_position_size(&SizingRequest {
            signal: &signal,
            portfolio_value: req.portfolio_value,
            regime,
            min_confidence: levers.min_confidence,
            size_scale: levers.size_scale,
            leverage_scale: levers.leverage_scale,
            available_margin: (req.portfolio_value - used_margin).max(Decimal::ZERO),
        })?;

        Ok(OrderIntent {
            symbol: req.symbol.to_string(),
            direction,
            quantity: size.quantity,
            entry_price: signal.entry_price,
            leverage: size.leverage,
            margin: size.margin,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            strategy: signal.strategy,
            confidence: signal.confidence,
            regime,
            sl_atr_multiplier: levers.sl_atr_multiplier,
            reasons: signal.reasons,
        })
    }

    fn levers(&self, signal: &Signal) -> Levers {
        let kind = signal.strategy;
        let params = self.strategy_params.get(kind);
        let risk = self.risk_manager.config();

        if !self.adaptive_enabled {
            return Levers {
                min_confidence: risk.min_confidence_for(kind),
                rr_ratio: risk.reward_risk_ratio,
                sl_atr_multiplier: params.sl_atr_multiplier,
                size_scale: Decimal::ONE,
                leverage_scale: Decimal::ONE,
            };
        }

        let overrides: AdaptiveOverrides = self.controller.compute_overrides(&self.tracker);
        let (min_confidence, size_scale) = overrides
            .for_strategy(kind)
            .map_or((risk.min_confidence_for(kind), Decimal::ONE), |o| {
                (o.min_confidence, o.position_size_scale)
            });
        Levers {
            min_confidence,
            rr_ratio: overrides.rr_ratio,
            sl_atr_multiplier: overrides.sl_atr_multiplier,
            size_scale,
            leverage_scale: overrides.leverage_scale,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Start of a UTC day.
    pub fn begin_day(&mut self, portfolio_value: Decimal) {
        self.risk_manager.reset_daily(portfolio_value);
    }

    /// Record a new portfolio valuation (raises the drawdown peak).
    pub fn mark_to_market(&mut self, portfolio_value: Decimal) {
        self.risk_manager.update_peak(portfolio_value);
    }

    /// Standalone breaker check for callers that gate a whole tick.
    pub fn check_circuit_breakers(&mut self, portfolio_value: Decimal, open_positions: usize) -> bool {
        self.risk_manager
            .check_circuit_breakers(portfolio_value, open_positions)
    }

    pub fn on_position_opened(&mut self, intent: &OrderIntent, bar: u64) {
        self.risk_manager.record_trade_opened();
        debug!(
            symbol = %intent.symbol,
            bar,
            trades_today = self.risk_manager.state().trades_today,
            "entry counted"
        );
    }

    /// Feed a realized exit into cooldown bookkeeping and the tracker.
    pub fn on_position_closed(&mut self, closed: &ClosedTrade) {
        match closed.exit_reason {
            ExitReason::StopLoss => {
                self.risk_manager
                    .register_stop_loss(&closed.symbol, closed.exit_bar);
            }
            ExitReason::TakeProfit | ExitReason::TrailingStop | ExitReason::PartialTakeProfit => {
                self.risk_manager.register_win(&closed.symbol, closed.exit_bar);
            }
            ExitReason::EndOfBacktest => {}
        }
        self.tracker.record_trade(closed.to_record());
    }

    /// Log the adaptive status block every `log_interval_bars` bars.
    /// Returns whether it was logged.
    pub fn log_adaptive_state_if_due(&mut self, bar: u64) -> bool {
        if !self.adaptive_enabled || self.log_interval_bars == 0 {
            return false;
        }
        if bar % self.log_interval_bars != 0 || self.last_state_log_bar == Some(bar) {
            return false;
        }
        self.last_state_log_bar = Some(bar);
        let state = self.adaptive_state();
        for line in state.status.lines() {
            info!("{line}");
        }
        true
    }
}

fn levels_changed(levers: &Levers, params: &StrategyParams) -> bool {
    (levers.sl_atr_multiplier - params.sl_atr_multiplier).abs() > SL_MULTIPLIER_EPSILON
        || (levers.rr_ratio - params.rr_ratio).abs() > SL_MULTIPLIER_EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::bot_config;
    use crate::core::test_support::{trading_config, zigzag};
    use crate::types::{PositionDirection, SignalDirection, StrategyKind, TradeRecord};
    use rust_decimal_macros::dec;

    const SYMBOL: &str = "BTCUSDT";

    struct Fixture {
        candles: Vec<OHLCV>,
        htf: BTreeMap<Timeframe, Vec<OHLCV>>,
        context: MarketContext,
        positions: HashMap<String, Position>,
    }

    impl Fixture {
        fn new() -> Self {
            let candles = (0..10)
                .map(|i| OHLCV {
                    timestamp: i * 900_000,
                    open: dec!(100),
                    high: dec!(101),
                    low: dec!(99),
                    close: dec!(100),
                    volume: dec!(10),
                })
                .collect();
            Self {
                candles,
                htf: BTreeMap::new(),
                context: MarketContext::default(),
                positions: HashMap::new(),
            }
        }

        fn request(&self, bar: u64, value: Decimal) -> EvaluationRequest<'_> {
            EvaluationRequest {
                symbol: SYMBOL,
                candles: &self.candles,
                higher_timeframes: &self.htf,
                context: &self.context,
                bar_index: bar,
                portfolio_value: value,
                positions: &self.positions,
            }
        }
    }

    fn buy(strategy: StrategyKind) -> Signal {
        Signal {
            direction: SignalDirection::Buy,
            confidence: dec!(0.9),
            strategy,
            symbol: SYMBOL.into(),
            entry_price: dec!(100),
            stop_loss: dec!(97),
            take_profit: dec!(106),
            reasons: vec!["test".into()],
        }
    }

    fn position(symbol: &str, direction: PositionDirection) -> Position {
        Position {
            symbol: symbol.into(),
            direction,
            entry_price: dec!(2000),
            quantity: dec!(0.5),
            leverage: dec!(10),
            stop_loss: dec!(1960),
            take_profit: dec!(2080),
            strategy: StrategyKind::Momentum,
            confidence: dec!(0.8),
            highest_price: dec!(2000),
            lowest_price: dec!(2000),
            trailing_activated: false,
            partial_closed: false,
            initial_risk: dec!(40),
            entry_regime: MarketRegime::Trending,
            sl_atr_multiplier: dec!(1.5),
            opened_at: 0,
            opened_bar: 0,
        }
    }

    fn closed(reason: ExitReason, pnl: Decimal, bar: u64) -> ClosedTrade {
        ClosedTrade {
            symbol: SYMBOL.into(),
            strategy: StrategyKind::Momentum,
            direction: PositionDirection::Long,
            entry_price: dec!(100),
            exit_price: dec!(100) + pnl,
            quantity: dec!(1),
            pnl,
            initial_risk: dec!(1),
            take_profit: dec!(102),
            confidence: dec!(0.8),
            entry_time: 0,
            exit_time: 900_000,
            exit_bar: bar,
            exit_reason: reason,
        }
    }

    fn pipeline() -> TradingPipeline {
        let mut p = TradingPipeline::new(&bot_config());
        p.begin_day(dec!(1000));
        p.mark_to_market(dec!(1000));
        p
    }

    #[test]
    fn test_daily_loss_halts_until_reset() {
        let fx = Fixture::new();
        let mut p = TradingPipeline::new(&bot_config());
        p.begin_day(dec!(100));

        let eval = p.evaluate(&fx.request(1, dec!(87)));
        let refusal = eval.refusal().unwrap();
        assert_eq!(refusal.gate, Gate::CircuitBreaker);
        assert!(refusal.reason.contains("Daily loss limit"), "{}", refusal.reason);

        assert!(!p.check_circuit_breakers(dec!(100), 0));
        let eval = p.evaluate(&fx.request(2, dec!(100)));
        assert!(eval.refusal().unwrap().reason.starts_with("Trading halted"));

        p.begin_day(dec!(87));
        assert!(p.check_circuit_breakers(dec!(87), 0));
    }

    #[test]
    fn test_open_position_blocks_symbol() {
        let mut fx = Fixture::new();
        fx.positions
            .insert(SYMBOL.into(), position(SYMBOL, PositionDirection::Long));
        let mut p = pipeline();
        let eval = p.evaluate(&fx.request(1, dec!(1000)));
        assert_eq!(eval.refusal().unwrap().gate, Gate::PositionOpen);
    }

    #[test]
    fn test_stop_loss_exit_starts_cooldown() {
        let fx = Fixture::new();
        let mut p = pipeline();
        p.on_position_closed(&closed(ExitReason::StopLoss, dec!(-1), 10));

        let eval = p.evaluate(&fx.request(12, dec!(1000)));
        assert_eq!(eval.refusal().unwrap().gate, Gate::Cooldown);
        assert_eq!(p.tracker().overall_metrics().trade_count, 1);
        assert_eq!(p.risk_manager().state().consecutive_losses, 1);

        // Five bars later the cooldown has passed; the short window holds.
        let eval = p.evaluate(&fx.request(15, dec!(1000)));
        let refusal = eval.refusal().unwrap();
        assert_eq!(refusal.gate, Gate::Strategy);
        assert!(refusal.reason.contains("Insufficient data"), "{}", refusal.reason);
    }

    #[test]
    fn test_win_resets_loss_streak() {
        let mut p = pipeline();
        p.on_position_closed(&closed(ExitReason::StopLoss, dec!(-1), 3));
        p.on_position_closed(&closed(ExitReason::TrailingStop, dec!(2), 8));
        assert_eq!(p.risk_manager().state().consecutive_losses, 0);
        assert_eq!(p.risk_manager().state().last_win_bar.get(SYMBOL), Some(&8));
    }

    #[test]
    fn test_approve_sizes_within_margin() {
        let fx = Fixture::new();
        let p = pipeline();
        let intent = p
            .approve(
                &fx.request(1, dec!(1000)),
                buy(StrategyKind::MeanReversion),
                MarketRegime::Ranging,
                dec!(2),
            )
            .unwrap();
        assert_eq!(intent.direction, PositionDirection::Long);
        assert_eq!(intent.leverage, dec!(15));
        assert_eq!(intent.stop_loss, dec!(97));
        assert!(intent.margin <= dec!(80));
        let loss_at_stop = (intent.entry_price - intent.stop_loss) * intent.quantity;
        assert!(loss_at_stop <= intent.margin, "{loss_at_stop} > {}", intent.margin);
    }

    #[test]
    fn test_adaptive_levels_rebuild_stop() {
        let fx = Fixture::new();
        let mut p = pipeline();
        for i in 0..10 {
            p.tracker_mut().record_trade(TradeRecord {
                strategy: StrategyKind::Momentum,
                symbol: SYMBOL.into(),
                direction: PositionDirection::Long,
                pnl: dec!(3),
                pnl_pct: dec!(0.03),
                entry_time: i,
                exit_time: i + 1,
                exit_reason: ExitReason::TakeProfit,
                confidence: dec!(0.8),
                risk: dec!(1),
                reward: dec!(2),
            });
        }
        let state = p.adaptive_state();
        assert_eq!(state.overrides.sl_atr_multiplier, dec!(1.35));
        assert_eq!(state.overrides.rr_ratio, dec!(2.15));

        let intent = p
            .approve(
                &fx.request(1, dec!(1000)),
                buy(StrategyKind::Momentum),
                MarketRegime::Trending,
                dec!(2),
            )
            .unwrap();
        assert_eq!(intent.sl_atr_multiplier, dec!(1.35));
        assert_eq!(intent.stop_loss, dec!(97.3));
        assert_eq!(intent.take_profit, dec!(105.805));
        assert!(intent.reasons.iter().any(|r| r.starts_with("Adaptive SL")));
    }

    #[test]
    fn test_low_confidence_refused_at_validation() {
        let fx = Fixture::new();
        let p = pipeline();
        let mut signal = buy(StrategyKind::Momentum);
        signal.confidence = dec!(0.70);
        let err = p
            .approve(
                &fx.request(1, dec!(1000)),
                signal,
                MarketRegime::Trending,
                dec!(2),
            )
            .unwrap_err();
        assert_eq!(err.gate(), Some(Gate::Validation));
    }

    #[test]
    fn test_same_direction_exposure_refused() {
        let mut fx = Fixture::new();
        fx.positions
            .insert("ETHUSDT".into(), position("ETHUSDT", PositionDirection::Long));
        let p = pipeline();
        let err = p
            .approve(
                &fx.request(1, dec!(1000)),
                buy(StrategyKind::MeanReversion),
                MarketRegime::Ranging,
                dec!(2),
            )
            .unwrap_err();
        assert_eq!(err.gate(), Some(Gate::Correlation));
    }

    #[test]
    fn test_adaptive_state_log_interval() {
        let mut p = pipeline();
        assert!(p.adaptive_state().status.starts_with("ADAPTIVE STATE:"));
        assert!(!p.log_adaptive_state_if_due(15));
        assert!(p.log_adaptive_state_if_due(16));
        assert!(!p.log_adaptive_state_if_due(16));
        assert!(p.log_adaptive_state_if_due(32));
    }

    #[test]
    fn test_evaluate_orders_from_candles() {
        let candles = zigzag(400);
        let htf = BTreeMap::new();
        let context = MarketContext::default();
        let positions = HashMap::new();
        let mut p = TradingPipeline::new(&trading_config());
        p.begin_day(dec!(1000));
        p.mark_to_market(dec!(1000));

        let orders: Vec<OrderIntent> = (60..candles.len())
            .filter_map(|i| {
                let start = (i + 1).saturating_sub(200);
                p.evaluate(&EvaluationRequest {
                    symbol: SYMBOL,
                    candles: &candles[start..=i],
                    higher_timeframes: &htf,
                    context: &context,
                    bar_index: i as u64,
                    portfolio_value: dec!(1000),
                    positions: &positions,
                })
                .order()
                .cloned()
            })
            .collect();

        assert!(!orders.is_empty(), "no bar produced an order");
        for o in &orders {
            assert_eq!(o.symbol, SYMBOL);
            assert!(o.quantity > Decimal::ZERO);
            assert!(o.confidence >= dec!(0.10));
            match o.direction {
                PositionDirection::Long => {
                    assert!(o.stop_loss < o.entry_price && o.entry_price < o.take_profit);
                }
                PositionDirection::Short => {
                    assert!(o.take_profit < o.entry_price && o.entry_price < o.stop_loss);
                }
            }
            let loss_at_stop = (o.entry_price - o.stop_loss).abs() * o.quantity;
            assert!(loss_at_stop <= dec!(80), "{loss_at_stop}");
            assert!(o.margin <= dec!(80));
        }
        // Evaluation alone never consumes a frequency slot.
        assert_eq!(p.risk_manager().state().trades_today, 0);
    }

    #[test]
    fn test_out_of_order_window_refused_as_invalid_input() {
        let mut fx = Fixture::new();
        fx.candles.swap(4, 5);
        let mut p = pipeline();
        let eval = p.evaluate(&fx.request(1, dec!(1000)));
        let refusal = eval.refusal().unwrap();
        assert_eq!(refusal.gate, Gate::InvalidInput);
        assert!(refusal.reason.contains("does not follow"), "{}", refusal.reason);
    }

    #[test]
    fn test_out_of_order_higher_timeframe_refused() {
        let mut fx = Fixture::new();
        let mut hourly = fx.candles.clone();
        hourly.swap(0, 1);
        fx.htf.insert(Timeframe::H1, hourly);
        let mut p = pipeline();
        let eval = p.evaluate(&fx.request(1, dec!(1000)));
        let refusal = eval.refusal().unwrap();
        assert_eq!(refusal.gate, Gate::InvalidInput);
        assert!(refusal.reason.contains("1h"), "{}", refusal.reason);
    }
}
