//! Bar-by-bar replay of the trading pipeline over historical candles.
//!
//! All symbols share one globally sorted timeline of primary-timeframe
//! timestamps, so cooldown, frequency and circuit-breaker state evolve in
//! the same order they would live. Fills pay adverse slippage and a taker
//! fee on both sides; margin is reserved from the free balance while a
//! position is open.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BacktestConfig, BotConfig};
use crate::constants::MS_PER_DAY;
use crate::core::indicators::validate_series;
use crate::core::pipeline::{EvaluationRequest, TradingPipeline};
use crate::core::position_manager::{ExitDecision, PositionManager};
use crate::errors::BotError;
use crate::types::{
    ClosedTrade, Evaluation, ExitReason, MarketContext, OrderIntent, Position, PositionDirection,
    StrategyKind, Timeframe, OHLCV,
};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Candles for one symbol: the primary series plus higher timeframes.
#[derive(Debug, Clone, Default)]
pub struct SymbolSeries {
    pub primary: Vec<OHLCV>,
    pub higher: BTreeMap<Timeframe, Vec<OHLCV>>,
}

/// Replay input keyed by symbol.
pub type BacktestData = BTreeMap<String, SymbolSeries>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquityPoint {
    pub timestamp: i64,
    pub equity: Decimal,
    pub open_positions: usize,
}

pub struct BacktestEngine {
    config: BacktestConfig,
    primary_timeframe: Timeframe,
    candle_window: usize,
    pipeline: TradingPipeline,
    exits: PositionManager,
    balance: Decimal,
    positions: HashMap<String, Position>,
    last_close: HashMap<String, Decimal>,
    trades: Vec<ClosedTrade>,
    equity_curve: Vec<EquityPoint>,
}

impl BacktestEngine {
    pub fn new(config: &BotConfig) -> Self {
        Self {
            config: config.backtest.clone(),
            primary_timeframe: config.app.primary_timeframe,
            candle_window: config.app.candle_window,
            pipeline: TradingPipeline::new(config),
            exits: PositionManager::new(config.risk.exits.clone()),
            balance: config.backtest.initial_balance,
            positions: HashMap::new(),
            last_close: HashMap::new(),
            trades: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    pub fn pipeline(&self) -> &TradingPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut TradingPipeline {
        &mut self.pipeline
    }

    /// Replay `data` until the timeline ends or `cancel` fires. A cancelled
    /// run still closes open positions and reports what it processed.
    pub fn run(
        &mut self,
        data: &BacktestData,
        cancel: &CancellationToken,
    ) -> Result<BacktestReport, BotError> {
        for (symbol, series) in data {
            validate_series(&format!("{symbol} {}", self.primary_timeframe), &series.primary)?;
            for (tf, candles) in &series.higher {
                validate_series(&format!("{symbol} {tf}"), candles)?;
            }
        }

        let timeline: Vec<i64> = data
            .values()
            .flat_map(|s| s.primary.iter().map(|c| c.timestamp))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let initial = self.config.initial_balance;
        info!(
            symbols = data.len(),
            bars = timeline.len(),
            initial_balance = %initial,
            "backtest starting"
        );

        self.pipeline.begin_day(initial);
        self.pipeline.mark_to_market(initial);

        let context = MarketContext::default();
        let mut current_day: Option<i64> = None;
        let mut bars_processed = 0usize;
        let mut cancelled = false;

        for (idx, &ts) in timeline.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(bar = idx, "backtest cancelled");
                cancelled = true;
                break;
            }
            let bar = idx as u64;

            for (symbol, series) in data {
                if let Some(i) = candle_index(&series.primary, ts) {
                    self.last_close.insert(symbol.clone(), series.primary[i].close);
                }
            }

            let day = ts.div_euclid(MS_PER_DAY);
            if current_day.is_some_and(|d| d != day) {
                let value = self.portfolio_value();
                self.pipeline.begin_day(value);
            }
            current_day = Some(day);

            self.process_exits(data, ts, bar);

            let value = self.portfolio_value();
            self.pipeline.mark_to_market(value);

            for (symbol, series) in data {
                if self.positions.contains_key(symbol) {
                    continue;
                }
                let Some(i) = candle_index(&series.primary, ts) else {
                    continue;
                };
                let start = (i + 1).saturating_sub(self.candle_window);
                let higher = self.higher_windows(series, ts);
                let evaluation = self.pipeline.evaluate(&EvaluationRequest {
                    symbol,
                    candles: &series.primary[start..=i],
                    higher_timeframes: &higher,
                    context: &context,
                    bar_index: bar,
                    portfolio_value: value,
                    positions: &self.positions,
                });
                if let Evaluation::Order(intent) = evaluation {
                    self.fill(&intent, ts, bar);
                }
            }

            self.equity_curve.push(EquityPoint {
                timestamp: ts,
                equity: self.portfolio_value(),
                open_positions: self.positions.len(),
            });
            self.pipeline.log_adaptive_state_if_due(bar);
            bars_processed += 1;
        }

        if bars_processed > 0 {
            let last = bars_processed - 1;
            self.close_remaining(timeline[last], last as u64);
        }

        let report = BacktestReport {
            initial_balance: initial,
            final_balance: self.balance,
            trades: std::mem::take(&mut self.trades),
            equity_curve: std::mem::take(&mut self.equity_curve),
            bars_processed,
            cancelled,
        };
        info!(
            trades = report.trade_count(),
            final_balance = %report.final_balance.round_dp(2),
            return_pct = %report.return_pct().round_dp(2),
            "backtest complete"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Market data views
    // -----------------------------------------------------------------------

    /// Higher-timeframe candles at or before `ts`, trimmed to the window;
    /// timeframes with too little history are left out.
    fn higher_windows(&self, series: &SymbolSeries, ts: i64) -> BTreeMap<Timeframe, Vec<OHLCV>> {
        series
            .higher
            .iter()
            .filter(|(tf, _)| **tf != self.primary_timeframe)
            .filter_map(|(tf, candles)| {
                let end = candles.partition_point(|c| c.timestamp <= ts);
                if end < self.config.htf_min_bars {
                    return None;
                }
                let start = end.saturating_sub(self.config.htf_window);
                Some((*tf, candles[start..end].to_vec()))
            })
            .collect()
    }

    /// Free balance plus margin and unrealized PnL of open positions.
    fn portfolio_value(&self) -> Decimal {
        let open: Decimal = self
            .positions
            .values()
            .map(|p| {
                let price = self
                    .last_close
                    .get(&p.symbol)
                    .copied()
                    .unwrap_or(p.entry_price);
                p.margin() + p.unrealized_pnl(price)
            })
            .sum();
        self.balance + open
    }

    // -----------------------------------------------------------------------
    // Fills
    // -----------------------------------------------------------------------

    fn fill(&mut self, intent: &OrderIntent, ts: i64, bar: u64) {
        let slip = self.config.slippage_rate;
        let entry = match intent.direction {
            PositionDirection::Long => intent.entry_price * (Decimal::ONE + slip),
            PositionDirection::Short => intent.entry_price * (Decimal::ONE - slip),
        };
        let fee = entry * intent.quantity * self.config.fee_rate;
        let position = PositionManager::open_position(intent, entry, ts, bar);
        let margin = position.margin();

        if margin + fee > self.balance {
            debug!(
                symbol = %intent.symbol,
                needed = %(margin + fee).round_dp(4),
                balance = %self.balance.round_dp(4),
                "insufficient balance, fill skipped"
            );
            return;
        }

        self.balance -= margin + fee;
        self.pipeline.on_position_opened(intent, bar);
        debug!(
            symbol = %intent.symbol,
            direction = intent.direction.as_str(),
            entry = %entry,
            quantity = %intent.quantity,
            "position opened"
        );
        self.positions.insert(intent.symbol.clone(), position);
    }

    fn process_exits(&mut self, data: &BacktestData, ts: i64, bar: u64) {
        let mut decisions: Vec<(String, ExitDecision)> = Vec::new();
        for (symbol, position) in &mut self.positions {
            let Some(series) = data.get(symbol) else {
                continue;
            };
            let Some(i) = candle_index(&series.primary, ts) else {
                continue;
            };
            if let Some(decision) = self.exits.check_position(position, &series.primary[i]) {
                decisions.push((symbol.clone(), decision));
            }
        }
        for (symbol, decision) in decisions {
            self.close(&symbol, &decision, ts, bar);
        }
    }

    fn close_remaining(&mut self, ts: i64, bar: u64) {
        let mut symbols: Vec<String> = self.positions.keys().cloned().collect();
        symbols.sort();
        for symbol in symbols {
            let Some(position) = self.positions.get(&symbol) else {
                continue;
            };
            let price = self
                .last_close
                .get(&symbol)
                .copied()
                .unwrap_or(position.entry_price);
            let decision = ExitDecision {
                reason: ExitReason::EndOfBacktest,
                price,
                quantity: position.quantity,
            };
            self.close(&symbol, &decision, ts, bar);
        }
    }

    /// Realize `decision` against the symbol's position.
    fn close(&mut self, symbol: &str, decision: &ExitDecision, ts: i64, bar: u64) {
        let Some(position) = self.positions.get(symbol) else {
            return;
        };
        let slip = self.config.slippage_rate;
        let exit = match position.direction {
            PositionDirection::Long => decision.price * (Decimal::ONE - slip),
            PositionDirection::Short => decision.price * (Decimal::ONE + slip),
        };
        let qty = decision.quantity;
        let raw = (exit - position.entry_price) * qty * position.direction.sign();
        let exit_fee = exit * qty * self.config.fee_rate;
        let entry_fee = position.entry_price * qty * self.config.fee_rate;
        let margin = if position.leverage > Decimal::ZERO {
            position.entry_price * qty / position.leverage
        } else {
            position.entry_price * qty
        };

        self.balance += margin + raw - exit_fee;

        let closed = ClosedTrade {
            symbol: symbol.to_string(),
            strategy: position.strategy,
            direction: position.direction,
            entry_price: position.entry_price,
            exit_price: exit,
            quantity: qty,
            pnl: raw - exit_fee - entry_fee,
            initial_risk: position.initial_risk,
            take_profit: position.take_profit,
            confidence: position.confidence,
            entry_time: position.opened_at,
            exit_time: ts,
            exit_bar: bar,
            exit_reason: decision.reason,
        };
        debug!(
            symbol,
            reason = %decision.reason,
            exit = %exit,
            pnl = %closed.pnl.round_dp(4),
            "position closed"
        );
        self.pipeline.on_position_closed(&closed);
        self.trades.push(closed);

        if decision.is_partial() {
            if let Some(position) = self.positions.get_mut(symbol) {
                self.exits.apply_partial_close(position, decision);
            }
        } else {
            self.positions.remove(symbol);
        }
    }
}

fn candle_index(candles: &[OHLCV], ts: i64) -> Option<usize> {
    candles.binary_search_by_key(&ts, |c| c.timestamp).ok()
}

// ═══════════════════════════════════════════════════════════════════════════
// Report
// ═══════════════════════════════════════════════════════════════════════════

/// Trade count, wins and net PnL for one slice of the trade list.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Breakdown {
    pub trades: usize,
    pub wins: usize,
    pub pnl: Decimal,
}

impl Breakdown {
    fn add(&mut self, trade: &ClosedTrade) {
        self.trades += 1;
        if trade.pnl > Decimal::ZERO {
            self.wins += 1;
        }
        self.pnl += trade.pnl;
    }
}

#[derive(Debug, Clone)]
pub struct BacktestReport {
    pub initial_balance: Decimal,
    pub final_balance: Decimal,
    pub trades: Vec<ClosedTrade>,
    pub equity_curve: Vec<EquityPoint>,
    pub bars_processed: usize,
    pub cancelled: bool,
}

impl BacktestReport {
    #[must_use]
    pub fn trade_count(&self) -> usize {
        self.trades.len()
    }

    /// Fraction of trades with positive PnL.
    #[must_use]
    pub fn win_rate(&self) -> Decimal {
        if self.trades.is_empty() {
            return Decimal::ZERO;
        }
        let wins = self.trades.iter().filter(|t| t.pnl > Decimal::ZERO).count();
        Decimal::from(wins) / Decimal::from(self.trades.len())
    }

    /// Gross profit over gross loss; `None` when nothing was lost.
    #[must_use]
    pub fn profit_factor(&self) -> Option<Decimal> {
        let (gain, loss) = self.trades.iter().fold((Decimal::ZERO, Decimal::ZERO), |(g, l), t| {
            if t.pnl > Decimal::ZERO {
                (g + t.pnl, l)
            } else {
                (g, l - t.pnl)
            }
        });
        if loss.is_zero() {
            return None;
        }
        Some(gain / loss)
    }

    #[must_use]
    pub fn net_pnl(&self) -> Decimal {
        self.trades.iter().map(|t| t.pnl).sum()
    }

    #[must_use]
    pub fn return_pct(&self) -> Decimal {
        if self.initial_balance.is_zero() {
            return Decimal::ZERO;
        }
        (self.final_balance - self.initial_balance) / self.initial_balance * HUNDRED
    }

    /// Largest peak-to-trough equity decline, in percent.
    #[must_use]
    pub fn max_drawdown_pct(&self) -> Decimal {
        let mut peak = self.initial_balance;
        let mut worst = Decimal::ZERO;
        for point in &self.equity_curve {
            peak = peak.max(point.equity);
            if peak > Decimal::ZERO {
                worst = worst.max((peak - point.equity) / peak);
            }
        }
        worst * HUNDRED
    }

    #[must_use]
    pub fn by_strategy(&self) -> BTreeMap<StrategyKind, Breakdown> {
        let mut out: BTreeMap<StrategyKind, Breakdown> = BTreeMap::new();
        for trade in &self.trades {
            out.entry(trade.strategy).or_default().add(trade);
        }
        out
    }

    #[must_use]
    pub fn by_exit_reason(&self) -> BTreeMap<ExitReason, Breakdown> {
        let mut out: BTreeMap<ExitReason, Breakdown> = BTreeMap::new();
        for trade in &self.trades {
            out.entry(trade.exit_reason).or_default().add(trade);
        }
        out
    }
}

impl fmt::Display for BacktestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BACKTEST REPORT")?;
        if self.cancelled {
            writeln!(f, "  (cancelled after {} bars)", self.bars_processed)?;
        }
        writeln!(f, "  Bars:           {}", self.bars_processed)?;
        writeln!(
            f,
            "  Balance:        {:.2} -> {:.2} ({:+.2}%)",
            self.initial_balance,
            self.final_balance,
            self.return_pct()
        )?;
        writeln!(f, "  Net PnL:        {:.2}", self.net_pnl())?;
        writeln!(f, "  Trades:         {}", self.trade_count())?;
        writeln!(f, "  Win rate:       {:.1}%", self.win_rate() * HUNDRED)?;
        match self.profit_factor() {
            Some(pf) => writeln!(f, "  Profit factor:  {pf:.2}")?,
            None => writeln!(f, "  Profit factor:  n/a")?,
        }
        writeln!(f, "  Max drawdown:   {:.2}%", self.max_drawdown_pct())?;

        writeln!(f, "  By strategy:")?;
        for (kind, b) in self.by_strategy() {
            writeln!(
                f,
                "    {:<16} trades={} wins={} pnl={:.2}",
                kind.as_str(),
                b.trades,
                b.wins,
                b.pnl
            )?;
        }
        writeln!(f, "  By exit reason:")?;
        for (reason, b) in self.by_exit_reason() {
            writeln!(
                f,
                "    {:<20} trades={} pnl={:.2}",
                reason.as_str(),
                b.trades,
                b.pnl
            )?;
        }
        Ok(())
    }
}
