//! Rolling-window trade statistics.
//!
//! Keeps the last `lookback_trades` closed trades per strategy and globally.
//! Metrics are recomputed from the windows on demand, so a tracker rebuilt
//! from [`PerformanceTracker::history`] reports exactly the same numbers.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, info};

use crate::errors::BotError;
use crate::types::{StrategyKind, StrategyMetrics, TradeRecord};

/// A trade tagged with its arrival order.
#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    trade: TradeRecord,
}

pub struct PerformanceTracker {
    lookback: usize,
    min_trades: usize,
    next_seq: u64,
    by_strategy: BTreeMap<StrategyKind, VecDeque<Entry>>,
    all: VecDeque<Entry>,
}

impl PerformanceTracker {
    pub fn new(lookback_trades: usize, min_trades: usize) -> Self {
        Self {
            lookback: lookback_trades.max(1),
            min_trades,
            next_seq: 0,
            by_strategy: BTreeMap::new(),
            all: VecDeque::new(),
        }
    }

    /// Record a closed trade, evicting the oldest beyond the lookback.
    pub fn record_trade(&mut self, trade: TradeRecord) {
        let entry = Entry {
            seq: self.next_seq,
            trade,
        };
        self.next_seq += 1;

        debug!(
            strategy = %entry.trade.strategy,
            symbol = %entry.trade.symbol,
            pnl = %entry.trade.pnl,
            exit = %entry.trade.exit_reason,
            "trade recorded"
        );

        let window = self.by_strategy.entry(entry.trade.strategy).or_default();
        window.push_back(entry.clone());
        if window.len() > self.lookback {
            window.pop_front();
        }

        self.all.push_back(entry);
        if self.all.len() > self.lookback {
            self.all.pop_front();
        }
    }

    #[must_use]
    pub fn min_trades(&self) -> usize {
        self.min_trades
    }

    #[must_use]
    pub fn has_enough_data(&self, strategy: StrategyKind) -> bool {
        self.by_strategy
            .get(&strategy)
            .is_some_and(|w| w.len() >= self.min_trades)
    }

    #[must_use]
    pub fn has_enough_overall_data(&self) -> bool {
        self.all.len() >= self.min_trades
    }

    #[must_use]
    pub fn strategy_metrics(&self, strategy: StrategyKind) -> StrategyMetrics {
        match self.by_strategy.get(&strategy) {
            Some(window) => compute_metrics(window.iter().map(|e| &e.trade)),
            None => StrategyMetrics::default(),
        }
    }

    #[must_use]
    pub fn overall_metrics(&self) -> StrategyMetrics {
        compute_metrics(self.all.iter().map(|e| &e.trade))
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Every retained trade, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<TradeRecord> {
        let mut merged: BTreeMap<u64, &TradeRecord> = BTreeMap::new();
        for entry in self.by_strategy.values().flatten().chain(self.all.iter()) {
            merged.insert(entry.seq, &entry.trade);
        }
        merged.into_values().cloned().collect()
    }

    /// Replace the current windows by replaying `trades` in order.
    pub fn load_history(&mut self, trades: Vec<TradeRecord>) {
        self.by_strategy.clear();
        self.all.clear();
        self.next_seq = 0;
        for trade in trades {
            self.record_trade(trade);
        }
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), BotError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let history = self.history();
        let json = serde_json::to_string_pretty(&history)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), trades = history.len(), "trade history saved");
        Ok(())
    }

    /// Replay a saved history. Returns the number of trades loaded.
    pub fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<usize, BotError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let trades: Vec<TradeRecord> = serde_json::from_str(&raw)?;
        let count = trades.len();
        self.load_history(trades);
        info!(path = %path.display(), trades = count, "trade history restored");
        Ok(count)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Metrics
// ═══════════════════════════════════════════════════════════════════════════

fn compute_metrics<'a>(trades: impl Iterator<Item = &'a TradeRecord>) -> StrategyMetrics {
    let pnls: Vec<(f64, f64)> = trades
        .map(|t| {
            (
                t.pnl.to_f64().unwrap_or(0.0),
                t.risk.to_f64().unwrap_or(0.0),
            )
        })
        .collect();
    if pnls.is_empty() {
        return StrategyMetrics::default();
    }

    let trade_count = pnls.len();
    let win_count = pnls.iter().filter(|(p, _)| *p > 0.0).count();
    let win_rate = win_count as f64 / trade_count as f64;

    let gross_profit: f64 = pnls.iter().map(|(p, _)| *p).filter(|p| *p > 0.0).sum();
    let gross_loss: f64 = pnls
        .iter()
        .map(|(p, _)| *p)
        .filter(|p| *p <= 0.0)
        .sum::<f64>()
        .abs();
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        1.0
    };

    let total_pnl: f64 = pnls.iter().map(|(p, _)| *p).sum();
    let avg_pnl = total_pnl / trade_count as f64;

    let rr: Vec<f64> = pnls
        .iter()
        .filter(|(_, risk)| *risk > 0.0)
        .map(|(p, risk)| if *p > 0.0 { p.abs() / risk } else { -(p.abs() / risk) })
        .collect();
    let avg_rr_achieved = if rr.is_empty() {
        0.0
    } else {
        rr.iter().sum::<f64>() / rr.len() as f64
    };

    let mut max_losing_streak = 0usize;
    let mut run = 0usize;
    for (p, _) in &pnls {
        if *p <= 0.0 {
            run += 1;
            max_losing_streak = max_losing_streak.max(run);
        } else {
            run = 0;
        }
    }

    let pnl_series: Vec<f64> = pnls.iter().map(|(p, _)| *p).collect();

    StrategyMetrics {
        trade_count,
        win_count,
        win_rate,
        profit_factor,
        avg_pnl,
        avg_rr_achieved,
        total_pnl,
        current_streak: trailing_streak(&pnl_series),
        max_losing_streak,
        recent_trend: pnl_trend(&pnl_series),
    }
}

/// Signed length of the run at the end of the series: positive for wins,
/// negative for losses. Bounded by the window, so a run longer than
/// `lookback_trades` reports the window length.
fn trailing_streak(pnls: &[f64]) -> i64 {
    let Some(&last) = pnls.last() else {
        return 0;
    };
    let winning = last > 0.0;
    let run = pnls
        .iter()
        .rev()
        .take_while(|p| (**p > 0.0) == winning)
        .count() as i64;
    if winning {
        run
    } else {
        -run
    }
}

/// Least-squares slope of min-max normalised cumulative PnL against the
/// normalised index, clamped to [-1, 1]. Zero for short or flat series.
fn pnl_trend(pnls: &[f64]) -> f64 {
    if pnls.len() < 3 {
        return 0.0;
    }

    let cum: Vec<f64> = pnls
        .iter()
        .scan(0.0, |acc, p| {
            *acc += p;
            Some(*acc)
        })
        .collect();

    let (min, max) = cum
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    let range = max - min;
    if range < 1e-10 {
        return 0.0;
    }

    let n = cum.len() as f64;
    let xs: Vec<f64> = (0..cum.len()).map(|i| i as f64 / n).collect();
    let ys: Vec<f64> = cum.iter().map(|v| (v - min) / range).collect();
    let x_mean = xs.iter().sum::<f64>() / n;
    let y_mean = ys.iter().sum::<f64>() / n;

    let (num, den) = xs
        .iter()
        .zip(&ys)
        .fold((0.0_f64, 0.0_f64), |(num, den), (x, y)| {
            let dx = x - x_mean;
            (num + dx * (y - y_mean), den + dx * dx)
        });
    if den < 1e-10 {
        return 0.0;
    }
    (num / den).clamp(-1.0, 1.0)
}
