pub mod adaptive_controller;
pub mod backtest;
pub mod filters;
pub mod indicators;
pub mod performance_tracker;
pub mod pipeline;
pub mod position_manager;
pub mod regime;
pub mod risk_manager;
pub mod strategies;
pub mod strategy_manager;

#[cfg(test)]
pub(crate) mod test_support;
