pub mod market_data;
pub mod order;
pub mod pnl;
pub mod position;
pub mod signal;
pub mod timeframe;

pub use market_data::{DerivativesSnapshot, MarketContext, OiDirection, OHLCV};
pub use order::{Evaluation, Gate, OrderIntent, Refusal};
pub use pnl::{
    AdaptiveOverrides, AdaptiveState, ClosedTrade, ExitReason, StrategyMetrics, StrategyOverrides,
    TradeRecord,
};
pub use position::{Position, PositionDirection};
pub use signal::{
    IndicatorSnapshot, MarketRegime, Signal, SignalDirection, StrategyKind, TrendDirection,
};
pub use timeframe::Timeframe;
