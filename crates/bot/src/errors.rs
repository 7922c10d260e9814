use thiserror::Error;

use crate::types::Gate;

/// Typed error hierarchy for the trading pipeline.
///
/// Library-internal errors use specific variants; application code wraps with
/// `anyhow::Context` for propagation.
#[derive(Error, Debug)]
pub enum BotError {
    // -- Risk gating ----------------------------------------------------------
    #[error("{gate} blocked: {reason}")]
    Blocked { gate: Gate, reason: String },

    // -- Data -----------------------------------------------------------------
    #[error("invalid candle series for {name}: {reason}")]
    InvalidSeries { name: String, reason: String },

    // -- Forwarded errors -----------------------------------------------------
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BotError {
    /// Shorthand for a gate block.
    pub fn blocked(gate: Gate, reason: impl Into<String>) -> Self {
        Self::Blocked {
            gate,
            reason: reason.into(),
        }
    }

    /// The gate that produced this error, if it is a gating block.
    #[must_use]
    pub fn gate(&self) -> Option<Gate> {
        match self {
            Self::Blocked { gate, .. } => Some(*gate),
            _ => None,
        }
    }
}
