//! Candle timeframes used by the primary series and the higher-timeframe
//! confirmation series.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported candle timeframes.
///
/// Ordered from shortest to longest so `BTreeMap<Timeframe, _>` iterates
/// higher timeframes in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
}

impl Timeframe {
    /// All timeframes in ascending order (shortest to longest).
    pub const ALL: [Timeframe; 9] = [
        Timeframe::M1,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H2,
        Timeframe::H4,
        Timeframe::H6,
    ];

    /// Binance kline interval string representation.
    #[must_use]
    pub fn as_binance_interval(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H4 => "4h",
            Self::H6 => "6h",
        }
    }

    /// Parse from Binance interval string.
    #[must_use]
    pub fn from_binance_interval(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|tf| tf.as_binance_interval() == s)
    }

    /// Duration in minutes.
    #[must_use]
    pub const fn duration_minutes(&self) -> u64 {
        match self {
            Self::M1 => 1,
            Self::M3 => 3,
            Self::M5 => 5,
            Self::M15 => 15,
            Self::M30 => 30,
            Self::H1 => 60,
            Self::H2 => 120,
            Self::H4 => 240,
            Self::H6 => 360,
        }
    }

    /// Duration in milliseconds.
    #[must_use]
    pub const fn duration_ms(&self) -> i64 {
        (self.duration_minutes() * 60_000) as i64
    }

    /// Number of bars of this timeframe in one hour (at least 1).
    ///
    /// Drives the hourly trade-frequency window, which is counted in bars.
    #[must_use]
    pub const fn bars_per_hour(&self) -> u64 {
        let per_hour = 60 / self.duration_minutes();
        if per_hour == 0 {
            1
        } else {
            per_hour
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_binance_interval())
    }
}

impl Serialize for Timeframe {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_binance_interval())
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_binance_interval(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown timeframe: {s}")))
    }
}
