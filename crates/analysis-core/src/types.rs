use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// OHLCV bar data
///
/// A series is a `&[Bar]` ordered oldest-first. `volume` is NaN when the
/// source did not report it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Reject series whose timestamps are not strictly increasing.
pub fn ensure_time_ordered(bars: &[Bar]) -> Result<(), AnalysisError> {
    match bars.windows(2).position(|w| w[1].timestamp <= w[0].timestamp) {
        Some(i) => Err(AnalysisError::InvalidInput(format!(
            "bar timestamps not strictly increasing at index {}",
            i + 1
        ))),
        None => Ok(()),
    }
}

/// Live bid/ask snapshot for one instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateQuote {
    pub instrument_id: i64,
    pub bid: f64,
    pub ask: f64,
    pub last_price: f64,
}

impl RateQuote {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    /// Spread as a percentage of bid (0 when bid is 0)
    pub fn spread_pct(&self) -> f64 {
        if self.bid == 0.0 {
            return 0.0;
        }
        (self.ask - self.bid) / self.bid * 100.0
    }
}

/// Trade direction. SELL opens a short (CFD) position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn is_buy(&self) -> bool {
        matches!(self, Direction::Buy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Direction::Buy),
            "SELL" => Ok(Direction::Sell),
            other => Err(AnalysisError::InvalidInput(format!(
                "unknown direction '{}'",
                other
            ))),
        }
    }
}

/// Candle interval accepted by the OHLCV fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    Minute1,
    Minute5,
    Minute15,
    Minute30,
    Hour1,
    Hour4,
    Day1,
    Week1,
}

impl FromStr for Timeframe {
    type Err = AnalysisError;

    /// Accepts the short codes M1, M5, M15, M30, H1, H4, D1, W1
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "M1" => Ok(Timeframe::Minute1),
            "M5" => Ok(Timeframe::Minute5),
            "M15" => Ok(Timeframe::Minute15),
            "M30" => Ok(Timeframe::Minute30),
            "H1" => Ok(Timeframe::Hour1),
            "H4" => Ok(Timeframe::Hour4),
            "D1" => Ok(Timeframe::Day1),
            "W1" => Ok(Timeframe::Week1),
            other => Err(AnalysisError::InvalidInput(format!(
                "unknown timeframe '{}'",
                other
            ))),
        }
    }
}
