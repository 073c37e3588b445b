use analysis_core::stats::round_to;
use analysis_core::{AnalysisError, Bar, Direction};
use serde::{Deserialize, Serialize};
use technical_analysis::{chandelier_exit, supertrend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopMethod {
    Pct,
    Atr,
    Chandelier,
}

impl StopMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopMethod::Pct => "pct",
            StopMethod::Atr => "atr",
            StopMethod::Chandelier => "chandelier",
        }
    }
}

/// Stop-loss / take-profit recommendation for one trade entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopRecommendation {
    pub sl_rate: f64,
    /// Absent for trailing (Chandelier) stops
    pub tp_rate: Option<f64>,
    pub sl_pct: f64,
    pub tp_pct: Option<f64>,
    pub method: StopMethod,
    /// SuperTrend direction at the last bar (Chandelier only)
    pub trend_up: Option<bool>,
    pub supertrend_value: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtrStopParams {
    pub sl_multiplier: f64,
    pub tp_multiplier: f64,
    pub max_sl_pct: f64,
    pub min_sl_pct: f64,
}

impl Default for AtrStopParams {
    fn default() -> Self {
        Self {
            sl_multiplier: 2.0,
            tp_multiplier: 3.0,
            max_sl_pct: 15.0,
            min_sl_pct: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChandelierParams {
    /// Lookback for the extreme and its ATR (22 for equities, 14 for crypto)
    pub n: usize,
    pub mult: f64,
    pub supertrend_n: usize,
    pub supertrend_mult: f64,
    pub max_sl_pct: f64,
    pub min_sl_pct: f64,
}

impl Default for ChandelierParams {
    fn default() -> Self {
        Self {
            n: 22,
            mult: 3.0,
            supertrend_n: 14,
            supertrend_mult: 3.0,
            max_sl_pct: 15.0,
            min_sl_pct: 1.0,
        }
    }
}

/// Finite and strictly positive; NaN fails.
pub(crate) fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// `f64::clamp` panics on an inverted or NaN range, so bounds are checked first.
pub(crate) fn check_bounds(name: &str, min: f64, max: f64) -> Result<(), AnalysisError> {
    if min.is_nan() || max.is_nan() || min > max {
        return Err(AnalysisError::InvalidInput(format!(
            "{} bounds are inverted or undefined (min {}, max {})",
            name, min, max
        )));
    }
    Ok(())
}

/// Offset `price` by `pct` percent against the position (stop side).
fn stop_rate(price: f64, pct: f64, direction: Direction) -> f64 {
    match direction {
        Direction::Buy => price * (1.0 - pct / 100.0),
        Direction::Sell => price * (1.0 + pct / 100.0),
    }
}

/// Offset `price` by `pct` percent in favour of the position (target side).
fn target_rate(price: f64, pct: f64, direction: Direction) -> f64 {
    stop_rate(price, -pct, direction)
}

/// Fixed-percentage stop and target
pub fn calculate_pct_stops(
    price: f64,
    direction: Direction,
    sl_pct: f64,
    tp_pct: f64,
) -> Result<StopRecommendation, AnalysisError> {
    if !is_positive(price) {
        return Err(AnalysisError::InvalidInput("price must be > 0".to_string()));
    }
    if !is_positive(sl_pct) || !is_positive(tp_pct) {
        return Err(AnalysisError::InvalidInput(
            "stop-loss and take-profit percentages must be > 0".to_string(),
        ));
    }

    Ok(StopRecommendation {
        sl_rate: round_to(stop_rate(price, sl_pct, direction), 4),
        tp_rate: Some(round_to(target_rate(price, tp_pct, direction), 4)),
        sl_pct: round_to(sl_pct, 2),
        tp_pct: Some(round_to(tp_pct, 2)),
        method: StopMethod::Pct,
        trend_up: None,
        supertrend_value: None,
    })
}

/// Stop and target from an ATR multiple.
///
/// The stop distance is clamped to `[min_sl_pct, max_sl_pct]` of price and
/// the dollar distance re-derived from the clamped percentage. The target
/// distance is never clamped.
pub fn calculate_atr_stops(
    price: f64,
    atr: f64,
    direction: Direction,
    params: &AtrStopParams,
) -> Result<StopRecommendation, AnalysisError> {
    if !is_positive(price) || !is_positive(atr) {
        return Err(AnalysisError::InvalidInput(
            "Invalid price or ATR (must be > 0)".to_string(),
        ));
    }
    check_bounds("stop-loss pct", params.min_sl_pct, params.max_sl_pct)?;

    let sl_pct = (atr * params.sl_multiplier / price * 100.0).clamp(params.min_sl_pct, params.max_sl_pct);
    let sl_distance = price * sl_pct / 100.0;
    let tp_distance = atr * params.tp_multiplier;
    let tp_pct = tp_distance / price * 100.0;

    let (sl_rate, tp_rate) = match direction {
        Direction::Buy => (price - sl_distance, price + tp_distance),
        Direction::Sell => (price + sl_distance, price - tp_distance),
    };

    Ok(StopRecommendation {
        sl_rate: round_to(sl_rate, 4),
        tp_rate: Some(round_to(tp_rate, 4)),
        sl_pct: round_to(sl_pct, 2),
        tp_pct: Some(round_to(tp_pct, 2)),
        method: StopMethod::Atr,
        trend_up: None,
        supertrend_value: None,
    })
}

/// Trailing stop from the Chandelier Exit, confirmed by SuperTrend.
///
/// No take-profit is produced. When the Chandelier distance falls outside
/// `[min_sl_pct, max_sl_pct]` the stop is re-derived from price at the
/// clamped percentage instead of using the raw Chandelier level.
pub fn calculate_chandelier_stops(
    bars: &[Bar],
    price: f64,
    direction: Direction,
    params: &ChandelierParams,
) -> Result<StopRecommendation, AnalysisError> {
    if !is_positive(price) {
        return Err(AnalysisError::InvalidInput("price must be > 0".to_string()));
    }
    check_bounds("stop-loss pct", params.min_sl_pct, params.max_sl_pct)?;
    let min_bars = params.n.max(params.supertrend_n);
    if bars.len() < min_bars {
        return Err(AnalysisError::InsufficientData(format!(
            "need {} bars for Chandelier stops, got {}",
            min_bars,
            bars.len()
        )));
    }

    let ch = chandelier_exit(bars, params.n, params.mult);
    let st = supertrend(bars, params.supertrend_n, params.supertrend_mult);

    let raw_stop = match direction {
        Direction::Buy => ch.long_stop.last().copied(),
        Direction::Sell => ch.short_stop.last().copied(),
    }
    .unwrap_or(f64::NAN);
    let st_value = st.line.last().copied().unwrap_or(f64::NAN);
    if raw_stop.is_nan() || st_value.is_nan() {
        return Err(AnalysisError::Undefined(
            "Chandelier or SuperTrend value undefined (insufficient warmup)".to_string(),
        ));
    }
    let trend_up = st.direction.last().is_some_and(|&d| d == 1);

    let raw_pct = match direction {
        Direction::Buy => (price - raw_stop) / price * 100.0,
        Direction::Sell => (raw_stop - price) / price * 100.0,
    };
    let sl_pct = raw_pct.clamp(params.min_sl_pct, params.max_sl_pct);
    let sl_rate = if sl_pct != raw_pct {
        stop_rate(price, sl_pct, direction)
    } else {
        raw_stop
    };

    Ok(StopRecommendation {
        sl_rate: round_to(sl_rate, 4),
        tp_rate: None,
        sl_pct: round_to(sl_pct, 2),
        tp_pct: None,
        method: StopMethod::Chandelier,
        trend_up: Some(trend_up),
        supertrend_value: Some(round_to(st_value, 4)),
    })
}
