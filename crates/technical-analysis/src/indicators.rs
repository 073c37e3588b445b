use analysis_core::stats::{nan_mean, std_dev};
use analysis_core::Bar;
use serde::{Deserialize, Serialize};

// Every series function returns a vector the same length as its input.
// Entries that cannot be computed yet (warmup, zero denominators, NaN input)
// are f64::NAN.

/// Exponentially weighted mean over a series that may contain NaN.
///
/// With `adjust` the weights are normalised by their running sum (bias
/// corrected); without it the recursion is the plain `y = (1-a)y + a x`
/// seeded by the first observation. NaN inputs decay the accumulated weight
/// but leave the value untouched. Output is NaN until `min_periods`
/// observations have been seen.
fn ewm_mean(data: &[f64], alpha: f64, adjust: bool, min_periods: usize) -> Vec<f64> {
    let min_periods = min_periods.max(1);
    let decay = 1.0 - alpha;
    let new_wt = if adjust { 1.0 } else { alpha };

    let mut out = Vec::with_capacity(data.len());
    let mut weighted = f64::NAN;
    let mut old_wt = 1.0;
    let mut nobs = 0usize;

    for &x in data {
        let observed = !x.is_nan();
        if observed {
            nobs += 1;
        }

        if weighted.is_nan() {
            if observed {
                weighted = x;
            }
        } else {
            old_wt *= decay;
            if observed {
                if weighted != x {
                    weighted = (old_wt * weighted + new_wt * x) / (old_wt + new_wt);
                }
                if adjust {
                    old_wt += new_wt;
                } else {
                    old_wt = 1.0;
                }
            }
        }

        out.push(if nobs >= min_periods { weighted } else { f64::NAN });
    }

    out
}

/// Wilder smoothing: exponential average with alpha = 1/period, undefined
/// until `period` observations exist.
pub fn wilder_smooth(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 {
        return vec![f64::NAN; data.len()];
    }
    ewm_mean(data, 1.0 / period as f64, true, period)
}

/// Apply `f` to each full trailing window; windows containing NaN yield NaN.
fn rolling<F>(data: &[f64], period: usize, f: F) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut out = vec![f64::NAN; data.len()];
    if period == 0 {
        return out;
    }
    for i in period - 1..data.len() {
        let window = &data[i + 1 - period..=i];
        if window.iter().any(|x| x.is_nan()) {
            continue;
        }
        out[i] = f(window);
    }
    out
}

/// Simple Moving Average
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    rolling(data, period, |w| w.iter().sum::<f64>() / w.len() as f64)
}

/// Rolling sample standard deviation
pub fn rolling_std(data: &[f64], period: usize) -> Vec<f64> {
    rolling(data, period, std_dev)
}

pub fn rolling_max(data: &[f64], period: usize) -> Vec<f64> {
    rolling(data, period, |w| w.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

pub fn rolling_min(data: &[f64], period: usize) -> Vec<f64> {
    rolling(data, period, |w| w.iter().copied().fold(f64::INFINITY, f64::min))
}

/// Exponential Moving Average, seeded by the first value and defined from
/// the first bar on.
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 {
        return vec![f64::NAN; data.len()];
    }
    ewm_mean(data, 2.0 / (period as f64 + 1.0), false, 0)
}

/// Relative Strength Index
///
/// Saturates at 100 when there are no losses in the averaging window. A
/// perfectly flat window (no gains, no losses) is undefined.
pub fn rsi(data: &[f64], period: usize) -> Vec<f64> {
    let mut gains = Vec::with_capacity(data.len());
    let mut losses = Vec::with_capacity(data.len());

    for i in 0..data.len() {
        let change = if i == 0 { f64::NAN } else { data[i] - data[i - 1] };
        gains.push(if change > 0.0 { change } else { 0.0 });
        losses.push(if change < 0.0 { -change } else { 0.0 });
    }

    let avg_gain = wilder_smooth(&gains, period);
    let avg_loss = wilder_smooth(&losses, period);

    avg_gain
        .iter()
        .zip(&avg_loss)
        .map(|(&g, &l)| {
            if g.is_nan() || l.is_nan() || (g == 0.0 && l == 0.0) {
                f64::NAN
            } else if l == 0.0 {
                100.0
            } else {
                100.0 - 100.0 / (1.0 + g / l)
            }
        })
        .collect()
}

/// MACD (Moving Average Convergence Divergence)
pub struct MacdResult {
    pub macd_line: Vec<f64>,
    pub signal_line: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(data: &[f64], fast_period: usize, slow_period: usize, signal_period: usize) -> MacdResult {
    let ema_fast = ema(data, fast_period);
    let ema_slow = ema(data, slow_period);

    let macd_line: Vec<f64> = ema_fast.iter().zip(&ema_slow).map(|(f, s)| f - s).collect();
    let signal_line = ema(&macd_line, signal_period);
    let histogram = macd_line.iter().zip(&signal_line).map(|(m, s)| m - s).collect();

    MacdResult {
        macd_line,
        signal_line,
        histogram,
    }
}

/// Bollinger Bands
pub struct BollingerBands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

pub fn bollinger_bands(data: &[f64], period: usize, std_dev: f64) -> BollingerBands {
    let middle = sma(data, period);
    let std = rolling_std(data, period);

    let upper = middle.iter().zip(&std).map(|(m, s)| m + std_dev * s).collect();
    let lower = middle.iter().zip(&std).map(|(m, s)| m - std_dev * s).collect();

    BollingerBands {
        upper,
        middle,
        lower,
    }
}

/// True range per bar. The first bar has no previous close and uses
/// high - low alone.
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            let high_low = bar.high - bar.low;
            if i == 0 {
                return high_low;
            }
            let prev_close = bars[i - 1].close;
            let high_close = (bar.high - prev_close).abs();
            let low_close = (bar.low - prev_close).abs();
            high_low.max(high_close).max(low_close)
        })
        .collect()
}

/// Average True Range (Wilder)
pub fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    wilder_smooth(&true_range(bars), period)
}

/// Stochastic Oscillator
pub struct StochasticResult {
    pub k: Vec<f64>,
    pub d: Vec<f64>,
}

pub fn stochastic(bars: &[Bar], k_period: usize, d_period: usize) -> StochasticResult {
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let highest = rolling_max(&highs, k_period);
    let lowest = rolling_min(&lows, k_period);

    let k: Vec<f64> = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            let range = highest[i] - lowest[i];
            if range == 0.0 {
                f64::NAN
            } else {
                100.0 * (bar.close - lowest[i]) / range
            }
        })
        .collect();

    let d = sma(&k, d_period);

    StochasticResult { k, d }
}

/// On-Balance Volume, starting from zero at the first bar
pub fn obv(bars: &[Bar]) -> Vec<f64> {
    let mut obv_values = Vec::with_capacity(bars.len());
    let mut running = 0.0;

    for i in 0..bars.len() {
        if i > 0 {
            let change = bars[i].close - bars[i - 1].close;
            if change > 0.0 {
                running += bars[i].volume;
            } else if change < 0.0 {
                running -= bars[i].volume;
            }
        }
        obv_values.push(running);
    }

    obv_values
}

/// Average Directional Index (ADX), measures trend strength (0-100)
pub struct AdxResult {
    pub adx: Vec<f64>,
    pub plus_di: Vec<f64>,
    pub minus_di: Vec<f64>,
}

pub fn adx(bars: &[Bar], period: usize) -> AdxResult {
    let mut plus_dm = Vec::with_capacity(bars.len());
    let mut minus_dm = Vec::with_capacity(bars.len());

    for i in 0..bars.len() {
        if i == 0 {
            plus_dm.push(0.0);
            minus_dm.push(0.0);
            continue;
        }
        let up_move = bars[i].high - bars[i - 1].high;
        let down_move = bars[i - 1].low - bars[i].low;

        plus_dm.push(if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 });
        minus_dm.push(if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 });
    }

    let atr_values = atr(bars, period);
    let smoothed_plus = wilder_smooth(&plus_dm, period);
    let smoothed_minus = wilder_smooth(&minus_dm, period);

    let plus_di: Vec<f64> = smoothed_plus
        .iter()
        .zip(&atr_values)
        .map(|(dm, tr)| 100.0 * dm / tr)
        .collect();
    let minus_di: Vec<f64> = smoothed_minus
        .iter()
        .zip(&atr_values)
        .map(|(dm, tr)| 100.0 * dm / tr)
        .collect();

    let dx: Vec<f64> = plus_di
        .iter()
        .zip(&minus_di)
        .map(|(p, m)| {
            let sum = p + m;
            if sum == 0.0 {
                f64::NAN
            } else {
                100.0 * (p - m).abs() / sum
            }
        })
        .collect();

    AdxResult {
        adx: wilder_smooth(&dx, period),
        plus_di,
        minus_di,
    }
}

/// Support and resistance levels from centered rolling extremes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportResistance {
    pub support_levels: Vec<f64>,
    pub resistance_levels: Vec<f64>,
    pub nearest_support: Option<f64>,
    pub nearest_resistance: Option<f64>,
}

/// Rolling extreme over a window centered on each bar. For window `w` the
/// bar at `i` covers `[i - w/2, i + (w-1)/2]` once shifted; partial windows
/// at either edge are NaN.
fn centered_rolling<F>(data: &[f64], window: usize, f: F) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut out = vec![f64::NAN; data.len()];
    if window == 0 {
        return out;
    }
    let offset = (window - 1) / 2;
    for (i, slot) in out.iter_mut().enumerate() {
        let end = i + 1 + offset;
        if end < window || end > data.len() {
            continue;
        }
        let slice = &data[end - window..end];
        if slice.iter().any(|x| x.is_nan()) {
            continue;
        }
        *slot = f(slice);
    }
    out
}

/// Distinct defined values, ascending
fn distinct_sorted(values: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| !x.is_nan()).collect();
    v.sort_by(|a, b| a.total_cmp(b));
    v.dedup();
    v
}

/// Merge levels within `tolerance` of each other. `levels` must be ordered
/// from most extreme to least; the first level of each cluster survives.
fn merge_levels(levels: impl Iterator<Item = f64>, tolerance: f64) -> Vec<f64> {
    let mut kept: Vec<f64> = Vec::new();
    for level in levels {
        match kept.last() {
            Some(&last) if last != 0.0 && ((level - last) / last).abs() <= tolerance => {}
            _ => kept.push(level),
        }
    }
    kept
}

pub fn support_resistance(bars: &[Bar], window: usize) -> SupportResistance {
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();

    let rolling_highs = distinct_sorted(&centered_rolling(&highs, window, |w| {
        w.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }));
    let rolling_lows = distinct_sorted(&centered_rolling(&lows, window, |w| {
        w.iter().copied().fold(f64::INFINITY, f64::min)
    }));

    // Top five highs, highest first, so a merge keeps the higher level
    let mut resistance_levels = merge_levels(rolling_highs.iter().rev().take(5).copied(), 0.02);
    resistance_levels.reverse();
    // Bottom five lows, lowest first, so a merge keeps the lower level
    let support_levels = merge_levels(rolling_lows.iter().take(5).copied(), 0.02);

    let (nearest_support, nearest_resistance) = match bars.last() {
        Some(last) => (
            support_levels.iter().copied().filter(|&s| s < last.close).reduce(f64::max),
            resistance_levels.iter().copied().filter(|&r| r > last.close).reduce(f64::min),
        ),
        None => (None, None),
    };

    SupportResistance {
        support_levels,
        resistance_levels,
        nearest_support,
        nearest_resistance,
    }
}

/// Chandelier Exit stop levels
pub struct ChandelierExit {
    /// highest_high(n) - mult * ATR(n)
    pub long_stop: Vec<f64>,
    /// lowest_low(n) + mult * ATR(n)
    pub short_stop: Vec<f64>,
}

pub fn chandelier_exit(bars: &[Bar], n: usize, mult: f64) -> ChandelierExit {
    let atr_values = atr(bars, n);
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();

    let long_stop = rolling_max(&highs, n)
        .iter()
        .zip(&atr_values)
        .map(|(h, a)| h - mult * a)
        .collect();
    let short_stop = rolling_min(&lows, n)
        .iter()
        .zip(&atr_values)
        .map(|(l, a)| l + mult * a)
        .collect();

    ChandelierExit {
        long_stop,
        short_stop,
    }
}

/// SuperTrend line and direction (+1 bullish, -1 bearish)
pub struct SuperTrend {
    pub line: Vec<f64>,
    pub direction: Vec<i8>,
}

pub fn supertrend(bars: &[Bar], n: usize, mult: f64) -> SuperTrend {
    let atr_values = atr(bars, n);
    let len = bars.len();

    let mut upper: Vec<f64> = Vec::with_capacity(len);
    let mut lower: Vec<f64> = Vec::with_capacity(len);
    for (bar, a) in bars.iter().zip(&atr_values) {
        let hl2 = (bar.high + bar.low) / 2.0;
        upper.push(hl2 + mult * a);
        lower.push(hl2 - mult * a);
    }

    let mut direction = vec![1i8; len];

    for i in 1..len {
        if upper[i].is_nan() || lower[i].is_nan() {
            direction[i] = direction[i - 1];
            continue;
        }
        let prev_close = bars[i - 1].close;

        // Upper band only tightens unless the prior close broke above it
        let prev_upper = if upper[i - 1].is_nan() { upper[i] } else { upper[i - 1] };
        if !(upper[i] < prev_upper || prev_close > prev_upper) {
            upper[i] = prev_upper;
        }

        // Lower band only tightens unless the prior close broke below it
        let prev_lower = if lower[i - 1].is_nan() { lower[i] } else { lower[i - 1] };
        if !(lower[i] > prev_lower || prev_close < prev_lower) {
            lower[i] = prev_lower;
        }

        let close = bars[i].close;
        direction[i] = if direction[i - 1] == -1 {
            if close > upper[i] { 1 } else { -1 }
        } else if close < lower[i] {
            -1
        } else {
            1
        };
    }

    let line = direction
        .iter()
        .enumerate()
        .map(|(i, &d)| if d == 1 { lower[i] } else { upper[i] })
        .collect();

    SuperTrend { line, direction }
}

/// Relative volume of the last bar against the mean of the preceding
/// `lookback` bars (or every earlier bar when fewer exist).
pub fn rvol(bars: &[Bar], lookback: usize) -> f64 {
    if bars.len() < 2 {
        return f64::NAN;
    }
    let last = bars.len() - 1;
    let current = bars[last].volume;
    let start = if bars.len() > lookback { last - lookback } else { 0 };

    let history: Vec<f64> = bars[start..last].iter().map(|b| b.volume).collect();
    let average = nan_mean(&history);
    if average == 0.0 || average.is_nan() || current.is_nan() {
        return f64::NAN;
    }
    current / average
}

/// Stacking of price and moving averages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaAlignmentStatus {
    Golden,
    Death,
    MostlyBullish,
    MostlyBearish,
    Mixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaAlignment {
    pub status: MaAlignmentStatus,
    pub bullish_layers: u8,
    pub bearish_layers: u8,
    pub price_above_ema21: bool,
    pub ema21_above_sma50: bool,
    pub sma50_above_sma200: bool,
}

/// Classify price > EMA21 > SMA50 > SMA200 stacking. A missing SMA200 makes
/// every comparison against it false.
pub fn ma_alignment(price: f64, ema_21: f64, sma_50: f64, sma_200: Option<f64>) -> MaAlignment {
    let sma_200 = sma_200.unwrap_or(f64::NAN);

    let bull = [price > ema_21, ema_21 > sma_50, sma_50 > sma_200];
    let bear = [price < ema_21, ema_21 < sma_50, sma_50 < sma_200];
    let bullish_layers = bull.iter().filter(|&&b| b).count() as u8;
    let bearish_layers = bear.iter().filter(|&&b| b).count() as u8;

    let status = if bullish_layers == 3 {
        MaAlignmentStatus::Golden
    } else if bearish_layers == 3 {
        MaAlignmentStatus::Death
    } else if bullish_layers >= 2 {
        MaAlignmentStatus::MostlyBullish
    } else if bearish_layers >= 2 {
        MaAlignmentStatus::MostlyBearish
    } else {
        MaAlignmentStatus::Mixed
    };

    MaAlignment {
        status,
        bullish_layers,
        bearish_layers,
        price_above_ema21: bull[0],
        ema21_above_sma50: bull[1],
        sma50_above_sma200: bull[2],
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FibonacciLevel {
    pub label: String,
    pub ratio: f64,
    pub price: f64,
}

const FIB_RATIOS: [(&str, f64); 7] = [
    ("0.0%", 0.0),
    ("23.6%", 0.236),
    ("38.2%", 0.382),
    ("50.0%", 0.5),
    ("61.8%", 0.618),
    ("78.6%", 0.786),
    ("100.0%", 1.0),
];

/// Retracement levels measured down from `high`
pub fn fibonacci_retracement(high: f64, low: f64) -> Vec<FibonacciLevel> {
    let diff = high - low;
    FIB_RATIOS
        .iter()
        .map(|&(label, ratio)| FibonacciLevel {
            label: label.to_string(),
            ratio,
            price: high - ratio * diff,
        })
        .collect()
}
