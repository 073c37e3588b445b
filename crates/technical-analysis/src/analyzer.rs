use analysis_core::stats::{defined, round_to};
use analysis_core::{ensure_time_ordered, AnalysisError, Bar, RateQuote};
use serde::{Deserialize, Serialize};

use crate::indicators::*;

/// Majority direction of an instrument's signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalBias {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub description: String,
    pub bias: SignalBias,
}

impl Signal {
    fn new(description: impl Into<String>, bias: SignalBias) -> Self {
        Self {
            description: description.into(),
            bias,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacdSnapshot {
    pub line: Option<f64>,
    pub signal: Option<f64>,
    pub histogram: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BollingerSnapshot {
    pub upper: Option<f64>,
    pub middle: Option<f64>,
    pub lower: Option<f64>,
}

/// Latest Chandelier Exit and SuperTrend values, present only when all of
/// them are defined
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChandelierSnapshot {
    pub long_stop: f64,
    pub short_stop: f64,
    pub trend_up: bool,
    pub supertrend: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendedIndicators {
    pub stochastic_k: Option<f64>,
    pub stochastic_d: Option<f64>,
    pub adx: Option<f64>,
    pub obv: Option<f64>,
    pub support_resistance: SupportResistance,
    pub fibonacci: Vec<FibonacciLevel>,
}

/// Indicator bundle for one instrument at the latest bar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentAnalysis {
    pub symbol: String,
    pub price: f64,
    pub spread_pct: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: MacdSnapshot,
    pub bollinger: BollingerSnapshot,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub ema_8: Option<f64>,
    pub ema_12: Option<f64>,
    pub ema_21: Option<f64>,
    pub ema_26: Option<f64>,
    pub sma_200: Option<f64>,
    pub rvol: Option<f64>,
    pub ma_alignment: MaAlignment,
    pub gap_pct: Option<f64>,
    pub atr: Option<f64>,
    pub chandelier: Option<ChandelierSnapshot>,
    pub trend: Trend,
    pub signals: Vec<Signal>,
    pub extended: Option<ExtendedIndicators>,
}

impl InstrumentAnalysis {
    pub fn above_sma20(&self) -> bool {
        self.sma_20.is_some_and(|s| self.price > s)
    }

    pub fn above_sma50(&self) -> bool {
        self.sma_50.is_some_and(|s| self.price > s)
    }
}

fn last(series: &[f64]) -> f64 {
    series.last().copied().unwrap_or(f64::NAN)
}

fn classify_trend(signals: &[Signal]) -> Trend {
    let bullish = signals.iter().filter(|s| s.bias == SignalBias::Bullish).count();
    let bearish = signals.iter().filter(|s| s.bias == SignalBias::Bearish).count();
    if bullish > bearish {
        Trend::Bullish
    } else if bearish > bullish {
        Trend::Bearish
    } else {
        Trend::Neutral
    }
}

fn chandelier_snapshot(bars: &[Bar]) -> Option<ChandelierSnapshot> {
    let ch = chandelier_exit(bars, 22, 3.0);
    let st = supertrend(bars, 14, 3.0);
    Some(ChandelierSnapshot {
        long_stop: defined(last(&ch.long_stop))?,
        short_stop: defined(last(&ch.short_stop))?,
        trend_up: *st.direction.last()? == 1,
        supertrend: defined(last(&st.line))?,
    })
}

/// Compute the indicator bundle and signal list for one instrument.
///
/// The current price is the quote mid when a quote is supplied, otherwise
/// the last close. `extended` adds stochastic, ADX, OBV, support/resistance
/// and Fibonacci levels, whose signals also count toward the trend.
pub fn analyze_instrument(
    symbol: &str,
    bars: &[Bar],
    quote: Option<&RateQuote>,
    extended: bool,
) -> Result<InstrumentAnalysis, AnalysisError> {
    let Some(last_bar) = bars.last() else {
        return Err(AnalysisError::InsufficientData(format!(
            "No candle data available for {}",
            symbol
        )));
    };
    ensure_time_ordered(bars)?;

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let last_close = last_bar.close;
    let price = quote.map(|q| q.mid()).unwrap_or(last_close);
    let mut signals: Vec<Signal> = Vec::new();

    let rsi_val = last(&rsi(&closes, 14));
    let macd_result = macd(&closes, 12, 26, 9);
    let bb = bollinger_bands(&closes, 20, 2.0);
    let atr_val = last(&atr(bars, 14));
    let sma_20 = last(&sma(&closes, 20));
    let sma_50 = last(&sma(&closes, 50));
    let ema_8 = last(&ema(&closes, 8));
    let ema_12 = last(&ema(&closes, 12));
    let ema_21 = last(&ema(&closes, 21));
    let ema_26 = last(&ema(&closes, 26));
    let sma_200 = if closes.len() >= 200 { defined(last(&sma(&closes, 200))) } else { None };
    let rvol_val = defined(rvol(bars, 30));
    let alignment = ma_alignment(price, ema_21, sma_50, sma_200);
    let gap_pct = (last_close != 0.0).then(|| round_to((price - last_close) / last_close * 100.0, 2));

    // RSI
    if rsi_val < 30.0 {
        signals.push(Signal::new("RSI oversold (bullish)", SignalBias::Bullish));
    } else if rsi_val > 70.0 {
        signals.push(Signal::new("RSI overbought (bearish)", SignalBias::Bearish));
    }

    // MACD histogram crossing zero
    let hist = &macd_result.histogram;
    if hist.len() >= 2 {
        let (prev, cur) = (hist[hist.len() - 2], hist[hist.len() - 1]);
        if cur > 0.0 && prev <= 0.0 {
            signals.push(Signal::new("MACD bullish crossover", SignalBias::Bullish));
        } else if cur < 0.0 && prev >= 0.0 {
            signals.push(Signal::new("MACD bearish crossover", SignalBias::Bearish));
        }
    }

    // Bollinger Bands
    if price < last(&bb.lower) {
        signals.push(Signal::new("Price below lower BB (oversold)", SignalBias::Bullish));
    } else if price > last(&bb.upper) {
        signals.push(Signal::new("Price above upper BB (overbought)", SignalBias::Bearish));
    }

    // Moving averages
    if !sma_20.is_nan() && !sma_50.is_nan() {
        if sma_20 > sma_50 {
            signals.push(Signal::new("SMA20 > SMA50 (bullish)", SignalBias::Bullish));
        } else {
            signals.push(Signal::new("SMA20 < SMA50 (bearish)", SignalBias::Bearish));
        }
    }

    match alignment.status {
        MaAlignmentStatus::Golden => {
            signals.push(Signal::new("Golden MA alignment (bullish)", SignalBias::Bullish))
        }
        MaAlignmentStatus::Death => {
            signals.push(Signal::new("Death MA alignment (bearish)", SignalBias::Bearish))
        }
        _ => {}
    }

    // Relative volume
    if let Some(rv) = rvol_val {
        if rv >= 2.0 {
            signals.push(Signal::new(format!("RVOL {:.1}x very high volume", rv), SignalBias::Neutral));
        } else if rv >= 1.5 {
            signals.push(Signal::new(format!("RVOL {:.1}x above average volume", rv), SignalBias::Neutral));
        } else if rv < 0.5 {
            signals.push(Signal::new(
                format!("RVOL {:.1}x low volume (weak conviction)", rv),
                SignalBias::Neutral,
            ));
        }
    }

    // Gap between live price and last close
    if let Some(gap) = gap_pct.filter(|g| g.abs() >= 1.0) {
        let way = if gap > 0.0 { "up" } else { "down" };
        signals.push(Signal::new(format!("Gap {} {:.1}%", way, gap.abs()), SignalBias::Neutral));
    }

    let extended = if extended {
        let stoch = stochastic(bars, 14, 3);
        let stoch_k = last(&stoch.k);
        let adx_val = last(&adx(bars, 14).adx);

        if stoch_k < 20.0 {
            signals.push(Signal::new("Stochastic oversold (bullish)", SignalBias::Bullish));
        } else if stoch_k > 80.0 {
            signals.push(Signal::new("Stochastic overbought (bearish)", SignalBias::Bearish));
        }

        if adx_val > 25.0 {
            signals.push(Signal::new(format!("ADX {:.0} strong trend", adx_val), SignalBias::Neutral));
        } else if !adx_val.is_nan() {
            signals.push(Signal::new(format!("ADX {:.0} weak trend", adx_val), SignalBias::Neutral));
        }

        let period_high = bars.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let period_low = bars.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);

        Some(ExtendedIndicators {
            stochastic_k: defined(stoch_k),
            stochastic_d: defined(last(&stoch.d)),
            adx: defined(adx_val),
            obv: defined(last(&obv(bars))),
            support_resistance: support_resistance(bars, 20),
            fibonacci: fibonacci_retracement(period_high, period_low),
        })
    } else {
        None
    };

    let trend = classify_trend(&signals);
    tracing::debug!(
        symbol = %symbol,
        bars = bars.len(),
        price,
        trend = ?trend,
        signals = signals.len(),
        "instrument analysed"
    );

    Ok(InstrumentAnalysis {
        symbol: symbol.to_string(),
        price,
        spread_pct: quote.map(|q| q.spread_pct()),
        rsi: defined(rsi_val),
        macd: MacdSnapshot {
            line: defined(last(&macd_result.macd_line)),
            signal: defined(last(&macd_result.signal_line)),
            histogram: defined(last(&macd_result.histogram)),
        },
        bollinger: BollingerSnapshot {
            upper: defined(last(&bb.upper)),
            middle: defined(last(&bb.middle)),
            lower: defined(last(&bb.lower)),
        },
        sma_20: defined(sma_20),
        sma_50: defined(sma_50),
        ema_8: defined(ema_8),
        ema_12: defined(ema_12),
        ema_21: defined(ema_21),
        ema_26: defined(ema_26),
        sma_200,
        rvol: rvol_val,
        ma_alignment: alignment,
        gap_pct,
        atr: defined(atr_val),
        chandelier: chandelier_snapshot(bars),
        trend,
        signals,
        extended,
    })
}
