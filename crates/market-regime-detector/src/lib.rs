pub mod vix;

use std::sync::Arc;

use analysis_core::stats::round_to;
use analysis_core::Timeframe;
use anyhow::{anyhow, Result};
use broker_trait::MarketDataSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use technical_analysis::{analyze_instrument, InstrumentAnalysis, MaAlignmentStatus, Trend};

pub use vix::{
    parse_finnhub_quote, parse_yahoo_chart, FallbackVolatilityFeed, FinnhubVixFeed,
    VolatilityFeed, YahooVixFeed,
};

/// Daily bars fetched per index (enough for a 200-day SMA)
const INDEX_BARS: usize = 220;

/// VIX at or above this level no longer counts toward a bullish score
const ELEVATED_VIX: f64 = 25.0;

/// VIX bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolatilityRegime {
    VeryLow,
    Low,
    Normal,
    Elevated,
    High,
    Extreme,
    /// No feed returned a value
    Unknown,
}

impl VolatilityRegime {
    /// Bucket a VIX level (upper bounds are exclusive)
    pub fn from_value(vix: f64) -> Self {
        if vix < 13.0 {
            VolatilityRegime::VeryLow
        } else if vix < 16.0 {
            VolatilityRegime::Low
        } else if vix < 20.0 {
            VolatilityRegime::Normal
        } else if vix < ELEVATED_VIX {
            VolatilityRegime::Elevated
        } else if vix < 30.0 {
            VolatilityRegime::High
        } else {
            VolatilityRegime::Extreme
        }
    }

    /// Multiplier for new position sizes
    pub fn sizing_adjustment(&self) -> f64 {
        match self {
            VolatilityRegime::VeryLow | VolatilityRegime::Low | VolatilityRegime::Normal => 1.0,
            VolatilityRegime::Elevated => 0.75,
            VolatilityRegime::High => 0.5,
            VolatilityRegime::Extreme => 0.25,
            // Unknown volatility is never treated as calm
            VolatilityRegime::Unknown => 0.75,
        }
    }

    pub fn guidance(&self) -> &'static str {
        match self {
            VolatilityRegime::VeryLow => {
                "Complacency: low hedging. Good for longs but watch for spikes."
            }
            VolatilityRegime::Low => "Calm market. Standard position sizes.",
            VolatilityRegime::Normal => "Normal volatility. Standard position sizes.",
            VolatilityRegime::Elevated => "Elevated risk. Reduce position sizes by 25%.",
            VolatilityRegime::High => {
                "High fear. Reduce position sizes by 50%. Avoid new longs unless oversold bounce."
            }
            VolatilityRegime::Extreme => {
                "Panic/crisis. Minimal new positions. Focus on capital preservation."
            }
            VolatilityRegime::Unknown => "VIX unavailable; sizing reduced until volatility is known.",
        }
    }
}

/// VIX interpretation; always present in a report, even when no feed answered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VixReading {
    pub value: Option<f64>,
    pub regime: VolatilityRegime,
    pub guidance: String,
    pub sizing_adjustment: f64,
}

impl VixReading {
    pub fn from_value(value: Option<f64>) -> Self {
        let regime = value
            .map(VolatilityRegime::from_value)
            .unwrap_or(VolatilityRegime::Unknown);
        Self {
            value: value.map(|v| round_to(v, 2)),
            regime,
            guidance: regime.guidance().to_string(),
            sizing_adjustment: regime.sizing_adjustment(),
        }
    }

    /// Known and below the elevated threshold
    pub fn is_calm(&self) -> bool {
        self.value.is_some_and(|v| v < ELEVATED_VIX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketBias {
    RiskOn,
    Cautious,
    RiskOff,
    Unknown,
}

impl MarketBias {
    pub fn from_score(bull_score: u8) -> Self {
        match bull_score {
            s if s >= 4 => MarketBias::RiskOn,
            s if s >= 2 => MarketBias::Cautious,
            _ => MarketBias::RiskOff,
        }
    }

    pub fn guidance(&self) -> &'static str {
        match self {
            MarketBias::RiskOn => "Favorable for swing longs. Full position sizes.",
            MarketBias::Cautious => "Mixed signals. Reduce sizes, focus on strongest setups only.",
            MarketBias::RiskOff => {
                "Unfavorable for longs. Defensive positioning, consider sitting out."
            }
            MarketBias::Unknown => "Market data unavailable; cannot determine regime.",
        }
    }
}

/// Trend snapshot of one broad-market index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSummary {
    pub price: f64,
    pub trend: Trend,
    pub rsi: Option<f64>,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub above_sma20: bool,
    pub above_sma50: bool,
    pub ma_alignment: MaAlignmentStatus,
    pub rvol: Option<f64>,
}

impl From<&InstrumentAnalysis> for IndexSummary {
    fn from(analysis: &InstrumentAnalysis) -> Self {
        Self {
            price: analysis.price,
            trend: analysis.trend,
            rsi: analysis.rsi,
            sma_20: analysis.sma_20,
            sma_50: analysis.sma_50,
            above_sma20: analysis.above_sma20(),
            above_sma50: analysis.above_sma50(),
            ma_alignment: analysis.ma_alignment.status,
            rvol: analysis.rvol,
        }
    }
}

/// Broad-market weather check run before individual stock analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketRegimeReport {
    pub spy: Option<IndexSummary>,
    pub qqq: Option<IndexSummary>,
    pub vix: VixReading,
    pub bias: MarketBias,
    pub bias_guidance: String,
    /// Absent when neither index could be analysed
    pub bull_score: Option<u8>,
    /// Mirrors `vix.sizing_adjustment`
    pub sizing_adjustment: f64,
    pub errors: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// Score the regime from already-fetched inputs.
///
/// Bias is UNKNOWN only when both indices are missing. Otherwise one point
/// each for: primary index bullish, secondary index bullish, primary above
/// SMA20, primary above SMA50, VIX known and below the elevated level.
pub fn classify_regime(
    spy: Option<IndexSummary>,
    qqq: Option<IndexSummary>,
    vix_value: Option<f64>,
    mut errors: Vec<String>,
) -> MarketRegimeReport {
    let vix = VixReading::from_value(vix_value);
    if vix.value.is_none() {
        errors.push("VIX: Could not fetch from external sources".to_string());
    }

    let (bias, bull_score) = if spy.is_none() && qqq.is_none() {
        tracing::error!(errors = ?errors, "market regime unavailable: both indices failed");
        (MarketBias::Unknown, None)
    } else {
        let spy_bull = spy.as_ref().is_some_and(|s| s.trend == Trend::Bullish);
        let qqq_bull = qqq.as_ref().is_some_and(|s| s.trend == Trend::Bullish);
        let spy_above_20 = spy.as_ref().is_some_and(|s| s.above_sma20);
        let spy_above_50 = spy.as_ref().is_some_and(|s| s.above_sma50);

        let score = [spy_bull, qqq_bull, spy_above_20, spy_above_50, vix.is_calm()]
            .iter()
            .filter(|&&b| b)
            .count() as u8;
        (MarketBias::from_score(score), Some(score))
    };

    MarketRegimeReport {
        spy,
        qqq,
        sizing_adjustment: vix.sizing_adjustment,
        vix,
        bias,
        bias_guidance: bias.guidance().to_string(),
        bull_score,
        errors,
        generated_at: Utc::now(),
    }
}

/// Fetches the two indices and the VIX, then scores the regime
pub struct MarketRegimeClassifier {
    market: Arc<dyn MarketDataSource>,
    volatility: Arc<dyn VolatilityFeed>,
    primary_symbol: String,
    secondary_symbol: String,
}

impl MarketRegimeClassifier {
    pub fn new(market: Arc<dyn MarketDataSource>, volatility: Arc<dyn VolatilityFeed>) -> Self {
        Self {
            market,
            volatility,
            primary_symbol: "SPY".to_string(),
            secondary_symbol: "QQQ".to_string(),
        }
    }

    /// Override the index pair (primary drives the moving-average points)
    pub fn with_indices(mut self, primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        self.primary_symbol = primary.into();
        self.secondary_symbol = secondary.into();
        self
    }

    async fn analyze_index(&self, symbol: &str) -> Result<IndexSummary> {
        let instrument = self
            .market
            .resolve_symbol(symbol)
            .await?
            .ok_or_else(|| anyhow!("Instrument '{}' not found", symbol))?;

        let bars = self
            .market
            .get_candles(instrument.instrument_id, Timeframe::Day1, INDEX_BARS)
            .await?;
        let quote = match self.market.get_rate(instrument.instrument_id).await {
            Ok(q) => q,
            Err(e) => {
                tracing::debug!(symbol = %symbol, error = %e, "no live quote, using last close");
                None
            }
        };

        let analysis = analyze_instrument(symbol, &bars, quote.as_ref(), true)?;
        Ok(IndexSummary::from(&analysis))
    }

    async fn fetch_vix(&self) -> Option<f64> {
        match self.volatility.current_vix().await {
            Ok(value) => value.filter(|v| *v > 0.0),
            Err(e) => {
                tracing::warn!(feed = self.volatility.name(), error = %e, "VIX fetch failed");
                None
            }
        }
    }

    pub async fn analyze_market_regime(&self) -> MarketRegimeReport {
        let mut errors = Vec::new();

        let spy = match self.analyze_index(&self.primary_symbol).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                errors.push(format!("{}: {}", self.primary_symbol, e));
                None
            }
        };
        let qqq = match self.analyze_index(&self.secondary_symbol).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                errors.push(format!("{}: {}", self.secondary_symbol, e));
                None
            }
        };
        let vix = self.fetch_vix().await;

        let report = classify_regime(spy, qqq, vix, errors);
        tracing::info!(
            bias = ?report.bias,
            bull_score = ?report.bull_score,
            vix = ?report.vix.value,
            sizing_adjustment = report.sizing_adjustment,
            "market regime classified"
        );
        report
    }
}
