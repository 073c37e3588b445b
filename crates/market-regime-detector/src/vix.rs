//! External volatility-index (VIX) feeds. The broker does not quote the
//! index, so it comes from public market-data endpoints.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

const YAHOO_VIX_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart/%5EVIX";
const FINNHUB_QUOTE_URL: &str = "https://finnhub.io/api/v1/quote";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);
const USER_AGENT: &str = "Mozilla/5.0";

/// Source of the current VIX level. `Ok(None)` means the source answered
/// without a usable value.
#[async_trait]
pub trait VolatilityFeed: Send + Sync {
    async fn current_vix(&self) -> Result<Option<f64>>;

    fn name(&self) -> &str;
}

fn http_client() -> Client {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Numbers sometimes arrive as strings
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

/// Pull the index level out of a Yahoo chart response: `regularMarketPrice`,
/// falling back to `previousClose` when the former is missing or zero.
pub fn parse_yahoo_chart(body: &Value) -> Option<f64> {
    let meta = body.get("chart")?.get("result")?.get(0)?.get("meta")?;
    let market = meta
        .get("regularMarketPrice")
        .and_then(as_number)
        .filter(|v| *v != 0.0);
    let price = market.or_else(|| meta.get("previousClose").and_then(as_number));
    positive(price)
}

/// Current price field `c` of a Finnhub quote
pub fn parse_finnhub_quote(body: &Value) -> Option<f64> {
    positive(body.get("c").and_then(as_number))
}

pub struct YahooVixFeed {
    client: Client,
}

impl YahooVixFeed {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }
}

impl Default for YahooVixFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VolatilityFeed for YahooVixFeed {
    async fn current_vix(&self) -> Result<Option<f64>> {
        let body: Value = self
            .client
            .get(YAHOO_VIX_URL)
            .query(&[("interval", "1d"), ("range", "1d")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let value = parse_yahoo_chart(&body);
        if value.is_none() {
            tracing::debug!("Yahoo chart response carried no usable VIX price");
        }
        Ok(value)
    }

    fn name(&self) -> &str {
        "yahoo"
    }
}

/// Finnhub quote feed; inert without an API key
pub struct FinnhubVixFeed {
    client: Client,
    api_key: String,
}

impl FinnhubVixFeed {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl VolatilityFeed for FinnhubVixFeed {
    async fn current_vix(&self) -> Result<Option<f64>> {
        if self.api_key.is_empty() {
            return Ok(None);
        }

        let body: Value = self
            .client
            .get(FINNHUB_QUOTE_URL)
            .query(&[("symbol", "CBOE:VIX"), ("token", self.api_key.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(parse_finnhub_quote(&body))
    }

    fn name(&self) -> &str {
        "finnhub"
    }
}

/// Tries each feed in order; the first positive value wins. Feed failures
/// are logged and skipped, so this feed itself never errors.
pub struct FallbackVolatilityFeed {
    feeds: Vec<Box<dyn VolatilityFeed>>,
}

impl FallbackVolatilityFeed {
    pub fn new(feeds: Vec<Box<dyn VolatilityFeed>>) -> Self {
        Self { feeds }
    }

    /// Yahoo first, then Finnhub when a key is configured
    pub fn standard(finnhub_api_key: &str) -> Self {
        let mut feeds: Vec<Box<dyn VolatilityFeed>> = vec![Box::new(YahooVixFeed::new())];
        if !finnhub_api_key.is_empty() {
            feeds.push(Box::new(FinnhubVixFeed::new(finnhub_api_key)));
        }
        Self::new(feeds)
    }
}

#[async_trait]
impl VolatilityFeed for FallbackVolatilityFeed {
    async fn current_vix(&self) -> Result<Option<f64>> {
        for feed in &self.feeds {
            match feed.current_vix().await {
                Ok(Some(value)) if value > 0.0 => {
                    tracing::debug!(feed = feed.name(), value, "VIX fetched");
                    return Ok(Some(value));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(feed = feed.name(), error = %e, "VIX fetch failed");
                }
            }
        }
        Ok(None)
    }

    fn name(&self) -> &str {
        "fallback"
    }
}
