use anyhow::{anyhow, Context, Result};
use broker_trait::TradingMode;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

use crate::models::RiskLimits;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Preset name the limits started from
    pub profile: String,
    pub limits: RiskLimits,
    /// Account the daily-loss aggregate is read for
    pub trading_mode: TradingMode,
    /// Enables the Finnhub volatility feed when non-empty
    pub finnhub_api_key: String,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            profile: "default".to_string(),
            limits: RiskLimits::default(),
            trading_mode: TradingMode::Demo,
            finnhub_api_key: String::new(),
        }
    }
}

impl RiskConfig {
    /// Load from the process environment (after reading `.env` if present).
    ///
    /// `RISK_PROFILE` picks the preset; the individual limit variables
    /// override single fields of it.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let profile = env::var("RISK_PROFILE").unwrap_or_else(|_| "default".to_string());
        let mut limits = RiskLimits::from_profile(&profile)
            .ok_or_else(|| anyhow!("RISK_PROFILE '{}' is not one of default|conservative|aggressive", profile))?;

        override_from_env("MAX_POSITION_PCT", &mut limits.max_position_pct)?;
        override_from_env("MAX_TOTAL_EXPOSURE_PCT", &mut limits.max_total_exposure_pct)?;
        override_from_env("MAX_DAILY_LOSS_PCT", &mut limits.max_daily_loss_pct)?;
        override_from_env("MAX_SINGLE_TRADE_USD", &mut limits.max_single_trade_usd)?;
        override_from_env("MIN_TRADE_USD", &mut limits.min_trade_usd)?;
        override_from_env("MAX_OPEN_POSITIONS", &mut limits.max_open_positions)?;
        override_from_env("DEFAULT_STOP_LOSS_PCT", &mut limits.default_stop_loss_pct)?;
        override_from_env("DEFAULT_TAKE_PROFIT_PCT", &mut limits.default_take_profit_pct)?;
        override_from_env("MAX_LEVERAGE", &mut limits.max_leverage)?;

        let config = Self {
            profile,
            limits,
            trading_mode: env::var("TRADING_MODE")
                .unwrap_or_else(|_| "demo".to_string())
                .parse::<TradingMode>()
                .context("TRADING_MODE")?,
            finnhub_api_key: env::var("FINNHUB_API_KEY").unwrap_or_default(),
        };

        tracing::debug!(
            profile = %config.profile,
            mode = %config.trading_mode,
            "risk config loaded"
        );
        Ok(config)
    }
}

fn override_from_env<T>(key: &str, field: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Ok(raw) = env::var(key) {
        *field = raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: '{}'", key, raw))?;
    }
    Ok(())
}
