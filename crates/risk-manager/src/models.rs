use serde::{Deserialize, Serialize};

/// Hard limits applied by the admission check. Fractions are 0-1, stop
/// and take-profit defaults are percentages of price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_position_pct: f64,
    pub max_total_exposure_pct: f64,
    pub max_daily_loss_pct: f64,
    pub max_single_trade_usd: f64,
    pub min_trade_usd: f64,
    pub max_open_positions: usize,
    pub default_stop_loss_pct: f64,
    pub default_take_profit_pct: f64,
    pub max_leverage: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_pct: 0.10,
            max_total_exposure_pct: 0.90,
            max_daily_loss_pct: 0.03,
            max_single_trade_usd: 1000.0,
            min_trade_usd: 10.0,
            max_open_positions: 20,
            default_stop_loss_pct: 5.0,
            default_take_profit_pct: 15.0,
            max_leverage: 1.0,
        }
    }
}

impl RiskLimits {
    pub fn conservative() -> Self {
        Self::default()
    }

    /// Medium/high risk, still unleveraged. `max_single_trade_usd` sits well
    /// above what the sizer produces for realistic accounts.
    pub fn aggressive() -> Self {
        Self {
            max_position_pct: 0.20,
            max_total_exposure_pct: 0.95,
            max_daily_loss_pct: 0.05,
            max_single_trade_usd: 5000.0,
            min_trade_usd: 50.0,
            default_stop_loss_pct: 8.0,
            default_take_profit_pct: 20.0,
            ..Self::default()
        }
    }

    /// Preset by name (`default`, `conservative` or `aggressive`)
    pub fn from_profile(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "default" | "conservative" => Some(Self::conservative()),
            "aggressive" => Some(Self::aggressive()),
            _ => None,
        }
    }
}

/// Outcome of an admission check. A rejection is a normal result, not an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskCheckResult {
    pub passed: bool,
    pub violations: Vec<String>,
    pub warnings: Vec<String>,
}

impl RiskCheckResult {
    pub fn new(violations: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
            warnings,
        }
    }

    pub fn summary(&self) -> String {
        if self.passed {
            let mut msg = "PASSED".to_string();
            if !self.warnings.is_empty() {
                msg.push_str(&format!(" with {} warning(s)", self.warnings.len()));
            }
            return msg;
        }
        format!("REJECTED: {}", self.violations.join("; "))
    }
}
