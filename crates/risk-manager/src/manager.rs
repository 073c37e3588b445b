use std::sync::Arc;

use analysis_core::Direction;
use broker_trait::{PortfolioSource, TradeLogSink, TradingMode};

use crate::models::*;

/// Exposure above which a warning is attached even when the hard cap allows it
const HIGH_EXPOSURE_WARNING: f64 = 0.80;

/// Rule-based admission check run before every new position
pub struct RiskManager {
    portfolio: Arc<dyn PortfolioSource>,
    trade_log: Arc<dyn TradeLogSink>,
    mode: TradingMode,
}

impl RiskManager {
    pub fn new(
        portfolio: Arc<dyn PortfolioSource>,
        trade_log: Arc<dyn TradeLogSink>,
        mode: TradingMode,
    ) -> Self {
        Self {
            portfolio,
            trade_log,
            mode,
        }
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    pub(crate) fn portfolio(&self) -> &Arc<dyn PortfolioSource> {
        &self.portfolio
    }

    /// Check a prospective trade against `limits`.
    ///
    /// Every rule is evaluated and collected; nothing short-circuits except a
    /// failed portfolio fetch, which skips the portfolio-dependent rules and
    /// leaves a warning instead.
    pub async fn check_trade(
        &self,
        symbol: &str,
        amount: f64,
        direction: Direction,
        leverage: f64,
        limits: &RiskLimits,
    ) -> RiskCheckResult {
        let mut violations = Vec::new();
        let mut warnings = Vec::new();

        // Trade size
        if amount < limits.min_trade_usd {
            violations.push(format!(
                "Amount ${} below minimum ${}",
                amount, limits.min_trade_usd
            ));
        }
        if amount > limits.max_single_trade_usd {
            violations.push(format!(
                "Amount ${} exceeds maximum ${}",
                amount, limits.max_single_trade_usd
            ));
        }

        if leverage > limits.max_leverage {
            violations.push(format!(
                "Leverage {}x exceeds maximum {}x",
                leverage, limits.max_leverage
            ));
        }

        let portfolio = match self.portfolio.get_portfolio().await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "portfolio fetch failed, skipping portfolio checks");
                warnings.push(format!("Could not fetch portfolio for risk check: {}", e));
                return RiskCheckResult::new(violations, warnings);
            }
        };

        if portfolio.positions.len() >= limits.max_open_positions {
            violations.push(format!(
                "Already at max positions ({}/{})",
                portfolio.positions.len(),
                limits.max_open_positions
            ));
        }

        let total_value = portfolio.total_value();
        if total_value > 0.0 {
            let new_exposure = (portfolio.total_invested + amount) / total_value;
            if new_exposure > limits.max_total_exposure_pct {
                violations.push(format!(
                    "Total exposure would be {:.1}% (max {:.0}%)",
                    new_exposure * 100.0,
                    limits.max_total_exposure_pct * 100.0
                ));
            }
            if new_exposure > HIGH_EXPOSURE_WARNING {
                warnings.push(format!("High exposure: {:.1}% of portfolio", new_exposure * 100.0));
            }

            let position_pct = amount / total_value;
            if position_pct > limits.max_position_pct {
                violations.push(format!(
                    "Position would be {:.1}% of portfolio (max {:.0}%)",
                    position_pct * 100.0,
                    limits.max_position_pct * 100.0
                ));
            }
        }

        // Daily loss is best-effort: a log failure never blocks a trade
        match self.trade_log.realized_pnl_today(self.mode).await {
            Ok(daily_pnl) if total_value > 0.0 && daily_pnl < 0.0 => {
                let daily_loss_pct = daily_pnl.abs() / total_value;
                if daily_loss_pct >= limits.max_daily_loss_pct {
                    violations.push(format!(
                        "Daily loss {:.1}% exceeds limit {:.0}%",
                        daily_loss_pct * 100.0,
                        limits.max_daily_loss_pct * 100.0
                    ));
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "daily loss lookup failed, check skipped");
            }
        }

        if leverage > 1.0 {
            warnings.push("Leveraged position: overnight fees will apply".to_string());
        }
        if direction == Direction::Sell {
            warnings.push("Short position: overnight fees will apply (CFD)".to_string());
        }

        let result = RiskCheckResult::new(violations, warnings);
        tracing::info!(
            symbol = %symbol,
            amount,
            direction = %direction,
            passed = result.passed,
            "risk check: {}",
            result.summary()
        );
        result
    }
}
