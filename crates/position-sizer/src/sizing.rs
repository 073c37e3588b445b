use std::fmt;

use analysis_core::stats::round_to;
use analysis_core::AnalysisError;
use serde::{Deserialize, Serialize};

use crate::stops::{check_bounds, is_positive};

/// Qualitative confidence tier behind a trade idea
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Conviction {
    Strong,
    Moderate,
    Weak,
}

impl Conviction {
    /// Parse a conviction label. Unrecognised labels fall back to moderate.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "strong" => Conviction::Strong,
            "weak" => Conviction::Weak,
            _ => Conviction::Moderate,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Conviction::Strong => "strong",
            Conviction::Moderate => "moderate",
            Conviction::Weak => "weak",
        }
    }
}

impl fmt::Display for Conviction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk budget and concentration cap, both as fractions of portfolio value
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConvictionParams {
    pub risk_pct: f64,
    pub max_concentration_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvictionTable {
    pub strong: ConvictionParams,
    pub moderate: ConvictionParams,
    pub weak: ConvictionParams,
}

impl Default for ConvictionTable {
    fn default() -> Self {
        Self {
            strong: ConvictionParams { risk_pct: 0.02, max_concentration_pct: 0.08 },
            moderate: ConvictionParams { risk_pct: 0.015, max_concentration_pct: 0.05 },
            weak: ConvictionParams { risk_pct: 0.01, max_concentration_pct: 0.03 },
        }
    }
}

impl ConvictionTable {
    pub fn get(&self, conviction: Conviction) -> ConvictionParams {
        match conviction {
            Conviction::Strong => self.strong,
            Conviction::Moderate => self.moderate,
            Conviction::Weak => self.weak,
        }
    }
}

/// Which cap determined the final amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingConstraint {
    Risk,
    Concentration,
    Cash,
    BelowMinimum,
}

impl BindingConstraint {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingConstraint::Risk => "risk",
            BindingConstraint::Concentration => "concentration",
            BindingConstraint::Cash => "cash",
            BindingConstraint::BelowMinimum => "below_minimum",
        }
    }

    /// Tag with the `+high_exposure` suffix when the halving applied
    pub fn label(&self, high_exposure: bool) -> String {
        if high_exposure && *self != BindingConstraint::BelowMinimum {
            format!("{}+high_exposure", self.as_str())
        } else {
            self.as_str().to_string()
        }
    }
}

/// Inputs for one sizing decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingRequest {
    pub portfolio_value: f64,
    pub cash_available: f64,
    pub atr: f64,
    pub price: f64,
    pub conviction: Conviction,
    /// Fraction of portfolio value already invested (0-1)
    pub current_exposure_pct: f64,
    /// Explicit stop distance as a fraction of price; overrides the ATR
    /// derived distance
    pub sl_distance_pct: Option<f64>,
}

impl SizingRequest {
    pub fn new(portfolio_value: f64, cash_available: f64, atr: f64, price: f64) -> Self {
        Self {
            portfolio_value,
            cash_available,
            atr,
            price,
            conviction: Conviction::Moderate,
            current_exposure_pct: 0.0,
            sl_distance_pct: None,
        }
    }

    pub fn with_conviction(mut self, conviction: Conviction) -> Self {
        self.conviction = conviction;
        self
    }

    pub fn with_exposure(mut self, current_exposure_pct: f64) -> Self {
        self.current_exposure_pct = current_exposure_pct;
        self
    }

    pub fn with_sl_distance(mut self, sl_distance_pct: f64) -> Self {
        self.sl_distance_pct = Some(sl_distance_pct);
        self
    }
}

/// Position sizing recommendation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSizing {
    /// Dollar amount to invest (0 when below the trade minimum)
    pub amount: f64,
    pub risk_budget: f64,
    /// Dollars lost if the stop is hit
    pub actual_risk: f64,
    /// `actual_risk` as a percentage of portfolio value
    pub actual_risk_pct: f64,
    /// Stop distance used for sizing, in percent of price
    pub sl_distance_pct: f64,
    pub concentration_pct: f64,
    pub conviction: Conviction,
    pub binding_constraint: BindingConstraint,
    /// Amount was halved because exposure was already high
    pub high_exposure: bool,
    /// Constraint tag including the exposure suffix, e.g. `cash+high_exposure`
    pub binding_label: String,
    pub method: String,
    pub reason: Option<String>,
}

/// Stop-aware, conviction-scaled position sizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSizer {
    pub convictions: ConvictionTable,
    /// ATR multiple used to derive a stop distance when none is supplied
    pub atr_sl_multiplier: f64,
    pub min_sl_fraction: f64,
    pub max_sl_fraction: f64,
    /// Cash held back from every trade
    pub cash_buffer: f64,
    /// Smallest amount worth trading
    pub min_trade_amount: f64,
    /// Exposure above which the amount is halved
    pub high_exposure_threshold: f64,
}

impl Default for PositionSizer {
    fn default() -> Self {
        Self {
            convictions: ConvictionTable::default(),
            atr_sl_multiplier: 2.0,
            min_sl_fraction: 0.01,
            max_sl_fraction: 0.15,
            cash_buffer: 200.0,
            min_trade_amount: 50.0,
            high_exposure_threshold: 0.80,
        }
    }
}

impl PositionSizer {
    fn sl_fraction(&self, req: &SizingRequest) -> Result<f64, AnalysisError> {
        match req.sl_distance_pct {
            Some(pct) if !is_positive(pct) => Err(AnalysisError::InvalidInput(
                "sl_distance_pct must be > 0".to_string(),
            )),
            Some(pct) => Ok(pct),
            None if !is_positive(req.atr) => Err(AnalysisError::InvalidInput(
                "atr must be > 0 when sl_distance_pct is not given".to_string(),
            )),
            None => Ok((self.atr_sl_multiplier * req.atr / req.price)
                .clamp(self.min_sl_fraction, self.max_sl_fraction)),
        }
    }

    /// Size a position so that hitting the stop costs the conviction's risk
    /// budget, then apply the concentration, cash and exposure caps.
    pub fn calculate_position_size(&self, req: &SizingRequest) -> Result<PositionSizing, AnalysisError> {
        if !is_positive(req.portfolio_value) || !is_positive(req.price) {
            return Err(AnalysisError::InvalidInput(
                "portfolio_value and price must be > 0".to_string(),
            ));
        }
        check_bounds("stop-loss fraction", self.min_sl_fraction, self.max_sl_fraction)?;
        let sl_fraction = self.sl_fraction(req)?;
        let params = self.convictions.get(req.conviction);

        let risk_budget = req.portfolio_value * params.risk_pct;
        let risk_amount = risk_budget / sl_fraction;
        let concentration_cap = req.portfolio_value * params.max_concentration_pct;

        let (mut amount, mut binding) = if risk_amount <= concentration_cap {
            (risk_amount, BindingConstraint::Risk)
        } else {
            (concentration_cap, BindingConstraint::Concentration)
        };

        let usable_cash = (req.cash_available - self.cash_buffer).max(0.0);
        if usable_cash < amount {
            amount = usable_cash;
            binding = BindingConstraint::Cash;
        }

        let high_exposure = req.current_exposure_pct > self.high_exposure_threshold;
        if high_exposure {
            amount /= 2.0;
        }

        if amount < self.min_trade_amount {
            tracing::debug!(
                amount,
                binding = binding.as_str(),
                "sized amount below trade minimum"
            );
            return Ok(PositionSizing {
                amount: 0.0,
                risk_budget: round_to(risk_budget, 2),
                actual_risk: 0.0,
                actual_risk_pct: 0.0,
                sl_distance_pct: round_to(sl_fraction * 100.0, 2),
                concentration_pct: 0.0,
                conviction: req.conviction,
                binding_constraint: BindingConstraint::BelowMinimum,
                high_exposure,
                binding_label: BindingConstraint::BelowMinimum.label(high_exposure),
                method: "sl_sizing".to_string(),
                reason: Some(format!(
                    "Calculated amount ${:.2} below ${:.0} minimum (bound by {})",
                    amount,
                    self.min_trade_amount,
                    binding.as_str()
                )),
            });
        }

        let amount = round_to(amount, 2);
        let actual_risk = amount * sl_fraction;

        Ok(PositionSizing {
            amount,
            risk_budget: round_to(risk_budget, 2),
            actual_risk: round_to(actual_risk, 2),
            actual_risk_pct: round_to(actual_risk / req.portfolio_value * 100.0, 2),
            sl_distance_pct: round_to(sl_fraction * 100.0, 2),
            concentration_pct: round_to(amount / req.portfolio_value * 100.0, 2),
            conviction: req.conviction,
            binding_constraint: binding,
            high_exposure,
            binding_label: binding.label(high_exposure),
            method: "sl_sizing".to_string(),
            reason: None,
        })
    }
}

/// Size with the default sizer settings
pub fn calculate_position_size(req: &SizingRequest) -> Result<PositionSizing, AnalysisError> {
    PositionSizer::default().calculate_position_size(req)
}
