//! Small numeric helpers shared by the indicator and sizing crates.
//!
//! NaN is the "undefined" marker throughout; helpers here either skip it
//! explicitly or propagate it.

use statrs::statistics::Statistics;

/// Mean of a slice; NaN when empty.
pub fn mean(data: &[f64]) -> f64 {
    data.mean()
}

/// Sample standard deviation (n - 1 denominator); NaN below two values.
pub fn std_dev(data: &[f64]) -> f64 {
    data.std_dev()
}

/// Mean over the non-NaN entries; NaN when there are none.
pub fn nan_mean(data: &[f64]) -> f64 {
    data.iter().filter(|x| !x.is_nan()).mean()
}

/// Round half away from zero to `dp` decimal places.
pub fn round_to(value: f64, dp: u32) -> f64 {
    let factor = 10f64.powi(dp as i32);
    (value * factor).round() / factor
}

/// `Some(value)` when finite, `None` for NaN/inf.
pub fn defined(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}
