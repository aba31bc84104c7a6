//! Stateless reductions
//!
//! - Arithmetic mean (baseline, and the fallback for every other function)
//! - Median (mean of the two middle values for even counts)
//! - Geometric mean (falls back to the arithmetic mean on non-positive input)
//! - Trimmed mean (falls back to the arithmetic mean when trimming would
//!   remove everything)

use cascade_core::{CascadeError, CascadeResult};

use crate::DecisionFunction;

/// Arithmetic mean. Fails on empty input.
pub fn mean(values: &[f64]) -> CascadeResult<f64> {
    if values.is_empty() {
        return Err(CascadeError::EmptyInput);
    }
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

/// Statistical median. Fails on empty input.
pub fn median(values: &[f64]) -> CascadeResult<f64> {
    if values.is_empty() {
        return Err(CascadeError::EmptyInput);
    }
    let sorted = sorted_copy(values);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Ok((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Ok(sorted[mid])
    }
}

/// Geometric mean via the log-sum, so long inputs do not underflow.
///
/// Undefined when any value is `<= 0`; the arithmetic mean of the same
/// values is returned instead.
pub fn geometric_mean(values: &[f64]) -> CascadeResult<f64> {
    if values.is_empty() {
        return Err(CascadeError::EmptyInput);
    }
    let mut log_sum = 0.0;
    for &v in values {
        if v <= 0.0 {
            return mean(values);
        }
        log_sum += v.ln();
    }
    Ok((log_sum / values.len() as f64).exp())
}

/// Drop `floor(n * trim_fraction)` values from each end of the sorted input
/// and average the rest. When `2k >= n` the untrimmed mean is returned.
pub fn trimmed_mean(values: &[f64], trim_fraction: f64) -> CascadeResult<f64> {
    if values.is_empty() {
        return Err(CascadeError::EmptyInput);
    }
    validate_trim_fraction(trim_fraction)?;

    let n = values.len();
    // Compared as floats: a huge fraction must not overflow the count
    let k = (n as f64 * trim_fraction).floor();
    if 2.0 * k >= n as f64 {
        return mean(values);
    }
    let k = k as usize;
    let sorted = sorted_copy(values);
    mean(&sorted[k..n - k])
}

fn validate_trim_fraction(trim_fraction: f64) -> CascadeResult<()> {
    if !trim_fraction.is_finite() || trim_fraction < 0.0 {
        return Err(CascadeError::InvalidParameter {
            name: "trim_fraction",
            reason: format!("expected a finite non-negative fraction, got {}", trim_fraction),
        });
    }
    Ok(())
}

fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// Arithmetic mean decision
#[derive(Clone, Copy, Debug, Default)]
pub struct Mean;

impl DecisionFunction for Mean {
    fn evaluate(&mut self, values: &[f64]) -> CascadeResult<f64> {
        mean(values)
    }

    fn name(&self) -> &str {
        "mean"
    }
}

/// Median decision
#[derive(Clone, Copy, Debug, Default)]
pub struct Median;

impl DecisionFunction for Median {
    fn evaluate(&mut self, values: &[f64]) -> CascadeResult<f64> {
        median(values)
    }

    fn name(&self) -> &str {
        "median"
    }
}

/// Geometric mean decision
#[derive(Clone, Copy, Debug, Default)]
pub struct GeometricMean;

impl DecisionFunction for GeometricMean {
    fn evaluate(&mut self, values: &[f64]) -> CascadeResult<f64> {
        geometric_mean(values)
    }

    fn name(&self) -> &str {
        "geometric_mean"
    }
}

/// Trimmed mean decision
#[derive(Clone, Copy, Debug)]
pub struct TrimmedMean {
    trim_fraction: f64,
}

impl TrimmedMean {
    pub const DEFAULT_TRIM_FRACTION: f64 = 0.1;

    pub fn new(trim_fraction: f64) -> CascadeResult<Self> {
        validate_trim_fraction(trim_fraction)?;
        Ok(TrimmedMean { trim_fraction })
    }

    pub fn trim_fraction(&self) -> f64 {
        self.trim_fraction
    }
}

impl Default for TrimmedMean {
    fn default() -> Self {
        TrimmedMean {
            trim_fraction: Self::DEFAULT_TRIM_FRACTION,
        }
    }
}

impl DecisionFunction for TrimmedMean {
    fn evaluate(&mut self, values: &[f64]) -> CascadeResult<f64> {
        trimmed_mean(values, self.trim_fraction)
    }

    fn name(&self) -> &str {
        "trimmed_mean"
    }
}
