//! The decision function contract

use std::fmt;

use cascade_core::CascadeResult;

/// Pluggable reduction over an ordered sequence of scalars.
///
/// `evaluate` takes `&mut self` so stateful variants can carry progress
/// across calls. An instance is owned by exactly one aggregator and is
/// never shared, so no interior synchronization is required.
///
/// A failing evaluation is not fatal: callers fall back to the arithmetic
/// mean of the same values.
pub trait DecisionFunction: Send {
    /// Reduce `values` to a single decision
    fn evaluate(&mut self, values: &[f64]) -> CascadeResult<f64>;

    /// Human-readable name for logging/debugging
    fn name(&self) -> &str;
}

impl<D: DecisionFunction + ?Sized> DecisionFunction for Box<D> {
    fn evaluate(&mut self, values: &[f64]) -> CascadeResult<f64> {
        (**self).evaluate(values)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Adapter turning a closure into a named decision function
pub struct FnDecision<F> {
    name: String,
    f: F,
}

impl<F> FnDecision<F>
where
    F: FnMut(&[f64]) -> CascadeResult<f64> + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        FnDecision {
            name: name.into(),
            f,
        }
    }
}

impl<F> DecisionFunction for FnDecision<F>
where
    F: FnMut(&[f64]) -> CascadeResult<f64> + Send,
{
    fn evaluate(&mut self, values: &[f64]) -> CascadeResult<f64> {
        (self.f)(values)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<F> fmt::Debug for FnDecision<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnDecision").field("name", &self.name).finish()
    }
}

/// Wrap a closure as a boxed decision function
pub fn decision_fn<F>(name: impl Into<String>, f: F) -> Box<dyn DecisionFunction>
where
    F: FnMut(&[f64]) -> CascadeResult<f64> + Send + 'static,
{
    Box::new(FnDecision::new(name, f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::CascadeError;

    #[test]
    fn test_closure_decision_keeps_state() {
        let mut calls = 0u32;
        let mut counter = FnDecision::new("count", move |_: &[f64]| {
            calls += 1;
            Ok(calls as f64)
        });

        assert_eq!(counter.evaluate(&[1.0]).unwrap(), 1.0);
        assert_eq!(counter.evaluate(&[1.0]).unwrap(), 2.0);
        assert_eq!(counter.name(), "count");
    }

    #[test]
    fn test_boxed_decision_delegates() {
        let mut boxed = decision_fn("always-fails", |_| Err(CascadeError::EmptyInput));
        assert_eq!(boxed.name(), "always-fails");
        assert_eq!(boxed.evaluate(&[1.0]), Err(CascadeError::EmptyInput));
    }
}
