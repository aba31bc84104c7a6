//! Stateful decision functions
//!
//! Each instance carries progress across calls and belongs to exactly one
//! aggregator. Attaching or detaching individual upstream nodes never
//! resets that progress.

use cascade_core::{CascadeError, CascadeResult};

use crate::DecisionFunction;

/// Running maximum across every call.
///
/// Monotonic non-decreasing for non-empty input. An empty call returns the
/// running maximum unchanged (negative infinity before the first value).
#[derive(Clone, Debug)]
pub struct MaxSeen {
    running_max: f64,
}

impl MaxSeen {
    pub fn new() -> Self {
        MaxSeen {
            running_max: f64::NEG_INFINITY,
        }
    }

    /// Largest value observed so far
    pub fn running_max(&self) -> f64 {
        self.running_max
    }
}

impl Default for MaxSeen {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionFunction for MaxSeen {
    fn evaluate(&mut self, values: &[f64]) -> CascadeResult<f64> {
        let current = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if current > self.running_max {
            self.running_max = current;
            tracing::debug!(max = self.running_max, "new max seen");
        }
        Ok(self.running_max)
    }

    fn name(&self) -> &str {
        "max_seen"
    }
}

/// Trailing stop that emits a one-shot sell signal.
///
/// The stop level trails `stop_distance` below the highest value reached
/// and only ever moves up. When the current value falls below the level,
/// the call returns negative infinity (the sell signal) and the level is
/// cleared, so the next call starts a fresh trail.
#[derive(Clone, Debug)]
pub struct TrailingStopSell {
    stop_distance: f64,
    /// Unset while equal to negative infinity
    level: f64,
}

impl TrailingStopSell {
    pub const DEFAULT_STOP_DISTANCE: f64 = 0.001;

    /// Value returned on the call that triggers a sell
    pub const SELL_SIGNAL: f64 = f64::NEG_INFINITY;

    pub fn new(stop_distance: f64) -> CascadeResult<Self> {
        if !stop_distance.is_finite() || stop_distance < 0.0 {
            return Err(CascadeError::InvalidParameter {
                name: "stop_distance",
                reason: format!("expected a finite non-negative distance, got {}", stop_distance),
            });
        }
        Ok(TrailingStopSell {
            stop_distance,
            level: f64::NEG_INFINITY,
        })
    }

    pub fn stop_distance(&self) -> f64 {
        self.stop_distance
    }

    /// Current stop level, `None` while no trail is active
    pub fn level(&self) -> Option<f64> {
        if self.level == f64::NEG_INFINITY {
            None
        } else {
            Some(self.level)
        }
    }
}

impl Default for TrailingStopSell {
    fn default() -> Self {
        TrailingStopSell {
            stop_distance: Self::DEFAULT_STOP_DISTANCE,
            level: f64::NEG_INFINITY,
        }
    }
}

impl DecisionFunction for TrailingStopSell {
    fn evaluate(&mut self, values: &[f64]) -> CascadeResult<f64> {
        if values.is_empty() {
            return Err(CascadeError::EmptyInput);
        }
        let current = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        if self.level == f64::NEG_INFINITY {
            self.level = current - self.stop_distance;
        }
        if current > self.level + self.stop_distance {
            // Trail upward only
            self.level = current - self.stop_distance;
        }
        if current < self.level {
            tracing::info!(level = self.level, current, "trailing stop hit");
            self.level = f64::NEG_INFINITY;
            return Ok(Self::SELL_SIGNAL);
        }
        Ok(self.level)
    }

    fn name(&self) -> &str {
        "trailing_stop_sell"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_max_seen_tracks_largest_value() {
        let mut f = MaxSeen::new();
        assert_eq!(f.evaluate(&[1.0]).unwrap(), 1.0);
        assert_eq!(f.evaluate(&[0.5]).unwrap(), 1.0);
        assert_eq!(f.evaluate(&[2.0]).unwrap(), 2.0);
        assert_eq!(f.evaluate(&[]).unwrap(), 2.0);
    }

    #[test]
    fn test_max_seen_empty_before_any_value() {
        let mut f = MaxSeen::new();
        assert_eq!(f.evaluate(&[]).unwrap(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_trailing_stop_sequence() {
        let mut f = TrailingStopSell::new(1.0).unwrap();

        assert_eq!(f.evaluate(&[10.0]).unwrap(), 9.0);
        assert_eq!(f.evaluate(&[11.0]).unwrap(), 10.0);
        assert_eq!(f.evaluate(&[11.5]).unwrap(), 10.5);
        assert_eq!(f.evaluate(&[11.0]).unwrap(), 10.5);
        // Drop below the level: sell
        assert_eq!(f.evaluate(&[10.0]).unwrap(), f64::NEG_INFINITY);
        assert_eq!(f.level(), None);
        // Fresh trail after the sell
        assert_eq!(f.evaluate(&[8.0]).unwrap(), 7.0);
        assert_eq!(f.level(), Some(7.0));
    }

    #[test]
    fn test_trailing_stop_uses_max_of_values() {
        let mut f = TrailingStopSell::new(0.5).unwrap();
        assert_eq!(f.evaluate(&[1.0, 3.0, 2.0]).unwrap(), 2.5);
    }

    #[test]
    fn test_trailing_stop_empty_fails() {
        let mut f = TrailingStopSell::default();
        assert_eq!(f.evaluate(&[]), Err(CascadeError::EmptyInput));
        assert_eq!(f.stop_distance(), 0.001);
    }

    #[test]
    fn test_trailing_stop_rejects_bad_distance() {
        assert!(TrailingStopSell::new(-1.0).is_err());
        assert!(TrailingStopSell::new(f64::INFINITY).is_err());
    }

    proptest! {
        #[test]
        fn prop_max_seen_is_monotonic(
            calls in prop::collection::vec(prop::collection::vec(-1e6f64..1e6, 1..8), 1..32)
        ) {
            let mut f = MaxSeen::new();
            let mut previous = f64::NEG_INFINITY;
            for values in &calls {
                let out = f.evaluate(values).unwrap();
                prop_assert!(out >= previous);
                previous = out;
            }
        }
    }
}
