//! Name-resolved decision selection
//!
//! Wrappers pick a decision function by name (`"median"`,
//! `"trimmed_mean:0.2"`, ...). The name is parsed into a `DecisionKind`
//! and built into a fresh instance once, at aggregator construction. Every
//! build yields independent state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use cascade_core::{CascadeError, CascadeResult};

use crate::{DecisionFunction, GeometricMean, MaxSeen, Mean, Median, TrailingStopSell, TrimmedMean};

/// Built-in decision functions
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionKind {
    Mean,
    Median,
    GeometricMean,
    TrimmedMean { trim_fraction: f64 },
    MaxSeen,
    TrailingStopSell { stop_distance: f64 },
}

impl DecisionKind {
    /// Canonical name, without parameters
    pub fn name(&self) -> &'static str {
        match self {
            DecisionKind::Mean => "mean",
            DecisionKind::Median => "median",
            DecisionKind::GeometricMean => "geometric_mean",
            DecisionKind::TrimmedMean { .. } => "trimmed_mean",
            DecisionKind::MaxSeen => "max_seen",
            DecisionKind::TrailingStopSell { .. } => "trailing_stop_sell",
        }
    }

    /// Whether instances carry state across calls
    pub fn is_stateful(&self) -> bool {
        matches!(
            self,
            DecisionKind::MaxSeen | DecisionKind::TrailingStopSell { .. }
        )
    }

    /// Build a fresh, independently owned instance
    pub fn build(&self) -> CascadeResult<Box<dyn DecisionFunction>> {
        Ok(match *self {
            DecisionKind::Mean => Box::new(Mean),
            DecisionKind::Median => Box::new(Median),
            DecisionKind::GeometricMean => Box::new(GeometricMean),
            DecisionKind::TrimmedMean { trim_fraction } => Box::new(TrimmedMean::new(trim_fraction)?),
            DecisionKind::MaxSeen => Box::new(MaxSeen::new()),
            DecisionKind::TrailingStopSell { stop_distance } => {
                Box::new(TrailingStopSell::new(stop_distance)?)
            }
        })
    }
}

impl Default for DecisionKind {
    fn default() -> Self {
        DecisionKind::Mean
    }
}

impl FromStr for DecisionKind {
    type Err = CascadeError;

    /// Parse `name` or `name:parameter`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        let (name, param) = match normalized.split_once(':') {
            Some((name, param)) => (name.trim(), Some(param.trim())),
            None => (normalized.as_str(), None),
        };

        let kind = match name {
            "mean" => DecisionKind::Mean,
            "median" => DecisionKind::Median,
            "geometric_mean" | "geometric" => DecisionKind::GeometricMean,
            "trimmed_mean" | "trimmed" => DecisionKind::TrimmedMean {
                trim_fraction: parse_param("trim_fraction", param, TrimmedMean::DEFAULT_TRIM_FRACTION)?,
            },
            "max_seen" => DecisionKind::MaxSeen,
            "trailing_stop_sell" | "trailing_stop" => DecisionKind::TrailingStopSell {
                stop_distance: parse_param(
                    "stop_distance",
                    param,
                    TrailingStopSell::DEFAULT_STOP_DISTANCE,
                )?,
            },
            _ => return Err(CascadeError::UnknownDecision(s.to_string())),
        };

        if param.is_some() && !matches!(
            kind,
            DecisionKind::TrimmedMean { .. } | DecisionKind::TrailingStopSell { .. }
        ) {
            return Err(CascadeError::InvalidParameter {
                name: "decision",
                reason: format!("{} takes no parameter", kind.name()),
            });
        }
        Ok(kind)
    }
}

fn parse_param(name: &'static str, param: Option<&str>, default: f64) -> CascadeResult<f64> {
    match param {
        None => Ok(default),
        Some(raw) => raw.parse::<f64>().map_err(|e| CascadeError::InvalidParameter {
            name,
            reason: format!("{:?}: {}", raw, e),
        }),
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionKind::TrimmedMean { trim_fraction } => {
                write!(f, "{}:{}", self.name(), trim_fraction)
            }
            DecisionKind::TrailingStopSell { stop_distance } => {
                write!(f, "{}:{}", self.name(), stop_distance)
            }
            _ => f.write_str(self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_names() {
        assert_eq!("mean".parse::<DecisionKind>().unwrap(), DecisionKind::Mean);
        assert_eq!(" Median ".parse::<DecisionKind>().unwrap(), DecisionKind::Median);
        assert_eq!(
            "geometric_mean".parse::<DecisionKind>().unwrap(),
            DecisionKind::GeometricMean
        );
        assert_eq!("max_seen".parse::<DecisionKind>().unwrap(), DecisionKind::MaxSeen);
    }

    #[test]
    fn test_parse_parameters_and_defaults() {
        assert_eq!(
            "trimmed_mean:0.2".parse::<DecisionKind>().unwrap(),
            DecisionKind::TrimmedMean { trim_fraction: 0.2 }
        );
        assert_eq!(
            "trimmed_mean".parse::<DecisionKind>().unwrap(),
            DecisionKind::TrimmedMean { trim_fraction: 0.1 }
        );
        assert_eq!(
            "trailing_stop_sell".parse::<DecisionKind>().unwrap(),
            DecisionKind::TrailingStopSell { stop_distance: 0.001 }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_and_bad_params() {
        assert_eq!(
            "krum".parse::<DecisionKind>(),
            Err(CascadeError::UnknownDecision("krum".to_string()))
        );
        assert!(matches!(
            "trimmed_mean:abc".parse::<DecisionKind>(),
            Err(CascadeError::InvalidParameter { name: "trim_fraction", .. })
        ));
        assert!(matches!(
            "mean:3".parse::<DecisionKind>(),
            Err(CascadeError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_display_roundtrip() {
        for kind in [
            DecisionKind::Mean,
            DecisionKind::TrimmedMean { trim_fraction: 0.25 },
            DecisionKind::TrailingStopSell { stop_distance: 1.5 },
        ] {
            assert_eq!(kind.to_string().parse::<DecisionKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_build_yields_independent_state() {
        let kind = DecisionKind::MaxSeen;
        let mut a = kind.build().unwrap();
        let mut b = kind.build().unwrap();

        a.evaluate(&[5.0]).unwrap();
        assert_eq!(b.evaluate(&[1.0]).unwrap(), 1.0);
        assert_eq!(a.evaluate(&[]).unwrap(), 5.0);
        assert!(kind.is_stateful());
        assert!(!DecisionKind::Median.is_stateful());
    }

    #[test]
    fn test_build_validates_parameters() {
        assert!(DecisionKind::TrimmedMean { trim_fraction: -1.0 }.build().is_err());
        assert!(DecisionKind::TrailingStopSell { stop_distance: f64::NAN }
            .build()
            .is_err());
    }
}
