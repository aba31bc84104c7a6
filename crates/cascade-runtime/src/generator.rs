//! Value generation rules for sources
//!
//! A source asks its generator for one value per tick. The generator is
//! picked once, when the source is built, and is owned by that source.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use cascade_core::{CascadeError, CascadeResult};

/// Produces the next scalar for a source tick
pub trait ValueGenerator: Send {
    /// `dt` is the configured interval between ticks
    fn next_value(&mut self, dt: Duration) -> f64;
}

impl<F> ValueGenerator for F
where
    F: FnMut(Duration) -> f64 + Send,
{
    fn next_value(&mut self, dt: Duration) -> f64 {
        self(dt)
    }
}

fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Geometric Brownian motion configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GbmConfig {
    /// Starting price
    pub initial_price: f64,
    /// Annualized volatility (sigma)
    pub volatility: f64,
    /// Annualized drift (mu)
    pub drift: f64,
    /// Fixed seed for reproducible paths
    pub seed: Option<u64>,
}

impl Default for GbmConfig {
    fn default() -> Self {
        GbmConfig {
            initial_price: 1.0,
            volatility: 0.10,
            drift: 0.0,
            seed: None,
        }
    }
}

impl GbmConfig {
    pub fn with_price(initial_price: f64) -> Self {
        GbmConfig {
            initial_price,
            ..Default::default()
        }
    }
}

/// FX-like price path:
/// `S' = S * exp((mu - sigma^2 / 2) * dt + sigma * sqrt(dt) * Z)`
/// where `dt` is the tick interval as a fraction of a year.
pub struct GbmGenerator {
    price: f64,
    volatility: f64,
    drift: f64,
    rng: StdRng,
}

impl GbmGenerator {
    pub const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;

    /// Floor applied if a step ever produces a non-positive price
    pub const MIN_PRICE: f64 = 1e-12;

    pub fn new(config: GbmConfig) -> CascadeResult<Self> {
        if !config.initial_price.is_finite() || config.initial_price <= 0.0 {
            return Err(CascadeError::InvalidParameter {
                name: "initial_price",
                reason: format!("expected a positive price, got {}", config.initial_price),
            });
        }
        Ok(GbmGenerator {
            price: config.initial_price,
            volatility: config.volatility,
            drift: config.drift,
            rng: rng_from_seed(config.seed),
        })
    }

    /// Latest generated price
    pub fn price(&self) -> f64 {
        self.price
    }

    /// Annualized volatility (sigma)
    pub fn volatility(&self) -> f64 {
        self.volatility
    }

    pub fn set_volatility(&mut self, volatility: f64) {
        self.volatility = volatility;
    }

    /// Standard normal draw (Box-Muller)
    fn gaussian(&mut self) -> f64 {
        // 1 - U keeps u1 in (0, 1] so ln never sees zero
        let u1: f64 = 1.0 - self.rng.gen::<f64>();
        let u2: f64 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }
}

impl ValueGenerator for GbmGenerator {
    fn next_value(&mut self, dt: Duration) -> f64 {
        let dt = dt.as_secs_f64() / Self::SECONDS_PER_YEAR;

        let next = if self.volatility <= 0.0 || dt <= 0.0 {
            self.price * (self.drift * dt).exp()
        } else {
            let z = self.gaussian();
            let drift = (self.drift - 0.5 * self.volatility * self.volatility) * dt;
            let diffusion = self.volatility * dt.sqrt() * z;
            self.price * (drift + diffusion).exp()
        };

        self.price = if next <= 0.0 {
            Self::MIN_PRICE.max(next.abs())
        } else {
            next
        };
        self.price
    }
}

/// Uniform draw in `[0, 1)` on every tick
pub struct UniformGenerator {
    rng: StdRng,
}

impl UniformGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        UniformGenerator {
            rng: rng_from_seed(seed),
        }
    }
}

impl ValueGenerator for UniformGenerator {
    fn next_value(&mut self, _dt: Duration) -> f64 {
        self.rng.gen()
    }
}

/// Replays a fixed list, then holds the last value
#[derive(Clone, Debug)]
pub struct SequenceGenerator {
    values: Vec<f64>,
    next: usize,
}

impl SequenceGenerator {
    pub fn new(values: impl Into<Vec<f64>>) -> CascadeResult<Self> {
        let values = values.into();
        if values.is_empty() {
            return Err(CascadeError::InvalidParameter {
                name: "values",
                reason: "sequence must contain at least one value".to_string(),
            });
        }
        Ok(SequenceGenerator { values, next: 0 })
    }

    /// Whether every scripted value has been emitted
    pub fn is_exhausted(&self) -> bool {
        self.next >= self.values.len()
    }
}

impl ValueGenerator for SequenceGenerator {
    fn next_value(&mut self, _dt: Duration) -> f64 {
        let idx = self.next.min(self.values.len() - 1);
        self.next = self.next.saturating_add(1);
        self.values[idx]
    }
}
