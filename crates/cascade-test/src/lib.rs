//! Cascade Test Harness - Pipeline scenarios and test doubles
//!
//! This crate provides:
//! - Hand-driven publishers and recording subscribers
//! - A recording report sink
//! - Misbehaving callbacks for isolation testing
//! - Topology churn scenarios (the FX demo wiring)
//! - Timed single-source runs on a real `Source`

pub mod harness;
pub mod scenario;

pub use harness::*;
pub use scenario::*;
