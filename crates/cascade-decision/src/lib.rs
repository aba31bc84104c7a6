//! Cascade Decision - Reductions over the latest upstream values
//!
//! A decision function turns an ordered slice of scalars into one scalar.
//! This crate provides:
//! - The `DecisionFunction` contract and a closure adapter
//! - Stateless reductions: mean, median, geometric mean, trimmed mean
//! - Stateful trackers: running maximum, trailing stop sell signal
//! - `DecisionKind`, a name-resolved selector built once per aggregator

pub mod function;
pub mod stateless;
pub mod stateful;
pub mod kind;

pub use function::*;
pub use stateless::*;
pub use stateful::*;
pub use kind::*;
