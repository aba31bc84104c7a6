//! Cascade Runtime - Push-based value propagation
//!
//! A pipeline is built from three kinds of node:
//! 1. `Source` - emits a generated value on a fixed interval
//! 2. `Aggregator` - caches the latest value per upstream node and
//!    re-emits a decision over them on every update
//! 3. `Consumer` - caches the latest value per aggregator and reports
//!    their median to a sink
//!
//! Every node that emits owns a `Broker`. Delivery is synchronous and
//! isolated per subscriber: one failing callback never blocks the others
//! or the emitter.

pub mod broker;
pub mod cache;
pub mod generator;
pub mod source;
pub mod aggregator;
pub mod sink;
pub mod consumer;

pub use broker::*;
pub use cache::*;
pub use generator::*;
pub use source::*;
pub use aggregator::*;
pub use sink::*;
pub use consumer::*;
