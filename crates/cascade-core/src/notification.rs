//! The record passed from a publisher to its subscribers

use crate::{NodeId, Timestamp};

/// One value pushed downstream: (emitter id, value, triggering timestamp)
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    /// Id of the emitting node
    pub source: NodeId,
    /// Emitted scalar
    pub value: f64,
    /// Timestamp of the event that produced the value
    pub timestamp: Timestamp,
}

impl Notification {
    pub fn new(source: NodeId, value: f64, timestamp: Timestamp) -> Self {
        Notification {
            source,
            value,
            timestamp,
        }
    }
}
