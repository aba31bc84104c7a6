//! Test doubles for driving and observing pipelines
//!
//! - `ManualPublisher`: emits on demand instead of on a timer
//! - `Recorder`: subscriber that keeps every notification it sees
//! - `RecordingSink`: report sink that keeps every consumer report
//! - `failing_callback` / `panicking_callback`: misbehaving subscribers

use std::sync::Arc;

use parking_lot::Mutex;

use cascade_core::{CascadeError, CascadeResult, NodeId, Notification, Timestamp};
use cascade_runtime::{
    callback, Broker, Callback, Delivery, DeliveryReport, MedianReport, Publisher, ReportSink,
    Subscription,
};

// ============================================================================
// MANUAL PUBLISHER
// ============================================================================

/// Publisher that emits only when told to.
///
/// Each `emit` advances a private clock by one millisecond so that
/// notifications carry distinct, increasing timestamps.
pub struct ManualPublisher {
    broker: Broker,
    clock: Mutex<Timestamp>,
}

impl ManualPublisher {
    pub fn new(id: impl Into<NodeId>) -> Self {
        ManualPublisher {
            broker: Broker::new(id.into()),
            clock: Mutex::new(Timestamp::EPOCH),
        }
    }

    /// Emit `value` at the next tick of the private clock
    pub fn emit(&self, value: f64) -> DeliveryReport {
        let timestamp = {
            let mut clock = self.clock.lock();
            *clock = Timestamp::from_millis(clock.as_millis() + 1);
            *clock
        };
        self.broker.notify(value, timestamp)
    }

    /// Emit `value` with an explicit timestamp
    pub fn emit_at(&self, value: f64, timestamp: Timestamp) -> DeliveryReport {
        self.broker.notify(value, timestamp)
    }

    pub fn subscriber_count(&self) -> usize {
        self.broker.len()
    }
}

impl Publisher for ManualPublisher {
    fn id(&self) -> &NodeId {
        self.broker.owner()
    }

    fn subscribe_callback(&self, callback: Callback) -> Subscription {
        self.broker.subscribe(callback)
    }
}

// ============================================================================
// RECORDER
// ============================================================================

/// Subscriber that records every notification it receives.
///
/// Clones share the same log.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Notification>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback appending to this recorder
    pub fn callback(&self) -> Callback {
        let seen = Arc::clone(&self.seen);
        callback(move |n| {
            seen.lock().push(n.clone());
            Ok(Delivery::Done)
        })
    }

    /// Subscribe to `publisher`
    pub fn follow<P: Publisher + ?Sized>(&self, publisher: &P) -> Subscription {
        publisher.subscribe_callback(self.callback())
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().clone()
    }

    pub fn values(&self) -> Vec<f64> {
        self.seen.lock().iter().map(|n| n.value).collect()
    }

    pub fn last_value(&self) -> Option<f64> {
        self.seen.lock().last().map(|n| n.value)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.seen.lock().clear();
    }
}

// ============================================================================
// RECORDING SINK
// ============================================================================

/// Report sink that keeps every report in memory
#[derive(Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<MedianReport>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reports(&self) -> Vec<MedianReport> {
        self.reports.lock().clone()
    }

    pub fn medians(&self) -> Vec<f64> {
        self.reports.lock().iter().map(|r| r.median).collect()
    }

    pub fn counts(&self) -> Vec<usize> {
        self.reports.lock().iter().map(|r| r.count).collect()
    }

    /// Rendered report lines
    pub fn lines(&self) -> Vec<String> {
        self.reports.lock().iter().map(|r| r.to_string()).collect()
    }

    pub fn last(&self) -> Option<MedianReport> {
        self.reports.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReportSink for RecordingSink {
    fn report(&self, report: &MedianReport) -> CascadeResult<()> {
        self.reports.lock().push(report.clone());
        Ok(())
    }
}

// ============================================================================
// MISBEHAVING SUBSCRIBERS
// ============================================================================

/// Callback that always returns an error
pub fn failing_callback(reason: &'static str) -> Callback {
    callback(move |_| Err(CascadeError::subscriber(reason)))
}

/// Callback that always panics
pub fn panicking_callback() -> Callback {
    callback(|n| panic!("subscriber panicked on {}", n.value))
}
