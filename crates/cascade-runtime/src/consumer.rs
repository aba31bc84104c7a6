//! Consumer
//!
//! Terminal stage. Follows aggregators the same way an aggregator follows
//! sources, but always reduces with the median and hands each result to a
//! `ReportSink` instead of notifying subscribers.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use cascade_core::{CascadeError, NodeId, Notification};
use cascade_decision::Median;

use crate::aggregator::evaluate_or_mean;
use crate::{callback, CacheWrite, Callback, Delivery, LatestCache, MedianReport, Publisher, ReportSink, StdoutSink};

/// Consumer report configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Leading word of each report line
    pub label: String,
    /// What the contributing upstream nodes are called
    pub entity_noun: String,
    /// Decimal places for the reported median
    pub precision: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            label: "Trader".to_string(),
            entity_noun: "strategies".to_string(),
            precision: 6,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConsumerStats {
    /// Upstream notifications received
    pub updates: u64,
    /// Reports handed to the sink
    pub reports: u64,
    /// Notifications that arrived after their upstream was detached
    pub dropped_stale: u64,
    /// Median evaluations that fell back to the mean
    pub fallbacks: u64,
    /// Reports the sink rejected
    pub sink_failures: u64,
}

struct ConsumerState {
    cache: LatestCache,
    median: Median,
    stats: ConsumerStats,
    shut_down: bool,
}

struct ConsumerInner {
    id: NodeId,
    config: ConsumerConfig,
    sink: Arc<dyn ReportSink>,
    state: Mutex<ConsumerState>,
}

impl ConsumerInner {
    fn on_update(&self, upstream: &NodeId, epoch: u64, notification: &Notification) {
        let report = {
            let mut state = self.state.lock();
            state.stats.updates += 1;

            if state.cache.record(upstream, epoch, notification.value) == CacheWrite::Stale {
                state.stats.dropped_stale += 1;
                tracing::trace!(consumer = %self.id, aggregator = %upstream, "dropped stale update");
                return;
            }

            let values = state.cache.values();
            if values.is_empty() {
                return;
            }

            let Some(eval) = evaluate_or_mean(&self.id, &mut state.median, &values) else {
                return;
            };
            if eval.fell_back {
                state.stats.fallbacks += 1;
            }

            MedianReport {
                consumer: self.id.clone(),
                timestamp: notification.timestamp,
                label: self.config.label.clone(),
                entity_noun: self.config.entity_noun.clone(),
                count: values.len(),
                median: eval.value,
                precision: self.config.precision,
            }
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.sink.report(&report)))
            .unwrap_or_else(|_| Err(CascadeError::Sink("sink panicked".to_string())));

        let mut state = self.state.lock();
        match outcome {
            Ok(()) => state.stats.reports += 1,
            Err(e) => {
                state.stats.sink_failures += 1;
                tracing::warn!(consumer = %self.id, error = %e, "report sink failed");
            }
        }
    }
}

/// Terminal stage reporting the median of the latest aggregator outputs.
///
/// Cloning yields another handle to the same consumer.
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<ConsumerInner>,
}

impl Consumer {
    pub fn new(id: impl Into<NodeId>, config: ConsumerConfig, sink: Arc<dyn ReportSink>) -> Self {
        Consumer {
            inner: Arc::new(ConsumerInner {
                id: id.into(),
                config,
                sink,
                state: Mutex::new(ConsumerState {
                    cache: LatestCache::new(),
                    median: Median,
                    stats: ConsumerStats::default(),
                    shut_down: false,
                }),
            }),
        }
    }

    /// Default configuration, reporting to stdout
    pub fn stdout(id: impl Into<NodeId>) -> Self {
        Self::new(id, ConsumerConfig::default(), Arc::new(StdoutSink))
    }

    pub fn id(&self) -> &NodeId {
        &self.inner.id
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.inner.config
    }

    /// Start following `upstream`; `false` if already attached or shut down
    pub fn attach<P: Publisher + ?Sized>(&self, upstream: &P) -> bool {
        let upstream_id = upstream.id().clone();
        let mut state = self.inner.state.lock();

        if state.shut_down {
            tracing::debug!(consumer = %self.inner.id, aggregator = %upstream_id, "attach after shutdown ignored");
            return false;
        }
        let Some(epoch) = state.cache.reserve(&upstream_id) else {
            return false;
        };

        tracing::info!(consumer = %self.inner.id, aggregator = %upstream_id, "attaching");

        let weak: Weak<ConsumerInner> = Arc::downgrade(&self.inner);
        let key = upstream_id.clone();
        let subscription = upstream.subscribe_callback(callback(move |notification| {
            if let Some(inner) = weak.upgrade() {
                inner.on_update(&key, epoch, notification);
            }
            Ok(Delivery::Done)
        }));
        state.cache.bind(&upstream_id, epoch, subscription);
        true
    }

    pub fn detach<P: Publisher + ?Sized>(&self, upstream: &P) -> bool {
        self.detach_id(upstream.id().as_str())
    }

    pub fn detach_id(&self, upstream: &str) -> bool {
        let removed = self.inner.state.lock().cache.detach(upstream);
        if removed {
            tracing::debug!(consumer = %self.inner.id, aggregator = upstream, "detached");
        }
        removed
    }

    /// Detach from every aggregator. Repeated calls are no-ops.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        let first = !state.shut_down;
        state.shut_down = true;
        let detached = state.cache.detach_all();
        if first || detached > 0 {
            tracing::info!(consumer = %self.inner.id, detached, "consumer shut down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.state.lock().shut_down
    }

    pub fn attached_ids(&self) -> Vec<NodeId> {
        self.inner.state.lock().cache.attached_ids()
    }

    pub fn cached_values(&self) -> Vec<(NodeId, f64)> {
        self.inner.state.lock().cache.snapshot()
    }

    pub fn stats(&self) -> ConsumerStats {
        self.inner.state.lock().stats.clone()
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.inner.id)
            .field("label", &self.inner.config.label)
            .finish()
    }
}
