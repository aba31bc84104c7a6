//! Aggregator
//!
//! Subscribes to any number of upstream publishers, keeps the latest value
//! from each, and on every update reduces the cached values with its
//! decision function. The result is published to its own subscribers,
//! stamped with the timestamp of the triggering upstream event.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use cascade_core::{CascadeError, CascadeResult, NodeId, Notification};
use cascade_decision::{mean, DecisionFunction, DecisionKind};

use crate::{callback, Broker, CacheWrite, Callback, Delivery, LatestCache, Publisher, Subscription};

#[derive(Clone, Debug, Default)]
pub struct AggregatorStats {
    /// Upstream notifications received
    pub updates: u64,
    /// Decision evaluations
    pub recomputations: u64,
    /// Evaluations that failed and used the arithmetic mean instead
    pub fallbacks: u64,
    /// Notifications that arrived after their upstream was detached
    pub dropped_stale: u64,
    /// Downstream callbacks that failed
    pub callback_failures: u64,
}

/// Outcome of evaluating a decision with the mean fallback applied
pub(crate) struct Evaluation {
    pub value: f64,
    pub fell_back: bool,
}

/// Evaluate `decision`, falling back to the arithmetic mean on error or panic.
///
/// Returns `None` only when the fallback itself has nothing to average.
pub(crate) fn evaluate_or_mean(
    node: &NodeId,
    decision: &mut dyn DecisionFunction,
    values: &[f64],
) -> Option<Evaluation> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| decision.evaluate(values)))
        .unwrap_or(Err(CascadeError::DecisionPanicked));

    match outcome {
        Ok(value) => Some(Evaluation {
            value,
            fell_back: false,
        }),
        Err(e) => {
            tracing::warn!(
                node = %node,
                decision = decision.name(),
                error = %e,
                "decision failed; using arithmetic mean"
            );
            mean(values).ok().map(|value| Evaluation {
                value,
                fell_back: true,
            })
        }
    }
}

struct AggregatorState {
    cache: LatestCache,
    decision: Box<dyn DecisionFunction>,
    stats: AggregatorStats,
    shut_down: bool,
}

struct AggregatorInner {
    id: NodeId,
    decision_name: String,
    broker: Broker,
    state: Mutex<AggregatorState>,
}

impl AggregatorInner {
    fn on_update(&self, upstream: &NodeId, epoch: u64, notification: &Notification) {
        let decision = {
            let mut state = self.state.lock();
            state.stats.updates += 1;

            if state.cache.record(upstream, epoch, notification.value) == CacheWrite::Stale {
                state.stats.dropped_stale += 1;
                tracing::trace!(aggregator = %self.id, source = %upstream, "dropped stale update");
                return;
            }

            let values = state.cache.values();
            if values.is_empty() {
                return;
            }

            state.stats.recomputations += 1;
            let AggregatorState {
                decision, stats, ..
            } = &mut *state;
            let Some(eval) = evaluate_or_mean(&self.id, decision.as_mut(), &values) else {
                return;
            };
            if eval.fell_back {
                stats.fallbacks += 1;
            }
            eval.value
        };

        // Fan out without holding the state lock. A concurrent shutdown closes
        // the broker, which halts this pass before its next callback; a
        // callback already running when shutdown returns still completes.
        let report = self.broker.notify(decision, notification.timestamp);
        if report.failed > 0 {
            self.state.lock().stats.callback_failures += report.failed as u64;
        }
    }
}

/// Intermediate stage reducing the latest upstream values into one value.
///
/// Cloning yields another handle to the same aggregator.
#[derive(Clone)]
pub struct Aggregator {
    inner: Arc<AggregatorInner>,
}

impl Aggregator {
    /// Create an aggregator owning `decision` exclusively
    pub fn new(id: impl Into<NodeId>, decision: Box<dyn DecisionFunction>) -> Self {
        let id = id.into();
        Aggregator {
            inner: Arc::new(AggregatorInner {
                broker: Broker::new(id.clone()),
                decision_name: decision.name().to_string(),
                id,
                state: Mutex::new(AggregatorState {
                    cache: LatestCache::new(),
                    decision,
                    stats: AggregatorStats::default(),
                    shut_down: false,
                }),
            }),
        }
    }

    /// Create an aggregator with a fresh instance of a built-in decision
    pub fn from_kind(id: impl Into<NodeId>, kind: DecisionKind) -> CascadeResult<Self> {
        Ok(Self::new(id, kind.build()?))
    }

    /// Start following `upstream`.
    ///
    /// Returns `false` without side effects if it is already attached or
    /// this aggregator has been shut down.
    pub fn attach<P: Publisher + ?Sized>(&self, upstream: &P) -> bool {
        let upstream_id = upstream.id().clone();
        let mut state = self.inner.state.lock();

        if state.shut_down {
            tracing::debug!(aggregator = %self.inner.id, source = %upstream_id, "attach after shutdown ignored");
            return false;
        }
        let Some(epoch) = state.cache.reserve(&upstream_id) else {
            tracing::debug!(aggregator = %self.inner.id, source = %upstream_id, "already attached");
            return false;
        };

        tracing::info!(
            aggregator = %self.inner.id,
            source = %upstream_id,
            method = %self.inner.decision_name,
            "attaching"
        );

        let subscription = upstream.subscribe_callback(self.update_callback(upstream_id.clone(), epoch));
        state.cache.bind(&upstream_id, epoch, subscription);
        true
    }

    fn update_callback(&self, upstream: NodeId, epoch: u64) -> Callback {
        let weak: Weak<AggregatorInner> = Arc::downgrade(&self.inner);
        callback(move |notification| {
            if let Some(inner) = weak.upgrade() {
                inner.on_update(&upstream, epoch, notification);
            }
            Ok(Delivery::Done)
        })
    }

    /// Stop following `upstream` and forget its cached value
    pub fn detach<P: Publisher + ?Sized>(&self, upstream: &P) -> bool {
        self.detach_id(upstream.id().as_str())
    }

    /// Detach by upstream id; unknown ids are a no-op
    pub fn detach_id(&self, upstream: &str) -> bool {
        let removed = self.inner.state.lock().cache.detach(upstream);
        if removed {
            tracing::debug!(aggregator = %self.inner.id, source = upstream, "detached");
        }
        removed
    }

    /// Detach from every upstream, drop every downstream subscription and
    /// refuse new ones.
    ///
    /// Safe to call repeatedly; later calls find nothing to release.
    pub fn shutdown(&self) {
        let detached = {
            let mut state = self.inner.state.lock();
            let first = !state.shut_down;
            state.shut_down = true;
            let detached = state.cache.detach_all();
            if !first && detached == 0 {
                return;
            }
            detached
        };
        self.inner.broker.close();
        tracing::info!(aggregator = %self.inner.id, detached, "aggregator shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.state.lock().shut_down
    }

    /// Attached upstream ids in attach order
    pub fn attached_ids(&self) -> Vec<NodeId> {
        self.inner.state.lock().cache.attached_ids()
    }

    /// Latest cached value per upstream, in attach order
    pub fn cached_values(&self) -> Vec<(NodeId, f64)> {
        self.inner.state.lock().cache.snapshot()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.broker.len()
    }

    /// Name of the configured decision function
    pub fn decision_name(&self) -> &str {
        &self.inner.decision_name
    }

    pub fn stats(&self) -> AggregatorStats {
        self.inner.state.lock().stats.clone()
    }
}

impl Publisher for Aggregator {
    fn id(&self) -> &NodeId {
        &self.inner.id
    }

    fn subscribe_callback(&self, callback: Callback) -> Subscription {
        self.inner.broker.subscribe(callback)
    }
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("id", &self.inner.id)
            .field("decision", &self.inner.decision_name)
            .field("subscribers", &self.inner.broker.len())
            .finish()
    }
}
