//! Subscription broker
//!
//! Each emitting node owns a `Broker`: an ordered registry of callbacks
//! keyed by monotonically assigned tokens. `subscribe` hands back a
//! `Subscription` that can only remove its own token.
//!
//! Delivery rules:
//! - `notify` iterates a snapshot taken at the moment of firing, so
//!   subscribing or unsubscribing during delivery affects the next pass only
//! - `close` is the exception: it also halts a pass in progress before the
//!   next callback
//! - callbacks run outside the registry lock, in registration order
//! - an `Err` or a panic from one callback is logged and skipped
//! - deferred work returned by a callback is spawned and never awaited

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use cascade_core::{CascadeError, CascadeResult, NodeId, Notification, Timestamp};

/// Work a subscriber wants to continue asynchronously
pub type DeferredWork = Pin<Box<dyn Future<Output = CascadeResult<()>> + Send + 'static>>;

/// Subscriber callback: `(source id, value, timestamp) -> delivery`
pub type Callback = Arc<dyn Fn(&Notification) -> CascadeResult<Delivery> + Send + Sync>;

/// Wrap a closure as a `Callback`
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&Notification) -> CascadeResult<Delivery> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Outcome of a successful callback invocation
pub enum Delivery {
    /// Handled synchronously
    Done,
    /// Continue in an independent task; the emitter does not wait for it
    Deferred(DeferredWork),
}

impl Delivery {
    pub fn deferred<F>(work: F) -> Self
    where
        F: Future<Output = CascadeResult<()>> + Send + 'static,
    {
        Delivery::Deferred(Box::pin(work))
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delivery::Done => f.write_str("Done"),
            Delivery::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Counts from one `notify` pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Callbacks that returned successfully
    pub delivered: usize,
    /// Callbacks that returned an error or panicked
    pub failed: usize,
    /// Successful callbacks that handed back deferred work
    pub deferred: usize,
}

struct Registry {
    next_token: u64,
    entries: Vec<(u64, Callback)>,
    closed: bool,
}

impl Registry {
    fn remove(&mut self, token: u64) -> bool {
        match self.entries.iter().position(|(t, _)| *t == token) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// Ordered subscriber registry owned by one emitting node
pub struct Broker {
    owner: NodeId,
    registry: Arc<Mutex<Registry>>,
}

impl Broker {
    pub fn new(owner: NodeId) -> Self {
        Broker {
            owner,
            registry: Arc::new(Mutex::new(Registry {
                next_token: 1,
                entries: Vec::new(),
                closed: false,
            })),
        }
    }

    /// Id stamped on every notification
    pub fn owner(&self) -> &NodeId {
        &self.owner
    }

    /// Register a callback; the handle removes exactly this registration.
    ///
    /// On a closed broker the callback is discarded and the handle is
    /// inactive from the start.
    pub fn subscribe(&self, callback: Callback) -> Subscription {
        let token = {
            let mut registry = self.registry.lock();
            let token = registry.next_token;
            registry.next_token += 1;
            if registry.closed {
                tracing::debug!(publisher = %self.owner, token, "subscribe on closed broker ignored");
            } else {
                registry.entries.push((token, callback));
                tracing::debug!(publisher = %self.owner, token, "subscribed");
            }
            token
        };

        Subscription {
            token,
            publisher: self.owner.clone(),
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `(owner, value, timestamp)` to every current subscriber
    pub fn notify(&self, value: f64, timestamp: Timestamp) -> DeliveryReport {
        let snapshot: Vec<Callback> = self
            .registry
            .lock()
            .entries
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        let notification = Notification::new(self.owner.clone(), value, timestamp);
        let mut report = DeliveryReport::default();

        for callback in snapshot {
            if self.registry.lock().closed {
                tracing::trace!(publisher = %self.owner, "broker closed mid-delivery");
                break;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(&notification)))
                .unwrap_or(Err(CascadeError::SubscriberPanicked));

            match outcome {
                Ok(Delivery::Done) => report.delivered += 1,
                Ok(Delivery::Deferred(work)) => {
                    report.delivered += 1;
                    report.deferred += 1;
                    spawn_deferred(&self.owner, work);
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(publisher = %self.owner, error = %e, "subscriber callback failed");
                }
            }
        }

        tracing::trace!(publisher = %self.owner, value, ?report, "notified");
        report
    }

    /// Number of registered callbacks
    pub fn len(&self) -> usize {
        self.registry.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every registration at once
    pub fn clear(&self) {
        self.registry.lock().entries.clear();
    }

    /// Drop every registration and refuse new ones.
    ///
    /// A pass already in progress stops before its next callback. A callback
    /// that is already running when `close` is called still completes.
    pub fn close(&self) {
        let mut registry = self.registry.lock();
        registry.closed = true;
        registry.entries.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.registry.lock().closed
    }
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("owner", &self.owner)
            .field("subscribers", &self.len())
            .finish()
    }
}

fn spawn_deferred(owner: &NodeId, work: DeferredWork) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let owner = owner.clone();
            handle.spawn(async move {
                if let Err(e) = work.await {
                    tracing::warn!(publisher = %owner, error = %e, "deferred subscriber work failed");
                }
            });
        }
        Err(_) => {
            tracing::warn!(publisher = %owner, "no runtime for deferred subscriber work; dropped");
        }
    }
}

/// Removal handle for one registration.
///
/// `unsubscribe` is idempotent and safe after the publisher is gone.
/// Dropping the handle leaves the registration in place.
pub struct Subscription {
    token: u64,
    publisher: NodeId,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Remove this registration; returns whether it was still present
    pub fn unsubscribe(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let removed = registry.lock().remove(self.token);
        if removed {
            tracing::debug!(publisher = %self.publisher, token = self.token, "unsubscribed");
        }
        removed
    }

    /// Whether the registration is still present
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .map(|r| r.lock().entries.iter().any(|(t, _)| *t == self.token))
            .unwrap_or(false)
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    /// Id of the node this subscription listens to
    pub fn publisher(&self) -> &NodeId {
        &self.publisher
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("publisher", &self.publisher)
            .field("token", &self.token)
            .finish()
    }
}

/// Capability shared by every node that emits notifications
pub trait Publisher {
    /// Immutable node id, used as the cache key downstream
    fn id(&self) -> &NodeId;

    /// Register a callback on this node
    fn subscribe_callback(&self, callback: Callback) -> Subscription;

    /// Register a closure on this node
    fn subscribe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&Notification) -> CascadeResult<Delivery> + Send + Sync + 'static,
        Self: Sized,
    {
        self.subscribe_callback(callback(f))
    }
}
