//! Latest-value cache keyed by upstream node id
//!
//! Entries are kept in attach order, and that order is the order in which
//! values are handed to decision functions. Re-attaching a detached id
//! appends it at the end.
//!
//! Each attachment carries an epoch. A callback registered for an older
//! epoch can no longer write, so a notification still in flight when its
//! upstream is detached never re-populates the cache.

use cascade_core::NodeId;

use crate::Subscription;

struct Attachment {
    id: NodeId,
    epoch: u64,
    subscription: Option<Subscription>,
    latest: Option<f64>,
}

/// Result of recording an upstream value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheWrite {
    /// Value stored; a recomputation is due
    Stored,
    /// The attachment this value was sent for no longer exists
    Stale,
}

/// Attach-ordered latest-value cache
#[derive(Default)]
pub struct LatestCache {
    entries: Vec<Attachment>,
    next_epoch: u64,
}

impl LatestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` is currently attached
    pub fn is_attached(&self, id: &str) -> bool {
        self.entries.iter().any(|a| a.id.as_str() == id)
    }

    /// Reserve an attachment slot for `id` and return its epoch.
    ///
    /// Returns `None` if `id` is already attached.
    pub fn reserve(&mut self, id: &NodeId) -> Option<u64> {
        if self.is_attached(id.as_str()) {
            return None;
        }
        self.next_epoch += 1;
        self.entries.push(Attachment {
            id: id.clone(),
            epoch: self.next_epoch,
            subscription: None,
            latest: None,
        });
        Some(self.next_epoch)
    }

    /// Bind the upstream subscription to a reserved slot
    pub fn bind(&mut self, id: &NodeId, epoch: u64, subscription: Subscription) {
        match self.entries.iter_mut().find(|a| a.id == *id && a.epoch == epoch) {
            Some(entry) => entry.subscription = Some(subscription),
            // Slot vanished in between; do not leak the registration
            None => {
                subscription.unsubscribe();
            }
        }
    }

    /// Store the latest value for `id`, if `epoch` is still current
    pub fn record(&mut self, id: &NodeId, epoch: u64, value: f64) -> CacheWrite {
        match self.entries.iter_mut().find(|a| a.id == *id && a.epoch == epoch) {
            Some(entry) => {
                entry.latest = Some(value);
                CacheWrite::Stored
            }
            None => CacheWrite::Stale,
        }
    }

    /// Remove `id` and cancel its upstream subscription
    pub fn detach(&mut self, id: &str) -> bool {
        let Some(pos) = self.entries.iter().position(|a| a.id.as_str() == id) else {
            return false;
        };
        let entry = self.entries.remove(pos);
        if let Some(subscription) = entry.subscription {
            subscription.unsubscribe();
        }
        true
    }

    /// Detach everything; returns how many attachments were removed
    pub fn detach_all(&mut self) -> usize {
        let count = self.entries.len();
        for entry in self.entries.drain(..) {
            if let Some(subscription) = entry.subscription {
                subscription.unsubscribe();
            }
        }
        count
    }

    /// Cached values in attach order
    pub fn values(&self) -> Vec<f64> {
        self.entries.iter().filter_map(|a| a.latest).collect()
    }

    /// Cached `(id, value)` pairs in attach order
    pub fn snapshot(&self) -> Vec<(NodeId, f64)> {
        self.entries
            .iter()
            .filter_map(|a| a.latest.map(|v| (a.id.clone(), v)))
            .collect()
    }

    /// Attached ids in attach order, cached or not
    pub fn attached_ids(&self) -> Vec<NodeId> {
        self.entries.iter().map(|a| a.id.clone()).collect()
    }

    /// Number of attachments
    pub fn attached_len(&self) -> usize {
        self.entries.len()
    }

    /// Number of attachments holding a value
    pub fn cached_len(&self) -> usize {
        self.entries.iter().filter(|a| a.latest.is_some()).count()
    }

    /// True when no attachment holds a value yet
    pub fn is_empty(&self) -> bool {
        self.cached_len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{callback, Broker, Delivery};

    #[test]
    fn test_reserve_rejects_duplicates() {
        let mut cache = LatestCache::new();
        let id = NodeId::from("G1");

        assert!(cache.reserve(&id).is_some());
        assert!(cache.reserve(&id).is_none());
        assert_eq!(cache.attached_len(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_values_follow_attach_order() {
        let mut cache = LatestCache::new();
        let (a, b, c) = (NodeId::from("A"), NodeId::from("B"), NodeId::from("C"));
        let ea = cache.reserve(&a).unwrap();
        let eb = cache.reserve(&b).unwrap();
        let ec = cache.reserve(&c).unwrap();

        cache.record(&c, ec, 3.0);
        cache.record(&a, ea, 1.0);
        assert_eq!(cache.values(), vec![1.0, 3.0]);

        cache.record(&b, eb, 2.0);
        assert_eq!(cache.values(), vec![1.0, 2.0, 3.0]);

        // Re-attach moves to the back
        cache.detach("A");
        let ea2 = cache.reserve(&a).unwrap();
        cache.record(&a, ea2, 10.0);
        assert_eq!(cache.values(), vec![2.0, 3.0, 10.0]);
    }

    #[test]
    fn test_stale_epoch_cannot_write() {
        let mut cache = LatestCache::new();
        let id = NodeId::from("G1");
        let old = cache.reserve(&id).unwrap();
        cache.detach("G1");
        let new = cache.reserve(&id).unwrap();

        assert_eq!(cache.record(&id, old, 5.0), CacheWrite::Stale);
        assert!(cache.is_empty());
        assert_eq!(cache.record(&id, new, 6.0), CacheWrite::Stored);
        assert_eq!(cache.snapshot(), vec![(id, 6.0)]);
    }

    #[test]
    fn test_detach_cancels_subscription() {
        let broker = Broker::new(NodeId::from("G1"));
        let mut cache = LatestCache::new();
        let id = broker.owner().clone();

        let epoch = cache.reserve(&id).unwrap();
        let sub = broker.subscribe(callback(|_| Ok(Delivery::Done)));
        cache.bind(&id, epoch, sub);
        assert_eq!(broker.len(), 1);

        assert!(cache.detach("G1"));
        assert!(!cache.detach("G1"));
        assert!(broker.is_empty());
    }

    #[test]
    fn test_detach_all_reports_count() {
        let mut cache = LatestCache::new();
        cache.reserve(&NodeId::from("A"));
        cache.reserve(&NodeId::from("B"));

        assert_eq!(cache.detach_all(), 2);
        assert_eq!(cache.attached_len(), 0);
        assert!(cache.attached_ids().is_empty());
    }
}
