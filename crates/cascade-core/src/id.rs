//! Identity types for Cascade pipelines
//!
//! Node ids are human-chosen strings ("USDJPY", "sMean", ...). They are
//! immutable once created and cheap to clone, since every notification
//! carries the emitter's id and every downstream cache is keyed by it.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Node identity - unique within its topology layer
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(Arc<str>);

impl NodeId {
    #[inline]
    pub fn new(id: impl AsRef<str>) -> Self {
        NodeId(Arc::from(id.as_ref()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        NodeId::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        NodeId(Arc::from(id))
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for NodeId {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for NodeId {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_node_id_clone_shares_storage() {
        let id = NodeId::new("USDJPY");
        let copy = id.clone();
        assert_eq!(id, copy);
        assert!(Arc::ptr_eq(&id.0, &copy.0));
    }

    #[test]
    fn test_node_id_lookup_by_str() {
        let mut cache: HashMap<NodeId, f64> = HashMap::new();
        cache.insert(NodeId::from("G1"), 1.5);

        assert_eq!(cache.get("G1"), Some(&1.5));
        assert_eq!(cache.get("G2"), None);
    }

    #[test]
    fn test_node_id_display_and_debug() {
        let id = NodeId::from(String::from("sMean"));
        assert_eq!(id.to_string(), "sMean");
        assert_eq!(format!("{:?}", id), "Node(sMean)");
        assert_eq!(id, "sMean");
    }
}
