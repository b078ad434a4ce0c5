//! # Per-Request Side Table
//!
//! Plugins that need to attach data to a request store it here, keyed by
//! [`RequestId`], instead of mutating the request itself. The table is
//! cheap to clone and every clone shares the same storage.

use crate::request::RequestId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Thread-safe map from request identity to plugin data
///
/// ```
/// use trellis_core::{Environ, Request, SideTable};
///
/// let table = SideTable::new();
/// let req = Request::build(Environ::get("/")).unwrap();
/// table.insert(req.id(), "alice".to_string());
/// assert_eq!(table.get(req.id()).as_deref(), Some("alice"));
/// ```
pub struct SideTable<V> {
    data: Arc<RwLock<HashMap<RequestId, V>>>,
}

impl<V> Clone for SideTable<V> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<V> Default for SideTable<V> {
    fn default() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<V> SideTable<V> {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, returning the one it replaced
    pub fn insert(&self, id: RequestId, value: V) -> Option<V> {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, value)
    }

    /// Drop and return the value for a request
    pub fn remove(&self, id: RequestId) -> Option<V> {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Whether a value is stored for this request
    #[must_use]
    pub fn contains(&self, id: RequestId) -> bool {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    /// Number of live entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> SideTable<V> {
    /// Cloned value for a request
    #[must_use]
    pub fn get(&self, id: RequestId) -> Option<V> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }
}

impl<V> fmt::Debug for SideTable<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SideTable")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environ::Environ;
    use crate::request::Request;

    fn id() -> RequestId {
        Request::build(Environ::get("/")).unwrap().id()
    }

    #[test]
    fn test_insert_get_remove() {
        let table = SideTable::new();
        let a = id();
        assert!(table.is_empty());

        assert_eq!(table.insert(a, 1), None);
        assert_eq!(table.insert(a, 2), Some(1));
        assert_eq!(table.get(a), Some(2));
        assert!(table.contains(a));

        assert_eq!(table.remove(a), Some(2));
        assert!(!table.contains(a));
        assert!(table.is_empty());
    }

    #[test]
    fn test_entries_are_per_request() {
        let table = SideTable::new();
        let (a, b) = (id(), id());
        assert_ne!(a, b);
        table.insert(a, "a");
        assert_eq!(table.get(b), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_clones_share_storage() {
        let table = SideTable::new();
        let other = table.clone();
        let a = id();
        other.insert(a, vec![1, 2]);
        assert_eq!(table.get(a), Some(vec![1, 2]));
    }
}
