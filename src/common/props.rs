//! Request-scoped typed property store
//!
//! Holds the state a replication node keeps for the lifetime of one client
//! request: the selected hierarchy, the sibling list and the tracked
//! operations. A missing key is a normal condition and reads as `None`;
//! reading a key with the wrong type is a [`Error::PropertyStore`].

use crate::common::{Error, Result};
use std::any::{type_name, Any};
use std::collections::HashMap;

/// Key under which the router stores the selected hierarchy
pub const SELECTED_HIERARCHY: &str = "selected_hierarchy";
/// Key under which the router stores the sibling list
pub const SIBLING_LIST: &str = "sibling_list";
/// Key under which the tracker stores the operation queue
pub const OPERATION_QUEUE: &str = "operation_queue";

struct Entry {
    value: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
}

#[derive(Default)]
pub struct PropertyStore {
    entries: HashMap<String, Entry>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a copy of the value stored under `key`.
    pub fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        match self.entries.get(key) {
            None => Ok(None),
            Some(entry) => entry
                .value
                .downcast_ref::<T>()
                .cloned()
                .map(Some)
                .ok_or_else(|| {
                    Error::PropertyStore(format!(
                        "property {} holds {}, not {}",
                        key,
                        entry.type_name,
                        type_name::<T>()
                    ))
                }),
        }
    }

    pub fn set<T>(&mut self, key: &str, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Box::new(value),
                type_name: type_name::<T>(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for PropertyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, e)| (k, e.type_name)))
            .finish()
    }
}
