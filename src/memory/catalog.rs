//! In-process catalog
//!
//! Keeps the object → replica table in memory and moves bytes between
//! registered leaves when asked to replicate.

use crate::catalog::{Catalog, RebalancePage, RebalanceQuery, ReplicaRecord, ReplicateRequest};
use crate::common::{Error, Result};
use crate::memory::LeafResource;
use crate::resource::{ChildResource, HierarchyPath};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    /// Node the object was registered against
    pub owner: String,
    pub replicas: Vec<ReplicaRecord>,
}

#[derive(Default)]
pub struct MemoryCatalog {
    leaves: Mutex<HashMap<String, Arc<LeafResource>>>,
    objects: Mutex<BTreeMap<String, CatalogEntry>>,
    log: Mutex<Vec<ReplicateRequest>>,
    failing_destinations: Mutex<HashSet<String>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a leaf reachable as a replication source or destination.
    pub fn attach_leaf(&self, leaf: Arc<LeafResource>) {
        lock(&self.leaves).insert(leaf.name().to_string(), leaf);
    }

    pub fn register_object(&self, path: impl Into<String>, owner: impl Into<String>) {
        lock(&self.objects)
            .entry(path.into())
            .or_insert_with(|| CatalogEntry {
                owner: owner.into(),
                replicas: Vec::new(),
            });
    }

    /// Record a replica without moving any bytes.
    pub fn add_replica(&self, path: &str, record: ReplicaRecord) -> Result<()> {
        let mut objects = lock(&self.objects);
        let entry = objects
            .get_mut(path)
            .ok_or_else(|| Error::Catalog(format!("unknown object {}", path)))?;
        match entry.replicas.iter_mut().find(|r| r.hierarchy == record.hierarchy) {
            Some(existing) => *existing = record,
            None => entry.replicas.push(record),
        }
        Ok(())
    }

    pub fn replicas(&self, path: &str) -> Vec<ReplicaRecord> {
        lock(&self.objects)
            .get(path)
            .map(|e| e.replicas.clone())
            .unwrap_or_default()
    }

    pub fn entry(&self, path: &str) -> Option<CatalogEntry> {
        lock(&self.objects).get(path).cloned()
    }

    /// Every replicate call made so far, in order.
    pub fn replications(&self) -> Vec<ReplicateRequest> {
        lock(&self.log).clone()
    }

    /// Make replication onto any hierarchy containing `node` fail.
    pub fn fail_destination(&self, node: impl Into<String>) {
        lock(&self.failing_destinations).insert(node.into());
    }

    pub fn clear_failures(&self) {
        lock(&self.failing_destinations).clear();
    }

    /// Leaf holding the bytes for `object` below `source`. The source may be
    /// a fragment ending above the leaf; any recorded replica under it will do.
    fn source_leaf(&self, object: &str, source: &HierarchyPath) -> Result<String> {
        let recorded = lock(&self.objects).get(object).and_then(|entry| {
            entry
                .replicas
                .iter()
                .filter_map(|r| r.hierarchy.parse::<HierarchyPath>().ok())
                .find(|h| h.starts_with(source))
                .and_then(|h| h.last().map(str::to_string))
        });
        match recorded {
            Some(name) => Ok(name),
            None => source
                .last()
                .map(str::to_string)
                .ok_or_else(|| Error::Catalog("empty source hierarchy".into())),
        }
    }

    fn leaf(&self, name: &str) -> Result<Arc<LeafResource>> {
        lock(&self.leaves)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Catalog(format!("no storage leaf named {}", name)))
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn replicate_object(&self, request: &ReplicateRequest) -> Result<()> {
        lock(&self.log).push(request.clone());

        if let Some(node) = lock(&self.failing_destinations)
            .iter()
            .find(|n| request.destination_hierarchy.contains(n))
        {
            return Err(Error::Catalog(format!(
                "replication of {} onto {} refused by {}",
                request.object, request.destination_hierarchy, node
            )));
        }

        if !lock(&self.objects).contains_key(&request.object) {
            return Err(Error::Catalog(format!("unknown object {}", request.object)));
        }

        let source_name = self.source_leaf(&request.object, &request.source_hierarchy)?;
        let destination_name = request
            .destination_hierarchy
            .last()
            .ok_or_else(|| Error::Catalog("empty destination hierarchy".into()))?;

        let source = self.leaf(&source_name)?;
        let destination = self.leaf(destination_name)?;
        let data = source.contents(&request.object).ok_or_else(|| {
            Error::Catalog(format!(
                "{} has no bytes for {}",
                request.source_hierarchy, request.object
            ))
        })?;
        destination
            .put(&request.object, &data, request.mode)
            .map_err(|e| Error::Catalog(e.to_string()))?;

        self.add_replica(
            &request.object,
            ReplicaRecord::new(request.destination_hierarchy.to_string(), request.mode),
        )?;

        tracing::debug!(
            object = %request.object,
            from = %request.source_hierarchy,
            to = %request.destination_hierarchy,
            bytes = data.len(),
            "Replicated object"
        );
        Ok(())
    }

    async fn replicas_for_rebalance(&self, query: &RebalanceQuery) -> Result<RebalancePage> {
        let objects = lock(&self.objects);
        let matching: Vec<(String, Vec<ReplicaRecord>)> = objects
            .iter()
            .filter(|(path, _)| query.after.as_deref().map_or(true, |after| path.as_str() > after))
            .filter(|(_, entry)| entry.owner == query.node && entry.replicas.len() < query.child_count)
            .map(|(path, entry)| (path.clone(), entry.replicas.clone()))
            .take(query.limit.saturating_add(1))
            .collect();

        let exhausted = matching.len() <= query.limit;
        let objects = matching.into_iter().take(query.limit).collect();
        Ok(RebalancePage { objects, exhausted })
    }
}
