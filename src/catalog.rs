//! The catalog seam: where replicas live, and how bytes move between them

use crate::common::Result;
use crate::resource::HierarchyPath;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One physical replica of a data object, as the catalog records it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaRecord {
    /// Full hierarchy string of the resource holding the replica
    pub hierarchy: String,
    pub mode: u32,
}

impl ReplicaRecord {
    pub fn new(hierarchy: impl Into<String>, mode: u32) -> Self {
        Self {
            hierarchy: hierarchy.into(),
            mode,
        }
    }

    /// Does this replica sit below `node`?
    ///
    /// Matches whole hierarchy segments, not substrings: a replica on
    /// `repl;alpha` is not under `a`.
    pub fn is_under(&self, node: &str) -> bool {
        self.hierarchy
            .split(crate::resource::HIERARCHY_DELIMITER)
            .any(|segment| segment.trim() == node)
    }
}

/// Copy one object from an existing replica to a new hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicateRequest {
    pub object: String,
    pub source_hierarchy: HierarchyPath,
    pub destination_hierarchy: HierarchyPath,
    pub source_resource: String,
    pub destination_resource: String,
    pub mode: u32,
}

/// Objects owned by `node` with fewer than `child_count` replicas, at most
/// `limit` of them, strictly after the `after` object path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebalanceQuery {
    pub node: String,
    pub child_count: usize,
    pub limit: usize,
    pub after: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebalancePage {
    /// Object path and its replicas, ordered by path
    pub objects: Vec<(String, Vec<ReplicaRecord>)>,
    /// No further objects match the query after this page
    pub exhausted: bool,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Copy `request.object` between hierarchies. Replicating onto a
    /// hierarchy that already holds a replica overwrites it.
    async fn replicate_object(&self, request: &ReplicateRequest) -> Result<()>;

    async fn replicas_for_rebalance(&self, query: &RebalanceQuery) -> Result<RebalancePage>;
}
