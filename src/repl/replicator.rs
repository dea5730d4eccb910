//! Fan-out of tracked create/write operations to sibling hierarchies
//!
//! Every sibling is attempted even when an earlier one fails. Siblings that
//! succeeded are left as they are; a later rebalance pass picks up whatever
//! a partial failure missed.

use crate::catalog::{Catalog, ReplicateRequest};
use crate::common::{Error, ReplicationFailure, Result};
use crate::repl::tracker::TrackedOperation;
use crate::resource::HierarchyPath;
use futures_util::future::{self, FutureExt};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;

pub struct FanoutReplicator {
    catalog: Arc<dyn Catalog>,
    concurrency: usize,
}

impl FanoutReplicator {
    pub fn new(catalog: Arc<dyn Catalog>, concurrency: usize) -> Self {
        Self {
            catalog,
            concurrency,
        }
    }

    /// Copy `op.object` from `source` to every hierarchy in `siblings`.
    pub async fn replicate(
        &self,
        op: &TrackedOperation,
        source: &HierarchyPath,
        siblings: &[HierarchyPath],
    ) -> Result<()> {
        if !op.state.needs_fanout() {
            tracing::debug!(object = %op.object, state = %op.state, "Nothing to fan out");
            return Ok(());
        }

        let resource = source
            .first()
            .ok_or_else(|| Error::Hierarchy(format!("empty source hierarchy for {}", op.object)))?
            .to_string();

        let limit = match self.concurrency {
            0 => siblings.len().max(1),
            n => n,
        };

        let copies: Vec<_> = siblings
            .iter()
            .map(|sibling| {
                let request = ReplicateRequest {
                    object: op.object.clone(),
                    source_hierarchy: source.clone(),
                    destination_hierarchy: sibling.clone(),
                    source_resource: resource.clone(),
                    destination_resource: resource.clone(),
                    mode: op.mode,
                };
                let catalog = self.catalog.clone();
                async move {
                    let result = catalog.replicate_object(&request).await;
                    (request.destination_hierarchy, result)
                }
                .boxed()
            })
            .collect();

        let failures: Vec<ReplicationFailure> = stream::iter(copies)
            .buffered(limit)
            .filter_map(|(sibling, result)| {
                future::ready(match result {
                    Ok(()) => {
                        tracing::debug!(%sibling, "Replicated to sibling");
                        None
                    }
                    Err(e) => Some(ReplicationFailure {
                        sibling: sibling.to_string(),
                        reason: e.to_string(),
                    }),
                })
            })
            .collect()
            .await;

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Replication {
                object: op.object.clone(),
                failures,
            })
        }
    }

    /// Fan out every operation in `queue`. All operations are attempted;
    /// the failures of all of them are reported together.
    pub async fn replicate_all(
        &self,
        queue: &[TrackedOperation],
        source: &HierarchyPath,
        siblings: &[HierarchyPath],
    ) -> Result<()> {
        let mut failed_objects = Vec::new();
        let mut failures = Vec::new();
        for op in queue {
            if let Err(e) = self.replicate(op, source, siblings).await {
                match e {
                    Error::Replication { object, failures: f } => {
                        failed_objects.push(object);
                        failures.extend(f);
                    }
                    other => return Err(other),
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Replication {
                object: failed_objects.join(", "),
                failures,
            })
        }
    }
}
