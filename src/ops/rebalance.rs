//! Heal replicas missing from children of a replication node

use crate::catalog::{Catalog, RebalanceQuery, ReplicaRecord, ReplicateRequest};
use crate::common::{Error, Result};
use crate::resource::{ChildMap, FileObject, HierarchyPath, RequestContext, RouteOperation, Session};
use std::sync::Arc;

/// Scan the catalog for objects owned by `node` that some child lacks, and
/// replicate each one onto every child missing it.
///
/// The first error aborts the pass. Nothing is rolled back; running the pass
/// again re-scans from the start.
pub async fn rebalance(
    node: &str,
    children: &ChildMap,
    catalog: &dyn Catalog,
    limit: usize,
) -> Result<RebalanceReport> {
    if children.is_empty() {
        return Err(Error::Parameter(format!("{} has no children to rebalance", node)));
    }
    if limit == 0 {
        return Err(Error::Parameter("rebalance page limit must be positive".into()));
    }

    let mut names = children.names();
    names.sort();

    tracing::info!(node, children = ?names, limit, "Starting rebalance");

    let mut report = RebalanceReport::default();
    let result = scan(node, &names, children, catalog, limit, &mut report).await;

    match result {
        Ok(()) => {
            tracing::info!(
                node,
                pages = report.pages,
                objects_checked = report.objects_checked,
                replicas_created = report.replicas_created,
                "Rebalance complete"
            );
            Ok(report)
        }
        Err(e) => {
            tracing::error!(node, error = %e, replicas_created = report.replicas_created, "Rebalance aborted");
            Err(e)
        }
    }
}

/// Page through the catalog, healing as we go. `report` is updated in place
/// so an aborted pass still reports what it did.
async fn scan(
    node: &str,
    names: &[String],
    children: &ChildMap,
    catalog: &dyn Catalog,
    limit: usize,
    report: &mut RebalanceReport,
) -> Result<()> {
    let session = Arc::new(Session::new("", "rebalance"));
    let mut query = RebalanceQuery {
        node: node.to_string(),
        child_count: names.len(),
        limit,
        after: None,
    };

    loop {
        let page = catalog.replicas_for_rebalance(&query).await?;
        report.pages += 1;
        tracing::debug!(node, page = report.pages, objects = page.objects.len(), "Fetched rebalance page");

        for (object, replicas) in &page.objects {
            if object.is_empty() {
                return Err(Error::Parameter(format!("empty object path in {} rebalance page", node)));
            }
            report.objects_checked += 1;
            for name in names {
                if replicas.iter().any(|r| r.is_under(name)) {
                    continue;
                }
                heal(node, name, object, replicas, children, catalog, &session).await?;
                report.replicas_created += 1;
            }
        }

        if page.exhausted || page.objects.is_empty() {
            return Ok(());
        }
        query.after = page.objects.last().map(|(object, _)| object.clone());
    }
}

/// Create the replica of `object` that child `missing` lacks.
async fn heal(
    node: &str,
    missing: &str,
    object: &str,
    replicas: &[ReplicaRecord],
    children: &ChildMap,
    catalog: &dyn Catalog,
    session: &Arc<Session>,
) -> Result<()> {
    let source = replicas
        .first()
        .ok_or_else(|| Error::Catalog(format!("{} has no replicas to copy from", object)))?;
    let fragment = source
        .hierarchy
        .parse::<HierarchyPath>()?
        .prefix_through(node)?;
    let resource = fragment
        .first()
        .ok_or_else(|| Error::Hierarchy(format!("empty source hierarchy for {}", object)))?
        .to_string();

    // Maintenance objects are neither tracked nor fanned out below us.
    let ctx = RequestContext::new(
        session.clone(),
        FileObject::new(object, fragment.clone())
            .with_mode(source.mode)
            .with_maintenance(true),
    );
    let child = children.resolve(missing)?;
    let vote = child
        .resolve_hierarchy(&ctx, RouteOperation::Create, "", fragment.clone())
        .await?;
    if !vote.is_viable() {
        return Err(Error::NoViableChild(format!("{} on {}", object, missing)));
    }

    tracing::debug!(
        object,
        child = missing,
        source = %fragment,
        destination = %vote.hierarchy,
        "Healing missing replica"
    );

    catalog
        .replicate_object(&ReplicateRequest {
            object: object.to_string(),
            source_hierarchy: fragment,
            destination_hierarchy: vote.hierarchy,
            source_resource: resource.clone(),
            destination_resource: resource,
            mode: source.mode,
        })
        .await
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebalanceReport {
    pub pages: usize,
    pub objects_checked: usize,
    pub replicas_created: usize,
}
