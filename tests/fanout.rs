//! Operation tracking and fan-out to sibling hierarchies

use bytes::Bytes;
use replkit::catalog::ReplicaRecord;
use replkit::common::ErrorKind;
use replkit::repl::{FanoutReplicator, OperationKind, TrackedState};
use replkit::resource::{FileObject, RouteOperation};
use replkit::{Catalog, HierarchyPath, RequestContext, ResourceTree, Session, TopologyConfig};
use std::sync::Arc;

const TOPOLOGY: &str = r#"
    [[nodes]]
    name = "repl"
    kind = "replication"
    children = ["a", "b", "c"]

    [[nodes]]
    name = "a"
    kind = "leaf"
    vote = 0.9

    [[nodes]]
    name = "b"
    kind = "leaf"
    vote = 0.5

    [[nodes]]
    name = "c"
    kind = "leaf"
    vote = 0.3
"#;

fn tree() -> ResourceTree {
    ResourceTree::build(&TopologyConfig::from_toml(TOPOLOGY).unwrap()).unwrap()
}

/// Route a create for `path` and return a context pointing at the selected
/// hierarchy, as the host runtime would after resolve_hierarchy.
async fn routed(tree: &ResourceTree, session: &Arc<Session>, path: &str) -> RequestContext {
    let vote = tree
        .route(session.clone(), path, RouteOperation::Create, "localhost")
        .await
        .unwrap();
    RequestContext::new(session.clone(), FileObject::new(path, vote.hierarchy))
}

#[tokio::test]
async fn test_modified_fans_out_to_siblings() {
    let tree = tree();
    let repl = tree.repl("repl").unwrap();
    let session = Arc::new(Session::default());
    let ctx = routed(&tree, &session, "/zone/f").await;
    assert_eq!(ctx.object.hierarchy().to_string(), "repl;a");

    repl.create(&ctx).await.unwrap();
    repl.write(&ctx, Bytes::from_static(b"payload")).await.unwrap();
    repl.close(&ctx).await.unwrap();

    let catalog = tree.catalog();
    catalog.register_object("/zone/f", "repl");
    catalog
        .add_replica("/zone/f", ReplicaRecord::new("repl;a", 0o600))
        .unwrap();

    // Neither write nor close pushed anything yet.
    assert!(tree.leaf("b").unwrap().contents("/zone/f").is_none());

    repl.modified(&ctx).await.unwrap();

    for leaf in ["a", "b", "c"] {
        assert_eq!(
            tree.leaf(leaf).unwrap().contents("/zone/f").unwrap().as_ref(),
            b"payload",
            "leaf {}",
            leaf
        );
    }
    assert_eq!(catalog.replicas("/zone/f").len(), 3);

    // The tracked record survives fan-out.
    let tracked = repl.tracker().get(&session, "/zone/f").unwrap().unwrap();
    assert_eq!(tracked.state, TrackedState::Written);
}

#[tokio::test]
async fn test_fanout_failure_does_not_fail_modified() {
    let tree = tree();
    let repl = tree.repl("repl").unwrap();
    let session = Arc::new(Session::default());
    let ctx = routed(&tree, &session, "/zone/f").await;

    repl.create(&ctx).await.unwrap();
    repl.write(&ctx, Bytes::from_static(b"payload")).await.unwrap();
    let catalog = tree.catalog();
    catalog.register_object("/zone/f", "repl");
    catalog.fail_destination("c");

    assert_eq!(repl.modified(&ctx).await.unwrap(), 0);

    // b got its copy and keeps it; c did not.
    assert!(tree.leaf("b").unwrap().contains("/zone/f"));
    assert!(!tree.leaf("c").unwrap().contains("/zone/f"));
    assert_eq!(catalog.replications().len(), 2);
}

#[tokio::test]
async fn test_partial_failure_reports_failed_sibling() {
    let tree = tree();
    let repl = tree.repl("repl").unwrap();
    let catalog = tree.catalog();
    let session = Arc::new(Session::default());

    tree.leaf("a").unwrap().put("/zone/f", b"bytes", 0o600).unwrap();
    catalog.register_object("/zone/f", "repl");
    catalog.fail_destination("c");

    let object = FileObject::new("/zone/f", "repl;a".parse().unwrap());
    let tracked = repl
        .tracker()
        .record(&session, &object, OperationKind::Create)
        .unwrap();
    let before = repl.tracker().queue(&session).unwrap();

    let replicator = FanoutReplicator::new(catalog.clone(), 0);
    let siblings: Vec<HierarchyPath> = vec!["repl;b".parse().unwrap(), "repl;c".parse().unwrap()];
    let err = replicator
        .replicate(&tracked, &object.hierarchy, &siblings)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Replication);
    let failures = err.replication_failures().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].sibling, "repl;c");

    assert!(tree.leaf("b").unwrap().contains("/zone/f"));
    assert_eq!(repl.tracker().queue(&session).unwrap(), before);
}

#[tokio::test]
async fn test_unlink_is_never_fanned_out() {
    let tree = tree();
    let repl = tree.repl("repl").unwrap();
    let catalog = tree.catalog();
    for leaf in ["a", "b", "c"] {
        tree.leaf(leaf).unwrap().put("/zone/old", b"x", 0o600).unwrap();
    }
    catalog.register_object("/zone/old", "repl");

    let session = Arc::new(Session::default());
    let vote = tree
        .route(session.clone(), "/zone/old", RouteOperation::Unlink, "localhost")
        .await
        .unwrap();
    let ctx = RequestContext::new(session.clone(), FileObject::new("/zone/old", vote.hierarchy));

    repl.unlink(&ctx).await.unwrap();
    assert_eq!(
        repl.tracker().get(&session, "/zone/old").unwrap().unwrap().state,
        TrackedState::Unlinked
    );

    repl.modified(&ctx).await.unwrap();
    assert!(catalog.replications().is_empty());
    assert!(tree.leaf("b").unwrap().contains("/zone/old"));
    assert!(tree.leaf("c").unwrap().contains("/zone/old"));
}

#[tokio::test]
async fn test_maintenance_events_skip_tracking_and_fanout() {
    let tree = tree();
    let repl = tree.repl("repl").unwrap();
    let session = Arc::new(Session::default());
    let ctx = routed(&tree, &session, "/zone/m").await;
    let maintenance = ctx.with_object(
        FileObject::new("/zone/m", ctx.object.hierarchy().clone()).with_maintenance(true),
    );

    repl.create(&maintenance).await.unwrap();
    repl.write(&maintenance, Bytes::from_static(b"m")).await.unwrap();
    tree.catalog().register_object("/zone/m", "repl");
    repl.modified(&maintenance).await.unwrap();

    assert!(repl.tracker().queue(&session).unwrap().is_empty());
    assert!(tree.catalog().replications().is_empty());
}

#[tokio::test]
async fn test_create_after_unlink_is_mismatch() {
    let tree = tree();
    let repl = tree.repl("repl").unwrap();
    tree.leaf("a").unwrap().put("/zone/f", b"x", 0o600).unwrap();

    let session = Arc::new(Session::default());
    let ctx = RequestContext::new(
        session.clone(),
        FileObject::new("/zone/f", "repl;a".parse().unwrap()),
    );
    repl.unlink(&ctx).await.unwrap();

    let err = repl.create(&ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MismatchedOperation);
    assert_eq!(
        repl.tracker().get(&session, "/zone/f").unwrap().unwrap().state,
        TrackedState::Unlinked
    );
}

#[tokio::test]
async fn test_every_sibling_attempted_when_all_fail() {
    let tree = tree();
    let catalog: Arc<dyn Catalog> = tree.catalog();
    let replicator = FanoutReplicator::new(catalog, 1);
    let session = Arc::new(Session::default());
    let object = FileObject::new("/zone/none", "repl;a".parse().unwrap());
    let tracked = tree
        .repl("repl")
        .unwrap()
        .tracker()
        .record(&session, &object, OperationKind::Write)
        .unwrap();

    // Unknown to the catalog: every sibling fails, all are attempted.
    let siblings: Vec<HierarchyPath> = vec!["repl;b".parse().unwrap(), "repl;c".parse().unwrap()];
    let err = replicator
        .replicate(&tracked, &object.hierarchy, &siblings)
        .await
        .unwrap_err();
    assert_eq!(err.replication_failures().unwrap().len(), 2);
    assert_eq!(tree.catalog().replications().len(), 2);
}
