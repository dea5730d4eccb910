//! Vote routing through replication nodes

use replkit::common::{ErrorKind, ReplConfig};
use replkit::repl::ReplResource;
use replkit::resource::{ChildMap, ChildResource, FileObject, RouteOperation};
use replkit::{Error, HierarchyPath, LeafResource, MemoryCatalog, RequestContext, Session};
use std::sync::Arc;

fn leaf(name: &str, vote: f64) -> Arc<LeafResource> {
    Arc::new(LeafResource::new(name, "localhost", vote))
}

fn repl_over(name: &str, children: &[Arc<dyn ChildResource>], config: ReplConfig) -> ReplResource {
    let mut map = ChildMap::new();
    for child in children {
        map.register(child.clone()).unwrap();
    }
    ReplResource::new(name, map, Arc::new(MemoryCatalog::new()), config).unwrap()
}

fn ctx(session: &Arc<Session>, path: &str) -> RequestContext {
    RequestContext::new(session.clone(), FileObject::new(path, HierarchyPath::new()))
}

#[tokio::test]
async fn test_highest_vote_wins() {
    let x = leaf("x", 0.8);
    let y = leaf("y", 0.6);
    let repl = repl_over("repl", &[y.clone(), x.clone()], ReplConfig::default());
    let session = Arc::new(Session::default());

    let vote = repl
        .resolve_hierarchy(&ctx(&session, "/zone/f"), RouteOperation::Create, "localhost", HierarchyPath::new())
        .await
        .unwrap();

    assert_eq!(vote.hierarchy.last(), Some("x"));
    assert_eq!(vote.score, 0.8);
    let siblings = repl.sibling_list(&session).unwrap().unwrap();
    assert_eq!(siblings, vec!["repl;y".parse::<HierarchyPath>().unwrap()]);
    assert_eq!(
        repl.router().selected_hierarchy(&session).unwrap().unwrap().to_string(),
        "repl;x"
    );
}

#[tokio::test]
async fn test_all_zero_votes_is_no_viable_child() {
    let repl = repl_over(
        "repl",
        &[leaf("a", 0.0), leaf("b", 0.0)],
        ReplConfig::default(),
    );
    let session = Arc::new(Session::default());

    let err = repl
        .resolve_hierarchy(&ctx(&session, "/zone/f"), RouteOperation::Create, "localhost", HierarchyPath::new())
        .await
        .unwrap_err();

    assert!(err.is_routing());
    assert!(matches!(err.root(), Error::NoViableChild(_)));
    assert!(repl.sibling_list(&session).unwrap().is_none());
    assert!(repl.router().selected_hierarchy(&session).unwrap().is_none());
}

#[tokio::test]
async fn test_sibling_list_is_memoized_per_session() {
    let x = leaf("x", 0.8);
    let y = leaf("y", 0.6);
    let repl = repl_over("repl", &[x.clone(), y.clone()], ReplConfig::default());
    let session = Arc::new(Session::default());
    let request = ctx(&session, "/zone/f");

    repl.resolve_hierarchy(&request, RouteOperation::Create, "localhost", HierarchyPath::new())
        .await
        .unwrap();

    x.set_vote(0.1);
    y.set_vote(0.9);
    let second = repl
        .resolve_hierarchy(&request, RouteOperation::Create, "localhost", HierarchyPath::new())
        .await
        .unwrap();
    assert_eq!(second.hierarchy.to_string(), "repl;y");

    let siblings = repl.sibling_list(&session).unwrap().unwrap();
    assert_eq!(siblings.len(), 1);
    assert_eq!(siblings[0].to_string(), "repl;y");
    assert_eq!(
        repl.router().selected_hierarchy(&session).unwrap().unwrap().to_string(),
        "repl;y"
    );

    // A new session computes its own list.
    let fresh = Arc::new(Session::default());
    repl.resolve_hierarchy(&ctx(&fresh, "/zone/f"), RouteOperation::Create, "localhost", HierarchyPath::new())
        .await
        .unwrap();
    assert_eq!(
        repl.sibling_list(&fresh).unwrap().unwrap()[0].to_string(),
        "repl;x"
    );
}

#[tokio::test]
async fn test_tie_goes_to_first_registered_child() {
    let repl = repl_over(
        "repl",
        &[leaf("b", 0.5), leaf("a", 0.5), leaf("c", 0.5)],
        ReplConfig::default(),
    );
    let session = Arc::new(Session::default());
    for _ in 0..5 {
        let vote = repl
            .resolve_hierarchy(&ctx(&session, "/zone/f"), RouteOperation::Create, "", HierarchyPath::new())
            .await
            .unwrap();
        assert_eq!(vote.hierarchy.to_string(), "repl;b");
    }
}

#[tokio::test]
async fn test_failed_probe_fails_routing() {
    let broken = leaf("b", 0.9);
    broken.set_failing(true);
    let repl = repl_over("repl", &[leaf("a", 0.5), broken], ReplConfig::default());
    let session = Arc::new(Session::default());

    let err = repl
        .resolve_hierarchy(&ctx(&session, "/zone/f"), RouteOperation::Create, "localhost", HierarchyPath::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Routing);
    assert!(matches!(err.root(), Error::ChildProbe { child, .. } if child == "b"));
    assert!(repl.sibling_list(&session).unwrap().is_none());
}

#[tokio::test]
async fn test_open_prefers_children_holding_the_object() {
    let a = leaf("a", 0.9);
    let b = leaf("b", 0.2);
    b.put("/zone/existing", b"data", 0o600).unwrap();
    let repl = repl_over("repl", &[a, b], ReplConfig::default());
    let session = Arc::new(Session::default());

    let vote = repl
        .resolve_hierarchy(&ctx(&session, "/zone/existing"), RouteOperation::Open, "localhost", HierarchyPath::new())
        .await
        .unwrap();
    assert_eq!(vote.hierarchy.to_string(), "repl;b");
}

#[tokio::test]
async fn test_remote_host_halves_vote() {
    let near = Arc::new(LeafResource::new("near", "client.example", 0.6));
    let far = Arc::new(LeafResource::new("far", "elsewhere.example", 1.0));
    let repl = repl_over("repl", &[far, near], ReplConfig::default());
    let session = Arc::new(Session::default());

    let vote = repl
        .resolve_hierarchy(&ctx(&session, "/zone/f"), RouteOperation::Create, "client.example", HierarchyPath::new())
        .await
        .unwrap();
    assert_eq!(vote.hierarchy.to_string(), "repl;near");
}

#[tokio::test]
async fn test_replica_requests_rejected_when_configured() {
    let config = ReplConfig {
        reject_replica_requests: true,
        ..ReplConfig::default()
    };
    let repl = repl_over("repl", &[leaf("a", 1.0)], config);
    let session = Arc::new(Session::default());

    let mut object = FileObject::new("/zone/f", HierarchyPath::new());
    object.replica_requested = Some(1);
    let err = repl
        .resolve_hierarchy(
            &RequestContext::new(session.clone(), object),
            RouteOperation::Open,
            "localhost",
            HierarchyPath::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);

    let object = FileObject::new("/zone/f", HierarchyPath::new())
        .with_keyword(replkit::resource::REPL_API_KEYWORD, "1");
    let err = repl
        .resolve_hierarchy(
            &RequestContext::new(session.clone(), object),
            RouteOperation::Create,
            "localhost",
            HierarchyPath::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);

    // Off by default.
    let permissive = repl_over("repl", &[leaf("a", 1.0)], ReplConfig::default());
    let mut object = FileObject::new("/zone/f", HierarchyPath::new());
    object.replica_requested = Some(1);
    assert!(permissive
        .resolve_hierarchy(
            &RequestContext::new(session, object),
            RouteOperation::Create,
            "localhost",
            HierarchyPath::new(),
        )
        .await
        .is_ok());
}

#[tokio::test]
async fn test_nested_replication_nodes() {
    let inner: Arc<dyn ChildResource> = Arc::new(repl_over(
        "inner",
        &[leaf("a", 0.3), leaf("b", 0.7)],
        ReplConfig::default(),
    ));
    let outer = repl_over("outer", &[leaf("c", 0.5), inner], ReplConfig::default());
    let session = Arc::new(Session::default());

    let vote = outer
        .resolve_hierarchy(&ctx(&session, "/zone/f"), RouteOperation::Create, "localhost", HierarchyPath::new())
        .await
        .unwrap();
    assert_eq!(vote.hierarchy.to_string(), "outer;inner;b");
    assert_eq!(vote.score, 0.7);
    assert_eq!(
        outer.sibling_list(&session).unwrap().unwrap()[0].to_string(),
        "outer;c"
    );
}

#[tokio::test]
async fn test_node_already_in_hierarchy_is_a_cycle() {
    let repl = repl_over("repl", &[leaf("a", 1.0)], ReplConfig::default());
    let session = Arc::new(Session::default());
    let err = repl
        .resolve_hierarchy(
            &ctx(&session, "/zone/f"),
            RouteOperation::Create,
            "localhost",
            "root;repl".parse().unwrap(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err.root(), Error::HierarchyCycle { .. }));
}
