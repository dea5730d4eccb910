//! Rebalance: heal replicas missing from a replication node's children

use replkit::common::ErrorKind;
use replkit::{Error, RebalanceReport, ResourceTree, TopologyConfig};
use std::io::Write;
use tempfile::TempDir;

fn topology(children: &[(&str, f64)], objects: &str) -> String {
    let mut out = format!(
        "[[nodes]]\nname = \"repl\"\nkind = \"replication\"\nchildren = [{}]\n\n",
        children
            .iter()
            .map(|(name, _)| format!("\"{}\"", name))
            .collect::<Vec<_>>()
            .join(", ")
    );
    for (name, vote) in children {
        out.push_str(&format!(
            "[[nodes]]\nname = \"{}\"\nkind = \"leaf\"\nvote = {:?}\n\n",
            name, vote
        ));
    }
    out.push_str(objects);
    out
}

fn build(source: &str) -> ResourceTree {
    ResourceTree::build(&TopologyConfig::from_toml(source).unwrap()).unwrap()
}

#[tokio::test]
async fn test_rebalance_heals_missing_child() {
    let tree = build(&topology(
        &[("A", 1.0), ("B", 1.0), ("C", 1.0)],
        r#"
        [[objects]]
        path = "/a/b"
        owner = "repl"
        mode = 416
        replicas = ["repl;A", "repl;B"]
        contents = "bytes"
        "#,
    ));

    let report = tree.repl("repl").unwrap().rebalance().await.unwrap();
    assert_eq!(
        report,
        RebalanceReport {
            pages: 1,
            objects_checked: 1,
            replicas_created: 1
        }
    );

    let calls = tree.catalog().replications();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].destination_hierarchy.last(), Some("C"));
    assert_eq!(calls[0].source_hierarchy.to_string(), "repl");
    assert_eq!(calls[0].mode, 416);
    assert_eq!(
        tree.leaf("C").unwrap().contents("/a/b").unwrap().as_ref(),
        b"bytes"
    );
    assert_eq!(tree.catalog().replicas("/a/b").len(), 3);
}

#[tokio::test]
async fn test_rebalance_noop_when_replicas_cover_children() {
    let tree = build(&topology(
        &[("A", 1.0), ("B", 1.0)],
        r#"
        [[objects]]
        path = "/a/b"
        owner = "repl"
        replicas = ["repl;A", "repl;B"]
        "#,
    ));

    let report = tree.repl("repl").unwrap().rebalance().await.unwrap();
    assert_eq!(report.replicas_created, 0);
    assert!(tree.catalog().replications().is_empty());
}

#[tokio::test]
async fn test_rebalance_pages_through_catalog() {
    let mut objects = String::new();
    for i in 0..5 {
        objects.push_str(&format!(
            "[[objects]]\npath = \"/zone/obj{}\"\nowner = \"repl\"\nreplicas = [\"repl;a\"]\ncontents = \"{}\"\n\n",
            i, i
        ));
    }
    let tree = build(&topology(&[("a", 1.0), ("b", 1.0)], &objects));

    let report = tree.repl("repl").unwrap().rebalance_with_limit(2).await.unwrap();
    assert_eq!(report.pages, 3);
    assert_eq!(report.objects_checked, 5);
    assert_eq!(report.replicas_created, 5);
    assert_eq!(tree.leaf("b").unwrap().paths().len(), 5);

    // A second pass finds nothing left to do.
    let again = tree.repl("repl").unwrap().rebalance().await.unwrap();
    assert_eq!(again.objects_checked, 0);
}

#[tokio::test]
async fn test_rebalance_ignores_objects_owned_elsewhere() {
    let source = r#"
        [[nodes]]
        name = "root"
        kind = "replication"
        children = ["repl", "z"]

        [[nodes]]
        name = "repl"
        kind = "replication"
        children = ["a", "b"]

        [[nodes]]
        name = "a"
        kind = "leaf"

        [[nodes]]
        name = "b"
        kind = "leaf"

        [[nodes]]
        name = "z"
        kind = "leaf"

        [[objects]]
        path = "/zone/mine"
        owner = "repl"
        replicas = ["root;repl;a"]

        [[objects]]
        path = "/zone/theirs"
        owner = "root"
        replicas = ["root;z"]
    "#;
    let tree = build(source);

    let report = tree.repl("repl").unwrap().rebalance().await.unwrap();
    assert_eq!(report.objects_checked, 1);
    let calls = tree.catalog().replications();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].object, "/zone/mine");
    assert_eq!(calls[0].source_hierarchy.to_string(), "root;repl");
    assert_eq!(calls[0].destination_hierarchy.to_string(), "root;repl;b");
    assert_eq!(calls[0].source_resource, "root");
}

#[tokio::test]
async fn test_child_names_match_whole_segments() {
    let tree = build(&topology(
        &[("alpha", 1.0), ("a", 1.0)],
        r#"
        [[objects]]
        path = "/zone/f"
        owner = "repl"
        replicas = ["repl;alpha"]
        "#,
    ));

    let report = tree.repl("repl").unwrap().rebalance().await.unwrap();
    assert_eq!(report.replicas_created, 1);
    assert_eq!(
        tree.catalog().replications()[0].destination_hierarchy.to_string(),
        "repl;a"
    );
}

#[tokio::test]
async fn test_zero_vote_from_missing_child_aborts() {
    let tree = build(&topology(
        &[("A", 1.0), ("B", 0.0)],
        r#"
        [[objects]]
        path = "/zone/f"
        owner = "repl"
        replicas = ["repl;A"]
        "#,
    ));

    let err = tree.repl("repl").unwrap().rebalance().await.unwrap_err();
    assert!(matches!(err.root(), Error::NoViableChild(_)));
    assert!(tree.catalog().replications().is_empty());
}

#[tokio::test]
async fn test_replicate_failure_aborts_pass() {
    let tree = build(&topology(
        &[("a", 1.0), ("b", 1.0)],
        r#"
        [[objects]]
        path = "/zone/one"
        owner = "repl"
        replicas = ["repl;a"]

        [[objects]]
        path = "/zone/two"
        owner = "repl"
        replicas = ["repl;a"]
        "#,
    ));
    tree.catalog().fail_destination("b");

    let err = tree.repl("repl").unwrap().rebalance().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Catalog);
    assert!(err.to_string().starts_with("repl rebalance"));
    // Aborted on the first object; the second was never attempted.
    assert_eq!(tree.catalog().replications().len(), 1);

    tree.catalog().clear_failures();
    let report = tree.repl("repl").unwrap().rebalance().await.unwrap();
    assert_eq!(report.replicas_created, 2);
}

#[tokio::test]
async fn test_failed_child_aborts_pass() {
    let tree = build(&topology(
        &[("a", 1.0), ("b", 1.0)],
        r#"
        [[objects]]
        path = "/zone/f"
        owner = "repl"
        replicas = ["repl;a"]
        "#,
    ));
    tree.leaf("b").unwrap().set_failing(true);

    let err = tree.repl("repl").unwrap().rebalance().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Child);
}

#[tokio::test]
async fn test_rebalance_from_topology_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("topology.toml");
    let source = topology(
        &[("a", 1.0), ("b", 1.0)],
        r#"
        [repl]
        rebalance_limit = 1

        [[objects]]
        path = "/zone/x"
        owner = "repl"
        replicas = ["repl;b"]
        contents = "from file"

        [[objects]]
        path = "/zone/y"
        owner = "repl"
        replicas = ["repl;a"]
        contents = "from file"
        "#,
    );
    std::fs::File::create(&path)
        .unwrap()
        .write_all(source.as_bytes())
        .unwrap();

    let config = TopologyConfig::load(&path).unwrap();
    assert_eq!(config.repl.rebalance_limit, 1);

    let tree = ResourceTree::build(&config).unwrap();
    let report = tree.repl("repl").unwrap().rebalance().await.unwrap();
    assert_eq!(report.pages, 2);
    assert_eq!(report.replicas_created, 2);
    assert_eq!(
        tree.leaf("a").unwrap().contents("/zone/x").unwrap().as_ref(),
        b"from file"
    );
}
