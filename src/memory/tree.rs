//! Build a runnable storage tree from a [`TopologyConfig`]

use crate::catalog::ReplicaRecord;
use crate::common::{Error, NodeKind, Result, TopologyConfig};
use crate::memory::{LeafResource, MemoryCatalog};
use crate::repl::ReplResource;
use crate::resource::{
    ChildMap, ChildResource, FileObject, HierarchyPath, RequestContext, RouteOperation, Session,
    Vote,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Node table keyed by name. Children are referenced by name in the
/// config and resolved to shared handles once, at build time.
pub struct ResourceTree {
    config: TopologyConfig,
    root: Arc<dyn ChildResource>,
    repl_nodes: HashMap<String, Arc<ReplResource>>,
    leaves: HashMap<String, Arc<LeafResource>>,
    catalog: Arc<MemoryCatalog>,
}

impl ResourceTree {
    pub fn build(config: &TopologyConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = Builder {
            config,
            catalog: Arc::new(MemoryCatalog::new()),
            repl_nodes: HashMap::new(),
            leaves: HashMap::new(),
        };
        let root = builder.node(&config.root()?.name)?;

        let tree = Self {
            config: config.clone(),
            root,
            repl_nodes: builder.repl_nodes,
            leaves: builder.leaves,
            catalog: builder.catalog,
        };
        tree.seed()?;

        tracing::debug!(
            root = %tree.root.name(),
            replication_nodes = tree.repl_nodes.len(),
            leaves = tree.leaves.len(),
            objects = tree.config.objects.len(),
            "Built resource tree"
        );
        Ok(tree)
    }

    /// Register seed objects and write their contents to each listed replica.
    fn seed(&self) -> Result<()> {
        for object in &self.config.objects {
            self.catalog.register_object(&object.path, &object.owner);
            for hierarchy in &object.replicas {
                let path: HierarchyPath = hierarchy.parse()?;
                let leaf_name = path.last().ok_or_else(|| {
                    Error::InvalidConfig(format!("object {} has an empty replica hierarchy", object.path))
                })?;
                let leaf = self.leaf(leaf_name).map_err(|_| {
                    Error::InvalidConfig(format!(
                        "replica {} of {} does not end at a leaf",
                        hierarchy, object.path
                    ))
                })?;
                leaf.put(&object.path, object.contents.as_bytes(), object.mode)?;
                self.catalog
                    .add_replica(&object.path, ReplicaRecord::new(path.to_string(), object.mode))?;
            }
        }
        Ok(())
    }

    pub fn root(&self) -> Arc<dyn ChildResource> {
        self.root.clone()
    }

    pub fn catalog(&self) -> Arc<MemoryCatalog> {
        self.catalog.clone()
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    pub fn repl(&self, name: &str) -> Result<Arc<ReplResource>> {
        self.repl_nodes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ChildNotFound(name.to_string()))
    }

    pub fn leaf(&self, name: &str) -> Result<Arc<LeafResource>> {
        self.leaves
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ChildNotFound(name.to_string()))
    }

    /// Replication node names, sorted.
    pub fn repl_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.repl_nodes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve a hierarchy for `path` from the root down.
    pub async fn route(
        &self,
        session: Arc<Session>,
        path: &str,
        operation: RouteOperation,
        host: &str,
    ) -> Result<Vote> {
        let ctx = RequestContext::new(session, FileObject::new(path, HierarchyPath::new()));
        self.root
            .resolve_hierarchy(&ctx, operation, host, HierarchyPath::new())
            .await
    }

    /// Indented outline of the tree, one node per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut stack = vec![(self.root.name().to_string(), 0usize)];
        while let Some((name, depth)) = stack.pop() {
            let Some(node) = self.config.node(&name) else {
                continue;
            };
            let indent = "  ".repeat(depth);
            let line = match node.kind {
                NodeKind::Replication => format!("{}{} (replication)\n", indent, name),
                NodeKind::Leaf => format!(
                    "{}{} (leaf, vote {}, host {}, {} object(s))\n",
                    indent,
                    name,
                    node.vote,
                    node.host,
                    self.leaves.get(&name).map_or(0, |l| l.paths().len())
                ),
            };
            out.push_str(&line);
            stack.extend(node.children.iter().rev().map(|c| (c.clone(), depth + 1)));
        }
        out
    }
}

struct Builder<'a> {
    config: &'a TopologyConfig,
    catalog: Arc<MemoryCatalog>,
    repl_nodes: HashMap<String, Arc<ReplResource>>,
    leaves: HashMap<String, Arc<LeafResource>>,
}

impl Builder<'_> {
    /// Build `name` after all of its children.
    fn node(&mut self, name: &str) -> Result<Arc<dyn ChildResource>> {
        let config = self.config;
        let node = config
            .node(name)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown node {}", name)))?;

        match node.kind {
            NodeKind::Leaf => {
                let leaf = Arc::new(LeafResource::new(&node.name, &node.host, node.vote));
                self.catalog.attach_leaf(leaf.clone());
                self.leaves.insert(node.name.clone(), leaf.clone());
                Ok(leaf)
            }
            NodeKind::Replication => {
                let mut children = ChildMap::new();
                for child in &node.children {
                    children.register(self.node(child)?)?;
                }
                let repl = Arc::new(ReplResource::new(
                    &node.name,
                    children,
                    self.catalog.clone(),
                    config.repl.clone(),
                )?);
                self.repl_nodes.insert(node.name.clone(), repl.clone());
                Ok(repl)
            }
        }
    }
}
