//! Configuration for replkit components

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Per-node replication settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplConfig {
    /// Objects fetched per rebalance page
    #[serde(default = "default_rebalance_limit")]
    pub rebalance_limit: usize,

    /// Refuse requests that target a specific replica or carry
    /// replica-management keywords
    #[serde(default)]
    pub reject_replica_requests: bool,

    /// Maximum in-flight vote probes / sibling replications (0 = unbounded)
    #[serde(default)]
    pub probe_concurrency: usize,
}

fn default_rebalance_limit() -> usize {
    500
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            rebalance_limit: default_rebalance_limit(),
            reject_replica_requests: false,
            probe_concurrency: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Replication,
    Leaf,
}

/// One node of an in-process storage tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub kind: NodeKind,

    /// Child node names, in registration order
    #[serde(default)]
    pub children: Vec<String>,

    /// Score a leaf reports when asked to serve a request
    #[serde(default = "default_vote")]
    pub vote: f64,

    /// Host the leaf lives on
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_vote() -> f64 {
    1.0
}

fn default_host() -> String {
    "localhost".to_string()
}

/// A data object known to the catalog before anything runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedObject {
    pub path: String,
    pub owner: String,
    #[serde(default = "default_mode")]
    pub mode: u32,
    /// Full hierarchy strings of the existing replicas
    #[serde(default)]
    pub replicas: Vec<String>,
    /// Initial contents written to every replica
    #[serde(default)]
    pub contents: String,
}

fn default_mode() -> u32 {
    0o600
}

/// Storage tree description used by the CLI and tests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default)]
    pub repl: ReplConfig,

    #[serde(default)]
    pub nodes: Vec<NodeConfig>,

    #[serde(default)]
    pub objects: Vec<SeedObject>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TopologyConfig {
    /// Load a TOML topology file, with `REPLKIT_` environment overrides
    /// (e.g. `REPLKIT_REPL__REBALANCE_LIMIT=50`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix("REPLKIT")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        let topology: TopologyConfig = settings.try_deserialize()?;
        topology.validate()?;
        tracing::debug!(path = %path.display(), nodes = topology.nodes.len(), "Loaded topology");
        Ok(topology)
    }

    /// Parse a topology from a TOML string.
    pub fn from_toml(source: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?;
        let topology: TopologyConfig = settings.try_deserialize()?;
        topology.validate()?;
        Ok(topology)
    }

    pub fn node(&self, name: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// The single node nobody lists as a child.
    pub fn root(&self) -> Result<&NodeConfig> {
        let referenced: HashSet<&str> = self
            .nodes
            .iter()
            .flat_map(|n| n.children.iter().map(String::as_str))
            .collect();
        let mut roots = self
            .nodes
            .iter()
            .filter(|n| !referenced.contains(n.name.as_str()));
        match (roots.next(), roots.next()) {
            (Some(root), None) => Ok(root),
            (None, _) => Err(Error::InvalidConfig("topology has no root node".into())),
            (Some(a), Some(b)) => Err(Error::InvalidConfig(format!(
                "topology has more than one root: {} and {}",
                a.name, b.name
            ))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.repl.rebalance_limit == 0 {
            return Err(Error::InvalidConfig("rebalance_limit must be positive".into()));
        }

        let mut by_name: HashMap<&str, &NodeConfig> = HashMap::new();
        for node in &self.nodes {
            if node.name.is_empty() || node.name.contains(crate::resource::HIERARCHY_DELIMITER) {
                return Err(Error::InvalidConfig(format!(
                    "invalid node name: {:?}",
                    node.name
                )));
            }
            if by_name.insert(node.name.as_str(), node).is_some() {
                return Err(Error::InvalidConfig(format!(
                    "duplicate node name: {}",
                    node.name
                )));
            }
            if !node.vote.is_finite() || node.vote < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "node {} has invalid vote {}",
                    node.name, node.vote
                )));
            }
        }

        for node in &self.nodes {
            match node.kind {
                NodeKind::Leaf if !node.children.is_empty() => {
                    return Err(Error::InvalidConfig(format!(
                        "leaf {} cannot have children",
                        node.name
                    )));
                }
                NodeKind::Replication if node.children.is_empty() => {
                    return Err(Error::InvalidConfig(format!(
                        "replication node {} has no children",
                        node.name
                    )));
                }
                _ => {}
            }
            for child in &node.children {
                if !by_name.contains_key(child.as_str()) {
                    return Err(Error::InvalidConfig(format!(
                        "node {} lists unknown child {}",
                        node.name, child
                    )));
                }
            }
        }

        // Walk from the root; a node reached twice is a cycle or a shared child.
        let root = self.root()?;
        let mut seen = HashSet::new();
        let mut stack = vec![root.name.as_str()];
        while let Some(name) = stack.pop() {
            if !seen.insert(name) {
                return Err(Error::InvalidConfig(format!(
                    "node {} is reachable more than once",
                    name
                )));
            }
            if let Some(node) = by_name.get(name) {
                stack.extend(node.children.iter().map(String::as_str));
            }
        }
        if seen.len() != self.nodes.len() {
            return Err(Error::InvalidConfig(
                "topology contains nodes unreachable from the root".into(),
            ));
        }

        for object in &self.objects {
            if object.path.is_empty() {
                return Err(Error::InvalidConfig("seed object with empty path".into()));
            }
            if !by_name.contains_key(object.owner.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "object {} owned by unknown node {}",
                    object.path, object.owner
                )));
            }
        }

        Ok(())
    }
}
