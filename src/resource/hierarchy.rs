//! Hierarchy paths
//!
//! A hierarchy is the chain of node names from the root of the storage tree
//! down to the resource that actually holds the bytes, written as
//! `root;mid;leaf`. A name appears at most once in a hierarchy.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const HIERARCHY_DELIMITER: char = ';';

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HierarchyPath {
    nodes: Vec<String>,
}

impl HierarchyPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a hierarchy from node names, root first.
    pub fn from_nodes<I, S>(nodes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut path = Self::new();
        for node in nodes {
            path.add_child(node)?;
        }
        Ok(path)
    }

    /// Append `name` below the current leaf. Fails if `name` is already
    /// part of the hierarchy.
    pub fn add_child(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if name.is_empty() || name.contains(HIERARCHY_DELIMITER) {
            return Err(Error::Hierarchy(format!("invalid node name {:?}", name)));
        }
        if self.contains(&name) {
            return Err(Error::HierarchyCycle {
                node: name,
                hierarchy: self.to_string(),
            });
        }
        self.nodes.push(name);
        Ok(())
    }

    /// Name of the node directly below `current`.
    pub fn next(&self, current: &str) -> Result<&str> {
        let pos = self
            .position(current)
            .ok_or_else(|| Error::Hierarchy(format!("{} is not in hierarchy {}", current, self)))?;
        self.nodes
            .get(pos + 1)
            .map(String::as_str)
            .ok_or_else(|| Error::Hierarchy(format!("{} is the leaf of hierarchy {}", current, self)))
    }

    /// Fragment from the root down to and including `name`.
    pub fn prefix_through(&self, name: &str) -> Result<HierarchyPath> {
        let pos = self
            .position(name)
            .ok_or_else(|| Error::Hierarchy(format!("{} is not in hierarchy {}", name, self)))?;
        Ok(HierarchyPath {
            nodes: self.nodes[..=pos].to_vec(),
        })
    }

    pub fn first(&self) -> Option<&str> {
        self.nodes.first().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.nodes.last().map(String::as_str)
    }

    /// Does this path begin with every node of `prefix`, in order?
    pub fn starts_with(&self, prefix: &HierarchyPath) -> bool {
        self.nodes.starts_with(&prefix.nodes)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n == name)
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl fmt::Display for HierarchyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", HIERARCHY_DELIMITER)?;
            }
            f.write_str(node)?;
        }
        Ok(())
    }
}

impl FromStr for HierarchyPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().trim_end_matches(HIERARCHY_DELIMITER);
        if s.is_empty() {
            return Ok(Self::new());
        }
        Self::from_nodes(s.split(HIERARCHY_DELIMITER).map(str::trim))
    }
}

impl TryFrom<String> for HierarchyPath {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<HierarchyPath> for String {
    fn from(path: HierarchyPath) -> Self {
        path.to_string()
    }
}
