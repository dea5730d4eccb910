//! The seam between a replication node and the resources below it

use crate::common::{Error, Result};
use crate::resource::{HierarchyPath, RequestContext};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Operation a client wants a hierarchy resolved for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteOperation {
    Create,
    Open,
    Write,
    Unlink,
}

impl fmt::Display for RouteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteOperation::Create => write!(f, "create"),
            RouteOperation::Open => write!(f, "open"),
            RouteOperation::Write => write!(f, "write"),
            RouteOperation::Unlink => write!(f, "unlink"),
        }
    }
}

impl std::str::FromStr for RouteOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(RouteOperation::Create),
            "open" => Ok(RouteOperation::Open),
            "write" => Ok(RouteOperation::Write),
            "unlink" => Ok(RouteOperation::Unlink),
            other => Err(Error::Parameter(format!("unknown operation: {}", other))),
        }
    }
}

/// A child's answer to a routing request: how well it can serve the
/// request, and the hierarchy it would use. A score of zero means the
/// child cannot serve the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub score: f64,
    pub hierarchy: HierarchyPath,
}

impl Vote {
    pub fn is_viable(&self) -> bool {
        self.score > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// Operations forwarded unchanged to the selected child
#[derive(Debug, Clone, PartialEq)]
pub enum ChildOp {
    Create,
    Open,
    Read { len: usize },
    Write { data: Bytes },
    Close,
    Unlink,
    Stat,
    Lseek { offset: i64, whence: Whence },
    Mkdir,
    Rmdir,
    Opendir,
    Closedir,
    Readdir,
    Rename { new_path: String },
    FreeSpace,
    StageToCache { cache_path: String },
    SyncToArchive { cache_path: String },
    Registered,
    Unregistered,
    Modified,
}

impl ChildOp {
    pub fn name(&self) -> &'static str {
        match self {
            ChildOp::Create => "create",
            ChildOp::Open => "open",
            ChildOp::Read { .. } => "read",
            ChildOp::Write { .. } => "write",
            ChildOp::Close => "close",
            ChildOp::Unlink => "unlink",
            ChildOp::Stat => "stat",
            ChildOp::Lseek { .. } => "lseek",
            ChildOp::Mkdir => "mkdir",
            ChildOp::Rmdir => "rmdir",
            ChildOp::Opendir => "opendir",
            ChildOp::Closedir => "closedir",
            ChildOp::Readdir => "readdir",
            ChildOp::Rename { .. } => "rename",
            ChildOp::FreeSpace => "free_space",
            ChildOp::StageToCache { .. } => "stage_to_cache",
            ChildOp::SyncToArchive { .. } => "sync_to_archive",
            ChildOp::Registered => "registered",
            ChildOp::Unregistered => "unregistered",
            ChildOp::Modified => "modified",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub size: u64,
    pub mode: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
}

/// What a child handed back for a forwarded operation
#[derive(Debug, Clone, PartialEq)]
pub enum OpOutput {
    /// Status or count (bytes written, new offset, free space)
    Code(i64),
    Data(Bytes),
    Stat(FileStat),
    Entry(Option<DirEntry>),
}

impl OpOutput {
    /// Numeric result as the host runtime would see it
    pub fn code(&self) -> i64 {
        match self {
            OpOutput::Code(code) => *code,
            OpOutput::Data(data) => data.len() as i64,
            OpOutput::Stat(_) | OpOutput::Entry(_) => 0,
        }
    }

    pub fn into_data(self) -> Result<Bytes> {
        match self {
            OpOutput::Data(data) => Ok(data),
            other => Err(other.unexpected("data")),
        }
    }

    pub fn into_stat(self) -> Result<FileStat> {
        match self {
            OpOutput::Stat(stat) => Ok(stat),
            other => Err(other.unexpected("stat")),
        }
    }

    pub fn into_entry(self) -> Result<Option<DirEntry>> {
        match self {
            OpOutput::Entry(entry) => Ok(entry),
            other => Err(other.unexpected("directory entry")),
        }
    }

    fn unexpected(&self, wanted: &str) -> Error {
        Error::Other(format!("expected {} output, got {:?}", wanted, self))
    }
}

#[async_trait]
pub trait ChildResource: Send + Sync {
    fn name(&self) -> &str;

    /// Forward a plain operation on `ctx.object` to this resource.
    async fn call(&self, ctx: &RequestContext, op: ChildOp) -> Result<OpOutput>;

    /// Append this resource (and whatever it routes to) to `hierarchy` and
    /// report how well it can serve `operation` on `ctx.object`.
    async fn resolve_hierarchy(
        &self,
        ctx: &RequestContext,
        operation: RouteOperation,
        host: &str,
        hierarchy: HierarchyPath,
    ) -> Result<Vote>;
}

/// Children of a node, in registration order
#[derive(Clone, Default)]
pub struct ChildMap {
    children: Vec<Arc<dyn ChildResource>>,
}

impl ChildMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, child: Arc<dyn ChildResource>) -> Result<()> {
        if self.children.iter().any(|c| c.name() == child.name()) {
            return Err(Error::InvalidConfig(format!(
                "child {} registered twice",
                child.name()
            )));
        }
        self.children.push(child);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ChildResource>> {
        self.children
            .iter()
            .find(|c| c.name() == name)
            .cloned()
            .ok_or_else(|| Error::ChildNotFound(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ChildResource>> {
        self.children.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.children.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl fmt::Debug for ChildMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
