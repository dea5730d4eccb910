//! Object references handed to resource operations

use crate::common::{Error, Result};
use crate::resource::HierarchyPath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Keyword a client sets when it asks for replica management itself
pub const REPL_API_KEYWORD: &str = "replApi";

/// A single file replica being created, read or written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileObject {
    /// Catalog path, e.g. `/zone/home/alice/data.bin`
    pub logical_path: String,
    /// Hierarchy the request was resolved to
    pub hierarchy: HierarchyPath,
    pub mode: u32,
    /// Replica number the client explicitly asked for
    pub replica_requested: Option<u32>,
    /// Free-form request keywords
    pub keywords: BTreeMap<String, String>,
    /// Set on synthetic events raised by maintenance work; such events are
    /// neither tracked for fan-out nor fanned out.
    pub maintenance: bool,
}

impl FileObject {
    pub fn new(logical_path: impl Into<String>, hierarchy: HierarchyPath) -> Self {
        let logical_path = logical_path.into();
        Self {
            logical_path,
            hierarchy,
            mode: 0o600,
            replica_requested: None,
            keywords: BTreeMap::new(),
            maintenance: false,
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_maintenance(mut self, maintenance: bool) -> Self {
        self.maintenance = maintenance;
        self
    }

    pub fn with_keyword(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.keywords.insert(key.into(), value.into());
        self
    }

    /// Identity used to key tracked operations within a request.
    pub fn identity(&self) -> &str {
        &self.logical_path
    }
}

/// A directory-like collection on a storage node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionObject {
    pub logical_path: String,
    pub hierarchy: HierarchyPath,
    pub mode: u32,
}

impl CollectionObject {
    pub fn new(logical_path: impl Into<String>, hierarchy: HierarchyPath) -> Self {
        Self {
            logical_path: logical_path.into(),
            hierarchy,
            mode: 0o750,
        }
    }
}

/// A catalog-level data object that is not tied to an open file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataObject {
    pub logical_path: String,
    pub hierarchy: HierarchyPath,
    pub mode: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ObjectRef {
    File(FileObject),
    Collection(CollectionObject),
    Data(DataObject),
}

impl ObjectRef {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ObjectRef::File(_) => "file",
            ObjectRef::Collection(_) => "collection",
            ObjectRef::Data(_) => "data",
        }
    }

    pub fn logical_path(&self) -> &str {
        match self {
            ObjectRef::File(f) => &f.logical_path,
            ObjectRef::Collection(c) => &c.logical_path,
            ObjectRef::Data(d) => &d.logical_path,
        }
    }

    pub fn hierarchy(&self) -> &HierarchyPath {
        match self {
            ObjectRef::File(f) => &f.hierarchy,
            ObjectRef::Collection(c) => &c.hierarchy,
            ObjectRef::Data(d) => &d.hierarchy,
        }
    }

    pub fn is_maintenance(&self) -> bool {
        matches!(self, ObjectRef::File(f) if f.maintenance)
    }

    pub fn as_file(&self) -> Result<&FileObject> {
        match self {
            ObjectRef::File(f) => Ok(f),
            other => Err(Self::unsupported("file", other)),
        }
    }

    pub fn as_collection(&self) -> Result<&CollectionObject> {
        match self {
            ObjectRef::Collection(c) => Ok(c),
            other => Err(Self::unsupported("collection", other)),
        }
    }

    pub(crate) fn unsupported(wanted: &str, got: &ObjectRef) -> Error {
        Error::Parameter(format!(
            "expected a {} object, got a {} object for {}",
            wanted,
            got.kind_name(),
            got.logical_path()
        ))
    }
}

impl From<FileObject> for ObjectRef {
    fn from(f: FileObject) -> Self {
        ObjectRef::File(f)
    }
}

impl From<CollectionObject> for ObjectRef {
    fn from(c: CollectionObject) -> Self {
        ObjectRef::Collection(c)
    }
}

impl From<DataObject> for ObjectRef {
    fn from(d: DataObject) -> Self {
        ObjectRef::Data(d)
    }
}
