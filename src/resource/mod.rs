//! Resource-facing types: hierarchies, object references, request context
//! and the child resource seam.

pub mod child;
pub mod context;
pub mod hierarchy;
pub mod object;

pub use child::{
    ChildMap, ChildOp, ChildResource, DirEntry, FileStat, OpOutput, RouteOperation, Vote, Whence,
};
pub use context::{RequestContext, Session};
pub use hierarchy::{HierarchyPath, HIERARCHY_DELIMITER};
pub use object::{CollectionObject, DataObject, FileObject, ObjectRef, REPL_API_KEYWORD};
