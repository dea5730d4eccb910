//! # replkit
//!
//! Replication coordination for hierarchical storage trees:
//! - Vote-based routing of each request to one preferred child
//! - Per-request tracking of pending create/write/unlink operations
//! - Fan-out of completed writes to the sibling children
//! - An administrative rebalance pass that heals missing replicas
//!
//! ## Architecture
//!
//! ```text
//!              ┌──────────────────────────┐
//!   request ──▶│ ReplResource "repl"      │──── Catalog
//!              │  router / tracker /      │   (replicate_object,
//!              │  replicator / rebalance  │    replicas_for_rebalance)
//!              └─────┬──────────┬─────────┘
//!          vote 0.8  │          │ vote 0.6
//!              ┌─────▼───┐  ┌───▼─────┐
//!              │ child a │  │ child b │   (leaves or nested
//!              │ selected│  │ sibling │    replication nodes)
//!              └─────────┘  └─────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Show the tree described by a topology file
//! replctl --topology ./topology.toml tree
//!
//! # Resolve the hierarchy a create would use
//! replctl --topology ./topology.toml route /zone/home/alice/f --operation create
//!
//! # Heal replicas missing from the root's children
//! replctl --topology ./topology.toml rebalance --limit 100
//! ```

#![allow(clippy::result_large_err)]

pub mod catalog;
pub mod common;
pub mod memory;
pub mod ops;
pub mod repl;
pub mod resource;

// Re-export commonly used types
pub use catalog::{Catalog, ReplicaRecord, ReplicateRequest};
pub use common::{Error, ErrorKind, ReplConfig, Result, TopologyConfig};
pub use memory::{LeafResource, MemoryCatalog, ResourceTree};
pub use ops::RebalanceReport;
pub use repl::ReplResource;
pub use resource::{ChildResource, HierarchyPath, ObjectRef, RequestContext, Session};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
