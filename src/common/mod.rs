//! Common utilities and types shared across replkit

pub mod config;
pub mod error;
pub mod props;

pub use config::{NodeConfig, NodeKind, ReplConfig, SeedObject, TopologyConfig};
pub use error::{Error, ErrorKind, ReplicationFailure, Result, ResultExt};
pub use props::PropertyStore;
