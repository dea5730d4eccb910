//! Replication node internals

pub mod replicator;
pub mod resource;
pub mod router;
pub mod tracker;

pub use replicator::FanoutReplicator;
pub use resource::ReplResource;
pub use router::{select_best, Candidate, VoteRouter};
pub use tracker::{OperationKind, OperationTracker, TrackedOperation, TrackedState};
