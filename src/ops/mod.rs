//! Administrative passes over a replication node

pub mod rebalance;

pub use rebalance::{rebalance, RebalanceReport};
