//! In-process implementations of the catalog and storage children

pub mod catalog;
pub mod leaf;
pub mod tree;

pub use catalog::{CatalogEntry, MemoryCatalog};
pub use leaf::LeafResource;
pub use tree::ResourceTree;
