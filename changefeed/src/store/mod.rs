mod base;
pub mod bulk;
pub mod memory;
pub mod opensearch;

pub use base::{CreateIndexOutcome, IndexStore};
