//! Storage implementations for the cache tiers.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{MemoryKeyValueCache, MemoryPageRepository};

#[cfg(feature = "sqlite")]
pub use sqlite::SqlitePageRepository;
