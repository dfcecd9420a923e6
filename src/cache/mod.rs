//! Named, versioned cache stores for request/response pairs.
//!
//! This module provides the storage side of the proxy:
//! - A registry of named stores (open, lookup, list, delete)
//! - Store handles with exact method + URL matching and overwriting puts
//! - SQLite, in-memory and no-op backends behind one trait

mod registry;
mod storage;
mod traits;

pub use registry::CacheRegistry;
#[cfg(test)]
pub use storage::CacheStorage;
pub use storage::{MemoryStorage, NoopStorage, SqliteStorage};
pub use traits::StoredResponse;
