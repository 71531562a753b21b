//! Versioned cache generations and their storage.
//!
//! This module provides the storage side of the offline cache:
//! - Named generations holding normalized request -> response snapshots
//! - Expiration metadata kept next to each entry, never in its headers
//! - Registration values (active / waiting version) persisted with the cache

mod storage;
mod types;

pub use storage::{CacheStorage, SqliteStorage};
pub use types::{CacheRole, CachedEntry, RequestKey, ResponseSource, Served};
