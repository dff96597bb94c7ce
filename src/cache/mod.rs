//! Cache module for storing payloads on disk
//!
//! This module provides a file-system cache provider that persists serializable
//! values as one JSON record per key, along with creation and modification
//! timestamps that drive the weed (expiry) sweep.

mod entry;
mod provider;

pub use entry::{CachedData, EntryTimestamp, ParseTimestampError};
pub use provider::{CacheConfig, CacheError, FileSystemCache, Result};
