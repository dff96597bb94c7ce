//! madecache
//!
//! A file-system data cache with time-based expiry, and a queued HTTP request
//! manager that memoizes responses in it. The `madecache` binary wraps both for
//! scripting; the modules are exposed here for embedding and integration tests.

pub mod cache;
pub mod cli;
pub mod network;

pub use cache::{
    CacheConfig, CacheError, CachedData, EntryTimestamp, FileSystemCache, ParseTimestampError,
};
pub use network::{
    CachePolicy, HttpClient, ManagerState, NetworkRequest, NetworkRequestManager, QueueConfig,
    ReqwestClient, RequestError,
};
