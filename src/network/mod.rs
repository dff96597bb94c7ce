//! Queued network requests with response caching
//!
//! Requests are queued by ID on a `NetworkRequestManager`, dispatched through an
//! `HttpClient` when the queue is processed, and optionally memoized in the
//! file-system cache.

mod client;
mod manager;
mod request;

pub use client::{HttpClient, ReqwestClient};
pub use manager::{ManagerState, NetworkRequestManager, QueueConfig, DEFAULT_PERIOD};
pub use request::{CachePolicy, NetworkRequest, RequestError};
