//! Network request model
//!
//! Describes a queued HTTP GET request, how its response interacts with the
//! data cache, and the errors delivered to a request's error callback.

use std::time::Duration;

use serde::de::DeserializeOwned;
use sha1::{Digest, Sha1};
use thiserror::Error;
use uuid::Uuid;

/// How a request's response is cached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Always dispatch, never write to the cache
    #[default]
    NoCache,
    /// Always dispatch, write successful responses to the cache
    Memoize,
    /// Resolve from the cache when possible, otherwise dispatch and write back
    CacheAside {
        /// Only use cached responses written within this window
        max_age: Option<Duration>,
    },
}

impl CachePolicy {
    /// Whether successful responses are written to the cache.
    pub fn writes(&self) -> bool {
        !matches!(self, CachePolicy::NoCache)
    }

    /// Whether the cache is consulted before dispatching.
    pub fn reads(&self) -> bool {
        matches!(self, CachePolicy::CacheAside { .. })
    }

    /// Oldest cached response a read will accept; `None` means any age.
    pub fn max_age(&self) -> Option<Duration> {
        match self {
            CachePolicy::CacheAside { max_age } => *max_age,
            _ => None,
        }
    }
}

/// Errors delivered to a request's error callback
#[derive(Debug, Error)]
pub enum RequestError {
    /// HTTP request failed before a response was received
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server responded with a non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body could not be parsed into the expected type
    #[error("Failed to parse response: {0}")]
    Deserialize(#[from] serde_json::Error),

    /// A request header name or value is not valid HTTP
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}

impl RequestError {
    /// HTTP status code, if the server responded.
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Status { status, .. } => Some(*status),
            RequestError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Parses the body of an error response into a caller-defined type
    ///
    /// Returns `None` when there is no response body or it does not match `E`.
    pub fn error_response<E: DeserializeOwned>(&self) -> Option<E> {
        match self {
            RequestError::Status { body, .. } => serde_json::from_str(body).ok(),
            _ => None,
        }
    }
}

/// A queued HTTP GET request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequest {
    /// Queue identity; enqueueing the same ID again replaces the pending entry
    pub id: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub cache_policy: CachePolicy,
}

impl NetworkRequest {
    /// Creates a GET request for `url` with a fresh random ID.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            headers: Vec::new(),
            cache_policy: CachePolicy::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_cache_policy(mut self, cache_policy: CachePolicy) -> Self {
        self.cache_policy = cache_policy;
        self
    }

    /// Cache key for this request's response, derived from its URL
    ///
    /// Identical URLs share a cache entry regardless of request ID.
    pub fn cache_key(&self) -> String {
        format!("request-{:x}", Sha1::digest(self.url.as_bytes()))
    }
}
