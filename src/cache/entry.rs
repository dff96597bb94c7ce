//! Cache record model
//!
//! A `CachedData` is the on-disk record for one key: the JSON payload plus the
//! timestamps the weed sweep compares against.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Which record timestamp an expiry comparison uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryTimestamp {
    /// When the key was first written
    Created,
    /// When the key was last written
    #[default]
    Modified,
}

impl EntryTimestamp {
    /// Maps a "compare created" flag onto a timestamp selector.
    pub fn from_compare_created(compare_created: bool) -> Self {
        if compare_created {
            EntryTimestamp::Created
        } else {
            EntryTimestamp::Modified
        }
    }
}

/// The timestamp name is neither `created` nor `modified`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown timestamp '{0}'")]
pub struct ParseTimestampError(String);

impl FromStr for EntryTimestamp {
    type Err = ParseTimestampError;

    /// Parses `created` / `modified` (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created" | "create" => Ok(EntryTimestamp::Created),
            "modified" | "updated" => Ok(EntryTimestamp::Modified),
            _ => Err(ParseTimestampError(s.to_string())),
        }
    }
}

/// A cached payload stored under a key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedData {
    /// Key the payload is stored under
    pub key: String,
    /// Serialized payload
    pub content: serde_json::Value,
    /// When the key was first written
    pub created_at: DateTime<Utc>,
    /// When the key was last written
    pub modified_at: DateTime<Utc>,
}

impl CachedData {
    /// Creates a record for a key written for the first time.
    pub fn new(key: impl Into<String>, content: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            content,
            created_at: now,
            modified_at: now,
        }
    }

    /// Carries over the creation time of the record this one replaces.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at.min(self.modified_at);
        self
    }

    pub fn timestamp(&self, by: EntryTimestamp) -> DateTime<Utc> {
        match by {
            EntryTimestamp::Created => self.created_at,
            EntryTimestamp::Modified => self.modified_at,
        }
    }

    /// True when the selected timestamp is at or before `cutoff`.
    pub fn is_older_than(&self, cutoff: DateTime<Utc>, by: EntryTimestamp) -> bool {
        self.timestamp(by) <= cutoff
    }

    /// True when the record was written within `max_age`.
    pub fn is_fresh(&self, max_age: std::time::Duration) -> bool {
        match Duration::from_std(max_age) {
            Ok(max_age) => Utc::now().signed_duration_since(self.modified_at) < max_age,
            // Out of chrono's range, so nothing can be older than it
            Err(_) => true,
        }
    }

    /// Deserializes the payload into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.content)
    }
}
