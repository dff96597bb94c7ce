//! Command-line interface parsing for madecache
//!
//! This module handles parsing of CLI arguments using clap and converts the raw
//! string arguments into typed cache and request settings before any I/O
//! happens.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use thiserror::Error;

use crate::cache::{CacheConfig, CacheError, EntryTimestamp, FileSystemCache};
use crate::network::{CachePolicy, NetworkRequest};

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// The value passed to `put` is not JSON
    #[error("Invalid JSON value: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The `--by` timestamp selector is not recognized
    #[error("Invalid timestamp: '{0}'. Valid timestamps: created, modified")]
    InvalidTimestamp(String),

    /// The `--before` cutoff is not an RFC 3339 date
    #[error("Invalid cutoff date: '{0}'. Expected RFC 3339, e.g. 2024-01-31T00:00:00Z")]
    InvalidCutoff(String),

    /// None of `--days`, `--max-age-secs` or `--before` was given
    #[error("Missing weed age: pass --days, --max-age-secs or --before")]
    MissingWeedAge,

    /// A `--header` argument is not `NAME:VALUE`
    #[error("Invalid header: '{0}'. Expected NAME:VALUE")]
    InvalidHeader(String),

    /// The `--cache` policy is not recognized
    #[error("Invalid cache policy: '{0}'. Valid policies: none, memoize, aside")]
    InvalidCachePolicy(String),
}

/// madecache - Inspect and maintain a file-system data cache
#[derive(Parser, Debug)]
#[command(name = "madecache")]
#[command(about = "File-system data cache with expiry sweeps and cached HTTP fetches")]
#[command(version)]
pub struct Cli {
    /// Use this cache directory instead of the platform cache folder
    #[arg(long, global = true, value_name = "PATH")]
    pub dir: Option<PathBuf>,

    /// Application folder name under the platform cache directory
    #[arg(long, global = true, default_value = "madecache")]
    pub app: String,

    /// Cache sub-folder name inside the application folder
    #[arg(long, global = true, default_value = "data")]
    pub folder: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Store a JSON value under a key (a JSON null is ignored)
    Put { key: String, json: String },
    /// Print the JSON value stored under a key
    Get { key: String },
    /// Print whether a key is stored
    Contains { key: String },
    /// Delete the value stored under a key
    Remove { key: String },
    /// List stored keys
    Keys,
    /// Delete every stored value
    Clear,
    /// Delete values older than a cutoff
    Weed(WeedArgs),
    /// GET a URL through the request queue and print the JSON response
    Fetch(FetchArgs),
}

#[derive(Args, Debug)]
pub struct WeedArgs {
    /// Remove entries older than this many days
    #[arg(long, conflicts_with_all = ["max_age_secs", "before"])]
    pub days: Option<u32>,

    /// Remove entries older than this many seconds
    #[arg(long, conflicts_with = "before")]
    pub max_age_secs: Option<u64>,

    /// Remove entries at or before this RFC 3339 date
    #[arg(long, value_name = "DATE")]
    pub before: Option<String>,

    /// Which timestamp to compare: created or modified
    #[arg(long, default_value = "modified")]
    pub by: String,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    pub url: String,

    /// Request header, repeatable
    ///
    /// Examples:
    ///   madecache fetch https://example.com/api -H "Accept: application/json"
    #[arg(long = "header", short = 'H', value_name = "NAME:VALUE")]
    pub headers: Vec<String>,

    /// Cache policy: none, memoize or aside
    #[arg(long, default_value = "none")]
    pub cache: String,

    /// With `--cache aside`, only use cached responses younger than this
    #[arg(long)]
    pub max_age_secs: Option<u64>,
}

/// Age threshold for a weed sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeedCutoff {
    Days(u32),
    MaxAge(Duration),
    Before(DateTime<Utc>),
}

/// A fully validated command, ready to run against an opened cache
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Put { key: String, value: serde_json::Value },
    Get { key: String },
    Contains { key: String },
    Remove { key: String },
    Keys,
    Clear,
    Weed { cutoff: WeedCutoff, by: EntryTimestamp },
    Fetch(NetworkRequest),
}

impl Operation {
    /// Validates every argument of `command` without touching the cache.
    pub fn from_command(command: &Command) -> Result<Self, CliError> {
        let operation = match command {
            Command::Put { key, json } => Operation::Put {
                key: key.clone(),
                value: parse_json_arg(json)?,
            },
            Command::Get { key } => Operation::Get { key: key.clone() },
            Command::Contains { key } => Operation::Contains { key: key.clone() },
            Command::Remove { key } => Operation::Remove { key: key.clone() },
            Command::Keys => Operation::Keys,
            Command::Clear => Operation::Clear,
            Command::Weed(args) => Operation::Weed {
                by: args.timestamp()?,
                cutoff: args.cutoff()?,
            },
            Command::Fetch(args) => Operation::Fetch(args.request()?),
        };
        Ok(operation)
    }
}

impl Cli {
    /// Cache location described by `--app` and `--folder`.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            app_name: self.app.clone(),
            folder: self.folder.clone(),
        }
    }

    /// Opens the cache selected by `--dir`, or `--app`/`--folder` otherwise.
    pub fn open_cache(&self) -> Result<FileSystemCache, CacheError> {
        match &self.dir {
            Some(dir) => Ok(FileSystemCache::with_dir(dir.clone())),
            None => FileSystemCache::new(&self.cache_config()),
        }
    }
}

impl WeedArgs {
    /// Resolves the age flags into a single cutoff.
    pub fn cutoff(&self) -> Result<WeedCutoff, CliError> {
        if let Some(days) = self.days {
            return Ok(WeedCutoff::Days(days));
        }
        if let Some(secs) = self.max_age_secs {
            return Ok(WeedCutoff::MaxAge(Duration::from_secs(secs)));
        }
        match &self.before {
            Some(before) => Ok(WeedCutoff::Before(parse_cutoff_arg(before)?)),
            None => Err(CliError::MissingWeedAge),
        }
    }

    pub fn timestamp(&self) -> Result<EntryTimestamp, CliError> {
        parse_timestamp_arg(&self.by)
    }
}

impl FetchArgs {
    pub fn parsed_headers(&self) -> Result<Vec<(String, String)>, CliError> {
        self.headers.iter().map(|h| parse_header_arg(h)).collect()
    }

    pub fn cache_policy(&self) -> Result<CachePolicy, CliError> {
        parse_cache_policy_arg(&self.cache, self.max_age_secs.map(Duration::from_secs))
    }

    /// Builds the GET request described by these arguments.
    pub fn request(&self) -> Result<NetworkRequest, CliError> {
        let mut request = NetworkRequest::get(&self.url).with_cache_policy(self.cache_policy()?);
        for (name, value) in self.parsed_headers()? {
            request = request.with_header(name, value);
        }
        Ok(request)
    }
}

/// Parses a `put` argument into a JSON value.
pub fn parse_json_arg(s: &str) -> Result<serde_json::Value, CliError> {
    Ok(serde_json::from_str(s)?)
}

/// Parses `created` / `modified` into an `EntryTimestamp`.
pub fn parse_timestamp_arg(s: &str) -> Result<EntryTimestamp, CliError> {
    s.parse()
        .map_err(|_| CliError::InvalidTimestamp(s.to_string()))
}

/// Parses an RFC 3339 date into a UTC cutoff.
pub fn parse_cutoff_arg(s: &str) -> Result<DateTime<Utc>, CliError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| CliError::InvalidCutoff(s.to_string()))
}

/// Splits `NAME:VALUE` into a trimmed header pair.
pub fn parse_header_arg(s: &str) -> Result<(String, String), CliError> {
    match s.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(CliError::InvalidHeader(s.to_string())),
    }
}

/// Parses a cache policy name.
pub fn parse_cache_policy_arg(
    s: &str,
    max_age: Option<Duration>,
) -> Result<CachePolicy, CliError> {
    match s.to_lowercase().as_str() {
        "none" | "no" | "off" => Ok(CachePolicy::NoCache),
        "memoize" | "memo" => Ok(CachePolicy::Memoize),
        "aside" | "cache-aside" => Ok(CachePolicy::CacheAside { max_age }),
        _ => Err(CliError::InvalidCachePolicy(s.to_string())),
    }
}
