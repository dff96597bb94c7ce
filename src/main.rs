//! madecache - inspect and maintain a file-system data cache
//!
//! Parses arguments, installs logging and runs a single cache or request-queue
//! operation against the selected cache folder.

use std::process::ExitCode;
use std::sync::{mpsc, Arc};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use madecache::cli::{Cli, Operation, WeedCutoff};
use madecache::{
    FileSystemCache, NetworkRequest, NetworkRequestManager, QueueConfig, ReqwestClient,
    RequestError,
};

/// Logs to stderr so stdout stays parseable; `RUST_LOG` overrides the level.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging();

    // Arguments are checked before the cache folder is touched
    let operation = Operation::from_command(&cli.command)?;
    let cache = cli.open_cache().context("Failed to open cache")?;
    run(operation, cache).await
}

async fn run(operation: Operation, cache: FileSystemCache) -> Result<ExitCode> {
    match operation {
        Operation::Put { key, value } => {
            if !cache.add_or_update(&key, &value)? {
                eprintln!("Ignoring null value, '{}' left unchanged", key);
            }
        }
        Operation::Get { key } => match cache.get::<serde_json::Value>(&key)? {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => {
                eprintln!("No entry for key '{}'", key);
                return Ok(ExitCode::FAILURE);
            }
        },
        Operation::Contains { key } => println!("{}", cache.contains(&key)),
        Operation::Remove { key } => {
            if !cache.remove(&key)? {
                eprintln!("No entry for key '{}'", key);
            }
        }
        Operation::Keys => {
            for key in cache.keys()? {
                println!("{}", key);
            }
        }
        Operation::Clear => println!("Removed {} entries", cache.clear()?),
        Operation::Weed { cutoff, by } => {
            let removed = match cutoff {
                WeedCutoff::Days(days) => cache.weed_days(days, by)?,
                WeedCutoff::MaxAge(max_age) => cache.weed(max_age, by)?,
                WeedCutoff::Before(cutoff) => cache.weed_before(cutoff, by)?,
            };
            println!("Removed {} entries", removed);
        }
        Operation::Fetch(request) => return fetch(request, cache).await,
    }

    Ok(ExitCode::SUCCESS)
}

/// Runs one request through a queue tick and prints the JSON response.
async fn fetch(request: NetworkRequest, cache: FileSystemCache) -> Result<ExitCode> {
    let manager = NetworkRequestManager::new(
        Arc::new(ReqwestClient::new()),
        Some(cache),
        QueueConfig::default(),
    );

    let (tx, rx) = mpsc::channel::<Result<serde_json::Value, RequestError>>();
    let err_tx = tx.clone();
    manager.add_or_update(
        request,
        move |value: serde_json::Value| {
            let _ = tx.send(Ok(value));
        },
        move |e: RequestError| {
            let _ = err_tx.send(Err(e));
        },
    );
    manager.process_current_queue().await;

    match rx.try_recv() {
        Ok(Ok(value)) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Ok(Err(e)) => {
            eprintln!("Request failed: {}", e);
            Ok(ExitCode::FAILURE)
        }
        Err(_) => bail!("Request finished without a result"),
    }
}
