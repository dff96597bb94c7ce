//! Queued network request manager
//!
//! Requests are registered with typed success/error callbacks, keyed by request
//! ID, and executed when the queue is processed: either on demand or on a
//! periodic tokio interval between `start()` and `stop()`. Successful responses
//! can be memoized in a [`FileSystemCache`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::client::HttpClient;
use super::request::{NetworkRequest, RequestError};
use crate::cache::FileSystemCache;

/// Default interval between queue processing ticks
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

/// Configuration for periodic queue processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Interval between queue processing ticks
    pub period: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
        }
    }
}

/// Whether the periodic processing task is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Stopped,
    Processing,
}

/// Delivers a response body (or error) to exactly one of the registered
/// callbacks. Returns `true` if the success callback ran.
type Completion = Box<dyn FnOnce(Result<String, RequestError>) -> bool + Send>;

/// A queued request with its type-erased callbacks
struct NetworkRequestCallback {
    request: NetworkRequest,
    // Only taken by value after removal from the queue; the mutex just makes
    // the entry `Sync` without requiring `Sync` callbacks.
    complete: Mutex<Completion>,
}

/// State shared with the processing task
struct Shared {
    queue: DashMap<String, NetworkRequestCallback>,
    client: Arc<dyn HttpClient>,
    cache: Option<FileSystemCache>,
}

/// Handle to the running processing task
struct Worker {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

/// Queues HTTP GET requests and processes them in batches
pub struct NetworkRequestManager {
    shared: Arc<Shared>,
    config: QueueConfig,
    worker: Mutex<Option<Worker>>,
}

impl NetworkRequestManager {
    /// Creates a stopped manager dispatching through `client`
    ///
    /// When `cache` is `None`, cache policies on requests are ignored.
    pub fn new(
        client: Arc<dyn HttpClient>,
        cache: Option<FileSystemCache>,
        config: QueueConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: DashMap::new(),
                client,
                cache,
            }),
            config,
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn state(&self) -> ManagerState {
        let mut worker = self.lock_worker();
        if worker.as_ref().is_some_and(|w| w.task.is_finished()) {
            warn!("Request queue task exited unexpectedly");
            *worker = None;
        }

        if worker.is_some() {
            ManagerState::Processing
        } else {
            ManagerState::Stopped
        }
    }

    /// Starts processing the queue every `config.period`
    ///
    /// The first tick happens one period after starting. Does nothing if
    /// already processing. Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut worker = self.lock_worker();
        if worker.as_ref().is_some_and(|w| !w.task.is_finished()) {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let shared = Arc::clone(&self.shared);
        let period = self.config.period.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the first tick (immediate)
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let processed = shared.process_current_queue().await;
                        if processed > 0 {
                            debug!(processed, "Queue tick complete");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        info!(period_secs = period.as_secs_f64(), "Request queue processing started");
        *worker = Some(Worker { shutdown_tx, task });
    }

    /// Stops periodic processing and waits for an in-flight tick to finish
    ///
    /// Queued requests stay queued. Does nothing if already stopped.
    pub async fn stop(&self) {
        let Some(worker) = self.lock_worker().take() else {
            return;
        };

        let _ = worker.shutdown_tx.send(()).await;
        if let Err(e) = worker.task.await {
            warn!(error = %e, "Request queue task ended abnormally");
        }
        info!("Request queue processing stopped");
    }

    /// Queues `request`, replacing any pending request with the same ID
    ///
    /// Nothing is executed until the queue is next processed. Then the response
    /// body is deserialized into `T` and exactly one of `on_success` or
    /// `on_error` is called. Returns `true` if a pending request was replaced.
    pub fn add_or_update<T, S, E>(&self, request: NetworkRequest, on_success: S, on_error: E) -> bool
    where
        T: DeserializeOwned + Send + 'static,
        S: FnOnce(T) + Send + 'static,
        E: FnOnce(RequestError) + Send + 'static,
    {
        let complete: Completion = Box::new(move |result: Result<String, RequestError>| {
            let value = result
                .and_then(|body| serde_json::from_str::<T>(&body).map_err(RequestError::from));
            match value {
                Ok(value) => {
                    on_success(value);
                    true
                }
                Err(e) => {
                    on_error(e);
                    false
                }
            }
        });

        let id = request.id.clone();
        let replaced = self
            .shared
            .queue
            .insert(
                id.clone(),
                NetworkRequestCallback {
                    request,
                    complete: Mutex::new(complete),
                },
            )
            .is_some();

        debug!(id = %id, replaced, "Request queued");
        replaced
    }

    /// Unregisters a pending request without running its callbacks.
    pub fn remove(&self, id: &str) -> bool {
        self.shared.queue.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.shared.queue.contains_key(id)
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    /// Executes every request queued at the time of the call
    ///
    /// Requests queued while processing wait for the next call. Returns the
    /// number of requests executed.
    pub async fn process_current_queue(&self) -> usize {
        self.shared.process_current_queue().await
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<Worker>> {
        self.worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for NetworkRequestManager {
    fn drop(&mut self) {
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(worker) = worker {
            worker.task.abort();
        }
    }
}

impl Shared {
    async fn process_current_queue(&self) -> usize {
        let ids: Vec<String> = self.queue.iter().map(|entry| entry.key().clone()).collect();

        let mut processed = 0;
        for id in ids {
            // Taking the entry out first means it runs at most once, even with
            // a concurrent manual and timer-driven tick.
            let Some((_, callback)) = self.queue.remove(&id) else {
                continue;
            };
            self.execute(callback).await;
            processed += 1;
        }
        processed
    }

    async fn execute(&self, callback: NetworkRequestCallback) {
        let NetworkRequestCallback { request, complete } = callback;
        let complete = complete
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let cache = self.cache.as_ref().filter(|_| request.cache_policy.writes());
        let cache_key = request.cache_key();

        if let Some(cache) = cache.filter(|_| request.cache_policy.reads()) {
            if let Some(body) = cached_body(cache, &cache_key, request.cache_policy.max_age()) {
                debug!(id = %request.id, url = %request.url, "Resolved request from cache");
                if deliver(&request, complete, Ok(body)) == Some(false) {
                    // Cached body no longer matches the expected type
                    if let Err(e) = cache.remove(&cache_key) {
                        warn!(url = %request.url, error = %e, "Failed to evict cached response");
                    }
                }
                return;
            }
        }

        let result = self.client.get(&request.url, &request.headers).await;
        if let Err(e) = &result {
            debug!(id = %request.id, url = %request.url, error = %e, "Request failed");
        }

        let body = match (&result, cache) {
            (Ok(body), Some(_)) => Some(body.clone()),
            _ => None,
        };

        if deliver(&request, complete, result) == Some(true) {
            if let (Some(body), Some(cache)) = (body, cache) {
                if let Err(e) = cache.add_or_update(&cache_key, &body) {
                    warn!(url = %request.url, error = %e, "Failed to cache response");
                }
            }
        }
    }
}

/// Runs a completion, containing a panicking callback so the queue keeps going
///
/// Returns whether the success callback ran, or `None` if a callback panicked.
fn deliver(
    request: &NetworkRequest,
    complete: Completion,
    result: Result<String, RequestError>,
) -> Option<bool> {
    match panic::catch_unwind(AssertUnwindSafe(move || complete(result))) {
        Ok(succeeded) => Some(succeeded),
        Err(payload) => {
            warn!(
                id = %request.id,
                url = %request.url,
                panic = panic_message(payload.as_ref()),
                "Request callback panicked"
            );
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Returns the cached body for `key` if present and fresh enough.
fn cached_body(cache: &FileSystemCache, key: &str, max_age: Option<Duration>) -> Option<String> {
    let entry = match cache.get_entry(key) {
        Ok(Some(entry)) => entry,
        Ok(None) => return None,
        Err(e) => {
            warn!(key, error = %e, "Unreadable cached response, dispatching request");
            return None;
        }
    };

    if max_age.is_some_and(|max_age| !entry.is_fresh(max_age)) {
        debug!(key, "Cached response expired");
        return None;
    }

    match entry.decode::<String>() {
        Ok(body) => Some(body),
        Err(e) => {
            warn!(key, error = %e, "Cached response is not a body, dispatching request");
            None
        }
    }
}
