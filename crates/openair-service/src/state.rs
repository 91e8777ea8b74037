//! Application state shared by the scheduler and its consumers.
//!
//! # Event Channel Behavior
//!
//! `events` is a broadcast channel carrying every [`SchedulerEvent`]:
//!
//! - **Buffer size**: [`EVENT_BUFFER`] events
//! - **Message loss**: a subscriber that falls behind loses the oldest events
//! - **No blocking**: the scheduler never waits for subscribers
//!
//! The monitored location, the latest reading and the time it was fetched
//! are published together as one [`Snapshot`] through a `watch` channel and
//! replaced wholesale on each successful fetch, so a reader never pairs a new
//! location with an old reading.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock, broadcast, watch};

use openair_core::FetchError;
use openair_store::Store;
use openair_types::{LocationKey, Reading};

use crate::config::Config;

/// Number of events buffered per subscriber.
pub const EVENT_BUFFER: usize = 64;

/// Shared application state.
pub struct AppState {
    /// The data store (wrapped in Mutex for thread-safe access).
    pub store: Mutex<Store>,
    /// Configuration.
    pub config: Config,
    /// Broadcast channel for updates and failures.
    pub events: broadcast::Sender<SchedulerEvent>,
    /// Acquisition progress.
    pub acquisition: AcquisitionState,
}

impl AppState {
    /// Create new application state monitoring `location`.
    pub fn new(store: Store, config: Config, location: LocationKey) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Arc::new(Self {
            store: Mutex::new(store),
            config,
            events,
            acquisition: AcquisitionState::new(location),
        })
    }
}

/// Something consumers may want to react to.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// A new reading was stored and became the latest snapshot.
    Updated(Reading),
    /// The remote fetch failed; the previous snapshot stays current.
    FetchFailed {
        location: LocationKey,
        error: FetchError,
    },
    /// The store rejected a write or maintenance pass.
    StoreFailed { error: String },
}

/// What consumers see: where, what and when, always from the same fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Location being monitored.
    pub location: LocationKey,
    /// Latest reading for `location`, `None` until the first success there.
    pub reading: Option<Reading>,
    /// Completion time of the fetch that produced `reading`.
    pub fetched_at: Option<OffsetDateTime>,
}

/// State of the acquisition loop.
pub struct AcquisitionState {
    snapshot: watch::Sender<Snapshot>,
    last_error: RwLock<Option<String>>,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    consecutive_failures: AtomicU32,
    fetching: AtomicBool,
    running: AtomicBool,
    /// Channel to signal the scheduler loop to stop.
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl AcquisitionState {
    /// Create a new acquisition state.
    pub fn new(location: LocationKey) -> Self {
        let (snapshot, _) = watch::channel(Snapshot {
            location,
            reading: None,
            fetched_at: None,
        });
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            snapshot,
            last_error: RwLock::new(None),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            fetching: AtomicBool::new(false),
            running: AtomicBool::new(false),
            stop_tx,
            stop_rx,
        }
    }

    /// Clone of the current snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Clone of the latest reading.
    pub fn latest(&self) -> Option<Reading> {
        self.snapshot.borrow().reading.clone()
    }

    /// Receiver that observes every replacement of the snapshot.
    pub fn watch_snapshot(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.subscribe()
    }

    /// The location currently being monitored.
    pub fn location(&self) -> LocationKey {
        self.snapshot.borrow().location.clone()
    }

    /// Completion time of the last successful fetch.
    pub fn last_success(&self) -> Option<OffsetDateTime> {
        self.snapshot.borrow().fetched_at
    }

    /// Record a successful fetch of `reading` for `location` at `at`.
    pub(crate) async fn record_success(
        &self,
        location: LocationKey,
        reading: Reading,
        at: OffsetDateTime,
    ) {
        self.snapshot.send_replace(Snapshot {
            location,
            reading: Some(reading),
            fetched_at: Some(at),
        });
        *self.last_error.write().await = None;
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Record a failure and return the number of failures in a row.
    pub(crate) async fn record_failure(&self, message: String) -> u32 {
        *self.last_error.write().await = Some(message);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn set_fetching(&self, fetching: bool) {
        self.fetching.store(fetching, Ordering::SeqCst);
    }

    /// Check if the scheduler loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Get a receiver for the stop signal.
    pub fn subscribe_stop(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    /// Signal the scheduler loop to stop.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Snapshot of the counters.
    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            location: self.location().to_string(),
            last_success: self.last_success(),
            last_error: self.last_error.read().await.clone(),
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            fetching: self.fetching.load(Ordering::SeqCst),
            running: self.is_running(),
        }
    }
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    /// Location key being monitored.
    pub location: String,
    /// Time of the last successful fetch.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_success: Option<OffsetDateTime>,
    /// Error from the most recent failed cycle, cleared on success.
    pub last_error: Option<String>,
    /// Successful fetches since start.
    pub success_count: u64,
    /// Failed cycles since start.
    pub failure_count: u64,
    /// Failed cycles since the last success.
    pub consecutive_failures: u32,
    /// Whether a fetch is in flight.
    pub fetching: bool,
    /// Whether the background loop is running.
    pub running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn state() -> Arc<AppState> {
        let store = Store::open_in_memory().unwrap();
        let location = LocationKey::from_name("Paris").unwrap();
        AppState::new(store, Config::default(), location)
    }

    #[tokio::test]
    async fn test_initial_state() {
        let state = state();
        assert!(state.acquisition.latest().is_none());
        assert_eq!(state.acquisition.location().to_string(), "Paris");

        let status = state.acquisition.status().await;
        assert_eq!(status.success_count, 0);
        assert_eq!(status.last_success, None);
        assert!(!status.fetching);
        assert!(!status.running);
    }

    #[tokio::test]
    async fn test_record_success_replaces_snapshot() {
        let state = state();
        let mut watcher = state.acquisition.watch_snapshot();
        let at = datetime!(2024-01-01 10:05 UTC);
        let reading = Reading::new(at, "Lyon", 42);
        let lyon = LocationKey::from_name("Lyon").unwrap();

        state.acquisition.record_failure("boom".to_string()).await;
        state
            .acquisition
            .record_success(lyon.clone(), reading.clone(), at)
            .await;

        assert!(watcher.has_changed().unwrap());
        let seen = watcher.borrow_and_update().clone();
        assert_eq!(seen.location, lyon);
        assert_eq!(seen.reading.as_ref(), Some(&reading));
        assert_eq!(seen.fetched_at, Some(at));
        assert_eq!(state.acquisition.latest(), Some(reading));
        assert_eq!(state.acquisition.location(), lyon);

        let status = state.acquisition.status().await;
        assert_eq!(status.last_success, Some(at));
        assert_eq!(status.last_error, None);
        assert_eq!(status.success_count, 1);
        assert_eq!(status.failure_count, 1);
        assert_eq!(status.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_location_and_reading_change_in_one_step() {
        let state = state();
        let mut watcher = state.acquisition.watch_snapshot();
        let paris = LocationKey::from_name("Paris").unwrap();
        let lyon = LocationKey::from_name("Lyon").unwrap();
        let first = datetime!(2024-01-01 10:05 UTC);
        let second = datetime!(2024-01-01 10:07 UTC);

        state
            .acquisition
            .record_success(paris.clone(), Reading::new(first, "Paris", 42), first)
            .await;
        watcher.borrow_and_update();

        state
            .acquisition
            .record_success(lyon.clone(), Reading::new(second, "Lyon", 61), second)
            .await;

        // One change notification carrying all three fields.
        assert!(watcher.has_changed().unwrap());
        let seen = watcher.borrow_and_update().clone();
        assert_eq!(seen.location, lyon);
        assert_eq!(seen.reading.map(|r| r.location_label), Some("Lyon".to_string()));
        assert_eq!(seen.fetched_at, Some(second));
        assert!(!watcher.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_consecutive_failures_count_up() {
        let state = state();
        assert_eq!(state.acquisition.record_failure("a".into()).await, 1);
        assert_eq!(state.acquisition.record_failure("b".into()).await, 2);

        let status = state.acquisition.status().await;
        assert_eq!(status.last_error.as_deref(), Some("b"));
        assert_eq!(status.failure_count, 2);
    }

    #[tokio::test]
    async fn test_stop_signal() {
        let state = state();
        let rx = state.acquisition.subscribe_stop();
        assert!(!*rx.borrow());
        state.acquisition.signal_stop();
        assert!(*rx.borrow());
    }

    #[test]
    fn test_status_serializes() {
        let status = SchedulerStatus {
            location: "Paris".to_string(),
            last_success: Some(datetime!(2024-01-01 10:05 UTC)),
            last_error: None,
            success_count: 1,
            failure_count: 0,
            consecutive_failures: 0,
            fetching: false,
            running: true,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["last_success"], "2024-01-01T10:05:00Z");
        assert_eq!(json["running"], true);
    }
}
