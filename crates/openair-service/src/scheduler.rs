//! Background acquisition scheduler.
//!
//! The scheduler wakes up every tick. A tick fetches only when the last
//! success is older than the poll interval, and only when no other fetch is
//! in flight; otherwise it does nothing. A successful fetch is written to the
//! store, becomes the latest snapshot, and is followed by a maintenance pass.
//! A failed fetch leaves the snapshot untouched and is reported on the event
//! channel.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use time::Duration;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use openair_core::{AirQualitySource, Clock, FetchError};
use openair_store::MaintenanceReport;
use openair_types::{LocationKey, RETENTION_WINDOW, Reading};

use crate::state::{AppState, SchedulerEvent, SchedulerStatus, Snapshot};

/// Scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Failed to fetch: {0}")]
    Fetch(#[from] FetchError),
    #[error("Failed to store: {0}")]
    Store(#[from] openair_store::Error),
}

/// What a single tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// Another fetch was in flight; the tick was dropped.
    Busy,
    /// The last success is recent enough; nothing was fetched.
    Fresh,
    /// A new reading was fetched and stored.
    Fetched(Reading),
    /// The fetch or the store write failed.
    Failed(SchedulerError),
}

/// Polls one location and keeps the store and snapshot up to date.
pub struct Scheduler {
    state: Arc<AppState>,
    source: Arc<dyn AirQualitySource>,
    clock: Arc<dyn Clock>,
    /// Held for the whole fetch-and-commit cycle.
    in_flight: Mutex<()>,
    poll_interval: Duration,
    tick_period: StdDuration,
}

impl Scheduler {
    /// Create a scheduler using the cadence from `state.config`.
    pub fn new(
        state: Arc<AppState>,
        source: Arc<dyn AirQualitySource>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let poll_interval = state.config.poll_interval();
        let tick_period = state.config.tick_period();
        Arc::new(Self {
            state,
            source,
            clock,
            in_flight: Mutex::new(()),
            poll_interval,
            tick_period,
        })
    }

    /// Shared state.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Start ticking in the background.
    ///
    /// The first tick fires immediately. The loop runs until
    /// [`stop`](Self::stop) is called.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut stop_rx = self.state.acquisition.subscribe_stop();
        self.state.acquisition.set_running(true);

        info!(
            "Starting scheduler (poll interval: {}s, tick: {}s)",
            self.poll_interval.whole_seconds(),
            self.tick_period.as_secs()
        );

        tokio::spawn(async move {
            let mut timer = interval(this.tick_period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        this.tick().await;
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            this.state.acquisition.set_running(false);
            info!("Scheduler stopped");
        })
    }

    /// Ask the background loop to exit.
    pub fn stop(&self) {
        self.state.acquisition.signal_stop();
    }

    /// Run one tick.
    pub async fn tick(&self) -> TickOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("Fetch already in flight, dropping tick");
            return TickOutcome::Busy;
        };

        let now = self.clock.now();
        if let Some(last) = self.state.acquisition.last_success()
            && now - last <= self.poll_interval
        {
            debug!("Last fetch at {} is still fresh", last);
            return TickOutcome::Fresh;
        }

        let location = self.state.acquisition.location();
        match self.fetch_and_commit(location).await {
            Ok(reading) => TickOutcome::Fetched(reading),
            Err(e) => TickOutcome::Failed(e),
        }
    }

    /// Switch to `location`, fetching it right away.
    ///
    /// Waits for any fetch in flight, then fetches regardless of staleness.
    /// The new location is adopted only if the fetch and the store write
    /// succeed; otherwise the previous location and snapshot stay current.
    pub async fn set_location(&self, location: LocationKey) -> Result<Reading, SchedulerError> {
        let _guard = self.in_flight.lock().await;
        info!("Switching location to {}", location);
        self.fetch_and_commit(location).await
    }

    /// Latest reading, if any fetch has succeeded yet.
    pub fn latest_reading(&self) -> Option<Reading> {
        self.state.acquisition.latest()
    }

    /// Receiver notified whenever the location and latest reading are replaced.
    pub fn watch_latest(&self) -> watch::Receiver<Snapshot> {
        self.state.acquisition.watch_snapshot()
    }

    /// One reading per hour for the last `hours` hours, oldest first.
    ///
    /// `hours` is clamped to the retention window.
    pub async fn recent_history(&self, hours: u32) -> Result<Vec<Reading>, openair_store::Error> {
        let window = Duration::hours(i64::from(hours)).min(RETENTION_WINDOW);
        let now = self.clock.now();
        let store = self.state.store.lock().await;
        store.query_recent_at(now, window)
    }

    /// The location currently being monitored.
    pub fn current_location(&self) -> LocationKey {
        self.state.acquisition.location()
    }

    /// Subscribe to updates and failures.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.state.events.subscribe()
    }

    /// Snapshot of the scheduler's counters.
    pub async fn status(&self) -> SchedulerStatus {
        self.state.acquisition.status().await
    }

    /// Prune and dedupe the store as of now.
    pub async fn maintain(&self) -> Result<MaintenanceReport, openair_store::Error> {
        let now = self.clock.now();
        let store = self.state.store.lock().await;
        store.maintain_at(now, RETENTION_WINDOW)
    }

    /// Fetch `location`, store the result, publish it, then run maintenance.
    ///
    /// The caller must hold `in_flight`.
    async fn fetch_and_commit(&self, location: LocationKey) -> Result<Reading, SchedulerError> {
        let acquisition = &self.state.acquisition;

        acquisition.set_fetching(true);
        let fetched = self.source.fetch(&location).await;
        acquisition.set_fetching(false);

        let reading = match fetched {
            Ok(reading) => reading,
            Err(e) => {
                let failures = acquisition.record_failure(e.to_string()).await;
                if failures <= 3 {
                    warn!("Failed to fetch {}: {} (attempt {})", location, e, failures);
                } else if failures == 4 {
                    error!(
                        "Failed to fetch {} after {} attempts, will continue trying silently",
                        location, failures
                    );
                } else {
                    debug!("Failed to fetch {}: {}", location, e);
                }
                let _ = self.state.events.send(SchedulerEvent::FetchFailed {
                    location,
                    error: e.clone(),
                });
                return Err(e.into());
            }
        };

        let store = self.state.store.lock().await;
        let written = store.upsert(&reading);
        if let Err(e) = written {
            error!("Failed to store reading for {}: {}", location, e);
            acquisition.record_failure(e.to_string()).await;
            let _ = self.state.events.send(SchedulerEvent::StoreFailed {
                error: e.to_string(),
            });
            return Err(e.into());
        }

        let now = self.clock.now();
        acquisition
            .record_success(location, reading.clone(), now)
            .await;
        info!(
            "{}: AQI {} (acquired {})",
            reading.location_label, reading.aqi, reading.timestamp
        );
        let _ = self
            .state
            .events
            .send(SchedulerEvent::Updated(reading.clone()));

        let maintained = store.maintain_at(now, RETENTION_WINDOW);
        drop(store);
        if let Err(e) = maintained {
            warn!("Maintenance pass failed: {}", e);
            let _ = self.state.events.send(SchedulerEvent::StoreFailed {
                error: e.to_string(),
            });
        }

        Ok(reading)
    }
}
