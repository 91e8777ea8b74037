//! Mock data source for testing.
//!
//! [`MockSource`] implements [`AirQualitySource`] from a script of queued
//! responses, so the scheduler can be exercised without network access.
//!
//! # Features
//!
//! - **Scripted responses**: queue readings and failures in order
//! - **Latency simulation**: hold each fetch for a fixed duration
//! - **Call recording**: inspect which keys were fetched

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use openair_types::{LocationKey, Reading};

use crate::clock::{Clock, SystemClock};
use crate::error::{FetchError, Result};
use crate::traits::AirQualitySource;

/// A scripted air-quality source.
///
/// Each call to [`fetch`](AirQualitySource::fetch) pops the next queued
/// response. Queued readings are re-stamped with the clock's time at
/// completion, like a real fetch. An empty queue yields a
/// [`FetchError::Transport`].
///
/// # Example
///
/// ```
/// use openair_core::{AirQualitySource, MockSource};
/// use openair_types::LocationKey;
///
/// #[tokio::main]
/// async fn main() {
///     let source = MockSource::new();
///     source.push_aqi("Paris", 42);
///
///     let key = LocationKey::from_name("Paris").unwrap();
///     let reading = source.fetch(&key).await.unwrap();
///     assert_eq!(reading.aqi, 42);
///     assert_eq!(source.call_count(), 1);
/// }
/// ```
#[derive(Debug)]
pub struct MockSource {
    clock: Arc<dyn Clock>,
    responses: Mutex<VecDeque<Result<Reading>>>,
    calls: Mutex<Vec<LocationKey>>,
    call_count: AtomicU32,
    /// Simulated fetch latency in milliseconds (0 = no delay).
    latency_ms: AtomicU64,
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSource {
    /// Create a source stamping readings with the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a source stamping readings with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            call_count: AtomicU32::new(0),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Queue a successful reading.
    pub fn push_reading(&self, reading: Reading) {
        lock(&self.responses).push_back(Ok(reading));
    }

    /// Queue a successful reading with only a label and AQI.
    pub fn push_aqi(&self, label: &str, aqi: i64) {
        self.push_reading(Reading::new(self.clock.now(), label, aqi));
    }

    /// Queue a failure.
    pub fn push_error(&self, error: FetchError) {
        lock(&self.responses).push_back(Err(error));
    }

    /// Hold every fetch for `latency` before answering.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of fetches performed.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Keys fetched so far, in call order.
    pub fn calls(&self) -> Vec<LocationKey> {
        lock(&self.calls).clone()
    }

    /// Number of responses still queued.
    pub fn pending(&self) -> usize {
        lock(&self.responses).len()
    }
}

#[async_trait]
impl AirQualitySource for MockSource {
    async fn fetch(&self, key: &LocationKey) -> Result<Reading> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        lock(&self.calls).push(key.clone());

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let next = lock(&self.responses).pop_front();
        match next {
            Some(Ok(mut reading)) => {
                reading.timestamp = self.clock.now();
                Ok(reading)
            }
            Some(Err(e)) => Err(e),
            None => Err(FetchError::Transport(
                "mock source has no scripted response".to_string(),
            )),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
