//! Core acquisition library for OpenAir.
//!
//! This crate talks to the World Air Quality Index API and guards the
//! acquisition process against running twice.
//!
//! # Features
//!
//! - **Remote fetch**: one GET per poll, normalized into a [`Reading`]
//! - **Defensive parsing**: missing pollutants become `None`, missing AQI is an error
//! - **Location helpers**: IP-based auto-detection and station search
//! - **Single instance**: PID marker with stale-lock detection
//! - **Testing**: [`MockSource`] and [`ManualClock`] for deterministic tests
//!
//! # Quick Start
//!
//! ```no_run
//! use openair_core::{AirQualitySource, WaqiClient};
//! use openair_types::LocationKey;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = WaqiClient::new("https://api.waqi.info", "demo", WaqiClient::DEFAULT_TIMEOUT)?;
//!
//!     let here = client.locate_here().await?;
//!     let reading = client.fetch(&here).await?;
//!     println!("{}: AQI {}", reading.location_label, reading.aqi);
//!
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod error;
pub mod guard;
pub mod mock;
pub mod traits;
pub mod waqi;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{FetchError, GuardError, Result};
pub use guard::{LOCK_FILE_NAME, LivenessProbe, SingleInstanceGuard, process_alive};
pub use mock::MockSource;
pub use traits::AirQualitySource;
pub use waqi::{DEFAULT_BASE_URL, StationMatch, WaqiClient, parse_feed, parse_search};

// Re-export from openair-types
pub use openair_types::{LocationError, LocationKey, Measure, Reading};
