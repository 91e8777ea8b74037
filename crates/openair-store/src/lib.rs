//! Hourly time-series persistence for OpenAir readings.
//!
//! This crate keeps the last day of air-quality readings in SQLite so the
//! history survives restarts.
//!
//! # Features
//!
//! - One row per local hour: later fetches in the same hour overwrite it
//! - Age-based pruning against a retention window
//! - Cleanup of hours that ended up with several rows
//! - "Last N hours" queries returning one reading per hour, oldest first
//!
//! # Example
//!
//! ```no_run
//! use openair_store::Store;
//! use openair_types::RETENTION_WINDOW;
//!
//! let store = Store::open_default()?;
//!
//! for reading in store.query_recent(RETENTION_WINDOW)? {
//!     println!("{} AQI {}", reading.timestamp, reading.aqi);
//! }
//!
//! let report = store.maintain(RETENTION_WINDOW)?;
//! println!("removed {} rows", report.total());
//! # Ok::<(), openair_store::Error>(())
//! ```

mod error;
mod models;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{MaintenanceReport, StoredReading, UpsertOutcome};
pub use schema::SCHEMA_VERSION;
pub use store::{Store, local_offset};

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/openair/aqi_data.db`
/// - macOS: `~/Library/Application Support/openair/aqi_data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\openair\aqi_data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("openair")
        .join("aqi_data.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_db_path() {
        let path = default_db_path();
        assert!(path.ends_with("openair/aqi_data.db"));
    }
}
