//! Acquisition service for OpenAir.
//!
//! This crate wires the remote fetcher, the hourly store and the
//! single-instance guard into a running service:
//! - Polls the World Air Quality Index for one location on a schedule
//! - Writes each reading through to the local database
//! - Keeps the latest reading in memory for consumers
//! - Prunes history older than the retention window after every fetch
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/openair/config.toml`:
//!
//! ```toml
//! [api]
//! base_url = "https://api.waqi.info"
//! token = "your-api-token"   # or set OPENAIR_TOKEN
//! timeout_secs = 10
//!
//! [schedule]
//! poll_interval_secs = 300
//! tick_secs = 60
//!
//! [storage]
//! path = "~/.local/share/openair/aqi_data.db"
//!
//! [location]
//! query = "37.7749,-122.4194"   # omit to detect from IP
//! fallback = "San Francisco"
//! ```

pub mod config;
pub mod scheduler;
pub mod shutdown;
pub mod state;

pub use config::{
    ApiConfig, Config, ConfigError, LocationConfig, LockConfig, ScheduleConfig, StorageConfig,
    ValidationError,
};
pub use scheduler::{Scheduler, SchedulerError, TickOutcome};
pub use shutdown::ShutdownSignal;
pub use state::{AcquisitionState, AppState, SchedulerEvent, SchedulerStatus, Snapshot};
