//! Platform-agnostic types for OpenAir air-quality readings.
//!
//! This crate provides the data model shared by the fetcher
//! (openair-core), the time-series store (openair-store) and the
//! acquisition service (openair-service).
//!
//! # Features
//!
//! - [`Reading`]: one normalized observation, with nullable pollutant fields
//! - [`LocationKey`]: canonical place query (verbatim name or rounded coordinates)
//! - [`hour_bucket`]: the functional dedup key for persisted readings
//!
//! # Example
//!
//! ```
//! use openair_types::{LocationKey, Measure, Reading};
//! use time::OffsetDateTime;
//!
//! let key = LocationKey::parse("40.7128,-74.0060")?;
//! assert_eq!(key.to_string(), "40.713;-74.006");
//!
//! let reading = Reading::new(OffsetDateTime::now_utc(), "New York", 37)
//!     .with(Measure::Pm25, 9.0);
//! assert_eq!(reading.get(Measure::So2), None);
//! # Ok::<(), openair_types::LocationError>(())
//! ```

pub mod error;
pub mod location;
pub mod reading;

pub use error::{LocationError, LocationResult};
pub use location::{COORDINATE_PRECISION, LocationKey};
pub use reading::{Measure, RETENTION_WINDOW, Reading, hour_bucket};
