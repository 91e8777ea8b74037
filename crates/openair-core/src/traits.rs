//! Trait abstractions for air-quality data sources.
//!
//! This module provides the [`AirQualitySource`] trait that abstracts over
//! the real HTTP client and the mock source used in tests.

use async_trait::async_trait;

use openair_types::{LocationKey, Reading};

use crate::error::Result;

/// Anything that can turn a [`LocationKey`] into a fresh [`Reading`].
///
/// One call is one remote request. Implementations must not touch the
/// store; persisting the result is the caller's job.
///
/// # Example
///
/// ```ignore
/// use openair_core::{AirQualitySource, Result};
/// use openair_types::LocationKey;
///
/// async fn print_aqi<S: AirQualitySource>(source: &S, key: &LocationKey) -> Result<()> {
///     let reading = source.fetch(key).await?;
///     println!("AQI: {}", reading.aqi);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait AirQualitySource: Send + Sync {
    /// Fetch the current reading for `key`.
    ///
    /// The reading's timestamp is the acquisition (completion) time.
    async fn fetch(&self, key: &LocationKey) -> Result<Reading>;
}
