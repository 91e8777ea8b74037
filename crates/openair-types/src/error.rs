//! Error types for location validation in openair-types.

use thiserror::Error;

/// Errors raised while turning user input into a [`LocationKey`](crate::LocationKey).
///
/// These are input-validation failures: they are always reported before any
/// network call is attempted.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum LocationError {
    /// Latitude or longitude is non-finite or outside its valid range.
    #[error("Invalid coordinate: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    /// The place name is empty after trimming whitespace.
    #[error("Location name cannot be empty")]
    EmptyLocation,
}

/// Result type alias using openair-types' LocationError type.
pub type LocationResult<T> = std::result::Result<T, LocationError>;
