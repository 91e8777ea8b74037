//! Error types for openair-core.
//!
//! # Recovery
//!
//! None of these errors are retried in place. The scheduler keeps serving
//! its last good snapshot and the next natural tick tries again.
//!
//! | Error Type | Cause | Retried by |
//! |------------|-------|------------|
//! | [`FetchError::Transport`] | connect failure, timeout, non-2xx status | next tick |
//! | [`FetchError::RemoteRejected`] | API answered with `status != "ok"` | next tick |
//! | [`FetchError::MalformedPayload`] | body is not JSON, or lacks `aqi` / city name | next tick |
//! | [`FetchError::InvalidBaseUrl`] | configuration | never, fix and restart |
//! | [`GuardError`] | lock marker I/O | never |

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while fetching data from the remote API.
///
/// `Clone` so the same error can be handed to every subscriber of the
/// scheduler's event channel.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum FetchError {
    /// Connection failure, expired timeout, or non-2xx HTTP status.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The API answered but its top-level `status` was not `"ok"`.
    #[error("Remote API rejected the request (status: {0})")]
    RemoteRejected(String),

    /// The body could not be understood, or a required field was missing.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// The configured base URL cannot carry path segments.
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Transport(format!("request timed out: {}", err))
        } else if err.is_decode() {
            FetchError::MalformedPayload(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

/// Result type for fetch operations.
pub type Result<T> = std::result::Result<T, FetchError>;

/// Errors touching the single-instance lock marker.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Reading, writing or removing the marker failed.
    #[error("Lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display() {
        assert_eq!(
            FetchError::RemoteRejected("error".into()).to_string(),
            "Remote API rejected the request (status: error)"
        );
        assert!(
            FetchError::MalformedPayload("missing aqi".into())
                .to_string()
                .contains("missing aqi")
        );
    }

    #[test]
    fn test_fetch_error_clone_eq() {
        let err = FetchError::Transport("connection refused".into());
        assert_eq!(err.clone(), err);
    }

    #[test]
    fn test_guard_error_display() {
        let err = GuardError::Io {
            path: PathBuf::from("/tmp/openair.lock"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("/tmp/openair.lock"));
    }
}
