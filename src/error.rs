//! Error types surfaced to callers of the oracle.
//!
//! Validation errors are returned synchronously and never retried.
//! Collaborator failures (providers, gateways, telemetry) travel as
//! `anyhow::Error` and are isolated where they occur, so they only reach this
//! enum when a whole cycle step overruns its deadline or panics.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by oracle operations.
#[derive(Debug, Error)]
pub enum OracleError {
    /// A device with this id is already registered.
    #[error("device already registered: {0}")]
    DuplicateDevice(String),

    /// No device with this id is registered.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// An operation did not finish within its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// What was running.
        operation: String,
        /// The deadline that was exceeded.
        after: Duration,
    },

    /// An operation panicked and was stopped at its boundary.
    #[error("{operation} panicked: {message}")]
    Panicked {
        operation: String,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, OracleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_device_display() {
        let err = OracleError::DuplicateDevice("d1".to_string());
        assert_eq!(err.to_string(), "device already registered: d1");
    }

    #[test]
    fn test_device_not_found_display() {
        let err = OracleError::DeviceNotFound("ghost".to_string());
        assert_eq!(err.to_string(), "device not found: ghost");
    }

    #[test]
    fn test_timeout_display() {
        let err = OracleError::Timeout {
            operation: "threat detection".to_string(),
            after: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("threat detection timed out"));
    }

    #[test]
    fn test_panicked_display() {
        let err = OracleError::Panicked {
            operation: "refresh_devices".to_string(),
            message: "gateway driver bug".to_string(),
        };
        assert_eq!(err.to_string(), "refresh_devices panicked: gateway driver bug");
    }
}
