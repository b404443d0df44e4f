//! Lock-boundary search error types

use std::time::Duration;
use thiserror::Error;

/// Result type for search operations
pub type SearchResult<T> = Result<T, SearchError>;

/// Errors that can end a lock-boundary search
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    /// Search parameters rejected before touching the device
    #[error("Invalid search configuration: {0}")]
    InvalidConfig(String),

    /// The device has no lock sensor to probe
    #[error("Lock sensor '{0}' not present on device")]
    SensorUnavailable(String),

    /// A device command failed
    #[error("Hardware command failed: {0}")]
    Hardware(String),

    /// The LO did not re-acquire lock within the settle timeout
    #[error("LO did not re-lock within {timeout:?} after {polls} polls at offset {offset} s")]
    SettleTimeout {
        offset: f64,
        timeout: Duration,
        polls: u64,
    },
}

impl SearchError {
    /// Whether the error was raised before any hardware interaction.
    pub fn is_configuration(&self) -> bool {
        matches!(self, SearchError::InvalidConfig(_))
    }

    /// Whether the error is a missing precondition on the device.
    pub fn is_precondition(&self) -> bool {
        matches!(self, SearchError::SensorUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SearchError::SensorUnavailable("lo_locked".to_string());
        assert_eq!(err.to_string(), "Lock sensor 'lo_locked' not present on device");

        let err = SearchError::SettleTimeout {
            offset: 0.0002,
            timeout: Duration::from_millis(5),
            polls: 12,
        };
        assert!(err.to_string().contains("12 polls"));
    }

    #[test]
    fn test_error_classes() {
        assert!(SearchError::InvalidConfig("x".into()).is_configuration());
        assert!(SearchError::SensorUnavailable("lo_locked".into()).is_precondition());
        assert!(!SearchError::Hardware("x".into()).is_configuration());
    }
}
