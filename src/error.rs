//! Error types for fencewatch.
//!
//! All errors are strongly typed using thiserror so callers can pattern match
//! on specific conditions (a duplicate region versus an unreachable sink, for
//! example) instead of parsing messages.

use thiserror::Error;

use crate::geofence::GeofenceId;

/// Validation errors raised before anything enters the engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid geometry: {reason}")]
    InvalidGeometry {
        reason: String,
    },

    #[error("Invalid coordinate: lat={lat}, lng={lng}")]
    InvalidCoordinate {
        lat: f64,
        lng: f64,
    },

    #[error("Identifier '{field}' cannot be empty")]
    EmptyId {
        field: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

impl ValidationError {
    /// Shorthand for an `InvalidGeometry` error.
    #[must_use]
    pub fn geometry(reason: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            reason: reason.into(),
        }
    }
}

/// Region store errors. None of these leave the store modified.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegionError {
    #[error("Region already exists: {0}")]
    DuplicateRegion(GeofenceId),

    #[error("Region not found: {0}")]
    NotFound(GeofenceId),

    #[error("Region rejected: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Region backend error: {0}")]
    Backend(String),
}

/// Failures delivering an alert to a sink.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Sink '{sink}' unreachable: {reason}")]
    Unreachable {
        sink: String,
        reason: String,
    },

    #[error("Failed to serialize alert: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the running engine.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Ingest queue full (capacity {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Top-level error type for fencewatch.
#[derive(Debug, Error)]
pub enum FenceError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Region error: {0}")]
    Region(#[from] RegionError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl FenceError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error, including a region rejected for its geometry.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Region(RegionError::Invalid(_))
        )
    }

    /// Returns true if this is a region store error.
    #[must_use]
    pub const fn is_region(&self) -> bool {
        matches!(self, Self::Region(_))
    }

    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Region(_) | Self::Internal { .. } => false,
            Self::Publish(e) => matches!(e, PublishError::Unreachable { .. }),
            Self::Execution(e) => matches!(
                e,
                ExecutionError::QueueFull { .. } | ExecutionError::Timeout { .. }
            ),
            Self::Io(_) => true,
        }
    }
}

/// Result type alias for fencewatch operations.
pub type FenceResult<T> = Result<T, FenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_geometry() {
        let err = ValidationError::geometry("polygon needs at least 3 vertices, got 2");
        let msg = format!("{err}");
        assert!(msg.contains("Invalid geometry"));
        assert!(msg.contains("got 2"));
    }

    #[test]
    fn test_region_error_duplicate() {
        let err = RegionError::DuplicateRegion(GeofenceId::new("yard"));
        assert_eq!(format!("{err}"), "Region already exists: yard");
    }

    #[test]
    fn test_execution_error_queue_full() {
        let err = ExecutionError::QueueFull { capacity: 64 };
        assert!(format!("{err}").contains("64"));
    }

    #[test]
    fn test_fence_error_from_validation() {
        let err: FenceError = ValidationError::EmptyId {
            field: "device_id".to_string(),
        }
        .into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_region_invalid_counts_as_validation() {
        let err: FenceError = RegionError::Invalid(ValidationError::geometry("radius")).into();
        assert!(err.is_validation());
        assert!(err.is_region());
    }

    #[test]
    fn test_fence_error_retryable() {
        let full: FenceError = ExecutionError::QueueFull { capacity: 1 }.into();
        assert!(full.is_retryable());

        let gone: FenceError = ExecutionError::Disconnected {
            path: "shard-0".to_string(),
        }
        .into();
        assert!(!gone.is_retryable());

        let sink: FenceError = PublishError::Unreachable {
            sink: "socket".to_string(),
            reason: "refused".to_string(),
        }
        .into();
        assert!(sink.is_retryable());

        let missing: FenceError = RegionError::NotFound(GeofenceId::new("x")).into();
        assert!(!missing.is_retryable());
    }

    #[test]
    fn test_fence_error_internal() {
        let err = FenceError::internal("unexpected state");
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("unexpected state"));
    }
}
