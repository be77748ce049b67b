//! Error types for the qtree pool operator
//!
//! Provides structured error types for the economy driver, the backend
//! client port, configuration loading, and the REST surface.

use crate::domain::ports::ErrorCode;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Resource Errors
    // =========================================================================
    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("Backend unavailable: {backend}")]
    BackendUnavailable { backend: String },

    #[error("Backend transport error during {operation}: {reason}")]
    Transport { operation: String, reason: String },

    #[error("Backend operation {operation} failed ({code}): {reason}")]
    ApiFailed {
        operation: String,
        code: ErrorCode,
        reason: String,
    },

    // =========================================================================
    // Quota Errors
    // =========================================================================
    /// The Flexvol name is kept for logs and left out of the message
    #[error("Quotas are corrupt on the backing Flexvol")]
    QuotaCorrupt { flexvol: String },

    #[error("Timed out after {waited:?} waiting for quotas on {flexvol} to reach {target}")]
    QuotaTransitionTimeout {
        flexvol: String,
        target: String,
        waited: Duration,
    },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Volume name {name} is invalid: {reason}")]
    InvalidVolumeName { name: String, reason: String },

    #[error("Requested size {requested} bytes is below the minimum of {minimum} bytes")]
    VolumeTooSmall { requested: u64, minimum: u64 },

    #[error("Requested size {requested} bytes exceeds the limit of {limit} bytes")]
    VolumeTooLarge { requested: u64, limit: u64 },

    #[error("Invalid value {value:?} for volume option {key}")]
    InvalidOption { key: String, value: String },

    /// User-facing provisioning failure. The cause is logged, not carried.
    #[error("Volume creation failed: {name}")]
    VolumeCreationFailed { name: String },

    #[error("Volume deletion failed: {name}")]
    VolumeDeletionFailed { name: String },

    #[error("Volume resize failed: {name}")]
    VolumeResizeFailed { name: String },

    // =========================================================================
    // API Errors
    // =========================================================================
    #[error("API request validation failed: {0}")]
    ApiValidation(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Capacity parse error: {0}")]
    CapacityParse(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a background pass should do with a failed item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Leave the item in place and revisit it on the next tick
    RetryNextPass,
    /// Stop trying; the item needs operator attention
    Abandon,
}

impl Error {
    /// Shorthand for a failed backend call
    pub fn api(operation: impl Into<String>, code: ErrorCode, reason: impl Into<String>) -> Self {
        Error::ApiFailed {
            operation: operation.into(),
            code,
            reason: reason.into(),
        }
    }

    /// Shorthand for a transport failure
    pub fn transport(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Transport {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Determine what a housekeeping pass should do with this error
    pub fn action(&self) -> ErrorAction {
        if self.is_fatal() {
            ErrorAction::Abandon
        } else {
            ErrorAction::RetryNextPass
        }
    }

    /// Configuration-class failures that retrying will not fix
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::QuotaCorrupt { .. } | Error::Configuration(_) | Error::InvalidOption { .. }
        )
    }

    /// Validation failures caused by the request itself
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidVolumeName { .. }
                | Error::VolumeTooSmall { .. }
                | Error::VolumeTooLarge { .. }
                | Error::InvalidOption { .. }
                | Error::ApiValidation(_)
                | Error::CapacityParse(_)
        )
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. }
                | Error::BackendUnavailable { .. }
                | Error::QuotaTransitionTimeout { .. }
        )
    }

    /// The backend error code, if this error came from a failed API call
    pub fn code(&self) -> Option<&ErrorCode> {
        match self {
            Error::ApiFailed { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
