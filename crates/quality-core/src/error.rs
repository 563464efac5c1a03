//! Error types for the quality-core library

use thiserror::Error;

/// Result type for quality monitoring operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while monitoring or mitigating a call
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The transport statistics could not be retrieved this cycle
    #[error("Statistics unavailable: {reason}")]
    StatsUnavailable { reason: String },

    /// The host's mitigation operation rejected or failed
    #[error("Mitigation failed: {reason}")]
    MitigationFailed { reason: String },

    /// A statistics field was missing or malformed (strict parsing only)
    #[error("Invalid snapshot field '{field}': {reason}")]
    InvalidSnapshotField { field: String, reason: String },

    /// Controller policy failed validation
    #[error("Invalid policy: {message}")]
    InvalidPolicy { message: String },

    /// Approval or rejection requested with nothing outstanding
    #[error("No suggestion is pending approval")]
    NoPendingSuggestion,

    /// Session not registered with the monitor registry
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// Session already registered with the monitor registry
    #[error("Session already registered: {session_id}")]
    SessionExists { session_id: String },

    /// Raw report could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a statistics-unavailable error
    pub fn stats_unavailable(reason: impl Into<String>) -> Self {
        Self::StatsUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a mitigation-failed error
    pub fn mitigation_failed(reason: impl Into<String>) -> Self {
        Self::MitigationFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid-field error
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSnapshotField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid-policy error
    pub fn invalid_policy(message: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            message: message.into(),
        }
    }

    /// Whether this error is contained within a single polling cycle
    pub fn is_cycle_local(&self) -> bool {
        matches!(
            self,
            Self::StatsUnavailable { .. }
                | Self::MitigationFailed { .. }
                | Self::InvalidSnapshotField { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::Other(err.to_string())
    }
}
