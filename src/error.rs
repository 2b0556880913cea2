//! Error types for the Tablestep deployment engine.
//!
//! This module provides an error hierarchy for every phase of the migration
//! lifecycle: planning, bundle building, state management, provider
//! interaction, and configuration.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Tablestep deployment engine.
#[derive(Debug, Error)]
pub enum TablestepError {
    /// Change classification and step-planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Bundle-building precondition and IO errors.
    #[error("Bundle build error: {0}")]
    Build(#[from] BuildError),

    /// Deployment-state management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider (stack/table) errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Configuration errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Change classification and step-planning errors.
///
/// All of these abort the planning run before any provider call is made, so a
/// partial deployment is never attempted from a plan the engine cannot fully
/// explain.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A diff record has a shape the classifier does not support.
    #[error("Unsupported change shape at {path}: {message}")]
    UnsupportedChange {
        /// Path of the offending diff record.
        path: String,
        /// Description of the problem.
        message: String,
    },

    /// A classified change names an index that does not exist where expected.
    #[error("Unknown secondary index '{index_name}' in stack '{stack}'")]
    UnknownIndex {
        /// Name of the missing index.
        index_name: String,
        /// Stack the index was expected in.
        stack: String,
    },

    /// An index key attribute has no matching attribute definition.
    #[error("Missing attribute definition for '{attribute_name}' in stack '{stack}'")]
    MissingAttributeDefinition {
        /// Name of the key attribute.
        attribute_name: String,
        /// Stack the definition was expected in.
        stack: String,
    },

    /// A stack expected to carry a table resource has none.
    #[error("Stack '{stack}' has no table resource")]
    NoTableResource {
        /// Name of the stack.
        stack: String,
    },

    /// Replaying the planned queue does not reproduce the target snapshot.
    #[error("Planned steps for stack '{stack}' do not replay to the target table definition")]
    RoundTripMismatch {
        /// Stack whose queue failed verification.
        stack: String,
    },

    /// A template fragment could not be read as a table definition.
    #[error("Malformed table template in stack '{stack}': {message}")]
    MalformedTemplate {
        /// Stack containing the fragment.
        stack: String,
        /// Description of the parse failure.
        message: String,
    },
}

/// Bundle-building errors.
///
/// These are precondition failures: there is nothing safe to copy forward
/// from, so the builder fails fast rather than guessing a baseline.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The currently-deployed bundle directory does not exist.
    #[error("Live deployment bundle not found: {path}")]
    MissingLiveBundle {
        /// Expected bundle location.
        path: PathBuf,
    },

    /// The backend build (content hash) is missing.
    #[error("Backend build not found; run a build before deploying")]
    MissingBackendBuild,

    /// Copying or writing a bundle directory failed.
    #[error("Failed to write bundle at {path}: {message}")]
    BundleWrite {
        /// Target path.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },
}

/// Deployment-state management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State serialization failed.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// A deployment is already in progress.
    #[error("A deployment is already in progress (status: {status})")]
    AlreadyInProgress {
        /// Status of the in-flight deployment.
        status: String,
    },

    /// No deployment is in progress for the requested operation.
    #[error("No deployment in progress: cannot {operation}")]
    NotInProgress {
        /// Operation that was attempted.
        operation: String,
    },

    /// Advancing the step index would leave the valid range.
    #[error("Step index out of bounds: moving from {index} by {direction} with {count} steps")]
    StepOutOfBounds {
        /// Current step index.
        index: usize,
        /// Attempted direction (+1 or -1).
        direction: i8,
        /// Total number of steps.
        count: usize,
    },

    /// An illegal status transition was requested.
    #[error("Illegal status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },
}

/// Provider errors.
///
/// During forward deployment these are recovered at the deployment level by
/// transitioning to rollback; during rollback they are terminal.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A stack update was rejected or reached a failure status.
    #[error("Stack update failed for '{stack_name}': {reason}")]
    UpdateFailed {
        /// Name of the stack.
        stack_name: String,
        /// Provider-reported reason.
        reason: String,
    },

    /// A stack update made no progress within the allotted time.
    #[error("Stack update timed out for '{stack_name}' after {elapsed_secs}s")]
    UpdateTimedOut {
        /// Name of the stack.
        stack_name: String,
        /// Seconds waited.
        elapsed_secs: u64,
    },

    /// A table's secondary indexes never reported ready.
    #[error("Table '{table_name}' indexes not ready after {elapsed_secs}s")]
    TableNotReady {
        /// Name of the table.
        table_name: String,
        /// Seconds waited.
        elapsed_secs: u64,
    },

    /// A rollback operation itself failed; manual resolution is required.
    #[error("Rollback failed for '{stack_name}': {reason}")]
    RollbackFailed {
        /// Name of the stack.
        stack_name: String,
        /// Provider-reported reason.
        reason: String,
    },

    /// Generic provider API failure.
    #[error("Provider API error: {message}")]
    Api {
        /// Description of the failure.
        message: String,
    },
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },
}

/// Result type alias for Tablestep operations.
pub type Result<T> = std::result::Result<T, TablestepError>;

impl TablestepError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error represents an expected transient condition.
    ///
    /// Only readiness waits are retried by the engine; everything else is
    /// treated as authoritative.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(ProviderError::TableNotReady { .. } | ProviderError::Api { .. })
        )
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a generic provider API error.
    #[must_use]
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl PlanError {
    /// Creates an unsupported-change error for a diff record path.
    #[must_use]
    pub fn unsupported(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnsupportedChange {
            path: path.into(),
            message: message.into(),
        }
    }
}
