//! Executor error types

use keeper_common::crd::OperationKind;
use keeper_common::Error;

/// Failure to bring an operation to a consistent desired state
#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error("expected a {expected} operation, got a {found}")]
    TypeMismatch {
        expected: OperationKind,
        found: OperationKind,
    },

    #[error("could not create job '{job}': {source}")]
    CreationFailed { job: String, source: Error },

    #[error("could not list volume claims in '{namespace}': {source}")]
    RetrievalFailed { namespace: String, source: Error },

    #[error("pre-backup hook failed: {message}")]
    PreBackupFailed { message: String },

    #[error("{0}")]
    Common(#[from] Error),
}

impl SchedulingError {
    /// Programming-invariant violations; retrying cannot help
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TypeMismatch { .. })
    }

    /// Whether the driver should retry on its next pass
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TypeMismatch { .. } => false,
            Self::CreationFailed { source, .. } | Self::RetrievalFailed { source, .. } => {
                source.is_retryable()
            }
            Self::PreBackupFailed { .. } => true,
            Self::Common(e) => e.is_retryable(),
        }
    }
}
