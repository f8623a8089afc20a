//! Error types for the deployment controller.

use thiserror::Error;

use modelgrid_state::StateError;

/// Result type alias for controller operations.
pub type DeployResult<T> = Result<T, DeployError>;

/// Errors surfaced by deploy/rollback operations.
///
/// Precondition violations (`AlreadyActive`, `NoPriorVersion`) are
/// reported to the caller, not retried. `Conflict` means a per-model
/// race was lost after the critical section already resolved — safe to
/// retry immediately. Storage failures fail closed: the controller
/// never guesses at state when the store is unreachable.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("version not found: {0}")]
    VersionNotFound(String),

    #[error("{model}@{version} is already active")]
    AlreadyActive { model: String, version: String },

    #[error("nothing to roll back to for {0}")]
    NoPriorVersion(String),

    #[error("validation failed ({check}): {detail}")]
    ValidationFailed { check: String, detail: String },

    #[error("dry run cancelled by caller")]
    Cancelled,

    #[error("concurrency conflict: {0}")]
    Conflict(String),

    #[error("storage unavailable: {0}")]
    Storage(#[from] StateError),
}
