//! Error types for the retrain trigger.

use thiserror::Error;

use modelgrid_deploy::DeployError;
use modelgrid_state::StateError;

/// Result type alias for trigger operations.
pub type TriggerResult<T> = Result<T, TriggerError>;

/// Errors surfaced by trigger operations.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("retrain request not found: {0}")]
    NotFound(String),

    #[error("retrain request {id} is {status}, expected {expected}")]
    InvalidState {
        id: u64,
        status: String,
        expected: String,
    },

    #[error("storage unavailable: {0}")]
    Storage(#[from] StateError),

    #[error(transparent)]
    Deploy(#[from] DeployError),
}
