//! Error types for the model registry.

use thiserror::Error;

use modelgrid_state::StateError;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors surfaced by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Unknown model name or version selector that resolves to nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The artifact reference could not be resolved by the external
    /// artifact store (existence check only).
    #[error("artifact not resolvable: {0}")]
    InvalidArtifact(String),

    /// A status transition that the version lifecycle forbids.
    #[error("invalid transition for {model}@{version}: {detail}")]
    InvalidTransition {
        model: String,
        version: String,
        detail: String,
    },

    /// The durable store is unreachable; the operation fails closed.
    #[error("storage unavailable: {0}")]
    Storage(#[from] StateError),
}
