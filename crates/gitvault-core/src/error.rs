//! Error taxonomy shared by the store, the remote client, and the coordinator.

use thiserror::Error;

/// Result type for gitvault operations.
pub type VaultResult<T> = std::result::Result<T, VaultError>;

/// Errors surfaced by gitvault operations.
///
/// A 422 "already exists" answer to a create is not an error: it is the
/// idempotent-create success path and never reaches this type.
#[derive(Debug, Error)]
pub enum VaultError {
    /// A task or record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request payload is malformed or incomplete.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The branch head kept moving under us until the retry budget ran out.
    #[error("remote conflict on {path} persisted after {attempts} attempts")]
    RemoteConflict { path: String, attempts: u32 },

    /// Any other remote failure: non-2xx after retries, or a malformed response.
    #[error("remote store error: {0}")]
    RemoteFatal(String),

    /// A capacity bound was observed broken.
    #[error("capacity invariant violated: {0}")]
    CapacityInvariantViolation(String),

    /// Local storage or runtime failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VaultError {
    /// Short machine-readable code used by the HTTP error contract.
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::NotFound(_) => "not_found",
            VaultError::Validation(_) => "bad_request",
            VaultError::RemoteConflict { .. } | VaultError::RemoteFatal(_) => "remote_error",
            VaultError::CapacityInvariantViolation(_) | VaultError::Other(_) => "internal",
        }
    }
}
