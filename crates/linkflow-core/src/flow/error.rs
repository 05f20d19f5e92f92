use thiserror::Error;

use crate::backend::BackendError;
use crate::storage::StoreError;

/// Errors surfaced while driving a linking attempt.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("success metadata carries no institution id")]
    MissingInstitution,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid link outcome script: {0}")]
    Script(#[from] serde_json::Error),
}
