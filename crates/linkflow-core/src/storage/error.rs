use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by token persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("storage key '{0}' is not a valid file name")]
    InvalidKey(String),
    #[error("profile '{0}' is not a valid file name")]
    InvalidProfile(String),
}
