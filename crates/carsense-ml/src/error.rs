use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MlError {
    /// Training pass failed; the active model stays in force
    #[error("Training failed: {0}")]
    Training(String),

    #[error("Unknown model version: {0}")]
    UnknownVersion(Uuid),

    #[error("Unknown event: {0}")]
    UnknownEvent(Uuid),

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
