use thiserror::Error;

#[derive(Debug, Error)]
pub enum AtlasError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid commit: {0}")]
    InvalidCommit(String),

    #[error("Invalid evidence: {0}")]
    InvalidEvidence(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Other: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, AtlasError>;
