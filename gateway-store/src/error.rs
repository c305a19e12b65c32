use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),
}

impl From<StoreError> for gateway_common::GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => gateway_common::GatewayError::NotFound(msg),
            StoreError::Conflict(msg) | StoreError::AlreadyExists(msg) => {
                gateway_common::GatewayError::StoreConflict(msg)
            }
            other => gateway_common::GatewayError::Other(anyhow::anyhow!(other.to_string())),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
