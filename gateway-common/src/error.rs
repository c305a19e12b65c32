use thiserror::Error;

/// The error kinds enumerated by the design: each one dictates a distinct
/// propagation policy in the engine (retry, surface, log-and-skip, refuse to start).
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("chain RPC transient error on {chain}: {message}")]
    ChainTransient { chain: String, message: String },

    #[error("chain error on {chain}: {message}")]
    ChainPermanent { chain: String, message: String },

    #[error("callback delivery is retriable: {0}")]
    CallbackRetriable(String),

    #[error("callback delivery failed permanently: {0}")]
    CallbackPermanent(String),

    #[error("store precondition failed, row was mutated concurrently: {0}")]
    StoreConflict(String),

    #[error("fatal configuration error: {0}")]
    Fatal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GatewayError {
    /// Whether the caller should retry this operation on a later tick.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            GatewayError::ChainTransient { .. } | GatewayError::CallbackRetriable(_)
        )
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
