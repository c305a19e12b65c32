use thiserror::Error;

/// Mirrors the `ChainTransient`/`ChainPermanent` split from §7: transient
/// errors are worth retrying on the next tick, permanent ones are not.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("transient error on {chain}: {message}")]
    Transient { chain: String, message: String },

    #[error("permanent error on {chain}: {message}")]
    Permanent { chain: String, message: String },
}

impl ChainError {
    pub fn transient(chain: impl Into<String>, message: impl Into<String>) -> Self {
        ChainError::Transient {
            chain: chain.into(),
            message: message.into(),
        }
    }

    pub fn permanent(chain: impl Into<String>, message: impl Into<String>) -> Self {
        ChainError::Permanent {
            chain: chain.into(),
            message: message.into(),
        }
    }
}

impl From<ChainError> for gateway_common::GatewayError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Transient { chain, message } => {
                gateway_common::GatewayError::ChainTransient { chain, message }
            }
            ChainError::Permanent { chain, message } => {
                gateway_common::GatewayError::ChainPermanent { chain, message }
            }
        }
    }
}

pub type ChainResult<T> = Result<T, ChainError>;
