mod adapter;
mod error;
mod evm;
mod registry;
mod solana;
mod tron;

pub use adapter::{ChainAdapter, FeeData, FeePolicy, ObservedTransfer, SendResult};
pub use error::{ChainError, ChainResult};
pub use registry::ChainRegistry;
