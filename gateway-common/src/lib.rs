pub mod amount;
pub mod chain;
pub mod config;
pub mod error;
pub mod ids;
pub mod signature;
pub mod time;
pub mod tokio_util;

pub use amount::Amount;
pub use chain::{Chain, Token};
pub use error::{GatewayError, GatewayResult};
pub use ids::{BatchItemId, DepositId, WalletId, WatchId};
