mod error;
mod keys;
mod models;
mod store;

pub use error::{StoreError, StoreResult};
pub use models::{
    BatchItem, BatchItemState, Deposit, DepositStatus, StartWatchParams, Wallet, WalletStatus,
    Watch, WatchStatus,
};
pub use store::Store;
