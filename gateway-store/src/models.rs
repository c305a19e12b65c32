use gateway_common::{Amount, BatchItemId, Chain, DepositId, Token, WalletId, WatchId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletStatus {
    Unused,
    Pending,
    Used,
    Failed,
}

impl WalletStatus {
    /// §3 Wallet invariant: `UNUSED -> PENDING -> USED` or
    /// `UNUSED -> PENDING -> FAILED`; `USED`/`FAILED` never move again.
    pub fn can_transition_to(&self, next: WalletStatus) -> bool {
        use WalletStatus::*;
        matches!(
            (self, next),
            (Unused, Pending) | (Pending, Used) | (Pending, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WalletStatus::Used | WalletStatus::Failed)
    }
}

/// A receiving address. Created and populated by the out-of-scope address
/// derivation collaborator (§4.7); the gateway only drives its status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: String,
    pub chain: Chain,
    pub address: String,
    /// Opaque ciphertext; only ever passed to the out-of-scope `KeyDecryptor`
    /// at sweep time (§6). The gateway never stores or logs the plaintext key.
    pub encrypted_private_key: Vec<u8>,
    pub derivation_index: u64,
    pub status: WalletStatus,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchStatus {
    Active,
    Confirmed,
    Expired,
    Inactive,
}

impl WatchStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WatchStatus::Active)
    }

    /// §3(b): monotonic toward a terminal value.
    pub fn can_transition_to(&self, next: WatchStatus) -> bool {
        use WatchStatus::*;
        matches!(
            (self, next),
            (Active, Confirmed) | (Active, Expired) | (Active, Inactive)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Watch {
    pub id: WatchId,
    pub user_id: String,
    pub wallet_id: WalletId,
    pub address: String,
    pub chain: Chain,
    pub token: Token,
    pub expected_amount: Amount,
    pub status: WatchStatus,
    pub expires_at: u64,
    pub created_at: u64,
    pub last_checked_at: Option<u64>,
    pub confirmations: u64,
    pub tx_hash: Option<String>,
    pub actual_amount: Option<Amount>,
    pub callback_url: Option<String>,
    pub payment_id: Option<String>,
    pub callback_sent: bool,
    pub callback_attempts: u32,
    pub last_callback_attempt: Option<u64>,
    /// Set only by a force-stop (§4.3.4); records permanently that the
    /// terminal callback never succeeded, independent of `callback_sent`.
    pub force_stopped: bool,
}

impl Watch {
    pub fn has_evidence(&self) -> bool {
        self.tx_hash.is_some() && self.actual_amount.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepositStatus {
    Pending,
    Confirmed,
    Failed,
}

/// Archival record keyed by `(chain, tx_hash)`; its uniqueness is what
/// actually prevents double-credit at the transaction level (§3, §8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deposit {
    pub id: DepositId,
    pub chain: Chain,
    pub tx_hash: String,
    pub amount: Amount,
    pub token: Token,
    pub wallet_id: WalletId,
    pub status: DepositStatus,
    pub observed_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchItemState {
    Queued,
    Executing,
    Done,
    Failed,
}

impl BatchItemState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchItemState::Done | BatchItemState::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub id: BatchItemId,
    pub watch_id: WatchId,
    pub wallet_id: WalletId,
    pub chain: Chain,
    pub user_id: String,
    pub amount: Amount,
    pub created_at: u64,
    pub state: BatchItemState,
    pub tx_hash: Option<String>,
    /// `floor(unix_hour / 2)`, the batching period key from §4.5.
    pub period: u64,
}

/// Parameters supplied by `StartWatch` (§4.8) / reused on restart (§3a).
#[derive(Debug, Clone)]
pub struct StartWatchParams {
    pub token: Token,
    pub expected_amount: Amount,
    pub watch_duration_secs: u64,
    pub callback_url: Option<String>,
    pub payment_id: Option<String>,
}
