use crate::error::ChainResult;
use async_trait::async_trait;
use gateway_common::{Amount, Token};

/// A single observed inbound token transfer, as returned by
/// `scan_token_transfers_to` (§4.1).
#[derive(Debug, Clone)]
pub struct ObservedTransfer {
    pub tx_hash: String,
    pub amount: Amount,
    pub height: u64,
    /// Chain-reported confirmation count at scan time; the Watch Engine
    /// clamps this against `REQUIRED_CONFIRMATIONS` (§4.3.1).
    pub confirmations: u64,
}

/// Fee data in the chain's native fee unit (gwei for EVM chains, lamports
/// per signature for Solana, sun for Tron), per §4.1/§4.6.
#[derive(Debug, Clone, Copy)]
pub struct FeeData {
    pub slow: u64,
    pub standard: u64,
    pub fast: u64,
    pub instant: u64,
}

#[derive(Debug, Clone)]
pub struct SendResult {
    pub tx_hash: String,
    pub gas_used: u64,
}

/// A fee policy hint passed to `send_token` (§4.5): sweeps always use the
/// standard tier unless the Batch Scheduler decided a priority send is owed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeePolicy {
    Standard,
    Priority,
}

/// Uniform read/write capability set for one blockchain family (§4.1). The
/// Watch Engine, Batch Scheduler and Gas Monitor depend only on this trait
/// object; the chain registry is the only place that knows concrete chain ids.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    async fn current_height(&self) -> ChainResult<u64>;

    async fn token_balance(&self, address: &str, token: Token) -> ChainResult<Amount>;

    async fn native_balance(&self, address: &str) -> ChainResult<Amount>;

    /// Event-scan detector when supported (`Chain::supports_event_scan`);
    /// otherwise a balance-delta emulation keyed by a synthetic identity (§9).
    async fn scan_token_transfers_to(
        &self,
        address: &str,
        token: Token,
        from_height: u64,
        to_height: u64,
    ) -> ChainResult<Vec<ObservedTransfer>>;

    /// Signs and broadcasts a token transfer from an already-decrypted
    /// private key (§4.5, §4.7 — decryption itself is out of scope).
    async fn send_token(
        &self,
        from_private_key: &[u8],
        token: Token,
        to: &str,
        amount: Amount,
        fee_policy: FeePolicy,
    ) -> ChainResult<SendResult>;

    async fn fee_data(&self) -> ChainResult<FeeData>;
}
