use crate::adapter::{ChainAdapter, FeeData, FeePolicy, ObservedTransfer, SendResult};
use crate::error::{ChainError, ChainResult};
use async_trait::async_trait;
use gateway_common::{chain::token_decimals, Amount, Chain, Token};
use rust_decimal::Decimal;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::signer::keypair::Keypair;
use solana_sdk::signer::Signer as SolanaSigner;
use std::str::FromStr;

const SOLANA_BASE_FEE_LAMPORTS: u64 = 5_000;

/// SPL token adapter. `address` on a Watch/Wallet is the receiving
/// associated token account itself (pre-derived by the out-of-scope
/// address lifecycle collaborator), not the owning wallet's system account.
pub struct SolanaAdapter {
    token: Token,
    mint: Pubkey,
    client: RpcClient,
    decimals: u32,
}

impl SolanaAdapter {
    pub fn new(token: Token, rpc_url: String, mint: &str) -> ChainResult<Self> {
        let mint = Pubkey::from_str(mint)
            .map_err(|e| ChainError::permanent("solana", format!("bad mint address: {e}")))?;
        Ok(Self {
            decimals: token_decimals(Chain::Solana, token),
            token,
            mint,
            client: RpcClient::new_with_commitment(rpc_url, CommitmentConfig::confirmed()),
        })
    }

    fn parse_pubkey(&self, address: &str) -> ChainResult<Pubkey> {
        Pubkey::from_str(address)
            .map_err(|e| ChainError::permanent("solana", format!("bad address: {e}")))
    }

    fn scale(&self, raw: u64) -> Amount {
        let decimal = Decimal::from(raw) / Decimal::from(10u64.pow(self.decimals));
        Amount::from_decimal(decimal)
    }
}

#[async_trait]
impl ChainAdapter for SolanaAdapter {
    async fn current_height(&self) -> ChainResult<u64> {
        self.client
            .get_slot()
            .await
            .map_err(|e| ChainError::transient("solana", e.to_string()))
    }

    async fn token_balance(&self, address: &str, _token: Token) -> ChainResult<Amount> {
        let pubkey = self.parse_pubkey(address)?;
        let balance = self
            .client
            .get_token_account_balance(&pubkey)
            .await
            .map_err(|e| ChainError::transient("solana", e.to_string()))?;
        let raw: u64 = balance
            .amount
            .parse()
            .map_err(|e| ChainError::transient("solana", format!("bad balance amount: {e}")))?;
        Ok(self.scale(raw))
    }

    async fn native_balance(&self, address: &str) -> ChainResult<Amount> {
        let pubkey = self.parse_pubkey(address)?;
        let lamports = self
            .client
            .get_balance(&pubkey)
            .await
            .map_err(|e| ChainError::transient("solana", e.to_string()))?;
        Ok(Amount::from_decimal(
            Decimal::from(lamports) / Decimal::from(1_000_000_000u64),
        ))
    }

    /// Walks recent signatures for the token account and keeps the ones
    /// whose post-balance increased, using the signature itself as the
    /// unique transfer identity (real scanning, not the balance-delta
    /// fallback — Solana signatures are per-transaction, not per-address-poll).
    async fn scan_token_transfers_to(
        &self,
        address: &str,
        _token: Token,
        _from_height: u64,
        _to_height: u64,
    ) -> ChainResult<Vec<ObservedTransfer>> {
        let pubkey = self.parse_pubkey(address)?;
        let current_slot = self.current_height().await?;
        let config = GetConfirmedSignaturesForAddress2Config {
            before: None,
            until: None,
            limit: Some(50),
            commitment: Some(CommitmentConfig::confirmed()),
        };
        let signatures = self
            .client
            .get_signatures_for_address_with_config(&pubkey, config)
            .await
            .map_err(|e| ChainError::transient("solana", e.to_string()))?;

        let mut transfers = Vec::new();
        for entry in signatures {
            if entry.err.is_some() {
                continue;
            }
            let signature = Signature::from_str(&entry.signature).map_err(|e| {
                ChainError::transient("solana", format!("bad signature: {e}"))
            })?;
            let transaction = match self.client.get_transaction(
                &signature,
                solana_transaction_status::UiTransactionEncoding::JsonParsed,
            ).await {
                Ok(tx) => tx,
                Err(e) => {
                    log::warn!("solana: failed to fetch transaction {signature}: {e}");
                    continue;
                }
            };

            let meta = match transaction.transaction.meta {
                Some(meta) => meta,
                None => continue,
            };
            let slot = transaction.slot;
            let pre: Vec<_> = Option::from(meta.pre_token_balances).unwrap_or_default();
            let post: Vec<_> = Option::from(meta.post_token_balances).unwrap_or_default();
            for post_balance in &post {
                if post_balance.mint != self.mint.to_string() {
                    continue;
                }
                let pre_amount = pre
                    .iter()
                    .find(|p| p.account_index == post_balance.account_index)
                    .map(|p| p.ui_token_amount.amount.parse::<u64>().unwrap_or(0))
                    .unwrap_or(0);
                let post_amount = post_balance
                    .ui_token_amount
                    .amount
                    .parse::<u64>()
                    .unwrap_or(0);
                if post_amount > pre_amount {
                    let delta = post_amount - pre_amount;
                    transfers.push(ObservedTransfer {
                        tx_hash: entry.signature.clone(),
                        amount: self.scale(delta),
                        height: slot,
                        confirmations: current_slot.saturating_sub(slot),
                    });
                }
            }
        }
        Ok(transfers)
    }

    async fn send_token(
        &self,
        from_private_key: &[u8],
        _token: Token,
        to: &str,
        amount: Amount,
        _fee_policy: FeePolicy,
    ) -> ChainResult<SendResult> {
        let keypair = Keypair::try_from(from_private_key)
            .map_err(|e| ChainError::permanent("solana", format!("bad keypair: {e}")))?;
        let from_token_account = keypair.pubkey();
        let to_token_account = self.parse_pubkey(to)?;
        let raw_amount: u64 = (amount.inner() * Decimal::from(10u64.pow(self.decimals)))
            .trunc()
            .to_string()
            .parse()
            .map_err(|e| ChainError::permanent("solana", format!("amount overflow: {e}")))?;

        let instruction = spl_token::instruction::transfer_checked(
            &spl_token::id(),
            &from_token_account,
            &self.mint,
            &to_token_account,
            &keypair.pubkey(),
            &[],
            raw_amount,
            self.decimals as u8,
        )
        .map_err(|e| ChainError::permanent("solana", format!("bad transfer instruction: {e}")))?;

        let blockhash = self
            .client
            .get_latest_blockhash()
            .await
            .map_err(|e| ChainError::transient("solana", e.to_string()))?;
        let transaction = solana_sdk::transaction::Transaction::new_signed_with_payer(
            &[instruction],
            Some(&keypair.pubkey()),
            &[&keypair],
            blockhash,
        );

        let signature = self
            .client
            .send_and_confirm_transaction(&transaction)
            .await
            .map_err(|e| ChainError::transient("solana", e.to_string()))?;

        Ok(SendResult {
            tx_hash: signature.to_string(),
            gas_used: SOLANA_BASE_FEE_LAMPORTS,
        })
    }

    /// Solana charges a flat fee per signature rather than running a gas
    /// auction, so all four tiers collapse to the same base-fee estimate;
    /// `fee_data` still exists to satisfy the Gas Monitor's uniform polling (§4.6).
    async fn fee_data(&self) -> ChainResult<FeeData> {
        Ok(FeeData {
            slow: SOLANA_BASE_FEE_LAMPORTS,
            standard: SOLANA_BASE_FEE_LAMPORTS,
            fast: SOLANA_BASE_FEE_LAMPORTS,
            instant: SOLANA_BASE_FEE_LAMPORTS,
        })
    }
}
