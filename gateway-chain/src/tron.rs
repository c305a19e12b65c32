use crate::adapter::{ChainAdapter, FeeData, FeePolicy, ObservedTransfer, SendResult};
use crate::error::{ChainError, ChainResult};
use async_trait::async_trait;
use gateway_common::{chain::token_decimals, Amount, Chain, Token};
use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{Signature, SigningKey};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use sha3::{Digest, Keccak256};
use std::time::Duration;

/// TRC20 adapter over the TronGrid REST API. Tron has no native event-log
/// filter endpoint comparable to EVM `eth_getLogs` scoped to a single
/// recipient and a token contract without also paying for a full-node
/// index, so `Chain::supports_event_scan` is `false` for this chain and the
/// Watch Engine drives it through the balance-delta path (§4.3.1, §9)
/// instead of calling `scan_token_transfers_to`.
pub struct TronAdapter {
    token: Token,
    base_url: String,
    token_contract: String,
    client: reqwest::Client,
    decimals: u32,
}

#[derive(Debug, Deserialize)]
struct NowBlockResponse {
    block_header: BlockHeader,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    raw_data: BlockRawData,
}

#[derive(Debug, Deserialize)]
struct BlockRawData {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    #[serde(default)]
    balance: u64,
    #[serde(default)]
    trc20: Vec<std::collections::HashMap<String, String>>,
}

impl TronAdapter {
    pub fn new(token: Token, base_url: String, token_contract: String) -> Self {
        Self {
            decimals: token_decimals(Chain::Tron, token),
            token,
            base_url,
            token_contract,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    fn scale(&self, raw: u128) -> Amount {
        let decimal = Decimal::from(raw) / Decimal::from(10u64.pow(self.decimals));
        Amount::from_decimal(decimal)
    }

    async fn get_account(&self, address: &str) -> ChainResult<AccountResponse> {
        let url = format!("{}/v1/accounts/{}", self.base_url.trim_end_matches('/'), address);
        self.client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChainError::transient("tron", e.to_string()))?
            .json::<AccountResponse>()
            .await
            .map_err(|e| ChainError::transient("tron", format!("bad account response: {e}")))
    }
}

#[async_trait]
impl ChainAdapter for TronAdapter {
    async fn current_height(&self) -> ChainResult<u64> {
        let url = format!("{}/wallet/getnowblock", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| ChainError::transient("tron", e.to_string()))?
            .json::<NowBlockResponse>()
            .await
            .map_err(|e| ChainError::transient("tron", format!("bad block response: {e}")))?;
        Ok(response.block_header.raw_data.number)
    }

    async fn token_balance(&self, address: &str, _token: Token) -> ChainResult<Amount> {
        let account = self.get_account(address).await?;
        for entry in &account.trc20 {
            if let Some(raw) = entry.get(&self.token_contract) {
                let value: u128 = raw
                    .parse()
                    .map_err(|e| ChainError::transient("tron", format!("bad trc20 balance: {e}")))?;
                return Ok(self.scale(value));
            }
        }
        Ok(Amount::zero())
    }

    async fn native_balance(&self, address: &str) -> ChainResult<Amount> {
        let account = self.get_account(address).await?;
        Ok(Amount::from_decimal(
            Decimal::from(account.balance) / Decimal::from(1_000_000u64),
        ))
    }

    /// Never called on the hot path (see struct docs); the Watch Engine
    /// drives Tron through the balance-delta fallback. Implemented to
    /// satisfy the trait with an honest empty result rather than a panic.
    async fn scan_token_transfers_to(
        &self,
        _address: &str,
        _token: Token,
        _from_height: u64,
        _to_height: u64,
    ) -> ChainResult<Vec<ObservedTransfer>> {
        Ok(Vec::new())
    }

    async fn send_token(
        &self,
        from_private_key: &[u8],
        _token: Token,
        to: &str,
        amount: Amount,
        _fee_policy: FeePolicy,
    ) -> ChainResult<SendResult> {
        let signing_key = SigningKey::from_slice(from_private_key)
            .map_err(|e| ChainError::permanent("tron", format!("bad private key: {e}")))?;

        let raw_amount: u128 = (amount.inner() * Decimal::from(10u64.pow(self.decimals)))
            .trunc()
            .to_string()
            .parse()
            .map_err(|e| ChainError::permanent("tron", format!("amount overflow: {e}")))?;

        let trigger_url = format!(
            "{}/wallet/triggersmartcontract",
            self.base_url.trim_end_matches('/')
        );
        let build_response = self
            .client
            .post(&trigger_url)
            .json(&json!({
                "contract_address": self.token_contract,
                "function_selector": "transfer(address,uint256)",
                "parameter": encode_transfer_parameter(to, raw_amount),
                "owner_address": derive_owner_address(&signing_key),
            }))
            .send()
            .await
            .map_err(|e| ChainError::transient("tron", e.to_string()))?
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ChainError::transient("tron", format!("bad trigger response: {e}")))?;

        let raw_tx = build_response
            .get("transaction")
            .cloned()
            .ok_or_else(|| ChainError::permanent("tron", "triggersmartcontract returned no transaction"))?;
        let tx_id = raw_tx
            .get("txID")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ChainError::permanent("tron", "transaction missing txID"))?
            .to_string();

        let digest: [u8; 32] = hex::decode(&tx_id)
            .map_err(|e| ChainError::permanent("tron", format!("bad txID hex: {e}")))?
            .try_into()
            .map_err(|_| ChainError::permanent("tron", "txID not 32 bytes"))?;
        let signature: Signature = signing_key
            .sign_prehash(&digest)
            .map_err(|e| ChainError::permanent("tron", format!("signing failed: {e}")))?;

        let broadcast_url = format!(
            "{}/wallet/broadcasttransaction",
            self.base_url.trim_end_matches('/')
        );
        let mut signed_tx = raw_tx;
        signed_tx["signature"] = json!([hex::encode(signature.to_bytes())]);
        let broadcast_response = self
            .client
            .post(&broadcast_url)
            .json(&signed_tx)
            .send()
            .await
            .map_err(|e| ChainError::transient("tron", e.to_string()))?
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ChainError::transient("tron", format!("bad broadcast response: {e}")))?;

        let success = broadcast_response
            .get("result")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !success {
            return Err(ChainError::transient(
                "tron",
                format!("broadcast rejected: {broadcast_response}"),
            ));
        }

        Ok(SendResult {
            tx_hash: tx_id,
            gas_used: 0,
        })
    }

    async fn fee_data(&self) -> ChainResult<FeeData> {
        // Tron spends energy/bandwidth rather than running a gas auction;
        // the standard TRC20 transfer burns roughly this much TRX (in sun)
        // when the sending account has no free energy staked.
        const TRANSFER_ENERGY_COST_SUN: u64 = 13_000_000;
        Ok(FeeData {
            slow: TRANSFER_ENERGY_COST_SUN,
            standard: TRANSFER_ENERGY_COST_SUN,
            fast: TRANSFER_ENERGY_COST_SUN,
            instant: TRANSFER_ENERGY_COST_SUN,
        })
    }
}

fn derive_owner_address(signing_key: &SigningKey) -> String {
    let verifying_key = signing_key.verifying_key();
    let encoded = verifying_key.to_encoded_point(false);
    let hash = Keccak256::digest(&encoded.as_bytes()[1..]);
    let mut address_bytes = vec![0x41u8];
    address_bytes.extend_from_slice(&hash[12..]);
    hex::encode(address_bytes)
}

fn encode_transfer_parameter(to: &str, amount: u128) -> String {
    format!("{:0>64}{:0>64x}", to.trim_start_matches("41"), amount)
}
