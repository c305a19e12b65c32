use crate::adapter::{ChainAdapter, FeeData, FeePolicy, ObservedTransfer, SendResult};
use crate::error::{ChainError, ChainResult};
use alloy::network::EthereumWallet;
use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{BlockNumberOrTag, Filter};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use async_trait::async_trait;
use gateway_common::{chain::token_decimals, Amount, Chain, Token};
use rust_decimal::Decimal;
use std::str::FromStr;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function transfer(address to, uint256 amount) external returns (bool);
        event Transfer(address indexed from, address indexed to, uint256 value);
    }
}

/// Adapter for the three EVM-family chain ids (`ethereum`, `bsc`/`busd`,
/// `polygon`). `busd` shares the adapter with `bsc`; only the token
/// contract address differs, resolved from the chain's `ChainConfig`.
pub struct EvmAdapter {
    chain: Chain,
    token: Token,
    rpc_url: String,
    token_contract: Address,
    decimals: u32,
}

impl EvmAdapter {
    pub fn new(
        chain: Chain,
        token: Token,
        rpc_url: String,
        token_contract: &str,
    ) -> ChainResult<Self> {
        let token_contract = Address::from_str(token_contract).map_err(|e| {
            ChainError::permanent(chain.as_str(), format!("bad token contract address: {e}"))
        })?;
        Ok(Self {
            decimals: token_decimals(chain, token),
            chain,
            token,
            rpc_url,
            token_contract,
        })
    }

    fn provider(&self) -> ChainResult<impl Provider> {
        let url = self.rpc_url.parse().map_err(|e| {
            ChainError::permanent(self.chain.as_str(), format!("bad rpc url: {e}"))
        })?;
        Ok(ProviderBuilder::new().on_http(url))
    }

    fn to_base_units(&self, amount: Amount) -> ChainResult<U256> {
        let scaled = amount.inner() * Decimal::from(10u64.pow(self.decimals));
        let int_part = scaled.trunc().to_string();
        U256::from_str(&int_part)
            .map_err(|e| ChainError::permanent(self.chain.as_str(), format!("amount overflow: {e}")))
    }

    fn from_base_units(&self, value: U256) -> Amount {
        let decimal = Decimal::from_str(&value.to_string()).unwrap_or(Decimal::ZERO);
        let scale = Decimal::from(10u64.pow(self.decimals));
        Amount::from_decimal(decimal / scale)
    }

    fn parse_address(&self, address: &str) -> ChainResult<Address> {
        Address::from_str(address)
            .map_err(|e| ChainError::permanent(self.chain.as_str(), format!("bad address: {e}")))
    }
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    async fn current_height(&self) -> ChainResult<u64> {
        self.provider()?
            .get_block_number()
            .await
            .map_err(|e| ChainError::transient(self.chain.as_str(), e.to_string()))
    }

    async fn token_balance(&self, address: &str, _token: Token) -> ChainResult<Amount> {
        let addr = self.parse_address(address)?;
        let provider = self.provider()?;
        let contract = IERC20::new(self.token_contract, provider);
        let balance = contract
            .balanceOf(addr)
            .call()
            .await
            .map_err(|e| ChainError::transient(self.chain.as_str(), e.to_string()))?;
        Ok(self.from_base_units(balance))
    }

    async fn native_balance(&self, address: &str) -> ChainResult<Amount> {
        let addr = self.parse_address(address)?;
        let wei = self
            .provider()?
            .get_balance(addr)
            .await
            .map_err(|e| ChainError::transient(self.chain.as_str(), e.to_string()))?;
        let decimal = Decimal::from_str(&wei.to_string()).unwrap_or(Decimal::ZERO);
        Ok(Amount::from_decimal(decimal / Decimal::from(10u64.pow(18))))
    }

    async fn scan_token_transfers_to(
        &self,
        address: &str,
        _token: Token,
        from_height: u64,
        to_height: u64,
    ) -> ChainResult<Vec<ObservedTransfer>> {
        let addr = self.parse_address(address)?;
        let provider = self.provider()?;
        let current = self.current_height().await?;
        let filter = Filter::new()
            .address(self.token_contract)
            .event("Transfer(address,address,uint256)")
            .topic2(addr.into_word())
            .from_block(BlockNumberOrTag::Number(from_height))
            .to_block(BlockNumberOrTag::Number(to_height));

        let logs = provider
            .get_logs(&filter)
            .await
            .map_err(|e| ChainError::transient(self.chain.as_str(), e.to_string()))?;

        let mut transfers = Vec::with_capacity(logs.len());
        for log in logs {
            let tx_hash = match log.transaction_hash {
                Some(hash) => format!("{hash:#x}"),
                None => continue,
            };
            let height = log.block_number.unwrap_or(to_height);
            let decoded = match log.log_decode::<IERC20::Transfer>() {
                Ok(decoded) => decoded,
                Err(e) => {
                    log::warn!("skipping undecodable transfer log on {}: {e}", self.chain);
                    continue;
                }
            };
            let amount = self.from_base_units(decoded.inner.value);
            transfers.push(ObservedTransfer {
                tx_hash,
                amount,
                height,
                confirmations: current.saturating_sub(height),
            });
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
        let signer = PrivateKeySigner::from_slice(from_private_key)
            .map_err(|e| ChainError::permanent(self.chain.as_str(), format!("bad key: {e}")))?;
        let wallet = EthereumWallet::from(signer);
        let url = self.rpc_url.parse().map_err(|e| {
            ChainError::permanent(self.chain.as_str(), format!("bad rpc url: {e}"))
        })?;
        let provider = ProviderBuilder::new().wallet(wallet).on_http(url);
        let contract = IERC20::new(self.token_contract, provider);
        let to_addr = self.parse_address(to)?;
        let base_units = self.to_base_units(amount)?;

        let pending = contract
            .transfer(to_addr, base_units)
            .send()
            .await
            .map_err(|e| ChainError::transient(self.chain.as_str(), e.to_string()))?;
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| ChainError::transient(self.chain.as_str(), e.to_string()))?;

        Ok(SendResult {
            tx_hash: format!("{:#x}", receipt.transaction_hash),
            gas_used: receipt.gas_used as u64,
        })
    }

    async fn fee_data(&self) -> ChainResult<FeeData> {
        let gas_price = self
            .provider()?
            .get_gas_price()
            .await
            .map_err(|e| ChainError::transient(self.chain.as_str(), e.to_string()))?
            as u64;
        Ok(FeeData {
            slow: gas_price * 8 / 10,
            standard: gas_price,
            fast: gas_price * 12 / 10,
            instant: gas_price * 15 / 10,
        })
    }
}
