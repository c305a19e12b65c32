use crate::adapter::ChainAdapter;
use crate::evm::EvmAdapter;
use crate::solana::SolanaAdapter;
use crate::tron::TronAdapter;
use gateway_common::config::GatewayConfig;
use gateway_common::{Chain, GatewayError, GatewayResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Resolves enabled chain ids to adapter instances at process start (§4.1,
/// §9 "polymorphism over chains"). Everything above this layer — Watch
/// Engine, Batch Scheduler, Gas Monitor — holds only `Arc<dyn ChainAdapter>`.
pub struct ChainRegistry {
    adapters: HashMap<Chain, Arc<dyn ChainAdapter>>,
}

impl ChainRegistry {
    pub fn build(config: &GatewayConfig) -> GatewayResult<Self> {
        let mut adapters: HashMap<Chain, Arc<dyn ChainAdapter>> = HashMap::new();

        for chain in Chain::ALL {
            let Some(chain_config) = config.chain_config(chain) else {
                continue;
            };
            let token = chain.default_token();
            let adapter: Arc<dyn ChainAdapter> = match chain {
                Chain::Ethereum | Chain::Polygon | Chain::Bsc | Chain::Busd => {
                    Arc::new(EvmAdapter::new(
                        chain,
                        token,
                        chain_config.rpc_url.clone(),
                        &chain_config.token_contract,
                    )?)
                }
                Chain::Solana => Arc::new(SolanaAdapter::new(
                    token,
                    chain_config.rpc_url.clone(),
                    &chain_config.token_contract,
                )?),
                Chain::Tron => Arc::new(TronAdapter::new(
                    token,
                    chain_config.rpc_url.clone(),
                    chain_config.token_contract.clone(),
                )),
            };
            adapters.insert(chain, adapter);
        }

        Ok(Self { adapters })
    }

    /// Test seam: builds a registry directly from pre-constructed adapters,
    /// bypassing RPC client construction entirely. Used to drive the Watch
    /// Engine and Batch Scheduler against an in-memory `ChainAdapter` mock.
    pub fn from_adapters(adapters: HashMap<Chain, Arc<dyn ChainAdapter>>) -> Self {
        Self { adapters }
    }

    pub fn get(&self, chain: Chain) -> GatewayResult<Arc<dyn ChainAdapter>> {
        self.adapters
            .get(&chain)
            .cloned()
            .ok_or_else(|| GatewayError::Fatal(format!("chain {chain} is not enabled")))
    }

    pub fn enabled_chains(&self) -> Vec<Chain> {
        self.adapters.keys().copied().collect()
    }
}
