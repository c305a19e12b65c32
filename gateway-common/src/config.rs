// Every tunable enumerated in spec §6, layered CLI-args -> env -> file ->
// defaults by the composition root (gateway-daemon). This crate only owns
// the typed shape and the built-in defaults, mirroring how the wallet crate
// separates `Config` (serde + clap::Args) from the process that loads it.

use crate::chain::ChainConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

pub fn default_watch_duration() -> Duration {
    secs(60 * 60)
}

pub fn default_required_confirmations() -> u64 {
    5
}

pub fn default_poll_interval() -> Duration {
    secs(30)
}

pub fn default_scan_window_blocks() -> u64 {
    1000
}

pub fn default_callback_retry_delays() -> Vec<Duration> {
    vec![secs(1), secs(5), secs(15)]
}

pub fn default_callback_exhaust() -> Duration {
    secs(3 * 60 * 60)
}

pub fn default_batch_max_size() -> usize {
    20
}

pub fn default_batch_max_wait() -> Duration {
    secs(4 * 60 * 60)
}

pub fn default_maintenance_interval() -> Duration {
    secs(10 * 60)
}

pub fn default_gas_sample_interval() -> Duration {
    secs(5 * 60)
}

pub fn default_batch_tick_interval() -> Duration {
    secs(5 * 60)
}

pub fn default_http_bind_address() -> String {
    "0.0.0.0:8088".to_string()
}

/// Per-chain batch-eligibility gas threshold (§4.5); a chain whose `standard`
/// fee estimate is at or below its threshold is eligible for immediate sweep.
pub type GasThresholds = HashMap<String, u64>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_batch_max_size")]
    pub max_batch_size: usize,
    #[serde(default)]
    pub min_batch_size: usize,
    #[serde(default = "default_batch_max_wait")]
    pub max_wait: Duration,
    #[serde(default)]
    pub gas_threshold: GasThresholds,
    /// Chains that always fire their current batch on the next scheduler
    /// tick regardless of size/age/gas (§4.5 "chain is in the priority set").
    #[serde(default)]
    pub priority_chains: Vec<crate::chain::Chain>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_batch_max_size(),
            min_batch_size: 0,
            max_wait: default_batch_max_wait(),
            gas_threshold: HashMap::new(),
            priority_chains: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_watch_duration")]
    pub watch_duration: Duration,
    #[serde(default = "default_required_confirmations")]
    pub required_confirmations: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: Duration,
    #[serde(default = "default_scan_window_blocks")]
    pub scan_window_blocks: u64,
    #[serde(default = "default_callback_retry_delays")]
    pub callback_retry_delays: Vec<Duration>,
    #[serde(default = "default_callback_exhaust")]
    pub callback_exhaust: Duration,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval: Duration,
    #[serde(default = "default_gas_sample_interval")]
    pub gas_sample_interval: Duration,
    #[serde(default = "default_batch_tick_interval")]
    pub batch_tick_interval: Duration,
    #[serde(default = "default_http_bind_address")]
    pub http_bind_address: String,
    /// HMAC shared secret used to sign outbound callback payloads.
    pub shared_secret: String,
    #[serde(default)]
    pub manual_complete_enabled: bool,
    /// One entry per enabled chain id (§6 "Chains & tokens").
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub storage_path: String,
}

impl GatewayConfig {
    /// Fails fast (`Fatal`, §7) if a required field for an enabled chain is
    /// missing, rather than letting the engine discover it mid-tick.
    pub fn validate(&self) -> Result<(), crate::error::GatewayError> {
        if self.shared_secret.trim().is_empty() {
            return Err(crate::error::GatewayError::Fatal(
                "SHARED_SECRET must be set".to_string(),
            ));
        }
        if self.chains.is_empty() {
            return Err(crate::error::GatewayError::Fatal(
                "at least one chain must be configured".to_string(),
            ));
        }
        for chain_config in &self.chains {
            if chain_config.rpc_url.trim().is_empty() {
                return Err(crate::error::GatewayError::Fatal(format!(
                    "chain {} is missing an rpc_url",
                    chain_config.chain
                )));
            }
            if chain_config.gas_fee_wallet_address.trim().is_empty() {
                return Err(crate::error::GatewayError::Fatal(format!(
                    "chain {} is missing GAS_FEE_WALLET",
                    chain_config.chain
                )));
            }
        }
        Ok(())
    }

    pub fn chain_config(&self, chain: crate::chain::Chain) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain == chain)
    }
}
