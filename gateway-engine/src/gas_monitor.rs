use crate::services::GatewayServices;
use gateway_chain::FeeData;
use gateway_common::time::current_timestamp_seconds;
use gateway_common::tokio_util::spawn_task;
use gateway_common::Chain;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const RING_WINDOW_SECONDS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy)]
pub struct GasSample {
    pub chain: Chain,
    pub sampled_at: u64,
    pub fee: FeeData,
}

/// In-memory-only 24h ring per chain (§3 `GasSample`, §4.6). Rebuilt from
/// fresh polls on restart; never persisted.
#[derive(Default)]
pub struct GasHistory {
    samples: RwLock<HashMap<Chain, Vec<GasSample>>>,
}

impl GasHistory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn push(&self, sample: GasSample) {
        let mut guard = self.samples.write().await;
        let entry = guard.entry(sample.chain).or_default();
        entry.push(sample);
        let cutoff = sample.sampled_at.saturating_sub(RING_WINDOW_SECONDS);
        entry.retain(|s| s.sampled_at >= cutoff);
    }

    pub async fn current(&self, chain: Chain) -> Option<GasSample> {
        self.samples.read().await.get(&chain)?.last().copied()
    }

    pub async fn average_standard(&self, chain: Chain) -> Option<u64> {
        let guard = self.samples.read().await;
        let entries = guard.get(&chain)?;
        if entries.is_empty() {
            return None;
        }
        let sum: u64 = entries.iter().map(|s| s.fee.standard).sum();
        Some(sum / entries.len() as u64)
    }
}

/// Spawns the Gas Monitor sample loop (§4.6): polls `fee_data()` for every
/// enabled chain every `P_gas` and logs an advisory when fees are favorable.
pub fn spawn(
    services: Arc<GatewayServices>,
    history: Arc<GasHistory>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    spawn_task("gas-monitor", async move {
        let mut ticker = tokio::time::interval(services.config.gas_sample_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => tick(&services, &history).await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        log::info!("gas monitor observed shutdown signal");
                        break;
                    }
                }
            }
        }
    })
}

async fn tick(services: &GatewayServices, history: &GasHistory) {
    for chain in services.chains.enabled_chains() {
        let adapter = match services.chains.get(chain) {
            Ok(adapter) => adapter,
            Err(e) => {
                log::error!("gas monitor: {e}");
                continue;
            }
        };
        match adapter.fee_data().await {
            Ok(fee) => {
                let sample = GasSample {
                    chain,
                    sampled_at: current_timestamp_seconds(),
                    fee,
                };
                history.push(sample).await;
                metrics::gauge!("gateway_gas_standard", "chain" => chain.as_str().to_string())
                    .set(fee.standard as f64);

                if let Some(threshold) = services.config.batch.gas_threshold.get(chain.as_str()) {
                    if fee.standard <= *threshold {
                        log::info!(
                            "gas monitor: {chain} standard fee {} is at or below threshold {threshold}",
                            fee.standard
                        );
                    }
                }
            }
            Err(e) => log::warn!("gas monitor: failed to sample {chain}: {e}"),
        }
    }
    metrics::counter!("gateway_gas_samples_total").increment(1);
}
