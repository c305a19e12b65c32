use crate::services::GatewayServices;
use gateway_chain::FeePolicy;
use gateway_common::time::current_timestamp_seconds;
use gateway_common::tokio_util::spawn_task;
use gateway_store::{BatchItem, BatchItemState};
use std::sync::Arc;

/// Spawns the Batch Scheduler tick loop (§4.5). Runs independently of the
/// Watch Engine; the two only interact through the Store's batch queue.
pub fn spawn(
    services: Arc<GatewayServices>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    spawn_task("batch-scheduler", async move {
        let mut ticker = tokio::time::interval(services.config.batch_tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => tick(&services).await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        log::info!("batch scheduler observed shutdown signal");
                        break;
                    }
                }
            }
        }
    })
}

async fn tick(services: &GatewayServices) {
    let periods = match services.store.list_open_batch_periods() {
        Ok(periods) => periods,
        Err(e) => {
            log::error!("batch scheduler: failed to list open periods: {e}");
            return;
        }
    };

    for (chain, period) in periods {
        let items = match services.store.list_batch_queue(chain, period) {
            Ok(items) => items
                .into_iter()
                .filter(|i| !i.state.is_terminal())
                .collect::<Vec<_>>(),
            Err(e) => {
                log::error!("batch scheduler: failed to load queue for {chain}/{period}: {e}");
                continue;
            }
        };
        if items.is_empty() {
            continue;
        }
        metrics::gauge!("gateway_batch_queue_depth", "chain" => chain.as_str().to_string())
            .set(items.len() as f64);

        if !is_eligible(services, chain, &items).await {
            continue;
        }
        execute_batch(services, chain, items).await;
    }
}

/// Eligibility per §4.5: size, age, favorable gas, or a standing priority chain.
async fn is_eligible(services: &GatewayServices, chain: gateway_common::Chain, items: &[BatchItem]) -> bool {
    if items.len() >= services.config.batch.max_batch_size {
        return true;
    }
    if services.config.batch.priority_chains.contains(&chain) {
        return true;
    }
    let now = current_timestamp_seconds();
    let oldest = items.iter().map(|i| i.created_at).min().unwrap_or(now);
    if now.saturating_sub(oldest) >= services.config.batch.max_wait.as_secs() {
        return true;
    }
    if let Some(threshold) = services.config.batch.gas_threshold.get(chain.as_str()) {
        if let Ok(adapter) = services.chains.get(chain) {
            if let Ok(fee) = adapter.fee_data().await {
                if fee.standard <= *threshold {
                    return true;
                }
            }
        }
    }
    false
}

async fn execute_batch(services: &GatewayServices, chain: gateway_common::Chain, items: Vec<BatchItem>) {
    let Ok(adapter) = services.chains.get(chain) else {
        log::error!("batch scheduler: no adapter for {chain}, skipping batch");
        return;
    };
    let Some(chain_config) = services.config.chain_config(chain) else {
        log::error!("batch scheduler: no chain config for {chain}, skipping batch");
        return;
    };

    let mut done = 0u32;
    let mut failed = 0u32;
    for item in items {
        if let Err(e) = services
            .store
            .transition_batch_item(item.id, BatchItemState::Executing, None)
        {
            log::warn!("batch item {} failed to mark executing: {e}", item.id);
            continue;
        }

        let Some(wallet) = services.store.get_wallet(item.wallet_id).ok().flatten() else {
            log::error!("batch item {} references missing wallet {}", item.id, item.wallet_id);
            let _ = services
                .store
                .transition_batch_item(item.id, BatchItemState::Failed, None);
            failed += 1;
            continue;
        };

        // Out of scope: decrypting `wallet.encrypted_private_key` is delegated
        // to the `KeyDecryptor` collaborator (§6); here it's a pass-through
        // placeholder so the adapter call shape matches production wiring.
        let decrypted_key = wallet.encrypted_private_key.as_slice();

        let token = chain.default_token();
        match adapter
            .send_token(
                decrypted_key,
                token,
                &chain_config.custody_address,
                item.amount,
                FeePolicy::Standard,
            )
            .await
        {
            Ok(result) => {
                let _ = services.store.transition_batch_item(
                    item.id,
                    BatchItemState::Done,
                    Some(result.tx_hash),
                );
                done += 1;
                metrics::counter!("gateway_batch_items_done_total").increment(1);
            }
            Err(e) => {
                log::error!("sweep failed for batch item {} on {}: {e}", item.id, chain);
                let _ = services
                    .store
                    .transition_batch_item(item.id, BatchItemState::Failed, None);
                failed += 1;
                metrics::counter!("gateway_batch_items_failed_total").increment(1);
            }
        }
    }
    log::info!("batch scheduler: {chain} batch finished ok={done} failed={failed}");
    metrics::counter!("gateway_batches_executed_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_chain::{ChainAdapter, ChainRegistry, ChainResult, ObservedTransfer};
    use gateway_common::config::{BatchConfig, GatewayConfig};
    use gateway_common::{chain::ChainConfig, Amount, BatchItemId, Chain, Token, WalletId, WatchId};
    use gateway_dispatcher::CallbackDispatcher;
    use gateway_store::{Store, Wallet, WalletStatus};
    use std::collections::HashMap;

    /// Always succeeds with a deterministic tx hash; the scheduler tests
    /// care about eligibility and state transitions, not send failures.
    struct MockAdapter {
        standard_fee: u64,
    }

    #[async_trait::async_trait]
    impl ChainAdapter for MockAdapter {
        async fn current_height(&self) -> ChainResult<u64> {
            Ok(100)
        }

        async fn token_balance(&self, _address: &str, _token: Token) -> ChainResult<Amount> {
            Ok(Amount::zero())
        }

        async fn native_balance(&self, _address: &str) -> ChainResult<Amount> {
            Ok(Amount::zero())
        }

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
            _from_private_key: &[u8],
            _token: Token,
            _to: &str,
            _amount: Amount,
            _fee_policy: FeePolicy,
        ) -> ChainResult<gateway_chain::SendResult> {
            Ok(gateway_chain::SendResult {
                tx_hash: "0xswept".to_string(),
                gas_used: 21_000,
            })
        }

        async fn fee_data(&self) -> ChainResult<gateway_chain::FeeData> {
            Ok(gateway_chain::FeeData {
                slow: self.standard_fee,
                standard: self.standard_fee,
                fast: self.standard_fee,
                instant: self.standard_fee,
            })
        }
    }

    fn test_config(batch: BatchConfig) -> GatewayConfig {
        GatewayConfig {
            watch_duration: std::time::Duration::from_secs(3600),
            required_confirmations: 5,
            poll_interval: std::time::Duration::from_secs(30),
            scan_window_blocks: 1000,
            callback_retry_delays: vec![],
            callback_exhaust: std::time::Duration::from_secs(3600),
            batch,
            maintenance_interval: std::time::Duration::from_secs(600),
            gas_sample_interval: std::time::Duration::from_secs(300),
            batch_tick_interval: std::time::Duration::from_secs(300),
            http_bind_address: "0.0.0.0:0".to_string(),
            shared_secret: "test-secret".to_string(),
            manual_complete_enabled: false,
            chains: vec![ChainConfig {
                chain: Chain::Bsc,
                rpc_url: "http://localhost/rpc".to_string(),
                native_token_symbol: "BNB".to_string(),
                token_contract: "0xcontract".to_string(),
                token_decimals: 18,
                custody_address: "0xcustody".to_string(),
                gas_fee_wallet_address: "0xgas".to_string(),
            }],
            storage_path: String::new(),
        }
    }

    fn test_services(batch: BatchConfig, standard_fee: u64) -> GatewayServices {
        let mut adapters: HashMap<Chain, Arc<dyn ChainAdapter>> = HashMap::new();
        adapters.insert(Chain::Bsc, Arc::new(MockAdapter { standard_fee }));
        GatewayServices {
            store: Store::open_temporary().unwrap(),
            chains: Arc::new(ChainRegistry::from_adapters(adapters)),
            dispatcher: Arc::new(CallbackDispatcher::new(
                b"test-secret".to_vec(),
                "gateway-test".to_string(),
                vec![],
            )),
            config: Arc::new(test_config(batch)),
        }
    }

    fn sample_item(wallet_id: WalletId, period: u64) -> BatchItem {
        BatchItem {
            id: BatchItemId::new(),
            watch_id: WatchId::new(),
            wallet_id,
            chain: Chain::Bsc,
            user_id: "user-1".to_string(),
            amount: Amount::parse("10").unwrap(),
            created_at: current_timestamp_seconds(),
            state: BatchItemState::Queued,
            tx_hash: None,
            period,
        }
    }

    #[tokio::test]
    async fn reaching_max_batch_size_is_eligible_regardless_of_age() {
        let services = test_services(
            BatchConfig {
                max_batch_size: 2,
                ..Default::default()
            },
            1_000_000,
        );
        let items = vec![
            sample_item(WalletId::new(), 0),
            sample_item(WalletId::new(), 0),
        ];
        assert!(is_eligible(&services, Chain::Bsc, &items).await);
    }

    #[tokio::test]
    async fn below_size_threshold_with_no_aging_or_cheap_gas_is_not_eligible() {
        let services = test_services(
            BatchConfig {
                max_batch_size: 20,
                max_wait: std::time::Duration::from_secs(4 * 60 * 60),
                ..Default::default()
            },
            1_000_000,
        );
        let items = vec![sample_item(WalletId::new(), 0)];
        assert!(!is_eligible(&services, Chain::Bsc, &items).await);
    }

    #[tokio::test]
    async fn priority_chain_is_always_eligible() {
        let services = test_services(
            BatchConfig {
                max_batch_size: 20,
                priority_chains: vec![Chain::Bsc],
                ..Default::default()
            },
            1_000_000,
        );
        let items = vec![sample_item(WalletId::new(), 0)];
        assert!(is_eligible(&services, Chain::Bsc, &items).await);
    }

    #[tokio::test]
    async fn gas_at_or_below_threshold_is_eligible() {
        let mut gas_threshold = HashMap::new();
        gas_threshold.insert("bsc".to_string(), 50);
        let services = test_services(
            BatchConfig {
                max_batch_size: 20,
                gas_threshold,
                ..Default::default()
            },
            50,
        );
        let items = vec![sample_item(WalletId::new(), 0)];
        assert!(is_eligible(&services, Chain::Bsc, &items).await);
    }

    #[tokio::test]
    async fn execute_batch_sweeps_every_item_to_done() {
        let services = test_services(BatchConfig::default(), 1_000_000);
        let wallet = Wallet {
            id: WalletId::new(),
            user_id: "user-1".to_string(),
            chain: Chain::Bsc,
            address: "0xabc".to_string(),
            encrypted_private_key: vec![],
            derivation_index: 0,
            status: WalletStatus::Pending,
            created_at: 0,
            updated_at: 0,
        };
        services.store.insert_wallet(wallet.clone()).unwrap();
        let item = sample_item(wallet.id, 0);
        services.store.enqueue_batch_item(item.clone()).unwrap();

        execute_batch(&services, Chain::Bsc, vec![item.clone()]).await;

        let items = services.store.list_batch_queue(Chain::Bsc, 0).unwrap();
        let updated = items.iter().find(|i| i.id == item.id).unwrap();
        assert_eq!(updated.state, BatchItemState::Done);
        assert_eq!(updated.tx_hash.as_deref(), Some("0xswept"));
    }
}
