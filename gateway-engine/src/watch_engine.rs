use crate::services::GatewayServices;
use gateway_chain::ObservedTransfer;
use gateway_common::time::{current_timestamp_seconds, to_rfc3339};
use gateway_common::{chain::token_decimals, tokio_util::spawn_task, Amount, WatchId};
use gateway_dispatcher::{CallbackKind, CallbackPayload, DeliverOutcome};
use gateway_store::{BatchItem, BatchItemState, Watch, WalletStatus, WatchStatus};
use std::sync::Arc;

/// Spawns the Watch Engine's cooperative tick loop (§4.3). Each tick is a
/// pure function of state loaded at its head; no mutable state survives
/// across ticks except what's written back to the Store.
pub fn spawn(
    services: Arc<GatewayServices>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    spawn_task("watch-engine", async move {
        let period = services.config.poll_interval;
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => tick(&services).await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        log::info!("watch engine observed shutdown signal");
                        break;
                    }
                }
            }
        }
    })
}

pub(crate) async fn tick(services: &GatewayServices) {
    let watches = match services.store.list_active_watches() {
        Ok(watches) => watches,
        Err(e) => {
            log::error!("watch engine: failed to list active watches: {e}");
            return;
        }
    };
    metrics::gauge!("gateway_watches_active").set(watches.len() as f64);

    let fanout = futures::future::join_all(
        watches
            .into_iter()
            .map(|watch| process_watch(services, watch)),
    );
    fanout.await;
}

async fn process_watch(services: &GatewayServices, watch: Watch) {
    metrics::counter!("gateway_watches_ticked_total").increment(1);
    let now = current_timestamp_seconds();
    let grace = services.config.callback_exhaust.as_secs();

    let result = if now > watch.expires_at + grace && !watch.callback_sent {
        force_stop(services, &watch).await
    } else if now > watch.expires_at {
        expiry_path(services, &watch).await
    } else if watch.has_evidence()
        && !watch.callback_sent
        && watch.confirmations >= services.config.required_confirmations
    {
        // A prior tick recorded a fully-confirmed match but the terminal
        // callback didn't go through yet; retry delivery before scanning for
        // anything new rather than letting it sit until expiry (§4.3.2 step 4).
        confirmation_path(services, &watch).await
    } else {
        let result = detection_path(services, &watch).await;
        if let Err(ref e) = result {
            log::warn!("watch {} detection failed: {e}", watch.id);
        }
        if let Err(e) = services.store.mark_checked(watch.id, now) {
            log::warn!("watch {} failed to persist last_checked_at: {e}", watch.id);
        }
        result
    };

    if let Err(e) = result {
        log::warn!("watch {} tick error (skipped for this tick): {e}", watch.id);
    }
}

async fn detection_path(
    services: &GatewayServices,
    watch: &Watch,
) -> Result<(), anyhow::Error> {
    let adapter = services.chains.get(watch.chain)?;
    let decimals = token_decimals(watch.chain, watch.token);

    let candidates = if watch.chain.supports_event_scan() {
        let current = adapter.current_height().await?;
        let last_scanned = services
            .store
            .get_scan_cursor(watch.chain)?
            .unwrap_or(current.saturating_sub(services.config.scan_window_blocks));
        let from_height = last_scanned.max(current.saturating_sub(services.config.scan_window_blocks));
        let transfers = adapter
            .scan_token_transfers_to(&watch.address, watch.token, from_height, current)
            .await?;
        services.store.set_scan_cursor(watch.chain, current)?;
        transfers
    } else {
        balance_delta_candidates(services, watch, &*adapter).await?
    };

    for transfer in candidates {
        handle_candidate_transfer(services, watch, decimals, transfer).await?;
    }
    Ok(())
}

/// Balance-delta fallback for chains without cheap event scanning (§4.3.1,
/// §9): the entire observed increase since the last cached balance becomes
/// one synthetic transfer. Two deposits landing between ticks are
/// indistinguishable under this scheme — a documented, weaker guarantee.
async fn balance_delta_candidates(
    services: &GatewayServices,
    watch: &Watch,
    adapter: &dyn gateway_chain::ChainAdapter,
) -> Result<Vec<ObservedTransfer>, anyhow::Error> {
    let balance = adapter.token_balance(&watch.address, watch.token).await?;
    let cached = services
        .store
        .get_cached_balance(watch.chain, &watch.address)?
        .unwrap_or_else(Amount::zero);
    services
        .store
        .set_cached_balance(watch.chain, &watch.address, balance)?;

    if balance.inner() <= cached.inner() {
        return Ok(Vec::new());
    }
    let delta = Amount::from_decimal(balance.inner() - cached.inner());
    let synthetic_hash = format!(
        "synthetic:{}:{}:{}",
        watch.chain,
        watch.address,
        current_timestamp_seconds()
    );
    Ok(vec![ObservedTransfer {
        tx_hash: synthetic_hash,
        amount: delta,
        height: 0,
        confirmations: services.config.required_confirmations,
    }])
}

async fn handle_candidate_transfer(
    services: &GatewayServices,
    watch: &Watch,
    decimals: u32,
    transfer: ObservedTransfer,
) -> Result<(), anyhow::Error> {
    let deposit = gateway_store::Deposit {
        id: gateway_common::DepositId::new(),
        chain: watch.chain,
        tx_hash: transfer.tx_hash.clone(),
        amount: transfer.amount,
        token: watch.token,
        wallet_id: watch.wallet_id,
        status: gateway_store::DepositStatus::Confirmed,
        observed_at: current_timestamp_seconds(),
    };
    let inserted = services
        .store
        .insert_deposit_once(watch.chain, &transfer.tx_hash, deposit)?;
    if !inserted {
        // Duplicate observation across overlapping scan windows; no-op (§4.3.1, §8).
        return Ok(());
    }
    metrics::counter!("gateway_deposits_observed_total").increment(1);

    if !transfer.amount.matches_expected(&watch.expected_amount, decimals) {
        log::info!(
            "watch {} observed amount {} does not match expected {}, ignoring",
            watch.id,
            transfer.amount,
            watch.expected_amount
        );
        return Ok(());
    }

    let confirmations = transfer
        .confirmations
        .min(services.config.required_confirmations);
    let watch = services
        .store
        .record_evidence(watch.id, transfer.tx_hash.clone(), transfer.amount, confirmations)?;
    metrics::counter!("gateway_deposits_matched_total").increment(1);

    if confirmations >= services.config.required_confirmations {
        confirmation_path(services, &watch).await?;
    }
    Ok(())
}

/// §4.3.2: evidence already recorded by the caller. Queues the sweep and
/// attempts the terminal callback once.
pub async fn confirmation_path(
    services: &GatewayServices,
    watch: &Watch,
) -> Result<(), anyhow::Error> {
    let _ = services
        .store
        .transition_wallet_status(watch.wallet_id, WalletStatus::Pending);

    let now = current_timestamp_seconds();
    let hour = now / 3600;
    let period = hour / 2;
    let amount = watch.actual_amount.unwrap_or(watch.expected_amount);
    services.store.enqueue_batch_item(BatchItem {
        id: gateway_common::BatchItemId::new(),
        watch_id: watch.id,
        wallet_id: watch.wallet_id,
        chain: watch.chain,
        user_id: watch.user_id.clone(),
        amount,
        created_at: now,
        state: BatchItemState::Queued,
        tx_hash: None,
        period,
    })?;

    deliver_terminal(services, watch, CallbackKind::Confirmed).await
}

/// Test-only manual completion (`POST /watches/{id}/complete`, §4.8),
/// gated by the caller on `config.manual_complete_enabled`. Records
/// operator-supplied evidence then drives the same confirmation path a
/// genuine on-chain match would, so callback delivery and the batch queue
/// behave identically to the real detection flow.
pub async fn force_complete(
    services: &GatewayServices,
    id: WatchId,
    tx_hash: String,
    amount: Amount,
    confirmations: u64,
) -> Result<Watch, anyhow::Error> {
    let watch = services
        .store
        .record_evidence(id, tx_hash, amount, confirmations)?;
    confirmation_path(services, &watch).await?;
    services
        .store
        .get_watch(id)?
        .ok_or_else(|| anyhow::anyhow!("watch {id} vanished after manual completion"))
}

async fn expiry_path(services: &GatewayServices, watch: &Watch) -> Result<(), anyhow::Error> {
    if watch.has_evidence() {
        // Evidence arrived on the same tick expiry was detected; prefer
        // confirming over expiring (ordering guarantee, §5).
        return confirmation_path(services, watch).await;
    }
    deliver_terminal(services, watch, CallbackKind::Expired).await
}

async fn deliver_terminal(
    services: &GatewayServices,
    watch: &Watch,
    kind: CallbackKind,
) -> Result<(), anyhow::Error> {
    let target_status = match kind {
        CallbackKind::Confirmed => WatchStatus::Confirmed,
        CallbackKind::Expired => WatchStatus::Expired,
    };

    let Some(callback_url) = watch.callback_url.clone() else {
        // No callback registered: nothing to deliver, go straight to terminal.
        services
            .store
            .transition_terminal(watch.id, target_status, false)?;
        finalize_wallet(services, watch, true);
        return Ok(());
    };

    let payload = build_payload(watch, kind);
    let now = current_timestamp_seconds();
    services.store.record_callback_attempt(watch.id, now)?;
    let outcome = services.dispatcher.deliver(&callback_url, &payload).await;

    match outcome {
        DeliverOutcome::Ok => {
            services.store.set_callback_sent(watch.id, true)?;
            services
                .store
                .transition_terminal(watch.id, target_status, false)?;
            finalize_wallet(services, watch, true);
        }
        DeliverOutcome::Retriable | DeliverOutcome::Permanent => {
            log::info!(
                "watch {} callback not delivered yet ({:?}); retrying on a later tick",
                watch.id,
                outcome
            );
        }
    }
    Ok(())
}

async fn force_stop(services: &GatewayServices, watch: &Watch) -> Result<(), anyhow::Error> {
    let target_status = if watch.has_evidence() {
        WatchStatus::Confirmed
    } else {
        WatchStatus::Expired
    };
    log::warn!(
        "force-stopping watch {} -> {:?} after callback exhaust window",
        watch.id,
        target_status
    );
    services
        .store
        .transition_terminal(watch.id, target_status, true)?;
    finalize_wallet(services, watch, false);
    metrics::counter!("gateway_watches_force_stopped_total").increment(1);
    Ok(())
}

fn finalize_wallet(services: &GatewayServices, watch: &Watch, callback_succeeded: bool) {
    let next = if callback_succeeded {
        WalletStatus::Used
    } else {
        WalletStatus::Failed
    };
    if let Ok(Some(wallet)) = services.store.get_wallet(watch.wallet_id) {
        if matches!(wallet.status, WalletStatus::Pending) {
            if let Err(e) = services.store.transition_wallet_status(watch.wallet_id, next) {
                log::warn!("wallet {} transition to {:?} failed: {e}", watch.wallet_id, next);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_chain::{ChainAdapter, ChainRegistry, ChainResult, FeeData, FeePolicy, SendResult};
    use gateway_common::config::GatewayConfig;
    use gateway_common::{Chain, Token, WalletId};
    use gateway_dispatcher::CallbackDispatcher;
    use gateway_store::{Store, WalletStatus};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory stand-in for a real RPC client (§4.1 "polymorphism over
    /// chains"): returns a scripted set of transfers once, then nothing, so
    /// tests can assert a tick consumes its candidates exactly once.
    struct MockAdapter {
        transfers: Mutex<Vec<ObservedTransfer>>,
        height: u64,
        /// When false (the default), each scan drains the scripted vec so a
        /// transfer is only ever returned once. When true, the same
        /// transfer is handed back every call, modeling overlapping scan
        /// windows re-observing the same on-chain event.
        repeat: bool,
    }

    impl MockAdapter {
        fn with_transfers(transfers: Vec<ObservedTransfer>) -> Self {
            Self {
                transfers: Mutex::new(transfers),
                height: 100,
                repeat: false,
            }
        }

        fn repeating(transfer: ObservedTransfer) -> Self {
            Self {
                transfers: Mutex::new(vec![transfer]),
                height: 100,
                repeat: true,
            }
        }
    }

    #[async_trait::async_trait]
    impl ChainAdapter for MockAdapter {
        async fn current_height(&self) -> ChainResult<u64> {
            Ok(self.height)
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
            if self.repeat {
                Ok(self.transfers.lock().unwrap().clone())
            } else {
                Ok(std::mem::take(&mut *self.transfers.lock().unwrap()))
            }
        }

        async fn send_token(
            &self,
            _from_private_key: &[u8],
            _token: Token,
            _to: &str,
            _amount: Amount,
            _fee_policy: FeePolicy,
        ) -> ChainResult<SendResult> {
            unimplemented!("not exercised by the Watch Engine")
        }

        async fn fee_data(&self) -> ChainResult<FeeData> {
            unimplemented!("not exercised by the Watch Engine")
        }
    }

    fn test_config() -> GatewayConfig {
        GatewayConfig {
            watch_duration: std::time::Duration::from_secs(3600),
            required_confirmations: 5,
            poll_interval: std::time::Duration::from_secs(30),
            scan_window_blocks: 1000,
            callback_retry_delays: vec![],
            callback_exhaust: std::time::Duration::from_secs(3 * 60 * 60),
            batch: Default::default(),
            maintenance_interval: std::time::Duration::from_secs(600),
            gas_sample_interval: std::time::Duration::from_secs(300),
            batch_tick_interval: std::time::Duration::from_secs(300),
            http_bind_address: "0.0.0.0:0".to_string(),
            shared_secret: "test-secret".to_string(),
            manual_complete_enabled: true,
            chains: vec![],
            storage_path: String::new(),
        }
    }

    fn test_services(transfers: Vec<ObservedTransfer>) -> GatewayServices {
        test_services_with_adapter(MockAdapter::with_transfers(transfers))
    }

    fn test_services_with_adapter(adapter: MockAdapter) -> GatewayServices {
        let mut adapters: HashMap<Chain, Arc<dyn ChainAdapter>> = HashMap::new();
        adapters.insert(Chain::Bsc, Arc::new(adapter));
        GatewayServices {
            store: Store::open_temporary().unwrap(),
            chains: Arc::new(ChainRegistry::from_adapters(adapters)),
            dispatcher: Arc::new(CallbackDispatcher::new(
                b"test-secret".to_vec(),
                "gateway-test".to_string(),
                vec![],
            )),
            config: Arc::new(test_config()),
        }
    }

    fn sample_wallet(chain: Chain) -> gateway_store::Wallet {
        gateway_store::Wallet {
            id: WalletId::new(),
            user_id: "user-1".to_string(),
            chain,
            address: "0xabc".to_string(),
            encrypted_private_key: vec![],
            derivation_index: 0,
            status: WalletStatus::Unused,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn active_watch(services: &GatewayServices, amount: &str) -> Watch {
        let wallet = sample_wallet(Chain::Bsc);
        services.store.insert_wallet(wallet.clone()).unwrap();
        services
            .store
            .start_or_reuse_watch(
                "user-1",
                Chain::Bsc,
                &wallet,
                gateway_store::StartWatchParams {
                    token: Token::Usdt,
                    expected_amount: Amount::parse(amount).unwrap(),
                    watch_duration_secs: 3600,
                    callback_url: None,
                    payment_id: None,
                },
            )
            .unwrap()
    }

    #[tokio::test]
    async fn regular_tick_retries_a_pending_callback_on_an_already_confirmed_watch() {
        let services = test_services(vec![]);
        let mut watch = active_watch(&services, "10");
        watch.tx_hash = Some("0xdead".to_string());
        watch.actual_amount = Some(Amount::parse("10").unwrap());
        watch.confirmations = services.config.required_confirmations;
        watch.callback_url = Some("http://localhost:1/unreachable".to_string());
        services.store.insert_watch_for_testing(watch.clone()).unwrap();

        process_watch(&services, watch.clone()).await;

        let updated = services.store.get_watch(watch.id).unwrap().unwrap();
        assert_eq!(updated.status, WatchStatus::Active, "still active: callback not yet delivered");
        assert!(!updated.callback_sent);
        assert_eq!(updated.callback_attempts, 1, "the retry must have actually attempted delivery");
    }

    #[tokio::test]
    async fn matching_transfer_confirms_and_enqueues_batch_item() {
        let services = test_services(vec![ObservedTransfer {
            tx_hash: "0xdead".to_string(),
            amount: Amount::parse("10").unwrap(),
            height: 100,
            confirmations: 5,
        }]);
        let watch = active_watch(&services, "10");

        process_watch(&services, watch.clone()).await;

        let updated = services.store.get_watch(watch.id).unwrap().unwrap();
        assert_eq!(updated.status, WatchStatus::Confirmed);
        assert_eq!(updated.tx_hash.as_deref(), Some("0xdead"));
        assert!(services
            .store
            .get_deposit(Chain::Bsc, "0xdead")
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn mismatched_amount_leaves_watch_active() {
        let services = test_services(vec![ObservedTransfer {
            tx_hash: "0xdead".to_string(),
            amount: Amount::parse("3").unwrap(),
            height: 100,
            confirmations: 5,
        }]);
        let watch = active_watch(&services, "10");

        process_watch(&services, watch.clone()).await;

        let updated = services.store.get_watch(watch.id).unwrap().unwrap();
        assert_eq!(updated.status, WatchStatus::Active);
        assert!(updated.tx_hash.is_none());
    }

    #[tokio::test]
    async fn same_transfer_reobserved_in_an_overlapping_scan_window_is_a_no_op() {
        let services = test_services_with_adapter(MockAdapter::repeating(ObservedTransfer {
            tx_hash: "0xdead".to_string(),
            amount: Amount::parse("10").unwrap(),
            height: 100,
            confirmations: 5,
        }));
        let watch = active_watch(&services, "10");

        // First tick observes and confirms; a second tick over the same
        // (now stale) watch snapshot re-scans the identical transfer.
        process_watch(&services, watch.clone()).await;
        process_watch(&services, watch.clone()).await;

        let confirmed = services.store.get_watch(watch.id).unwrap().unwrap();
        assert_eq!(confirmed.status, WatchStatus::Confirmed);
        let period = current_timestamp_seconds() / 3600 / 2;
        assert_eq!(
            services.store.list_batch_queue(Chain::Bsc, period).unwrap().len(),
            1,
            "re-observing the same tx_hash must not enqueue a second batch item"
        );
    }

    #[tokio::test]
    async fn expired_watch_without_evidence_goes_terminal_expired() {
        let services = test_services(vec![]);
        let mut watch = active_watch(&services, "10");
        watch.expires_at = current_timestamp_seconds().saturating_sub(1);
        services.store.insert_watch_for_testing(watch.clone()).unwrap();

        process_watch(&services, watch.clone()).await;

        let updated = services.store.get_watch(watch.id).unwrap().unwrap();
        assert_eq!(updated.status, WatchStatus::Expired);
    }

    #[tokio::test]
    async fn expiry_prefers_confirming_when_evidence_arrived_same_tick() {
        let services = test_services(vec![]);
        let mut watch = active_watch(&services, "10");
        watch.expires_at = current_timestamp_seconds().saturating_sub(1);
        watch.tx_hash = Some("0xdead".to_string());
        watch.actual_amount = Some(Amount::parse("10").unwrap());
        services.store.insert_watch_for_testing(watch.clone()).unwrap();

        process_watch(&services, watch.clone()).await;

        let updated = services.store.get_watch(watch.id).unwrap().unwrap();
        assert_eq!(updated.status, WatchStatus::Confirmed);
    }

    #[tokio::test]
    async fn force_stop_fires_once_past_the_callback_exhaust_grace() {
        let services = test_services(vec![]);
        let mut watch = active_watch(&services, "10");
        watch.expires_at = 0;
        watch.callback_url = Some("http://localhost:1/unreachable".to_string());
        services.store.insert_watch_for_testing(watch.clone()).unwrap();

        process_watch(&services, watch.clone()).await;

        let updated = services.store.get_watch(watch.id).unwrap().unwrap();
        assert_eq!(updated.status, WatchStatus::Expired);
        assert!(updated.force_stopped);
        assert!(!updated.callback_sent);
    }

    #[tokio::test]
    async fn force_complete_drives_the_same_path_as_a_real_match() {
        let services = test_services(vec![]);
        let watch = active_watch(&services, "10");
        let period = current_timestamp_seconds() / 3600 / 2;

        let result = force_complete(
            &services,
            watch.id,
            "0xmanual".to_string(),
            Amount::parse("10").unwrap(),
            u64::MAX,
        )
        .await
        .unwrap();

        assert_eq!(result.status, WatchStatus::Confirmed);
        assert_eq!(result.tx_hash.as_deref(), Some("0xmanual"));
        assert_eq!(
            services.store.list_batch_queue(Chain::Bsc, period).unwrap().len(),
            1
        );
    }
}

fn build_payload(watch: &Watch, kind: CallbackKind) -> CallbackPayload {
    CallbackPayload {
        user_id: watch.user_id.clone(),
        address: watch.address.clone(),
        chain: watch.chain,
        token: watch.token,
        expected_amount: watch.expected_amount,
        actual_amount: watch.actual_amount,
        confirmations: watch.confirmations,
        status: kind,
        tx_hash: watch.tx_hash.clone(),
        timestamp: to_rfc3339(current_timestamp_seconds()),
        watch_id: watch.id,
        payment_id: watch.payment_id.clone(),
    }
}
