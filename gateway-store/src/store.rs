use crate::error::{StoreError, StoreResult};
use crate::keys;
use crate::models::{
    BatchItem, BatchItemState, Deposit, DepositStatus, StartWatchParams, Wallet, WalletStatus,
    Watch, WatchStatus,
};
use gateway_common::{
    time::current_timestamp_seconds, Amount, BatchItemId, Chain, DepositId, WalletId, WatchId,
};
use std::path::Path;

/// Embedded, transactional key-value store backing every durable row in the
/// gateway. One instance per process (§5 "Shared resources"); every mutator
/// below either is a single sled CAS or explicitly documents the sequence it
/// relies on the caller to preserve.
#[derive(Clone)]
pub struct Store {
    db: sled::Db,
    wallets: sled::Tree,
    wallets_by_address: sled::Tree,
    watches: sled::Tree,
    active_watch_index: sled::Tree,
    deposits: sled::Tree,
    batch_items: sled::Tree,
    batch_queue_index: sled::Tree,
    scan_cursors: sled::Tree,
    balance_cache: sled::Tree,
}

fn encode<T: serde::Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    Ok(bincode::deserialize(bytes)?)
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            wallets: db.open_tree("wallets")?,
            wallets_by_address: db.open_tree("wallets_by_address")?,
            watches: db.open_tree("watches")?,
            active_watch_index: db.open_tree("active_watch_index")?,
            deposits: db.open_tree("deposits")?,
            batch_items: db.open_tree("batch_items")?,
            batch_queue_index: db.open_tree("batch_queue_index")?,
            scan_cursors: db.open_tree("scan_cursors")?,
            balance_cache: db.open_tree("balance_cache")?,
            db,
        })
    }

    /// Used by tests; an in-memory sled instance with no files on disk.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            wallets: db.open_tree("wallets")?,
            wallets_by_address: db.open_tree("wallets_by_address")?,
            watches: db.open_tree("watches")?,
            active_watch_index: db.open_tree("active_watch_index")?,
            deposits: db.open_tree("deposits")?,
            batch_items: db.open_tree("batch_items")?,
            batch_queue_index: db.open_tree("batch_queue_index")?,
            scan_cursors: db.open_tree("scan_cursors")?,
            balance_cache: db.open_tree("balance_cache")?,
            db,
        })
    }

    pub async fn flush(&self) -> StoreResult<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    // ---- Wallets (§4.7) ----------------------------------------------

    /// Inserts a freshly derived wallet (populated by the out-of-scope
    /// address-derivation collaborator, §4.7). Fails if the address is
    /// already known, enforcing the §3 uniqueness invariant.
    pub fn insert_wallet(&self, wallet: Wallet) -> StoreResult<()> {
        let addr_key = wallet.address.as_bytes();
        let id_bytes = encode(&wallet.id)?;
        let inserted = self
            .wallets_by_address
            .compare_and_swap(addr_key, None as Option<&[u8]>, Some(id_bytes.clone()))?;
        if inserted.is_err() {
            return Err(StoreError::AlreadyExists(format!(
                "wallet address already registered: {}",
                wallet.address
            )));
        }
        self.wallets.insert(encode(&wallet.id)?, encode(&wallet)?)?;
        Ok(())
    }

    pub fn get_wallet(&self, id: WalletId) -> StoreResult<Option<Wallet>> {
        match self.wallets.get(encode(&id)?)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Finds the first `UNUSED` wallet on `chain` to bind to a new watch.
    /// Linear scan: the unused pool is expected to stay small because
    /// wallets are provisioned just ahead of demand.
    pub fn allocate_unused_wallet(&self, chain: Chain) -> StoreResult<Option<Wallet>> {
        for entry in self.wallets.iter() {
            let (_, bytes) = entry?;
            let wallet: Wallet = decode(&bytes)?;
            if wallet.chain == chain && matches!(wallet.status, WalletStatus::Unused) {
                return Ok(Some(wallet));
            }
        }
        Ok(None)
    }

    /// Precondition-checked status transition (§3 Wallet invariants).
    pub fn transition_wallet_status(
        &self,
        id: WalletId,
        next: WalletStatus,
    ) -> StoreResult<()> {
        let key = encode(&id)?;
        loop {
            let current_bytes = self
                .wallets
                .get(&key)?
                .ok_or_else(|| StoreError::NotFound(format!("wallet {id}")))?;
            let mut wallet: Wallet = decode(&current_bytes)?;
            if wallet.status.is_terminal() {
                // Already USED/FAILED: never reassigned, treat repeat calls
                // idempotently rather than erroring the caller's retry loop.
                return Ok(());
            }
            if !wallet.status.can_transition_to(next) {
                return Err(StoreError::Conflict(format!(
                    "wallet {id} cannot move {:?} -> {:?}",
                    wallet.status, next
                )));
            }
            wallet.status = next;
            wallet.updated_at = current_timestamp_seconds();
            let new_bytes = encode(&wallet)?;
            if self
                .wallets
                .compare_and_swap(&key, Some(current_bytes.clone()), Some(new_bytes))?
                .is_ok()
            {
                return Ok(());
            }
            // lost the race, re-read and retry (StoreConflict re-read policy, §7)
        }
    }

    // ---- Watches (§4.2, §4.3) ------------------------------------------

    /// Atomic find-or-create keyed by `(user_id, chain)` (§3a): restarting
    /// extends `expires_at` and refreshes the expected amount / callback URL
    /// on the existing `ACTIVE` row instead of creating a second one.
    pub fn start_or_reuse_watch(
        &self,
        user_id: &str,
        chain: Chain,
        wallet: &Wallet,
        params: StartWatchParams,
    ) -> StoreResult<Watch> {
        let index_key = keys::active_watch_key(user_id, chain);
        let now = current_timestamp_seconds();

        if let Some(existing_id_bytes) = self.active_watch_index.get(&index_key)? {
            let watch_id: WatchId = decode(&existing_id_bytes)?;
            let watch_key = encode(&watch_id)?;
            loop {
                let current_bytes = match self.watches.get(&watch_key)? {
                    Some(b) => b,
                    None => break, // index pointed at a row that's gone; fall through to create
                };
                let mut watch: Watch = decode(&current_bytes)?;
                if !matches!(watch.status, WatchStatus::Active) {
                    break; // no longer active, the index is stale; fall through to create
                }
                watch.expires_at = now + params.watch_duration_secs;
                watch.expected_amount = params.expected_amount;
                watch.callback_url = params.callback_url.clone();
                watch.payment_id = params.payment_id.clone();
                let new_bytes = encode(&watch)?;
                if self
                    .watches
                    .compare_and_swap(&watch_key, Some(current_bytes), Some(new_bytes))?
                    .is_ok()
                {
                    return Ok(watch);
                }
            }
        }

        let watch = Watch {
            id: WatchId::new(),
            user_id: user_id.to_string(),
            wallet_id: wallet.id,
            address: wallet.address.clone(),
            chain,
            token: params.token,
            expected_amount: params.expected_amount,
            status: WatchStatus::Active,
            expires_at: now + params.watch_duration_secs,
            created_at: now,
            last_checked_at: None,
            confirmations: 0,
            tx_hash: None,
            actual_amount: None,
            callback_url: params.callback_url,
            payment_id: params.payment_id,
            callback_sent: false,
            callback_attempts: 0,
            last_callback_attempt: None,
            force_stopped: false,
        };
        self.watches.insert(encode(&watch.id)?, encode(&watch)?)?;
        self.active_watch_index
            .insert(index_key, encode(&watch.id)?)?;
        Ok(watch)
    }

    /// Test seam: inserts a fully-formed `Watch` (and its active-watch index
    /// entry) without going through `start_or_reuse_watch`'s reuse logic, so
    /// callers can exercise expiry/force-stop paths with an arbitrary
    /// `expires_at` instead of racing the wall clock.
    pub fn insert_watch_for_testing(&self, watch: Watch) -> StoreResult<()> {
        let index_key = keys::active_watch_key(&watch.user_id, watch.chain);
        self.watches.insert(encode(&watch.id)?, encode(&watch)?)?;
        if matches!(watch.status, WatchStatus::Active) {
            self.active_watch_index
                .insert(index_key, encode(&watch.id)?)?;
        }
        Ok(())
    }

    pub fn get_watch(&self, id: WatchId) -> StoreResult<Option<Watch>> {
        match self.watches.get(encode(&id)?)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn list_active_watches(&self) -> StoreResult<Vec<Watch>> {
        let mut out = Vec::new();
        for entry in self.watches.iter() {
            let (_, bytes) = entry?;
            let watch: Watch = decode(&bytes)?;
            if matches!(watch.status, WatchStatus::Active) {
                out.push(watch);
            }
        }
        Ok(out)
    }

    /// Full table scan for the `GET /stats` surface (§4.8); not on any hot
    /// path, so an unfiltered iteration over `watches` is acceptable.
    pub fn list_all_watches(&self) -> StoreResult<Vec<Watch>> {
        let mut out = Vec::new();
        for entry in self.watches.iter() {
            let (_, bytes) = entry?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    pub fn list_watches_for_user(&self, user_id: &str) -> StoreResult<Vec<Watch>> {
        let mut out = Vec::new();
        for entry in self.watches.iter() {
            let (_, bytes) = entry?;
            let watch: Watch = decode(&bytes)?;
            if watch.user_id == user_id {
                out.push(watch);
            }
        }
        Ok(out)
    }

    fn update_watch<F>(&self, id: WatchId, mutator: F) -> StoreResult<Watch>
    where
        F: Fn(&mut Watch) -> StoreResult<()>,
    {
        let key = encode(&id)?;
        loop {
            let current_bytes = self
                .watches
                .get(&key)?
                .ok_or_else(|| StoreError::NotFound(format!("watch {id}")))?;
            let mut watch: Watch = decode(&current_bytes)?;
            mutator(&mut watch)?;
            let new_bytes = encode(&watch)?;
            if self
                .watches
                .compare_and_swap(&key, Some(current_bytes), Some(new_bytes))?
                .is_ok()
            {
                return Ok(watch);
            }
        }
    }

    pub fn mark_checked(&self, id: WatchId, now: u64) -> StoreResult<()> {
        self.update_watch(id, |watch| {
            watch.last_checked_at = Some(now);
            Ok(())
        })?;
        Ok(())
    }

    /// §3(c): evidence may be written while still ACTIVE, before any
    /// callback has succeeded.
    pub fn record_evidence(
        &self,
        id: WatchId,
        tx_hash: String,
        amount: Amount,
        confirmations: u64,
    ) -> StoreResult<Watch> {
        self.update_watch(id, |watch| {
            watch.tx_hash = Some(tx_hash.clone());
            watch.actual_amount = Some(amount);
            watch.confirmations = confirmations;
            Ok(())
        })
    }

    pub fn record_callback_attempt(&self, id: WatchId, now: u64) -> StoreResult<()> {
        self.update_watch(id, |watch| {
            watch.callback_attempts += 1;
            watch.last_callback_attempt = Some(now);
            Ok(())
        })?;
        Ok(())
    }

    pub fn set_callback_sent(&self, id: WatchId, sent: bool) -> StoreResult<()> {
        self.update_watch(id, |watch| {
            watch.callback_sent = sent;
            Ok(())
        })?;
        Ok(())
    }

    /// Guarded by `current_status == ACTIVE` (§4.2): fails with
    /// `StoreError::Conflict` if another tick already moved the watch.
    pub fn transition_terminal(
        &self,
        id: WatchId,
        new_status: WatchStatus,
        force_stopped: bool,
    ) -> StoreResult<Watch> {
        let key = encode(&id)?;
        let current_bytes = self
            .watches
            .get(&key)?
            .ok_or_else(|| StoreError::NotFound(format!("watch {id}")))?;
        let mut watch: Watch = decode(&current_bytes)?;
        if !watch.status.can_transition_to(new_status) {
            return Err(StoreError::Conflict(format!(
                "watch {id} cannot move {:?} -> {:?}",
                watch.status, new_status
            )));
        }
        watch.status = new_status;
        watch.force_stopped = force_stopped;
        let new_bytes = encode(&watch)?;
        self.watches
            .compare_and_swap(&key, Some(current_bytes), Some(new_bytes))?
            .map_err(|_| {
                StoreError::Conflict(format!("watch {id} was mutated concurrently"))
            })?;
        let index_key = keys::active_watch_key(&watch.user_id, watch.chain);
        // best-effort cleanup of the active index; a stale pointer is
        // harmless because start_or_reuse_watch re-validates status.
        let _ = self.active_watch_index.compare_and_swap(
            &index_key,
            Some(encode(&id)?),
            None as Option<Vec<u8>>,
        );
        Ok(watch)
    }

    // ---- Deposits (§3, §8 "at-most-once credit") ------------------------

    /// Returns `true` if this call inserted the row, `false` if it already
    /// existed (a duplicate observation, silently ignored by the caller).
    pub fn insert_deposit_once(
        &self,
        chain: Chain,
        tx_hash: &str,
        deposit: Deposit,
    ) -> StoreResult<bool> {
        let key = keys::deposit_key(chain, tx_hash);
        let bytes = encode(&deposit)?;
        let result = self
            .deposits
            .compare_and_swap(key, None as Option<&[u8]>, Some(bytes))?;
        Ok(result.is_ok())
    }

    pub fn get_deposit(&self, chain: Chain, tx_hash: &str) -> StoreResult<Option<Deposit>> {
        match self.deposits.get(keys::deposit_key(chain, tx_hash))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    // ---- Scan cursor / balance cache (§4.1, §9 balance-delta fallback) --

    pub fn get_scan_cursor(&self, chain: Chain) -> StoreResult<Option<u64>> {
        match self.scan_cursors.get(keys::scan_cursor_key(chain))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_scan_cursor(&self, chain: Chain, height: u64) -> StoreResult<()> {
        self.scan_cursors
            .insert(keys::scan_cursor_key(chain), encode(&height)?)?;
        Ok(())
    }

    pub fn get_cached_balance(&self, chain: Chain, address: &str) -> StoreResult<Option<Amount>> {
        match self
            .balance_cache
            .get(keys::balance_cache_key(chain, address))?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_cached_balance(
        &self,
        chain: Chain,
        address: &str,
        amount: Amount,
    ) -> StoreResult<()> {
        self.balance_cache
            .insert(keys::balance_cache_key(chain, address), encode(&amount)?)?;
        Ok(())
    }

    // ---- BatchItems (§3, §4.5) ------------------------------------------

    /// Invariant: a given `watch_id` appears at most once across
    /// non-terminal batches; enforced by scanning the chain's open items.
    pub fn enqueue_batch_item(&self, item: BatchItem) -> StoreResult<()> {
        for entry in self.batch_items.iter() {
            let (_, bytes) = entry?;
            let existing: BatchItem = decode(&bytes)?;
            if existing.watch_id == item.watch_id && !existing.state.is_terminal() {
                return Ok(()); // already queued, treat as idempotent
            }
        }
        self.batch_items.insert(encode(&item.id)?, encode(&item)?)?;
        let queue_key = keys::batch_queue_key(item.chain, item.period);
        let mut ids: Vec<BatchItemId> = match self.batch_queue_index.get(&queue_key)? {
            Some(bytes) => decode(&bytes)?,
            None => Vec::new(),
        };
        ids.push(item.id);
        self.batch_queue_index.insert(queue_key, encode(&ids)?)?;
        Ok(())
    }

    pub fn list_batch_queue(&self, chain: Chain, period: u64) -> StoreResult<Vec<BatchItem>> {
        let queue_key = keys::batch_queue_key(chain, period);
        let ids: Vec<BatchItemId> = match self.batch_queue_index.get(&queue_key)? {
            Some(bytes) => decode(&bytes)?,
            None => return Ok(Vec::new()),
        };
        let mut out = Vec::new();
        for id in ids {
            if let Some(bytes) = self.batch_items.get(encode(&id)?)? {
                out.push(decode(&bytes)?);
            }
        }
        Ok(out)
    }

    /// All open `(chain, period)` keys that currently hold at least one
    /// non-terminal item, used by the Batch Scheduler tick (§4.5).
    pub fn list_open_batch_periods(&self) -> StoreResult<Vec<(Chain, u64)>> {
        let mut periods = Vec::new();
        for entry in self.batch_queue_index.iter() {
            let (key_bytes, _) = entry?;
            if let Some((chain, period)) = parse_batch_queue_key(&key_bytes) {
                periods.push((chain, period));
            }
        }
        Ok(periods)
    }

    fn update_batch_item<F>(&self, id: BatchItemId, mutator: F) -> StoreResult<BatchItem>
    where
        F: Fn(&mut BatchItem) -> StoreResult<()>,
    {
        let key = encode(&id)?;
        loop {
            let current_bytes = self
                .batch_items
                .get(&key)?
                .ok_or_else(|| StoreError::NotFound(format!("batch item {id}")))?;
            let mut item: BatchItem = decode(&current_bytes)?;
            mutator(&mut item)?;
            let new_bytes = encode(&item)?;
            if self
                .batch_items
                .compare_and_swap(&key, Some(current_bytes), Some(new_bytes))?
                .is_ok()
            {
                return Ok(item);
            }
        }
    }

    pub fn transition_batch_item(
        &self,
        id: BatchItemId,
        state: BatchItemState,
        tx_hash: Option<String>,
    ) -> StoreResult<BatchItem> {
        self.update_batch_item(id, |item| {
            item.state = state;
            if let Some(h) = tx_hash.clone() {
                item.tx_hash = Some(h);
            }
            Ok(())
        })
    }
}

fn parse_batch_queue_key(bytes: &[u8]) -> Option<(Chain, u64)> {
    let idx = bytes.iter().position(|b| *b == 0)?;
    let chain_str = std::str::from_utf8(&bytes[..idx]).ok()?;
    let chain: Chain = chain_str.parse().ok()?;
    let period_bytes = &bytes[idx + 1..];
    if period_bytes.len() != 8 {
        return None;
    }
    let mut arr = [0u8; 8];
    arr.copy_from_slice(period_bytes);
    Some((chain, u64::from_be_bytes(arr)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_common::Token;

    fn sample_wallet(chain: Chain) -> Wallet {
        Wallet {
            id: WalletId::new(),
            user_id: "user-1".to_string(),
            chain,
            address: format!("addr-{}", WalletId::new()),
            encrypted_private_key: vec![1, 2, 3],
            derivation_index: 0,
            status: WalletStatus::Unused,
            created_at: current_timestamp_seconds(),
            updated_at: current_timestamp_seconds(),
        }
    }

    #[test]
    fn start_or_reuse_watch_enforces_single_active_per_user_chain() {
        let store = Store::open_temporary().unwrap();
        let wallet = sample_wallet(Chain::Bsc);
        store.insert_wallet(wallet.clone()).unwrap();

        let params = StartWatchParams {
            token: Token::Usdt,
            expected_amount: Amount::parse("10").unwrap(),
            watch_duration_secs: 3600,
            callback_url: Some("https://x/hook".to_string()),
            payment_id: None,
        };
        let first = store
            .start_or_reuse_watch("user-1", Chain::Bsc, &wallet, params.clone())
            .unwrap();

        let reused_params = StartWatchParams {
            expected_amount: Amount::parse("20").unwrap(),
            ..params
        };
        let second = store
            .start_or_reuse_watch("user-1", Chain::Bsc, &wallet, reused_params)
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.expected_amount, Amount::parse("20").unwrap());
        assert_eq!(store.list_active_watches().unwrap().len(), 1);
    }

    #[test]
    fn insert_deposit_once_rejects_duplicates() {
        let store = Store::open_temporary().unwrap();
        let wallet_id = WalletId::new();
        let deposit = Deposit {
            id: DepositId::new(),
            chain: Chain::Ethereum,
            tx_hash: "0xAAA".to_string(),
            amount: Amount::parse("10").unwrap(),
            token: Token::Usdt,
            wallet_id,
            status: DepositStatus::Confirmed,
            observed_at: current_timestamp_seconds(),
        };
        assert!(store
            .insert_deposit_once(Chain::Ethereum, "0xAAA", deposit.clone())
            .unwrap());
        assert!(!store
            .insert_deposit_once(Chain::Ethereum, "0xAAA", deposit)
            .unwrap());
    }

    #[test]
    fn transition_terminal_is_guarded() {
        let store = Store::open_temporary().unwrap();
        let wallet = sample_wallet(Chain::Polygon);
        store.insert_wallet(wallet.clone()).unwrap();
        let params = StartWatchParams {
            token: Token::Usdt,
            expected_amount: Amount::parse("5").unwrap(),
            watch_duration_secs: 3600,
            callback_url: None,
            payment_id: None,
        };
        let watch = store
            .start_or_reuse_watch("user-2", Chain::Polygon, &wallet, params)
            .unwrap();

        store
            .transition_terminal(watch.id, WatchStatus::Confirmed, false)
            .unwrap();
        assert!(store
            .transition_terminal(watch.id, WatchStatus::Expired, false)
            .is_err());
    }
}
