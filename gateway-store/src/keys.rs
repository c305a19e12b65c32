// Key encodings for the sled trees. Sled orders keys lexicographically by
// raw bytes, so multi-part keys use fixed-width big-endian integers to keep
// range scans (e.g. "all active watches for a chain") well ordered.

use gateway_common::Chain;

pub fn active_watch_key(user_id: &str, chain: Chain) -> Vec<u8> {
    let mut key = user_id.as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(chain.as_str().as_bytes());
    key
}

pub fn deposit_key(chain: Chain, tx_hash: &str) -> Vec<u8> {
    let mut key = chain.as_str().as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(tx_hash.as_bytes());
    key
}

pub fn balance_cache_key(chain: Chain, address: &str) -> Vec<u8> {
    let mut key = chain.as_str().as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(address.as_bytes());
    key
}

pub fn batch_queue_key(chain: Chain, period: u64) -> Vec<u8> {
    let mut key = chain.as_str().as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(&period.to_be_bytes());
    key
}

pub fn scan_cursor_key(chain: Chain) -> Vec<u8> {
    chain.as_str().as_bytes().to_vec()
}
