// A simple module to define the time types/helpers used across the gateway.
//
// IMPORTANT: these use SystemTime::now(), which is NON-DETERMINISTIC.
// SAFE USAGE: expiry checks, logging, metrics, cache TTLs, retry scheduling.
// Never repurpose these for anything that needs to agree across processes
// (there is only one writer in this design, so that hazard does not arise today).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub type TimestampSeconds = u64;
pub type TimestampMillis = u64;

#[inline]
pub fn get_current_time() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before UNIX_EPOCH")
}

#[inline]
pub fn current_timestamp_seconds() -> TimestampSeconds {
    get_current_time().as_secs()
}

#[inline]
pub fn current_timestamp_millis() -> TimestampMillis {
    get_current_time().as_millis() as u64
}

/// RFC3339 rendering of a unix-seconds timestamp, used for the outbound webhook payload.
pub fn to_rfc3339(timestamp: TimestampSeconds) -> String {
    let dt = chrono::DateTime::<chrono::Utc>::from_timestamp(timestamp as i64, 0)
        .unwrap_or_else(chrono::Utc::now);
    dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
