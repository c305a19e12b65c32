mod payload;

pub use payload::{CallbackAck, CallbackKind, CallbackPayload};

use gateway_common::signature::{sign_body, SIGNATURE_HEADER};
use log::{debug, warn};
use reqwest::Client;
use std::time::Duration;

/// Outcome of a single `deliver` call (§4.4), after its internal retries are
/// exhausted or it converges early on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverOutcome {
    Ok,
    Retriable,
    Permanent,
}

const CALLBACK_TIMEOUT_SECONDS: u64 = 15;
const HEALTH_PROBE_TIMEOUT_SECONDS: u64 = 5;

pub struct CallbackDispatcher {
    client: Client,
    shared_secret: Vec<u8>,
    user_agent: String,
    /// Per-call retry schedule (§4.4, §6 `CALLBACK_RETRY_DELAYS`): attempt 0
    /// is always immediate, then one delay per configured retry.
    retry_delays_ms: Vec<u64>,
}

impl CallbackDispatcher {
    pub fn new(shared_secret: Vec<u8>, user_agent: String, retry_delays: Vec<Duration>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(CALLBACK_TIMEOUT_SECONDS))
            .build()
            .unwrap_or_else(|_| Client::new());
        let retry_delays_ms = std::iter::once(0)
            .chain(retry_delays.iter().map(|d| d.as_millis() as u64))
            .collect();
        Self {
            client,
            shared_secret,
            user_agent,
            retry_delays_ms,
        }
    }

    /// Delivers one callback, running the full retry schedule in-process.
    /// The engine is expected to call this from a tick; a `Retriable`
    /// outcome is picked up again on a later tick rather than looped here.
    pub async fn deliver(&self, url: &str, payload: &CallbackPayload) -> DeliverOutcome {
        if matches!(payload.status, CallbackKind::Confirmed) {
            self.probe_health(url).await;
        }

        let body = match serde_json::to_string(payload) {
            Ok(b) => b,
            Err(e) => {
                warn!("failed to serialize callback payload: {e}");
                return DeliverOutcome::Permanent;
            }
        };
        let signature = sign_body(&self.shared_secret, &body);

        let mut last_outcome = DeliverOutcome::Retriable;
        for (attempt, delay_ms) in self.retry_delays_ms.iter().enumerate() {
            if *delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
            }
            metrics::counter!("gateway_callback_attempts_total").increment(1);
            match self.send_once(url, &body, &signature).await {
                DeliverOutcome::Ok => {
                    metrics::counter!("gateway_callbacks_delivered_total").increment(1);
                    return DeliverOutcome::Ok;
                }
                DeliverOutcome::Permanent => {
                    metrics::counter!("gateway_callbacks_failed_total").increment(1);
                    return DeliverOutcome::Permanent;
                }
                DeliverOutcome::Retriable => {
                    debug!(
                        "callback attempt {} to {} was retriable",
                        attempt + 1,
                        url
                    );
                    last_outcome = DeliverOutcome::Retriable;
                }
            }
        }
        metrics::counter!("gateway_callbacks_retried_total").increment(1);
        last_outcome
    }

    async fn send_once(&self, url: &str, body: &str, signature: &str) -> DeliverOutcome {
        let response = match self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header("User-Agent", &self.user_agent)
            .body(body.to_string())
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!("callback transport error to {url}: {e}");
                return DeliverOutcome::Retriable;
            }
        };

        let status = response.status();
        if status.is_client_error() {
            return DeliverOutcome::Permanent;
        }
        if !status.is_success() {
            return DeliverOutcome::Retriable;
        }

        match response.json::<CallbackAck>().await {
            Ok(ack) if ack.is_ok() => DeliverOutcome::Ok,
            Ok(_) => DeliverOutcome::Retriable,
            Err(_) => DeliverOutcome::Retriable,
        }
    }

    /// Advisory health probe preceding `CONFIRMED` deliveries (§4.4). Its
    /// outcome is never propagated to the caller.
    async fn probe_health(&self, url: &str) {
        let health_url = format!("{}/health", url.trim_end_matches('/'));
        let result = self
            .client
            .post(&health_url)
            .timeout(Duration::from_secs(HEALTH_PROBE_TIMEOUT_SECONDS))
            .send()
            .await;
        if let Err(e) = result {
            debug!("health probe to {health_url} failed (advisory only): {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_common::{Amount, Chain, Token, WatchId};

    fn sample_payload() -> CallbackPayload {
        CallbackPayload {
            user_id: "user-1".to_string(),
            address: "0xabc".to_string(),
            chain: Chain::Bsc,
            token: Token::Usdt,
            expected_amount: Amount::parse("10").unwrap(),
            actual_amount: Some(Amount::parse("10").unwrap()),
            confirmations: 5,
            status: CallbackKind::Confirmed,
            tx_hash: Some("0xAAA".to_string()),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            watch_id: WatchId::new(),
            payment_id: None,
        }
    }

    #[test]
    fn ack_requires_ok_marker() {
        let ack: CallbackAck = serde_json::from_str(r#"{"status":"ok"}"#).unwrap();
        assert!(ack.is_ok());
        let ack: CallbackAck = serde_json::from_str(r#"{"status":"error"}"#).unwrap();
        assert!(!ack.is_ok());
        let ack: CallbackAck = serde_json::from_str(r#"{}"#).unwrap();
        assert!(!ack.is_ok());
    }

    #[test]
    fn retry_schedule_prepends_an_immediate_first_attempt() {
        let dispatcher = CallbackDispatcher::new(
            b"secret".to_vec(),
            "gateway-test".to_string(),
            vec![Duration::from_secs(1), Duration::from_secs(5)],
        );
        assert_eq!(dispatcher.retry_delays_ms, vec![0, 1_000, 5_000]);
    }

    #[test]
    fn empty_retry_config_still_attempts_once() {
        let dispatcher = CallbackDispatcher::new(b"secret".to_vec(), "gateway-test".to_string(), vec![]);
        assert_eq!(dispatcher.retry_delays_ms, vec![0]);
    }

    #[test]
    fn payload_serializes_with_expected_field_names() {
        let payload = sample_payload();
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"userId\""));
        assert!(json.contains("\"watchId\""));
        assert!(json.contains("\"status\":\"CONFIRMED\""));
    }
}
