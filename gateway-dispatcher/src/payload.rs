use gateway_common::{Amount, Chain, Token, WatchId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallbackKind {
    Confirmed,
    Expired,
}

/// Outbound webhook body (§6). Field names and casing are part of the wire
/// contract and must not change without a version bump.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub user_id: String,
    pub address: String,
    pub chain: Chain,
    pub token: Token,
    pub expected_amount: Amount,
    pub actual_amount: Option<Amount>,
    pub confirmations: u64,
    pub status: CallbackKind,
    pub tx_hash: Option<String>,
    pub timestamp: String,
    pub watch_id: WatchId,
    pub payment_id: Option<String>,
}

/// The receiver's acknowledgement body (§4.4): 2xx alone is not enough, the
/// JSON body must also carry `"status":"ok"`.
#[derive(Debug, Deserialize)]
pub struct CallbackAck {
    pub status: Option<String>,
}

impl CallbackAck {
    pub fn is_ok(&self) -> bool {
        self.status.as_deref() == Some("ok")
    }
}
