// Outbound webhook signing (§4.4, §6). HMAC-SHA256 over the raw JSON body
// under the shared secret, hex-encoded and carried in the
// `X-Wallet-API-Signature: sha256=<hex>` header.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Wallet-API-Signature";

/// Computes `sha256=<hex(HMAC_SHA256(secret, body))>`.
pub fn sign_body(secret: &[u8], body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts a key of any length");
    mac.update(body.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a `sha256=<hex>` signature header against a freshly computed one
/// using a constant-time comparison (§8 "signature round-trip").
pub fn verify_body(secret: &[u8], body: &str, signature_header: &str) -> bool {
    let expected = sign_body(secret, body);
    constant_time_eq(expected.as_bytes(), signature_header.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let secret = b"top-secret";
        let body = r#"{"watchId":"abc","status":"CONFIRMED"}"#;
        let sig = sign_body(secret, body);
        assert!(sig.starts_with("sha256="));
        assert!(verify_body(secret, body, &sig));
    }

    #[test]
    fn rejects_tampered_body() {
        let secret = b"top-secret";
        let sig = sign_body(secret, "original");
        assert!(!verify_body(secret, "tampered", &sig));
    }
}
