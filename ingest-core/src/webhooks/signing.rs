//! HMAC-SHA256 request signing (spec §4.5).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex-encoded HMAC-SHA256 of `body` keyed by `secret`, to be
/// sent as `X-Webhook-Signature`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a received signature against the body, constant-time (spec
/// §4.5's signature verification contract). Exposed so the
/// subscription-test operation and any consumer-facing code share one
/// implementation.
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    match hex::decode(signature) {
        Ok(raw) => mac.verify_slice(&raw).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let body = br#"{"event":"processing.completed"}"#;
        let signature = sign("s3cret", body);
        assert!(verify("s3cret", body, &signature));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let body = br#"{"event":"processing.completed"}"#;
        let signature = sign("s3cret", body);
        assert!(!verify("other", body, &signature));
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let body = br#"{"event":"processing.completed"}"#;
        let signature = sign("s3cret", body);
        assert!(!verify("s3cret", b"{\"event\":\"tampered\"}", &signature));
    }
}
