//! Webhook payload parsing and `Stripe-Signature` verification.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed payload, in seconds.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header is malformed")]
    Malformed,
    #[error("signature timestamp is outside the tolerance window")]
    Expired,
    #[error("no signature matched the payload")]
    Mismatch,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: EventObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventObject {
    pub id: String,
    pub object: Option<String>,
}

impl WebhookEvent {
    /// Intent id for `payment_intent.*` events.
    pub fn payment_intent_id(&self) -> Option<&str> {
        self.event_type
            .starts_with("payment_intent.")
            .then_some(self.data.object.id.as_str())
    }
}

/// Verify a `t=<ts>,v1=<hex>` header against the raw request body.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if now.abs_diff(timestamp) > tolerance_secs.unsigned_abs() {
        return Err(SignatureError::Expired);
    }

    let matched = signatures.iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    });

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Produce a signature header for `payload`, as the gateway would.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let digest = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mut mac) => {
            mac.update(timestamp.to_string().as_bytes());
            mac.update(b".");
            mac.update(payload);
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    };
    format!("t={timestamp},v1={digest}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_1","object":"payment_intent"}}}"#;

    #[test]
    fn accepts_a_fresh_valid_signature() {
        let header = sign_payload(BODY, SECRET, 1_000);
        assert_eq!(verify_signature(BODY, &header, SECRET, 300, 1_100), Ok(()));
    }

    #[test]
    fn rejects_tampered_payload() {
        let header = sign_payload(BODY, SECRET, 1_000);
        let err = verify_signature(b"{}", &header, SECRET, 300, 1_000).unwrap_err();
        assert_eq!(err, SignatureError::Mismatch);
    }

    #[test]
    fn rejects_stale_timestamp() {
        let header = sign_payload(BODY, SECRET, 1_000);
        let err = verify_signature(BODY, &header, SECRET, 300, 2_000).unwrap_err();
        assert_eq!(err, SignatureError::Expired);
    }

    #[test]
    fn extreme_timestamps_are_expired() {
        for t in [i64::MIN, i64::MAX] {
            let header = format!("t={t},v1=00");
            let err = verify_signature(b"{}", &header, SECRET, 300, 1_760_000_000).unwrap_err();
            assert_eq!(err, SignatureError::Expired);
        }
    }

    #[test]
    fn rejects_headers_without_v1() {
        let err = verify_signature(BODY, "t=1000", SECRET, 300, 1_000).unwrap_err();
        assert_eq!(err, SignatureError::Malformed);
    }

    #[test]
    fn extracts_intent_id_from_payment_intent_events() {
        let event: WebhookEvent = serde_json::from_slice(BODY).unwrap();
        assert_eq!(event.payment_intent_id(), Some("pi_1"));

        let other = WebhookEvent {
            event_type: "charge.refunded".to_string(),
            ..event
        };
        assert_eq!(other.payment_intent_id(), None);
    }
}
