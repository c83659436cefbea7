//! Mailgun webhook signing and event decoding.
//!
//! Mailgun signs each webhook with HMAC-SHA256 over `timestamp || token`,
//! keyed by the account's private API key, and sends the hex digest in the
//! `signature` block of the body.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

use crate::models::{Signature, VerifiedEvent};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("signing key is empty")]
    EmptyKey,
    #[error("signature is not valid hex: {0}")]
    MalformedDigest(#[from] hex::FromHexError),
}

#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("event data has no event type")]
    MissingEventType,
    #[error("invalid {event} event: {source}")]
    InvalidEvent {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Checks that a webhook signature block was produced by the provider.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, signature: &Signature) -> Result<bool, VerifyError>;
}

#[derive(Clone)]
pub struct MailgunVerifier {
    domain: String,
    api_key: String,
}

impl MailgunVerifier {
    pub fn new(domain: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            api_key: api_key.into(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl SignatureVerifier for MailgunVerifier {
    fn verify(&self, signature: &Signature) -> Result<bool, VerifyError> {
        let provided = hex::decode(signature.signature.trim())?;
        let mac = keyed_mac(&self.api_key, &signature.timestamp, &signature.token)?;
        // verify_slice compares in constant time and rejects length mismatches.
        Ok(mac.verify_slice(&provided).is_ok())
    }
}

fn keyed_mac(api_key: &str, timestamp: &str, token: &str) -> Result<HmacSha256, VerifyError> {
    if api_key.is_empty() {
        return Err(VerifyError::EmptyKey);
    }
    let mut mac =
        HmacSha256::new_from_slice(api_key.as_bytes()).map_err(|_| VerifyError::EmptyKey)?;
    mac.update(timestamp.as_bytes());
    mac.update(token.as_bytes());
    Ok(mac)
}

/// Hex digest Mailgun would send for the given timestamp and token.
pub fn sign(api_key: &str, timestamp: &str, token: &str) -> Result<String, VerifyError> {
    let mac = keyed_mac(api_key, timestamp, token)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Decodes `event-data` into a typed event, keyed by its `event` field.
///
/// Event types this bridge does not map come back as
/// [`VerifiedEvent::Unsupported`] rather than an error.
pub fn parse_event(data: Value) -> Result<VerifiedEvent, EventParseError> {
    let name = data
        .get("event")
        .and_then(Value::as_str)
        .ok_or(EventParseError::MissingEventType)?
        .to_string();

    let invalid = |source: serde_json::Error| EventParseError::InvalidEvent {
        event: name.clone(),
        source,
    };

    let event = match name.as_str() {
        "delivered" => VerifiedEvent::Delivered(serde_json::from_value(data).map_err(invalid)?),
        "opened" => VerifiedEvent::Opened(serde_json::from_value(data).map_err(invalid)?),
        "clicked" => VerifiedEvent::Clicked(serde_json::from_value(data).map_err(invalid)?),
        _ => VerifiedEvent::Unsupported { event: name.clone() },
    };
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const KEY: &str = "key-3ax6xnjp29jd6fds4gc373sgvjxteol0";

    fn signed(timestamp: &str, token: &str) -> Signature {
        Signature {
            timestamp: timestamp.to_string(),
            token: token.to_string(),
            signature: sign(KEY, timestamp, token).unwrap(),
        }
    }

    #[test]
    fn accepts_matching_signature() {
        let verifier = MailgunVerifier::new("mg.example.com", KEY);
        let signature = signed("1529006854", "a8ce0edb2dd8301dee6c2405235584e45aa91d1e9f979f3de0");
        assert!(verifier.verify(&signature).unwrap());
    }

    #[test]
    fn rejects_tampered_fields() {
        let verifier = MailgunVerifier::new("mg.example.com", KEY);

        let mut signature = signed("1529006854", "token");
        signature.timestamp = "1529006855".to_string();
        assert!(!verifier.verify(&signature).unwrap());

        let mut signature = signed("1529006854", "token");
        signature.token = "other".to_string();
        assert!(!verifier.verify(&signature).unwrap());

        let other_key = MailgunVerifier::new("mg.example.com", "key-other");
        assert!(!other_key.verify(&signed("1529006854", "token")).unwrap());
    }

    #[test]
    fn short_digest_is_rejected_not_errored() {
        let verifier = MailgunVerifier::new("mg.example.com", KEY);
        let mut signature = signed("1529006854", "token");
        signature.signature.truncate(32);
        assert!(!verifier.verify(&signature).unwrap());
    }

    #[test]
    fn non_hex_digest_is_an_error() {
        let verifier = MailgunVerifier::new("mg.example.com", KEY);
        let mut signature = signed("1529006854", "token");
        signature.signature = "not-hex".to_string();
        assert!(matches!(
            verifier.verify(&signature),
            Err(VerifyError::MalformedDigest(_))
        ));
    }

    #[test]
    fn empty_key_is_an_error() {
        let verifier = MailgunVerifier::new("mg.example.com", "");
        let signature = Signature {
            timestamp: "1".to_string(),
            token: "t".to_string(),
            signature: "00".to_string(),
        };
        assert!(matches!(
            verifier.verify(&signature),
            Err(VerifyError::EmptyKey)
        ));
    }

    #[test]
    fn parses_clicked_event() {
        let event = parse_event(json!({
            "event": "clicked",
            "id": "evt-9",
            "timestamp": 1_529_006_854.5,
            "recipient": "x@y.com",
            "tags": ["welcome"],
            "url": "https://example.com/a",
            "ip": "50.56.129.169",
            "geolocation": { "country": "US", "region": "CA", "city": "San Francisco" },
            "client-info": { "client-name": "Chrome", "device-type": "desktop" },
            "user-variables": { "user_id": "u1" },
        }))
        .unwrap();

        let VerifiedEvent::Clicked(clicked) = event else {
            panic!("expected clicked event");
        };
        assert_eq!(clicked.url, "https://example.com/a");
        assert_eq!(clicked.engagement.ip, "50.56.129.169");
        assert_eq!(clicked.engagement.geolocation.city, "San Francisco");
        assert_eq!(clicked.engagement.client_info.client_name, "Chrome");
        assert_eq!(clicked.common.tags, vec!["welcome".to_string()]);
        assert_eq!(clicked.common.user_variables.string_var("user_id"), Some("u1"));
    }

    #[test]
    fn unknown_event_type_is_unsupported() {
        let event = parse_event(json!({ "event": "failed", "timestamp": 1 })).unwrap();
        assert!(matches!(event, VerifiedEvent::Unsupported { ref event } if event == "failed"));
    }

    #[test]
    fn malformed_event_data_is_an_error() {
        assert!(matches!(
            parse_event(json!({ "id": "no-type" })),
            Err(EventParseError::MissingEventType)
        ));
        assert!(matches!(
            parse_event(Value::Null),
            Err(EventParseError::MissingEventType)
        ));
        assert!(matches!(
            parse_event(json!({ "event": "delivered", "timestamp": "yesterday" })),
            Err(EventParseError::InvalidEvent { .. })
        ));
        assert!(matches!(
            parse_event(json!({ "event": "opened", "timestamp": 1, "tags": "welcome" })),
            Err(EventParseError::InvalidEvent { .. })
        ));
    }
}
