use std::sync::Arc;

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub const HEADER_MESSAGE_ID: &str = "Twitch-Eventsub-Message-Id";
pub const HEADER_TIMESTAMP: &str = "Twitch-Eventsub-Message-Timestamp";
pub const HEADER_SIGNATURE: &str = "Twitch-Eventsub-Message-Signature";
pub const HEADER_MESSAGE_TYPE: &str = "Twitch-Eventsub-Message-Type";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Result of checking an inbound delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    /// `false` when the request carries none of the signature headers.
    pub applicable: bool,
    pub valid: bool,
}

impl Verification {
    pub const NOT_APPLICABLE: Self = Self {
        applicable: false,
        valid: false,
    };

    /// Applicable and valid.
    pub fn is_verified(self) -> bool {
        self.applicable && self.valid
    }
}

/// HMAC-SHA256 verifier for EventSub deliveries keyed by the shared webhook secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Arc<[u8]>,
}

impl SignatureVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
        }
    }

    /// Verifies `raw_body` exactly as received against the signature headers.
    pub fn verify(&self, headers: &HeaderMap, raw_body: &[u8]) -> Verification {
        let signature_headers = [HEADER_MESSAGE_ID, HEADER_TIMESTAMP, HEADER_SIGNATURE];
        if signature_headers
            .iter()
            .all(|name| !headers.contains_key(*name))
        {
            return Verification::NOT_APPLICABLE;
        }

        let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());
        let valid = match (
            header(HEADER_MESSAGE_ID),
            header(HEADER_TIMESTAMP),
            header(HEADER_SIGNATURE),
        ) {
            (Some(message_id), Some(timestamp), Some(signature)) => {
                self.matches(message_id, timestamp, raw_body, signature)
            }
            _ => false,
        };

        Verification {
            applicable: true,
            valid,
        }
    }

    fn matches(&self, message_id: &str, timestamp: &str, body: &[u8], provided: &str) -> bool {
        let Some(hex_part) = provided.strip_prefix(SIGNATURE_PREFIX) else {
            return false;
        };
        let Ok(provided_bytes) = hex::decode(hex_part) else {
            return false;
        };

        let Some(expected) = self.sign(message_id, timestamp, body) else {
            return false;
        };
        expected.as_slice().ct_eq(provided_bytes.as_slice()).into()
    }

    fn sign(&self, message_id: &str, timestamp: &str, body: &[u8]) -> Option<Vec<u8>> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret).ok()?;
        mac.update(message_id.as_bytes());
        mac.update(timestamp.as_bytes());
        mac.update(body);
        Some(mac.finalize().into_bytes().to_vec())
    }

    /// `sha256=<hex>` header value for the given delivery.
    #[cfg(test)]
    pub(crate) fn signature_header(
        &self,
        message_id: &str,
        timestamp: &str,
        body: &[u8],
    ) -> Option<String> {
        self.sign(message_id, timestamp, body)
            .map(|digest| format!("{SIGNATURE_PREFIX}{}", hex::encode(digest)))
    }
}
