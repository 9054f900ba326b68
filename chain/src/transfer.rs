// Copyright (c) 2024 Botho Foundation

//! Signed requests asking an issuer to move its asset between holders.

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

use crate::block::now_millis;
use crate::crypto::{self, NodeKeys};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub from: String,
    pub to: String,
    pub amount: i64,
    #[serde(default)]
    pub message: String,
    pub timestamp: u64,
    /// Issuer of the asset being moved. Absent in requests from older nodes,
    /// in which case `from` names the issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub signature: String,
}

/// The signed fields of a request.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedContent<'a> {
    from: &'a str,
    to: &'a str,
    amount: i64,
    message: &'a str,
    timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    issuer: Option<&'a str>,
}

impl TransferRequest {
    /// Build and sign a request from `keys`' owner.
    pub fn new_signed(
        keys: &NodeKeys,
        from: &str,
        to: &str,
        amount: i64,
        message: &str,
        issuer: Option<&str>,
    ) -> Self {
        let mut request = Self {
            from: from.to_string(),
            to: to.to_string(),
            amount,
            message: message.to_string(),
            timestamp: now_millis(),
            issuer: issuer.map(str::to_string),
            public_key: keys.public_hex(),
            signature: String::new(),
        };
        request.sign(keys.signing_key());
        request
    }

    /// The user whose node must process this request.
    pub fn target_user(&self) -> &str {
        self.issuer.as_deref().unwrap_or(&self.from)
    }

    fn signing_bytes(&self) -> Vec<u8> {
        let content = SignedContent {
            from: &self.from,
            to: &self.to,
            amount: self.amount,
            message: &self.message,
            timestamp: self.timestamp,
            issuer: self.issuer.as_deref(),
        };
        serde_json::to_vec(&content).unwrap_or_default()
    }

    pub fn sign(&mut self, signing_key: &SigningKey) {
        self.signature = crypto::sign_hex(signing_key, &self.signing_bytes());
    }

    /// Check the signature against the embedded public key.
    pub fn verify(&self) -> bool {
        if self.signature.is_empty() {
            return false;
        }
        match crypto::parse_public_hex(&self.public_key) {
            Ok(key) => crypto::verify_hex(&key, &self.signing_bytes(), &self.signature),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_request_verifies() {
        let keys = NodeKeys::generate();
        let request = TransferRequest::new_signed(&keys, "alice", "bob", 10, "hi", Some("issuer"));
        assert!(request.verify());
        assert_eq!(request.target_user(), "issuer");
    }

    #[test]
    fn test_tampered_request_fails() {
        let keys = NodeKeys::generate();
        let mut request = TransferRequest::new_signed(&keys, "alice", "bob", 10, "", None);
        request.amount = 10_000;
        assert!(!request.verify());
    }

    #[test]
    fn test_target_falls_back_to_from() {
        let keys = NodeKeys::generate();
        let request = TransferRequest::new_signed(&keys, "alice", "bob", 1, "", None);
        assert_eq!(request.target_user(), "alice");
    }

    #[test]
    fn test_wire_shape() {
        let keys = NodeKeys::generate();
        let request = TransferRequest::new_signed(&keys, "alice", "bob", 1, "", None);
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("issuer").is_none());
        assert_eq!(value["publicKey"], keys.public_hex());

        let parsed: TransferRequest = serde_json::from_value(value).unwrap();
        assert!(parsed.verify());
    }
}
