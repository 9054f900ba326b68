// Copyright (c) 2024 Botho Foundation

//! Ed25519 key handling for chain owners.
//!
//! Keys travel as lowercase hex strings: 32-byte seeds for private keys and
//! 32-byte compressed points for public keys. Signatures are 64-byte hex.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::block::BlockError;

/// Signing and verifying halves of a node identity.
#[derive(Clone)]
pub struct NodeKeys {
    signing: SigningKey,
    verifying: VerifyingKey,
}

impl NodeKeys {
    /// Generate a fresh keypair using the OS RNG.
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        let verifying = signing.verifying_key();
        Self { signing, verifying }
    }

    /// Rebuild a keypair from a hex-encoded 32-byte seed.
    pub fn from_private_hex(private_hex: &str) -> Result<Self, BlockError> {
        if private_hex.is_empty() {
            return Err(BlockError::Signing);
        }
        let raw = hex::decode(private_hex).map_err(|e| BlockError::InvalidKey(e.to_string()))?;
        let seed: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| BlockError::InvalidKey(format!("expected 32 bytes, got {}", raw.len())))?;
        let signing = SigningKey::from_bytes(&seed);
        let verifying = signing.verifying_key();
        Ok(Self { signing, verifying })
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying
    }

    /// Hex of the private seed (for persistence only).
    pub fn private_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    pub fn public_hex(&self) -> String {
        hex::encode(self.verifying.to_bytes())
    }

    /// Sign arbitrary bytes, returning the signature as hex.
    pub fn sign_hex(&self, msg: &[u8]) -> String {
        sign_hex(&self.signing, msg)
    }

    /// Persistable form of this keypair.
    pub fn to_document(&self) -> KeyDocument {
        KeyDocument {
            public_key: self.public_hex(),
            private_key: self.private_hex(),
        }
    }
}

impl std::fmt::Debug for NodeKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKeys")
            .field("public_key", &self.public_hex())
            .finish_non_exhaustive()
    }
}

/// Stored shape of a keypair in the `keys` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyDocument {
    pub public_key: String,
    pub private_key: String,
}

impl TryFrom<KeyDocument> for NodeKeys {
    type Error = BlockError;

    fn try_from(doc: KeyDocument) -> Result<Self, Self::Error> {
        let keys = NodeKeys::from_private_hex(&doc.private_key)?;
        if !doc.public_key.is_empty() && keys.public_hex() != doc.public_key.to_lowercase() {
            return Err(BlockError::InvalidKey(
                "public key does not match private key".to_string(),
            ));
        }
        Ok(keys)
    }
}

/// Parse a hex-encoded public key.
pub fn parse_public_hex(public_hex: &str) -> Result<VerifyingKey, BlockError> {
    let raw = hex::decode(public_hex).map_err(|e| BlockError::InvalidKey(e.to_string()))?;
    let bytes: [u8; 32] = raw
        .as_slice()
        .try_into()
        .map_err(|_| BlockError::InvalidKey(format!("expected 32 bytes, got {}", raw.len())))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| BlockError::InvalidKey(e.to_string()))
}

/// Sign arbitrary bytes with the provided signing key.
pub fn sign_hex(signing: &SigningKey, msg: &[u8]) -> String {
    hex::encode(signing.sign(msg).to_bytes())
}

/// Verify a hex signature over `msg`. Malformed signatures verify as false.
pub fn verify_hex(verifying: &VerifyingKey, msg: &[u8], signature_hex: &str) -> bool {
    let Ok(raw) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(bytes) = <[u8; 64]>::try_from(raw.as_slice()) else {
        return false;
    };
    let signature = Signature::from_bytes(&bytes);
    verifying.verify(msg, &signature).is_ok()
}
