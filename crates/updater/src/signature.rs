use crate::error::{Result, UpdaterError};
use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::{Signature, VerifyingKey};
use std::convert::TryInto;

/// Verifies detached Ed25519 signatures against a single trusted key.
///
/// The key is the only trust anchor of the update pipeline: there is no
/// rotation, revocation or certificate chain.
#[derive(Clone, Debug)]
pub struct SignatureVerifier {
    key: VerifyingKey,
}

impl SignatureVerifier {
    /// Create a verifier trusting `key`.
    pub fn new(key: VerifyingKey) -> Self {
        Self { key }
    }

    /// Create a verifier from a base64 encoded 32 byte public key.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let raw = decode_base64(encoded).ok_or_else(|| {
            UpdaterError::validation("public key is not valid base64")
        })?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| UpdaterError::validation("public key must be 32 bytes"))?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|err| UpdaterError::validation(format!("invalid public key: {err}")))?;
        Ok(Self::new(key))
    }

    /// The trusted key.
    pub fn key(&self) -> &VerifyingKey {
        &self.key
    }

    /// Verify `signature_base64` over `message`.
    ///
    /// Never fails loudly: undecodable input and mismatches both yield `false`.
    pub fn verify(&self, message: &[u8], signature_base64: &str) -> bool {
        let Some(raw) = decode_base64(signature_base64) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&raw) else {
            return false;
        };
        self.key.verify_strict(message, &signature).is_ok()
    }
}

fn decode_base64(input: &str) -> Option<Vec<u8>> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    general_purpose::STANDARD.decode(cleaned.as_bytes()).ok()
}
