//! Hashing, base64url and Ed25519 primitives used by the message pipeline.
//!
//! Wire encoding is padded base64url everywhere (data, keys, signatures,
//! message ids). Message ids and election ids are produced by [`hash`].

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::error::HubError;

/// Hash a sequence of strings into a base64url SHA-256 digest.
///
/// Each part is fed as its decimal byte length followed by its bytes, so
/// `["ab", "c"]` and `["a", "bc"]` never collide.
pub fn hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.len().to_string().as_bytes());
        hasher.update(part.as_bytes());
    }
    encode(hasher.finalize())
}

pub fn encode(input: impl AsRef<[u8]>) -> String {
    URL_SAFE.encode(input)
}

pub fn decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE.decode(input)
}

/// Parse a base64url-encoded Ed25519 public key.
pub fn parse_public_key(input: &str) -> Result<VerifyingKey, HubError> {
    let bytes = decode(input)
        .map_err(|e| HubError::SignatureInvalid(format!("sender key is not base64url: {e}")))?;
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| HubError::SignatureInvalid(format!("sender key has {} bytes", bytes.len())))?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| HubError::SignatureInvalid(format!("invalid sender public key: {e}")))
}

/// Verify a base64url signature over `data` with `key`.
pub fn verify(key: &VerifyingKey, data: &[u8], signature: &str) -> Result<(), HubError> {
    let sig_bytes = decode(signature)
        .map_err(|e| HubError::SignatureInvalid(format!("signature is not base64url: {e}")))?;
    let signature = Signature::from_slice(&sig_bytes)
        .map_err(|e| HubError::SignatureInvalid(format!("invalid signature format: {e}")))?;
    key.verify(data, &signature)
        .map_err(|_| HubError::SignatureInvalid("signature verification failed".into()))
}

/// The server's own signing identity, used for server-originated messages.
pub struct ServerKeys {
    signing_key: SigningKey,
}

impl ServerKeys {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut rand::rngs::OsRng),
        }
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Load a key from its base64url-encoded 32-byte secret.
    pub fn from_secret(secret: &str) -> Result<Self, HubError> {
        let bytes = decode(secret.trim())
            .map_err(|e| HubError::SignatureInvalid(format!("server secret is not base64url: {e}")))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HubError::SignatureInvalid("server secret must be 32 bytes".into()))?;
        Ok(Self::from_signing_key(SigningKey::from_bytes(&bytes)))
    }

    pub fn secret(&self) -> String {
        encode(self.signing_key.to_bytes())
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_b64(&self) -> String {
        encode(self.public_key().as_bytes())
    }

    pub fn sign(&self, data: &[u8]) -> Signature {
        self.signing_key.sign(data)
    }
}

impl std::fmt::Debug for ServerKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerKeys")
            .field("public_key", &self.public_key_b64())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_length_prefixed() {
        assert_ne!(hash(&["ab", "c"]), hash(&["a", "bc"]));
        assert_eq!(hash(&["x", "y"]), hash(&["x", "y"]));
    }

    #[test]
    fn hash_output_is_padded_base64url() {
        let h = hash(&["election"]);
        assert_eq!(h.len(), 44);
        assert!(h.ends_with('='));
        assert_eq!(decode(&h).unwrap().len(), 32);
    }

    #[test]
    fn sign_and_verify() {
        let keys = ServerKeys::generate();
        let sig = keys.sign(b"payload");
        let pk = parse_public_key(&keys.public_key_b64()).unwrap();
        assert!(verify(&pk, b"payload", &encode(sig.to_bytes())).is_ok());
        assert!(verify(&pk, b"tampered", &encode(sig.to_bytes())).is_err());
    }

    #[test]
    fn secret_roundtrip_keeps_identity() {
        let keys = ServerKeys::generate();
        let restored = ServerKeys::from_secret(&keys.secret()).unwrap();
        assert_eq!(keys.public_key(), restored.public_key());
    }

    #[test]
    fn short_key_rejected() {
        let err = parse_public_key(&encode([1u8; 8])).unwrap_err();
        assert_eq!(err.code(), -4);
    }
}
