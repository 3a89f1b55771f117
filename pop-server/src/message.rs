//! The signed message envelope and its authenticity checks.

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::HubError;

/// A witness co-signature attached to an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessSignature {
    pub witness: String,
    pub signature: String,
}

/// Signed, hashed wrapper around a base64url JSON payload.
///
/// Immutable once admitted: `message_id` is `hash(data, signature)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub data: String,
    pub sender: String,
    pub signature: String,
    pub message_id: String,
    #[serde(default)]
    pub witness_signatures: Vec<WitnessSignature>,
}

impl Message {
    /// Build an envelope for `payload` signed by `key`.
    pub fn sign(payload: &[u8], key: &SigningKey) -> Self {
        let data = crypto::encode(payload);
        let signature = crypto::encode(key.sign(payload).to_bytes());
        Self {
            message_id: crypto::hash(&[&data, &signature]),
            sender: crypto::encode(key.verifying_key().as_bytes()),
            data,
            signature,
            witness_signatures: Vec::new(),
        }
    }

    /// Decode the base64url `data` field.
    pub fn decode_data(&self) -> Result<Vec<u8>, HubError> {
        crypto::decode(&self.data).map_err(|e| HubError::DecodeError(e.to_string()))
    }

    /// Deserialize the payload into `T`.
    pub fn unmarshal_data<T: serde::de::DeserializeOwned>(&self) -> Result<T, HubError> {
        let buf = self.decode_data()?;
        serde_json::from_slice(&buf).map_err(|e| HubError::DecodeError(e.to_string()))
    }

    /// The id this envelope must carry.
    pub fn expected_id(&self) -> String {
        crypto::hash(&[&self.data, &self.signature])
    }

    /// Check `message_id` and the sender's signature over `data`.
    ///
    /// `data` is the already-decoded payload. Returns the sender's key.
    pub fn verify(&self, data: &[u8]) -> Result<VerifyingKey, HubError> {
        let expected = self.expected_id();
        if expected != self.message_id {
            return Err(HubError::InvalidMessageId {
                expected,
                got: self.message_id.clone(),
            });
        }
        let sender = crypto::parse_public_key(&self.sender)?;
        crypto::verify(&sender, data, &self.signature)?;
        Ok(sender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn signed_message_verifies() {
        let key = SigningKey::generate(&mut OsRng);
        let msg = Message::sign(br#"{"object":"election","action":"open"}"#, &key);
        let data = msg.decode_data().unwrap();
        let sender = msg.verify(&data).unwrap();
        assert_eq!(sender, key.verifying_key());
    }

    #[test]
    fn wrong_message_id_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let mut msg = Message::sign(b"{}", &key);
        msg.message_id = crypto::hash(&["something", "else"]);
        let data = msg.decode_data().unwrap();
        assert!(matches!(msg.verify(&data), Err(HubError::InvalidMessageId { .. })));
    }

    #[test]
    fn foreign_sender_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let mut msg = Message::sign(b"{}", &key);
        msg.sender = crypto::encode(other.verifying_key().as_bytes());
        let data = msg.decode_data().unwrap();
        assert!(matches!(msg.verify(&data), Err(HubError::SignatureInvalid(_))));
    }

    #[test]
    fn malformed_data_is_decode_error() {
        let key = SigningKey::generate(&mut OsRng);
        let mut msg = Message::sign(b"{}", &key);
        msg.data = "%%% not base64 %%%".into();
        assert!(matches!(msg.decode_data(), Err(HubError::DecodeError(_))));
    }

    #[test]
    fn witness_signatures_default_to_empty() {
        let json = r#"{"data":"e30=","sender":"s","signature":"g","message_id":"m"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert!(msg.witness_signatures.is_empty());
    }
}
