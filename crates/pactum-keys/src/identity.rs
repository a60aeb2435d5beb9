//! Identity key generation and serialization.
//!
//! Each device has one long-term Curve25519 identity key pair and one
//! registration id, generated on first use and persisted for the lifetime of
//! the install.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use libsignal_protocol::{IdentityKey, IdentityKeyPair, KeyPair, SignalProtocolError};
use rand::rngs::OsRng;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::KeyError;

/// Registration ids are 14-bit, never zero.
pub const MAX_REGISTRATION_ID: u32 = 0x3FFF;

/// A serializable wrapper around libsignal's IdentityKeyPair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct IdentityKeys {
    /// 33-byte serialized Curve25519 public key (type prefix + key).
    pub public_key: Vec<u8>,
    /// 32-byte Curve25519 private key.
    pub private_key: Vec<u8>,
}

impl IdentityKeys {
    /// Generate a fresh identity key pair.
    pub fn generate() -> Result<Self, KeyError> {
        ensure_entropy()?;
        let pair = IdentityKeyPair::generate(&mut OsRng);
        Ok(Self::from_identity_key_pair(&pair))
    }

    /// Convert to libsignal's IdentityKeyPair.
    pub fn to_identity_key_pair(&self) -> Result<IdentityKeyPair, SignalProtocolError> {
        let key_pair = KeyPair::from_public_and_private(&self.public_key, &self.private_key)?;
        Ok(IdentityKeyPair::new(
            IdentityKey::new(key_pair.public_key),
            key_pair.private_key,
        ))
    }

    /// Create from a libsignal IdentityKeyPair.
    pub fn from_identity_key_pair(pair: &IdentityKeyPair) -> Self {
        Self {
            public_key: pair.public_key().serialize().to_vec(),
            private_key: pair.private_key().serialize().to_vec(),
        }
    }

    pub fn identity_key(&self) -> Result<IdentityKey, SignalProtocolError> {
        IdentityKey::decode(&self.public_key)
    }

    pub(crate) fn to_stored(&self) -> StoredIdentity {
        StoredIdentity {
            pub_key: BASE64.encode(&self.public_key),
            priv_key: Zeroizing::new(BASE64.encode(&self.private_key)),
        }
    }

    pub(crate) fn from_stored(stored: &StoredIdentity) -> Result<Self, base64::DecodeError> {
        Ok(Self {
            public_key: BASE64.decode(&stored.pub_key)?,
            private_key: BASE64.decode(stored.priv_key.as_bytes())?,
        })
    }
}

impl fmt::Debug for IdentityKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeys")
            .field("public_key", &hex::encode(&self.public_key))
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Persisted JSON shape `{pubKey, privKey}`, both base64.
#[derive(Serialize, Deserialize)]
pub(crate) struct StoredIdentity {
    #[serde(rename = "pubKey")]
    pub pub_key: String,
    #[serde(rename = "privKey")]
    pub priv_key: Zeroizing<String>,
}

/// Generate a registration id in `1..=MAX_REGISTRATION_ID`.
pub fn generate_registration_id() -> Result<u32, KeyError> {
    let mut raw = [0u8; 2];
    SystemRandom::new()
        .fill(&mut raw)
        .map_err(|_| KeyError::KeyGeneration("RNG failed".into()))?;
    Ok(u32::from(u16::from_be_bytes(raw)) % MAX_REGISTRATION_ID + 1)
}

/// libsignal's key generation panics on a failed RNG; probe the system
/// source first so the failure surfaces as an error instead.
pub(crate) fn ensure_entropy() -> Result<(), KeyError> {
    let mut probe = [0u8; 16];
    SystemRandom::new()
        .fill(&mut probe)
        .map_err(|_| KeyError::KeyGeneration("entropy source unavailable".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_and_roundtrip() {
        let keys = IdentityKeys::generate().unwrap();
        let pair = keys.to_identity_key_pair().unwrap();
        let restored = IdentityKeys::from_identity_key_pair(&pair);
        assert_eq!(keys, restored);
    }

    #[test]
    fn stored_form_roundtrip() {
        let keys = IdentityKeys::generate().unwrap();
        let json = serde_json::to_string(&keys.to_stored()).unwrap();
        assert!(json.contains("\"pubKey\""));
        assert!(json.contains("\"privKey\""));
        let stored: StoredIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(IdentityKeys::from_stored(&stored).unwrap(), keys);
    }

    #[test]
    fn debug_redacts_private_key() {
        let keys = IdentityKeys::generate().unwrap();
        let dbg = format!("{keys:?}");
        assert!(dbg.contains("<redacted>"));
        assert!(!dbg.contains(&hex::encode(&keys.private_key)));
    }

    #[test]
    fn registration_id_in_range() {
        for _ in 0..256 {
            let id = generate_registration_id().unwrap();
            assert!((1..=MAX_REGISTRATION_ID).contains(&id));
        }
    }
}
