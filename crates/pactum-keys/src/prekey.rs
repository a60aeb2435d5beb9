//! Pre-key and signed pre-key generation, and the publishable bundle.
//!
//! Pre-keys are one-time-use Curve25519 key pairs used in the X3DH
//! key agreement protocol. Signed pre-keys are medium-term keys
//! signed by the identity key.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use libsignal_protocol::{
    IdentityKey, KeyPair, PreKeyBundle as SignalPreKeyBundle, PreKeyId, PreKeyRecord, PublicKey,
    SignalProtocolError, SignedPreKeyId, SignedPreKeyRecord, Timestamp,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::KeyError;
use crate::identity::{ensure_entropy, IdentityKeys};

/// A one-time pre-key with its private half.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PreKey {
    pub key_id: u32,
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
}

impl PreKey {
    pub fn to_record(&self) -> Result<PreKeyRecord, SignalProtocolError> {
        let key_pair = KeyPair::from_public_and_private(&self.public_key, &self.private_key)?;
        Ok(PreKeyRecord::new(PreKeyId::from(self.key_id), &key_pair))
    }

    pub fn public(&self) -> PublicPreKey {
        PublicPreKey {
            key_id: self.key_id,
            public_key: self.public_key.clone(),
        }
    }
}

/// A signed pre-key with its private half and the identity signature over
/// its serialized public key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SignedPreKey {
    pub key_id: u32,
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
    pub signature: Vec<u8>,
    /// Creation time, epoch milliseconds.
    pub timestamp: u64,
}

impl SignedPreKey {
    pub fn to_record(&self) -> Result<SignedPreKeyRecord, SignalProtocolError> {
        let key_pair = KeyPair::from_public_and_private(&self.public_key, &self.private_key)?;
        Ok(SignedPreKeyRecord::new(
            SignedPreKeyId::from(self.key_id),
            Timestamp::from_epoch_millis(self.timestamp),
            &key_pair,
            &self.signature,
        ))
    }

    pub fn public(&self) -> PublicSignedPreKey {
        PublicSignedPreKey {
            key_id: self.key_id,
            public_key: self.public_key.clone(),
            signature: self.signature.clone(),
        }
    }
}

/// A one-time pre-key's public portion for publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicPreKey {
    pub key_id: u32,
    pub public_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicSignedPreKey {
    pub key_id: u32,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Everything a peer needs to open a session while this device is offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyBundle {
    pub identity_key: Vec<u8>,
    pub registration_id: u32,
    pub device_id: u32,
    pub pre_keys: Vec<PublicPreKey>,
    pub signed_pre_key: PublicSignedPreKey,
}

impl PreKeyBundle {
    pub fn assemble(
        identity: &IdentityKeys,
        registration_id: u32,
        device_id: u32,
        pre_keys: &[PreKey],
        signed_pre_key: &SignedPreKey,
    ) -> Self {
        Self {
            identity_key: identity.public_key.clone(),
            registration_id,
            device_id,
            pre_keys: pre_keys.iter().map(PreKey::public).collect(),
            signed_pre_key: signed_pre_key.public(),
        }
    }

    /// The libsignal bundle for session building. The first listed one-time
    /// pre-key is offered; a bundle without any falls back to the signed
    /// pre-key alone.
    pub(crate) fn to_signal_bundle(&self) -> Result<SignalPreKeyBundle, SignalProtocolError> {
        let identity_key = IdentityKey::decode(&self.identity_key)?;
        let signed_pre_key = PublicKey::deserialize(&self.signed_pre_key.public_key)?;
        let pre_key = match self.pre_keys.first() {
            Some(pk) => Some((
                PreKeyId::from(pk.key_id),
                PublicKey::deserialize(&pk.public_key)?,
            )),
            None => None,
        };

        SignalPreKeyBundle::new(
            self.registration_id,
            self.device_id.into(),
            pre_key,
            SignedPreKeyId::from(self.signed_pre_key.key_id),
            signed_pre_key,
            self.signed_pre_key.signature.clone(),
            identity_key,
        )
    }

    /// The base64 JSON form that is persisted and published.
    pub fn to_stored(&self) -> StoredBundle {
        StoredBundle {
            identity_key: BASE64.encode(&self.identity_key),
            registration_id: self.registration_id,
            device_id: self.device_id,
            pre_keys: self
                .pre_keys
                .iter()
                .map(|pk| StoredPreKey {
                    key_id: pk.key_id,
                    public_key: BASE64.encode(&pk.public_key),
                })
                .collect(),
            signed_pre_key: StoredSignedPreKey {
                key_id: self.signed_pre_key.key_id,
                public_key: BASE64.encode(&self.signed_pre_key.public_key),
                signature: BASE64.encode(&self.signed_pre_key.signature),
            },
        }
    }

    pub fn from_stored(stored: &StoredBundle) -> Result<Self, base64::DecodeError> {
        Ok(Self {
            identity_key: BASE64.decode(&stored.identity_key)?,
            registration_id: stored.registration_id,
            device_id: stored.device_id,
            pre_keys: stored
                .pre_keys
                .iter()
                .map(|pk| {
                    Ok(PublicPreKey {
                        key_id: pk.key_id,
                        public_key: BASE64.decode(&pk.public_key)?,
                    })
                })
                .collect::<Result<_, base64::DecodeError>>()?,
            signed_pre_key: PublicSignedPreKey {
                key_id: stored.signed_pre_key.key_id,
                public_key: BASE64.decode(&stored.signed_pre_key.public_key)?,
                signature: BASE64.decode(&stored.signed_pre_key.signature)?,
            },
        })
    }
}

/// JSON shape of a bundle, with keys and signature in base64.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBundle {
    pub identity_key: String,
    pub registration_id: u32,
    /// Bundles written before the device id was recorded came from device 1.
    #[serde(default = "first_device")]
    pub device_id: u32,
    pub pre_keys: Vec<StoredPreKey>,
    pub signed_pre_key: StoredSignedPreKey,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPreKey {
    pub key_id: u32,
    pub public_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSignedPreKey {
    pub key_id: u32,
    pub public_key: String,
    pub signature: String,
}

fn first_device() -> u32 {
    1
}

/// Generate `count` one-time pre-keys with ids `start_id..start_id + count`.
///
/// The caller picks a `start_id` that does not overlap pre-keys still
/// published; nothing here tracks earlier batches.
pub fn generate_pre_keys(start_id: u32, count: u32) -> Result<Vec<PreKey>, KeyError> {
    start_id.checked_add(count).ok_or_else(|| {
        KeyError::KeyGeneration(format!(
            "pre-key ids {start_id}+{count} overflow the id space"
        ))
    })?;
    ensure_entropy()?;

    let pre_keys = (start_id..start_id + count)
        .map(|key_id| {
            let key_pair = KeyPair::generate(&mut OsRng);
            PreKey {
                key_id,
                public_key: key_pair.public_key.serialize().to_vec(),
                private_key: key_pair.private_key.serialize().to_vec(),
            }
        })
        .collect();
    Ok(pre_keys)
}

/// Generate a signed pre-key, signing its public key with `identity`.
pub fn generate_signed_pre_key(
    identity: &IdentityKeys,
    key_id: u32,
    timestamp: u64,
) -> Result<SignedPreKey, KeyError> {
    let identity_pair = identity
        .to_identity_key_pair()
        .map_err(|e| KeyError::KeyGeneration(format!("invalid identity key pair: {e}")))?;
    ensure_entropy()?;

    let key_pair = KeyPair::generate(&mut OsRng);
    let public_key = key_pair.public_key.serialize().to_vec();
    let signature = identity_pair
        .private_key()
        .calculate_signature(&public_key, &mut OsRng)
        .map_err(|e| KeyError::KeyGeneration(format!("signing failed: {e}")))?;

    Ok(SignedPreKey {
        key_id,
        public_key,
        private_key: key_pair.private_key.serialize().to_vec(),
        signature: signature.to_vec(),
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_key_ids_are_contiguous() {
        let keys = generate_pre_keys(7, 5).unwrap();
        let ids: Vec<u32> = keys.iter().map(|k| k.key_id).collect();
        assert_eq!(ids, vec![7, 8, 9, 10, 11]);
        assert!(keys.iter().all(|k| k.to_record().is_ok()));
    }

    #[test]
    fn pre_key_id_overflow_is_rejected() {
        let err = generate_pre_keys(u32::MAX - 1, 5).err().unwrap();
        assert!(matches!(err, KeyError::KeyGeneration(_)));
    }

    #[test]
    fn zero_count_is_empty() {
        assert!(generate_pre_keys(1, 0).unwrap().is_empty());
    }

    #[test]
    fn signed_pre_key_builds_record() {
        let identity = IdentityKeys::generate().unwrap();
        let signed = generate_signed_pre_key(&identity, 1, 1_700_000_000_000).unwrap();
        assert_eq!(signed.key_id, 1);
        assert_eq!(signed.signature.len(), 64);
        assert!(signed.to_record().is_ok());
    }

    #[test]
    fn bundle_stored_form_roundtrip() {
        let identity = IdentityKeys::generate().unwrap();
        let pre_keys = generate_pre_keys(1, 3).unwrap();
        let signed = generate_signed_pre_key(&identity, 1, 0).unwrap();
        let bundle = PreKeyBundle::assemble(&identity, 42, 3, &pre_keys, &signed);

        let json = serde_json::to_value(bundle.to_stored()).unwrap();
        assert_eq!(json["registrationId"], 42);
        assert_eq!(json["deviceId"], 3);
        assert_eq!(json["preKeys"][2]["keyId"], 3);
        assert!(json["signedPreKey"]["signature"].is_string());

        let stored: StoredBundle = serde_json::from_value(json).unwrap();
        assert_eq!(PreKeyBundle::from_stored(&stored).unwrap(), bundle);
        assert!(bundle.to_signal_bundle().is_ok());
    }

    #[test]
    fn stored_bundle_without_device_id_is_first_device() {
        let identity = IdentityKeys::generate().unwrap();
        let signed = generate_signed_pre_key(&identity, 1, 0).unwrap();
        let bundle = PreKeyBundle::assemble(&identity, 42, 1, &[], &signed);

        let mut json = serde_json::to_value(bundle.to_stored()).unwrap();
        json.as_object_mut().unwrap().remove("deviceId");
        let stored: StoredBundle = serde_json::from_value(json).unwrap();
        assert_eq!(PreKeyBundle::from_stored(&stored).unwrap().device_id, 1);
    }
}
