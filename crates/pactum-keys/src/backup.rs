//! Password-protected export and import of the long-term identity.
//!
//! Container (JSON): `{"version": 1, "salt": b64, "iv": b64, "data": b64}`.
//! `data` is AES-256-GCM over the JSON payload
//! `{"identityKeyPair": {"pubKey", "privKey"}, "registrationId"}` under a
//! PBKDF2-HMAC-SHA256 key. Salt and nonce are fresh on every export.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ring::aead::{Aad, Nonce};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::KeyError;
use crate::identity::{IdentityKeys, StoredIdentity};
use crate::persistence::derive_key;

pub const BACKUP_VERSION: u32 = 1;

const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const AAD_PREFIX: &[u8] = b"pactum-backup";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBackup {
    pub version: u32,
    pub salt: String,
    pub iv: String,
    pub data: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupPayload {
    identity_key_pair: StoredIdentity,
    registration_id: u32,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

fn backup_aad(version: u32) -> Vec<u8> {
    let mut aad = AAD_PREFIX.to_vec();
    aad.push(version as u8);
    aad
}

pub fn create_key_backup(
    identity: &IdentityKeys,
    registration_id: u32,
    password: &str,
    iterations: u32,
) -> Result<String, KeyError> {
    let rng = SystemRandom::new();

    let payload = BackupPayload {
        identity_key_pair: identity.to_stored(),
        registration_id,
    };
    // Sealed in place, so the plaintext does not outlive this call.
    let mut in_out =
        serde_json::to_vec(&payload).map_err(|e| KeyError::Serialization(e.to_string()))?;

    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt)
        .map_err(|_| KeyError::KeyGeneration("RNG failed".into()))?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| KeyError::KeyGeneration("RNG failed".into()))?;

    let key = derive_key(password, &salt, iterations)
        .ok_or_else(|| KeyError::KeyGeneration("invalid key derivation parameters".into()))?;
    if key
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(backup_aad(BACKUP_VERSION)),
            &mut in_out,
        )
        .is_err()
    {
        in_out.zeroize();
        return Err(KeyError::Serialization("backup encryption failed".into()));
    }

    let container = KeyBackup {
        version: BACKUP_VERSION,
        salt: BASE64.encode(salt),
        iv: BASE64.encode(nonce_bytes),
        data: BASE64.encode(&in_out),
    };
    serde_json::to_string(&container).map_err(|e| KeyError::Serialization(e.to_string()))
}

/// Restore `(identity, registration_id)` from a backup string.
///
/// The version is checked before any key derivation. Every later failure is
/// reported as [`KeyError::BackupRestore`].
pub fn restore_key_from_backup(
    backup: &str,
    password: &str,
    iterations: u32,
) -> Result<(IdentityKeys, u32), KeyError> {
    let probe: VersionProbe = serde_json::from_str(backup).map_err(|_| KeyError::BackupRestore)?;
    if probe.version != BACKUP_VERSION {
        return Err(KeyError::UnsupportedBackupVersion(probe.version));
    }

    let container: KeyBackup =
        serde_json::from_str(backup).map_err(|_| KeyError::BackupRestore)?;
    let salt = BASE64
        .decode(&container.salt)
        .map_err(|_| KeyError::BackupRestore)?;
    let nonce_bytes: [u8; NONCE_LEN] = BASE64
        .decode(&container.iv)
        .map_err(|_| KeyError::BackupRestore)?
        .try_into()
        .map_err(|_| KeyError::BackupRestore)?;
    let mut data = BASE64
        .decode(&container.data)
        .map_err(|_| KeyError::BackupRestore)?;

    let key = derive_key(password, &salt, iterations).ok_or(KeyError::BackupRestore)?;
    let parsed = key
        .open_in_place(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(backup_aad(container.version)),
            &mut data,
        )
        .ok()
        .and_then(|plaintext| serde_json::from_slice::<BackupPayload>(plaintext).ok());
    data.zeroize();

    let payload = parsed.ok_or(KeyError::BackupRestore)?;
    let identity =
        IdentityKeys::from_stored(&payload.identity_key_pair).map_err(|_| KeyError::BackupRestore)?;
    Ok((identity, payload.registration_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITERATIONS: u32 = 1_000;

    #[test]
    fn roundtrip_is_bit_exact() {
        let identity = IdentityKeys::generate().unwrap();
        let backup = create_key_backup(&identity, 4321, "correct horse", ITERATIONS).unwrap();
        let (restored, registration_id) =
            restore_key_from_backup(&backup, "correct horse", ITERATIONS).unwrap();
        assert_eq!(restored.public_key, identity.public_key);
        assert_eq!(restored.private_key, identity.private_key);
        assert_eq!(registration_id, 4321);
    }

    #[test]
    fn wrong_password_is_generic_failure() {
        let identity = IdentityKeys::generate().unwrap();
        let backup = create_key_backup(&identity, 1, "right", ITERATIONS).unwrap();
        let err = restore_key_from_backup(&backup, "wrong", ITERATIONS).err().unwrap();
        assert!(matches!(err, KeyError::BackupRestore));
    }

    #[test]
    fn corrupted_data_is_same_failure() {
        let identity = IdentityKeys::generate().unwrap();
        let backup = create_key_backup(&identity, 1, "pw", ITERATIONS).unwrap();
        let mut container: KeyBackup = serde_json::from_str(&backup).unwrap();
        let mut data = BASE64.decode(&container.data).unwrap();
        data[0] ^= 0x01;
        container.data = BASE64.encode(data);
        let tampered = serde_json::to_string(&container).unwrap();
        let err = restore_key_from_backup(&tampered, "pw", ITERATIONS).err().unwrap();
        assert!(matches!(err, KeyError::BackupRestore));
    }

    #[test]
    fn salt_and_iv_are_fresh() {
        let identity = IdentityKeys::generate().unwrap();
        let a: KeyBackup =
            serde_json::from_str(&create_key_backup(&identity, 7, "pw", ITERATIONS).unwrap())
                .unwrap();
        let b: KeyBackup =
            serde_json::from_str(&create_key_backup(&identity, 7, "pw", ITERATIONS).unwrap())
                .unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn unknown_version_rejected_before_decryption() {
        // data is not even valid base64; the version check must come first
        let backup = r#"{"version": 2, "salt": "!", "iv": "!", "data": "!"}"#;
        let err = restore_key_from_backup(backup, "pw", ITERATIONS).err().unwrap();
        assert!(matches!(err, KeyError::UnsupportedBackupVersion(2)));
    }

    #[test]
    fn garbage_is_backup_restore_error() {
        for input in ["", "not json", r#"{"version": 1}"#, r#"{"version": 1, "salt": "AA==", "iv": "AA==", "data": "AA=="}"#] {
            let err = restore_key_from_backup(input, "pw", ITERATIONS).err().unwrap();
            assert!(matches!(err, KeyError::BackupRestore), "input {input:?}");
        }
    }

    #[test]
    fn container_shape() {
        let identity = IdentityKeys::generate().unwrap();
        let backup = create_key_backup(&identity, 7, "pw", ITERATIONS).unwrap();
        let json: serde_json::Value = serde_json::from_str(&backup).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(BASE64.decode(json["salt"].as_str().unwrap()).unwrap().len(), SALT_LEN);
        assert_eq!(BASE64.decode(json["iv"].as_str().unwrap()).unwrap().len(), NONCE_LEN);
    }
}
