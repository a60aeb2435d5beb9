//! Encrypted persistence for protocol state.
//!
//! PBKDF2 + AES-256-GCM protects identity keys, session state and pre-keys
//! at rest. The password backup in [`crate::backup`] derives its key the
//! same way.

use std::num::NonZeroU32;

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use crate::error::KeyError;
use crate::stores::ProtocolStore;

const MAGIC: &[u8; 4] = b"PSIG"; // "Pactum SIGnal"
const VERSION: u8 = 0x01;
const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = 4 + 1 + SALT_LEN + NONCE_LEN + 4; // 53 bytes

/// Derive a 256-bit AES-GCM key from password and salt.
///
/// `None` only for a zero iteration count.
pub(crate) fn derive_key(password: &str, salt: &[u8], iterations: u32) -> Option<LessSafeKey> {
    let iterations = NonZeroU32::new(iterations)?;
    let mut key_bytes = Zeroizing::new([0u8; 32]);
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        password.as_bytes(),
        &mut key_bytes[..],
    );
    let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes[..]).ok()?;
    Some(LessSafeKey::new(unbound))
}

fn header_aad() -> [u8; 5] {
    let mut aad_bytes = [0u8; 5];
    aad_bytes[..4].copy_from_slice(MAGIC);
    aad_bytes[4] = VERSION;
    aad_bytes
}

/// Seal the protocol store into a binary blob.
///
/// Format: [PSIG magic(4)] [version(1)] [salt(32)] [nonce(12)] [length(4)] [encrypted payload + tag(16)]
pub fn seal_protocol_store(
    store: &ProtocolStore,
    password: &str,
    iterations: u32,
) -> Result<Vec<u8>, KeyError> {
    let rng = SystemRandom::new();

    let plaintext = postcard::to_allocvec(store)
        .map_err(|e| KeyError::Serialization(format!("protocol state: {e}")))?;

    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt)
        .map_err(|_| KeyError::KeyGeneration("RNG failed".into()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| KeyError::KeyGeneration("RNG failed".into()))?;

    let key = derive_key(password, &salt, iterations)
        .ok_or_else(|| KeyError::ProtocolState("invalid key derivation parameters".into()))?;
    let mut in_out = plaintext;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    key.seal_in_place_append_tag(nonce, Aad::from(header_aad()), &mut in_out)
        .map_err(|_| KeyError::ProtocolState("encryption failed".into()))?;

    let payload_len = in_out.len() as u32;
    let mut sealed = Vec::with_capacity(HEADER_LEN + in_out.len());
    sealed.extend_from_slice(MAGIC);
    sealed.push(VERSION);
    sealed.extend_from_slice(&salt);
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&payload_len.to_be_bytes());
    sealed.extend_from_slice(&in_out);

    Ok(sealed)
}

/// Open a blob produced by [`seal_protocol_store`].
pub fn open_protocol_store(
    sealed: &[u8],
    password: &str,
    iterations: u32,
) -> Result<ProtocolStore, KeyError> {
    if sealed.len() < HEADER_LEN {
        return Err(KeyError::ProtocolState("state too short".into()));
    }
    if &sealed[0..4] != MAGIC {
        return Err(KeyError::ProtocolState(
            "invalid format (expected PSIG header)".into(),
        ));
    }
    if sealed[4] != VERSION {
        return Err(KeyError::ProtocolState("unsupported state version".into()));
    }

    let salt = &sealed[5..5 + SALT_LEN];

    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(&sealed[37..37 + NONCE_LEN]);

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&sealed[49..53]);
    let payload_len = u32::from_be_bytes(len_bytes) as usize;

    if sealed.len() < HEADER_LEN + payload_len {
        return Err(KeyError::ProtocolState("state truncated".into()));
    }

    let key = derive_key(password, salt, iterations)
        .ok_or_else(|| KeyError::ProtocolState("invalid key derivation parameters".into()))?;

    let mut ciphertext = Zeroizing::new(sealed[HEADER_LEN..HEADER_LEN + payload_len].to_vec());
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let plaintext = key
        .open_in_place(nonce, Aad::from(header_aad()), &mut ciphertext[..])
        .map_err(|_| KeyError::ProtocolState("incorrect password or corrupted state".into()))?;

    postcard::from_bytes(plaintext)
        .map_err(|e| KeyError::ProtocolState(format!("deserialization failed: {e}")))
}

/// Check if data starts with a valid PSIG header.
pub fn has_valid_header(sealed: &[u8]) -> bool {
    sealed.len() >= HEADER_LEN && &sealed[0..4] == MAGIC && sealed[4] == VERSION
}
