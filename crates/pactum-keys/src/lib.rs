//! Pactum key lifecycle: Signal Protocol identity, pre-keys and sessions.
//!
//! This crate provides:
//! - Identity key and registration id provisioning (Curve25519 via libsignal)
//! - Pre-key and signed pre-key generation, publishable bundles
//! - Pairwise session establishment (X3DH + Double Ratchet)
//! - Password-protected identity backups and sealed protocol state
//! - Identity fingerprints for out-of-band verification
//!
//! [`KeyManager`] is the entry point; everything else is exposed for callers
//! that need the individual pieces.

pub mod backup;
pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod identity;
pub mod manager;
pub mod message;
pub mod persistence;
pub mod prekey;
pub mod session;
pub mod storage;
pub mod stores;

pub use config::KeyManagerConfig;
pub use error::KeyError;
pub use fingerprint::{fingerprint, fingerprints_match};
pub use identity::IdentityKeys;
pub use manager::{KeyManager, LocalIdentity};
pub use message::EncryptedMessage;
pub use prekey::{
    PreKey, PreKeyBundle, PublicPreKey, PublicSignedPreKey, SignedPreKey, StoredBundle,
};
pub use session::{Session, SessionState};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError};
