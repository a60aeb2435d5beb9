use thiserror::Error;

use crate::storage::StorageError;

/// Every failure the key-lifecycle layer surfaces to its callers.
///
/// An absent identity or registration id is not an error: the `load_*`
/// operations return `Ok(None)` for that.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("local identity is not provisioned")]
    NotProvisioned,

    #[error("identity key pair does not match the provisioned identity")]
    IdentityMismatch,

    #[error("session establishment with {peer} failed: {reason}")]
    SessionEstablishment { peer: String, reason: String },

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("message from {sender} could not be verified: {reason}")]
    Decryption { sender: String, reason: String },

    #[error("unsupported backup version: {0}")]
    UnsupportedBackupVersion(u32),

    /// Wrong password and corrupted data are indistinguishable.
    #[error("backup could not be restored")]
    BackupRestore,

    #[error("protocol state could not be restored: {0}")]
    ProtocolState(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl KeyError {
    pub(crate) fn session(peer: &str, reason: impl ToString) -> Self {
        KeyError::SessionEstablishment {
            peer: peer.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn decryption(sender: &str, reason: impl ToString) -> Self {
        KeyError::Decryption {
            sender: sender.to_string(),
            reason: reason.to_string(),
        }
    }
}
