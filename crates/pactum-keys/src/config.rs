//! Settings for [`crate::KeyManager`], including the storage key layout.

use serde::{Deserialize, Serialize};

/// Key-lifecycle configuration, built once at startup and handed to
/// [`crate::KeyManager::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyManagerConfig {
    /// Prefix for every key this crate writes to the key-value store.
    pub storage_prefix: String,

    /// Device id used in protocol addresses and published bundles.
    pub device_id: u32,

    /// PBKDF2 iterations for backups and sealed protocol state. Both sides of
    /// a backup must agree on this value.
    pub backup_iterations: u32,

    /// Hex characters per fingerprint group.
    pub fingerprint_group_size: usize,
}

pub const DEFAULT_BACKUP_ITERATIONS: u32 = 600_000;

impl Default for KeyManagerConfig {
    fn default() -> Self {
        Self {
            storage_prefix: "pactum".into(),
            device_id: 1,
            backup_iterations: DEFAULT_BACKUP_ITERATIONS,
            fingerprint_group_size: 4,
        }
    }
}

impl KeyManagerConfig {
    pub(crate) fn key(&self, name: &str) -> String {
        format!("{}.{}", self.storage_prefix, name)
    }
}
