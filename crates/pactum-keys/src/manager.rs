//! The key-lifecycle manager: the single entry point for messaging code.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use libsignal_protocol::{PreKeyId, PreKeyStore, SignedPreKeyId, SignedPreKeyStore};
use pactum_compat::{NativePrimitives, Primitives};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::backup;
use crate::config::KeyManagerConfig;
use crate::engine::SignalEngine;
use crate::error::KeyError;
use crate::fingerprint;
use crate::identity::{self, IdentityKeys, StoredIdentity};
use crate::message::EncryptedMessage;
use crate::persistence;
use crate::prekey::{self, PreKey, PreKeyBundle, SignedPreKey, StoredBundle};
use crate::session::{Session, SharedProtocolStore};
use crate::storage::{KeyValueStore, StorageError};
use crate::stores::ProtocolStore;

const IDENTITY_KEY: &str = "identityKey";
const REGISTRATION_ID_KEY: &str = "registrationId";
const PRE_KEY_BUNDLE_KEY: &str = "preKeyBundle";
const PROTOCOL_STATE_KEY: &str = "protocolState";

/// The device's long-term material, as loaded or freshly provisioned.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub keys: IdentityKeys,
    pub registration_id: u32,
}

pub struct KeyManager {
    config: KeyManagerConfig,
    storage: Arc<dyn KeyValueStore>,
    engine: SignalEngine,
    protocol: Mutex<Option<SharedProtocolStore>>,
    /// Bumped whenever the local identity changes; session handles from an
    /// older epoch are invalid.
    epoch: Arc<AtomicU64>,
}

impl KeyManager {
    pub fn new(
        config: KeyManagerConfig,
        storage: Arc<dyn KeyValueStore>,
        primitives: Arc<dyn Primitives>,
    ) -> Self {
        Self {
            config,
            storage,
            engine: SignalEngine::new(primitives),
            protocol: Mutex::new(None),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Default configuration and the native primitives.
    pub fn with_storage(storage: Arc<dyn KeyValueStore>) -> Self {
        Self::new(
            KeyManagerConfig::default(),
            storage,
            Arc::new(NativePrimitives),
        )
    }

    pub fn config(&self) -> &KeyManagerConfig {
        &self.config
    }

    pub fn primitives(&self) -> &dyn Primitives {
        self.engine.primitives()
    }

    // ── Generation ──────────────────────────────────────────────────────

    pub fn generate_identity(&self) -> Result<IdentityKeys, KeyError> {
        let keys = IdentityKeys::generate()?;
        debug!("generated identity key pair");
        Ok(keys)
    }

    pub fn generate_registration_id(&self) -> Result<u32, KeyError> {
        identity::generate_registration_id()
    }

    /// Generate pre-keys `start_id..start_id + count` and keep their private
    /// halves in the protocol store for incoming first-contact messages.
    pub async fn generate_pre_keys(
        &self,
        start_id: u32,
        count: u32,
    ) -> Result<Vec<PreKey>, KeyError> {
        let store = self.protocol_store(None).await?;
        let pre_keys = prekey::generate_pre_keys(start_id, count)?;

        let records = pre_keys
            .iter()
            .map(|pk| pk.to_record().map(|record| (pk.key_id, record)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| KeyError::KeyGeneration(e.to_string()))?;

        let mut store = store.lock().await;
        for (key_id, record) in records {
            store
                .prekey
                .save_pre_key(PreKeyId::from(key_id), &record)
                .await
                .map_err(|e| KeyError::KeyGeneration(e.to_string()))?;
        }
        debug!(start_id, count, "generated pre-keys");
        Ok(pre_keys)
    }

    pub async fn generate_signed_pre_key(
        &self,
        identity: &IdentityKeys,
        key_id: u32,
    ) -> Result<SignedPreKey, KeyError> {
        let store = self.protocol_store(Some(identity)).await?;
        let timestamp = self.engine.timestamp_now().to_u64();
        let signed = prekey::generate_signed_pre_key(identity, key_id, timestamp)?;
        let record = signed
            .to_record()
            .map_err(|e| KeyError::KeyGeneration(e.to_string()))?;

        store
            .lock()
            .await
            .signed_prekey
            .save_signed_pre_key(SignedPreKeyId::from(key_id), &record)
            .await
            .map_err(|e| KeyError::KeyGeneration(e.to_string()))?;
        debug!(key_id, "generated signed pre-key");
        Ok(signed)
    }

    // ── Storage ─────────────────────────────────────────────────────────

    /// Persist the identity. Replacing a different or unreadable stored
    /// identity invalidates every session built on the old one.
    pub fn store_identity(&self, keys: &IdentityKeys) -> Result<(), KeyError> {
        let replaced = replaces(self.load_identity(), keys)?;
        let json = serde_json::to_string(&keys.to_stored()).map_err(StorageError::from)?;
        self.storage.set(&self.config.key(IDENTITY_KEY), &json)?;

        if replaced {
            warn!("stored identity replaced, invalidating existing sessions");
            self.drop_protocol_store()?;
        }
        Ok(())
    }

    /// `Ok(None)` means first run: nothing has been provisioned yet.
    pub fn load_identity(&self) -> Result<Option<IdentityKeys>, KeyError> {
        let key = self.config.key(IDENTITY_KEY);
        let Some(json) = self.storage.get(&key)? else {
            return Ok(None);
        };
        let stored: StoredIdentity = serde_json::from_str(&json).map_err(StorageError::from)?;
        let keys = IdentityKeys::from_stored(&stored).map_err(|e| StorageError::Corrupt {
            key,
            reason: e.to_string(),
        })?;
        Ok(Some(keys))
    }

    pub fn store_registration_id(&self, registration_id: u32) -> Result<(), KeyError> {
        let replaced = replaces(self.load_registration_id(), &registration_id)?;
        self.storage.set(
            &self.config.key(REGISTRATION_ID_KEY),
            &registration_id.to_string(),
        )?;

        if replaced {
            warn!("registration id replaced, invalidating existing sessions");
            self.drop_protocol_store()?;
        }
        Ok(())
    }

    pub fn load_registration_id(&self) -> Result<Option<u32>, KeyError> {
        let key = self.config.key(REGISTRATION_ID_KEY);
        let Some(value) = self.storage.get(&key)? else {
            return Ok(None);
        };
        let registration_id = value.trim().parse().map_err(|_| StorageError::Corrupt {
            key,
            reason: format!("not a registration id: {value:?}"),
        })?;
        Ok(Some(registration_id))
    }

    pub fn store_pre_key_bundle(&self, bundle: &PreKeyBundle) -> Result<(), KeyError> {
        let json = serde_json::to_string(&bundle.to_stored()).map_err(StorageError::from)?;
        self.storage.set(&self.config.key(PRE_KEY_BUNDLE_KEY), &json)?;
        Ok(())
    }

    pub fn load_pre_key_bundle(&self) -> Result<Option<PreKeyBundle>, KeyError> {
        let key = self.config.key(PRE_KEY_BUNDLE_KEY);
        let Some(json) = self.storage.get(&key)? else {
            return Ok(None);
        };
        let stored: StoredBundle = serde_json::from_str(&json).map_err(StorageError::from)?;
        let bundle = PreKeyBundle::from_stored(&stored).map_err(|e| StorageError::Corrupt {
            key,
            reason: e.to_string(),
        })?;
        Ok(Some(bundle))
    }

    /// Load the local identity and registration id, generating and storing
    /// whichever is missing.
    pub fn provision(&self) -> Result<LocalIdentity, KeyError> {
        let keys = match self.load_identity()? {
            Some(keys) => keys,
            None => {
                let keys = self.generate_identity()?;
                self.store_identity(&keys)?;
                info!(
                    fingerprint = %self.fingerprint(&keys.public_key),
                    "provisioned new identity"
                );
                keys
            }
        };
        let registration_id = match self.load_registration_id()? {
            Some(id) => id,
            None => {
                let id = self.generate_registration_id()?;
                self.store_registration_id(id)?;
                info!(registration_id = id, "provisioned registration id");
                id
            }
        };
        Ok(LocalIdentity {
            keys,
            registration_id,
        })
    }

    // ── Sessions ────────────────────────────────────────────────────────

    /// Establish a session with `peer_id` from their published bundle.
    pub async fn create_session(
        &self,
        peer_id: &str,
        bundle: &PreKeyBundle,
        local_identity: &IdentityKeys,
    ) -> Result<Session, KeyError> {
        let store = self.protocol_store(Some(local_identity)).await?;
        let address = self.engine.address(peer_id, bundle.device_id);

        self.engine
            .build_session(&mut *store.lock().await, &address, bundle)
            .await
            .map_err(|e| {
                warn!(peer_id, error = %e, "pre-key bundle rejected");
                KeyError::session(peer_id, e)
            })?;

        info!(peer_id, "session established from pre-key bundle");
        Ok(Session::new(peer_id, address, store, self.epoch.clone()))
    }

    /// Establish a session from an inbound first-contact message.
    ///
    /// Building the session consumes the message, so its plaintext is
    /// returned alongside the new session. The sender is addressed as the
    /// same device id as this one.
    pub async fn process_first_contact_message(
        &self,
        sender_id: &str,
        message: &EncryptedMessage,
        local_identity: &IdentityKeys,
    ) -> Result<(Session, String), KeyError> {
        let EncryptedMessage::FirstContact { .. } = message else {
            return Err(KeyError::session(sender_id, "not a first-contact message"));
        };
        let store = self.protocol_store(Some(local_identity)).await?;
        let address = self.engine.address(sender_id, self.config.device_id);

        let plaintext = self
            .engine
            .decrypt(&mut *store.lock().await, &address, message)
            .await
            .map_err(|e| {
                warn!(sender_id, error = %e, "first-contact message rejected");
                KeyError::session(sender_id, e)
            })?;

        info!(sender_id, "session established from first-contact message");
        Ok((
            Session::new(sender_id, address, store, self.epoch.clone()),
            plaintext,
        ))
    }

    /// Encrypt `plaintext` for the session's peer, advancing the ratchet.
    pub async fn encrypt(
        &self,
        session: &Session,
        plaintext: &str,
    ) -> Result<EncryptedMessage, KeyError> {
        if !session.is_active() {
            return Err(KeyError::Encryption(format!(
                "session with {} is invalidated",
                session.peer_id()
            )));
        }

        let message = self
            .engine
            .encrypt(&mut *session.store().lock().await, session.address(), plaintext)
            .await
            .map_err(|e| KeyError::Encryption(e.to_string()))?;

        debug!(
            peer_id = session.peer_id(),
            first_contact = message.is_first_contact(),
            "encrypted message"
        );
        Ok(message)
    }

    /// Decrypt a message from `sender_id`.
    ///
    /// A failure leaves the session untouched and usable for later messages;
    /// invalidating it is the caller's decision.
    pub async fn decrypt(
        &self,
        sender_id: &str,
        message: &EncryptedMessage,
        session: &Session,
    ) -> Result<String, KeyError> {
        if sender_id != session.peer_id() {
            return Err(KeyError::decryption(
                sender_id,
                format!("session belongs to {}", session.peer_id()),
            ));
        }
        if !session.is_active() {
            return Err(KeyError::decryption(sender_id, "session is invalidated"));
        }

        let result = self
            .engine
            .decrypt(&mut *session.store().lock().await, session.address(), message)
            .await;

        match result {
            Ok(plaintext) => {
                debug!(sender_id, "decrypted message");
                Ok(plaintext)
            }
            Err(e) => {
                warn!(sender_id, error = %e, "message could not be verified");
                Err(KeyError::decryption(sender_id, e))
            }
        }
    }

    /// Whether ratchet state exists for `peer_id` on `device_id`, the device
    /// id from the peer's bundle.
    pub async fn has_session(&self, peer_id: &str, device_id: u32) -> Result<bool, KeyError> {
        let Some(store) = self.current_protocol_store()? else {
            return Ok(false);
        };
        let address = self.engine.address(peer_id, device_id);
        let exists = store.lock().await.session.contains_address(&address);
        Ok(exists)
    }

    /// A handle to an existing session, e.g. after `load_protocol_state`.
    pub async fn resume_session(
        &self,
        peer_id: &str,
        device_id: u32,
    ) -> Result<Option<Session>, KeyError> {
        let Some(store) = self.current_protocol_store()? else {
            return Ok(None);
        };
        let address = self.engine.address(peer_id, device_id);
        if !store.lock().await.session.contains_address(&address) {
            return Ok(None);
        }
        Ok(Some(Session::new(peer_id, address, store, self.epoch.clone())))
    }

    /// Tear down a session. The handle and its clones stay invalidated, the
    /// ratchet state is deleted and the peer's identity is unpinned, so a
    /// reinstalled peer can establish a new session.
    pub async fn invalidate_session(&self, session: &Session) {
        session.mark_invalidated();
        let removed = session.store().lock().await.forget_peer(session.address());
        info!(peer_id = session.peer_id(), removed, "session invalidated");
    }

    /// Forget all local key material and invalidate every session.
    pub fn reset_identity(&self) -> Result<(), KeyError> {
        for name in [
            IDENTITY_KEY,
            REGISTRATION_ID_KEY,
            PRE_KEY_BUNDLE_KEY,
            PROTOCOL_STATE_KEY,
        ] {
            self.storage.remove(&self.config.key(name))?;
        }
        self.drop_protocol_store()?;
        info!("identity reset");
        Ok(())
    }

    // ── Fingerprints and backups ────────────────────────────────────────

    pub fn fingerprint(&self, identity_public_key: &[u8]) -> String {
        fingerprint::fingerprint(identity_public_key, self.config.fingerprint_group_size)
    }

    pub fn create_key_backup(
        &self,
        identity: &IdentityKeys,
        registration_id: u32,
        password: &str,
    ) -> Result<String, KeyError> {
        let backup = backup::create_key_backup(
            identity,
            registration_id,
            password,
            self.config.backup_iterations,
        )?;
        info!("created key backup");
        Ok(backup)
    }

    pub fn restore_key_from_backup(
        &self,
        backup: &str,
        password: &str,
    ) -> Result<(IdentityKeys, u32), KeyError> {
        match backup::restore_key_from_backup(backup, password, self.config.backup_iterations) {
            Ok(restored) => {
                info!(registration_id = restored.1, "restored key backup");
                Ok(restored)
            }
            Err(e) => {
                warn!(error = %e, "key backup restore failed");
                Err(e)
            }
        }
    }

    // ── Protocol state persistence ──────────────────────────────────────

    /// Seal sessions, pre-keys and known identities under `password` into
    /// the key-value store.
    pub async fn save_protocol_state(&self, password: &str) -> Result<(), KeyError> {
        let store = self
            .current_protocol_store()?
            .ok_or(KeyError::NotProvisioned)?;
        let sealed = persistence::seal_protocol_store(
            &*store.lock().await,
            password,
            self.config.backup_iterations,
        )?;
        self.storage
            .set(&self.config.key(PROTOCOL_STATE_KEY), &BASE64.encode(sealed))?;
        debug!("protocol state saved");
        Ok(())
    }

    /// Replace the in-memory protocol store with the persisted one. Returns
    /// `false` when nothing was saved. Handles from before the load are
    /// invalidated.
    pub async fn load_protocol_state(&self, password: &str) -> Result<bool, KeyError> {
        let key = self.config.key(PROTOCOL_STATE_KEY);
        let Some(encoded) = self.storage.get(&key)? else {
            return Ok(false);
        };
        let sealed = BASE64.decode(encoded.trim()).map_err(|e| StorageError::Corrupt {
            key,
            reason: e.to_string(),
        })?;
        let store =
            persistence::open_protocol_store(&sealed, password, self.config.backup_iterations)?;

        let identity = self.load_identity()?.ok_or(KeyError::NotProvisioned)?;
        if !store.belongs_to(&identity) {
            return Err(KeyError::ProtocolState(
                "saved state belongs to a different identity".into(),
            ));
        }

        self.drop_protocol_store()?;
        *self.slot()? = Some(Arc::new(AsyncMutex::new(store)));
        info!("protocol state loaded");
        Ok(true)
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<SharedProtocolStore>>, KeyError> {
        self.protocol
            .lock()
            .map_err(|_| KeyError::Storage(StorageError::Poisoned))
    }

    fn current_protocol_store(&self) -> Result<Option<SharedProtocolStore>, KeyError> {
        Ok(self.slot()?.clone())
    }

    fn drop_protocol_store(&self) -> Result<(), KeyError> {
        self.slot()?.take();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// The protocol store for the provisioned identity, built on first use.
    /// With `identity` given, it must be the provisioned one.
    async fn protocol_store(
        &self,
        identity: Option<&IdentityKeys>,
    ) -> Result<SharedProtocolStore, KeyError> {
        if let Some(store) = self.current_protocol_store()? {
            if let Some(identity) = identity {
                if !store.lock().await.belongs_to(identity) {
                    return Err(KeyError::IdentityMismatch);
                }
            }
            return Ok(store);
        }

        let stored = self.load_identity()?.ok_or(KeyError::NotProvisioned)?;
        if identity.is_some_and(|given| *given != stored) {
            return Err(KeyError::IdentityMismatch);
        }
        let registration_id = self
            .load_registration_id()?
            .ok_or(KeyError::NotProvisioned)?;

        let fresh = Arc::new(AsyncMutex::new(ProtocolStore::new(&stored, registration_id)));
        let mut slot = self.slot()?;
        let store = slot.get_or_insert(fresh).clone();
        info!(registration_id, "protocol store initialized");
        Ok(store)
    }
}

/// Whether a store over `previous` replaces it. An entry that no longer
/// parses is replaced; backend failures still propagate.
fn replaces<T: PartialEq>(
    previous: Result<Option<T>, KeyError>,
    next: &T,
) -> Result<bool, KeyError> {
    match previous {
        Ok(previous) => Ok(previous.is_some_and(|old| old != *next)),
        Err(KeyError::Storage(e @ (StorageError::Corrupt { .. } | StorageError::Json(_)))) => {
            warn!(error = %e, "overwriting unreadable stored entry");
            Ok(true)
        }
        Err(e) => Err(e),
    }
}
