//! The libsignal store traits, backed by one sealable [`ProtocolStore`].
//!
//! Each record sits in a [`Records`] map in libsignal's serialized form,
//! keyed by record id or by `name.device` address. Peer identities are
//! trusted on first use and stay pinned until [`ProtocolStore::forget_peer`]
//! tears the peer down.

use std::collections::HashMap;
use std::hash::Hash;

use libsignal_protocol::{
    Direction, IdentityKey, IdentityKeyPair, IdentityKeyStore, KyberPreKeyId, KyberPreKeyRecord,
    KyberPreKeyStore, PreKeyId, PreKeyRecord, PreKeyStore, ProtocolAddress, SessionRecord,
    SessionStore, SignalProtocolError, SignedPreKeyId, SignedPreKeyRecord, SignedPreKeyStore,
};
use serde::{Deserialize, Serialize};

use crate::identity::IdentityKeys;

/// Everything libsignal reads and writes for one local identity.
#[derive(Serialize, Deserialize)]
pub struct ProtocolStore {
    pub trust: TrustStore,
    pub prekey: Records<u32>,
    pub signed_prekey: Records<u32>,
    pub session: Records<String>,
    pub kyber: NoKyberPreKeys,
}

impl ProtocolStore {
    pub fn new(identity: &IdentityKeys, registration_id: u32) -> Self {
        Self {
            trust: TrustStore {
                local: identity.clone(),
                registration_id,
                peers: Records::default(),
            },
            prekey: Records::default(),
            signed_prekey: Records::default(),
            session: Records::default(),
            kyber: NoKyberPreKeys,
        }
    }

    /// Whether this store was built for `identity`.
    pub fn belongs_to(&self, identity: &IdentityKeys) -> bool {
        self.trust.local.public_key == identity.public_key
    }

    /// Drop the ratchet state and the pinned identity for `address`, so the
    /// next session with it starts from first contact. Returns whether a
    /// session existed.
    pub fn forget_peer(&mut self, address: &ProtocolAddress) -> bool {
        self.trust.forget(address);
        self.session.remove_address(address)
    }
}

pub(crate) fn address_key(addr: &ProtocolAddress) -> String {
    format!("{}.{}", addr.name(), addr.device_id())
}

/// Serialized libsignal records by key.
#[derive(Serialize, Deserialize)]
#[serde(bound(deserialize = "K: Deserialize<'de> + Eq + Hash"))]
pub struct Records<K: Eq + Hash>(HashMap<K, Vec<u8>>);

impl<K: Eq + Hash> Default for Records<K> {
    fn default() -> Self {
        Self(HashMap::new())
    }
}

impl<K: Eq + Hash> Records<K> {
    pub fn contains(&self, key: &K) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&[u8]> {
        self.0.get(key).map(Vec::as_slice)
    }

    pub fn put(&mut self, key: K, bytes: Vec<u8>) -> Option<Vec<u8>> {
        self.0.insert(key, bytes)
    }

    pub fn take(&mut self, key: &K) -> Option<Vec<u8>> {
        self.0.remove(key)
    }
}

impl Records<String> {
    pub fn contains_address(&self, address: &ProtocolAddress) -> bool {
        self.contains(&address_key(address))
    }

    pub fn remove_address(&mut self, address: &ProtocolAddress) -> bool {
        self.take(&address_key(address)).is_some()
    }
}

// ── Identities ──────────────────────────────────────────────────────────

/// The local identity plus the identity key pinned for each peer address.
#[derive(Serialize, Deserialize)]
pub struct TrustStore {
    local: IdentityKeys,
    registration_id: u32,
    peers: Records<String>,
}

impl TrustStore {
    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    pub fn is_pinned(&self, address: &ProtocolAddress) -> bool {
        self.peers.contains_address(address)
    }

    /// Unpin `address`; its next identity is trusted on first use again.
    pub fn forget(&mut self, address: &ProtocolAddress) -> bool {
        self.peers.remove_address(address)
    }
}

#[async_trait::async_trait(?Send)]
impl IdentityKeyStore for TrustStore {
    async fn get_identity_key_pair(&self) -> Result<IdentityKeyPair, SignalProtocolError> {
        self.local.to_identity_key_pair()
    }

    async fn get_local_registration_id(&self) -> Result<u32, SignalProtocolError> {
        Ok(self.registration_id)
    }

    /// Returns true when a different key was pinned before.
    async fn save_identity(
        &mut self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
    ) -> Result<bool, SignalProtocolError> {
        let serialized = identity.serialize().to_vec();
        let previous = self.peers.put(address_key(address), serialized.clone());
        Ok(previous.is_some_and(|old| old != serialized))
    }

    async fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
        _direction: Direction,
    ) -> Result<bool, SignalProtocolError> {
        Ok(match self.peers.get(&address_key(address)) {
            None => true,
            Some(pinned) => pinned == &*identity.serialize(),
        })
    }

    async fn get_identity(
        &self,
        address: &ProtocolAddress,
    ) -> Result<Option<IdentityKey>, SignalProtocolError> {
        self.peers
            .get(&address_key(address))
            .map(IdentityKey::decode)
            .transpose()
    }
}

// ── Pre-keys ────────────────────────────────────────────────────────────

#[async_trait::async_trait(?Send)]
impl PreKeyStore for Records<u32> {
    async fn get_pre_key(&self, id: PreKeyId) -> Result<PreKeyRecord, SignalProtocolError> {
        let bytes = self
            .get(&id.into())
            .ok_or(SignalProtocolError::InvalidPreKeyId)?;
        PreKeyRecord::deserialize(bytes)
    }

    async fn save_pre_key(
        &mut self,
        id: PreKeyId,
        record: &PreKeyRecord,
    ) -> Result<(), SignalProtocolError> {
        self.put(id.into(), record.serialize()?);
        Ok(())
    }

    async fn remove_pre_key(&mut self, id: PreKeyId) -> Result<(), SignalProtocolError> {
        self.take(&id.into());
        Ok(())
    }
}

#[async_trait::async_trait(?Send)]
impl SignedPreKeyStore for Records<u32> {
    async fn get_signed_pre_key(
        &self,
        id: SignedPreKeyId,
    ) -> Result<SignedPreKeyRecord, SignalProtocolError> {
        let bytes = self
            .get(&id.into())
            .ok_or(SignalProtocolError::InvalidSignedPreKeyId)?;
        SignedPreKeyRecord::deserialize(bytes)
    }

    async fn save_signed_pre_key(
        &mut self,
        id: SignedPreKeyId,
        record: &SignedPreKeyRecord,
    ) -> Result<(), SignalProtocolError> {
        self.put(id.into(), record.serialize()?);
        Ok(())
    }
}

/// Bundles carry no post-quantum keys; libsignal still wants the store.
#[derive(Serialize, Deserialize)]
pub struct NoKyberPreKeys;

#[async_trait::async_trait(?Send)]
impl KyberPreKeyStore for NoKyberPreKeys {
    async fn get_kyber_pre_key(
        &self,
        _kyber_prekey_id: KyberPreKeyId,
    ) -> Result<KyberPreKeyRecord, SignalProtocolError> {
        Err(SignalProtocolError::InvalidKyberPreKeyId)
    }

    async fn save_kyber_pre_key(
        &mut self,
        _kyber_prekey_id: KyberPreKeyId,
        _record: &KyberPreKeyRecord,
    ) -> Result<(), SignalProtocolError> {
        Ok(())
    }

    async fn mark_kyber_pre_key_used(
        &mut self,
        _kyber_prekey_id: KyberPreKeyId,
    ) -> Result<(), SignalProtocolError> {
        Ok(())
    }
}

// ── Sessions ────────────────────────────────────────────────────────────

#[async_trait::async_trait(?Send)]
impl SessionStore for Records<String> {
    async fn load_session(
        &self,
        address: &ProtocolAddress,
    ) -> Result<Option<SessionRecord>, SignalProtocolError> {
        self.get(&address_key(address))
            .map(SessionRecord::deserialize)
            .transpose()
    }

    async fn store_session(
        &mut self,
        address: &ProtocolAddress,
        record: &SessionRecord,
    ) -> Result<(), SignalProtocolError> {
        self.put(address_key(address), record.serialize()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prekey::generate_pre_keys;

    fn carol() -> ProtocolAddress {
        ProtocolAddress::new("carol".into(), 1.into())
    }

    #[tokio::test]
    async fn prekey_store_save_and_remove() {
        let identity = IdentityKeys::generate().unwrap();
        let mut store = ProtocolStore::new(&identity, 7);
        let pre_key = generate_pre_keys(3, 1).unwrap().remove(0);
        store
            .prekey
            .save_pre_key(PreKeyId::from(3u32), &pre_key.to_record().unwrap())
            .await
            .unwrap();
        assert!(store.prekey.contains(&3));
        assert!(store.prekey.get_pre_key(PreKeyId::from(3u32)).await.is_ok());

        store.prekey.remove_pre_key(PreKeyId::from(3u32)).await.unwrap();
        assert!(store.prekey.is_empty());
        assert!(store.prekey.get_pre_key(PreKeyId::from(3u32)).await.is_err());
    }

    #[tokio::test]
    async fn identity_store_trust_on_first_use() {
        let local = IdentityKeys::generate().unwrap();
        let mut store = ProtocolStore::new(&local, 7);
        let first = IdentityKeys::generate().unwrap().identity_key().unwrap();
        let second = IdentityKeys::generate().unwrap().identity_key().unwrap();

        assert!(store
            .trust
            .is_trusted_identity(&carol(), &first, Direction::Sending)
            .await
            .unwrap());
        assert!(!store.trust.save_identity(&carol(), &first).await.unwrap());
        assert!(!store
            .trust
            .is_trusted_identity(&carol(), &second, Direction::Sending)
            .await
            .unwrap());
        assert!(store.trust.save_identity(&carol(), &second).await.unwrap());
        assert_eq!(store.trust.get_local_registration_id().await.unwrap(), 7);
        assert!(store.belongs_to(&local));
    }

    #[tokio::test]
    async fn forget_peer_unpins_identity_and_drops_session() {
        let mut store = ProtocolStore::new(&IdentityKeys::generate().unwrap(), 7);
        let old = IdentityKeys::generate().unwrap().identity_key().unwrap();
        let reinstalled = IdentityKeys::generate().unwrap().identity_key().unwrap();
        store.trust.save_identity(&carol(), &old).await.unwrap();
        store.session.put("carol.1".into(), vec![1]);
        store.session.put("carol.2".into(), vec![2]);

        assert!(store.forget_peer(&carol()));
        assert!(!store.trust.is_pinned(&carol()));
        assert!(!store.session.contains_address(&carol()));
        assert!(store.session.contains(&"carol.2".to_string()));
        assert!(store
            .trust
            .is_trusted_identity(&carol(), &reinstalled, Direction::Receiving)
            .await
            .unwrap());

        assert!(!store.forget_peer(&carol()));
    }
}
