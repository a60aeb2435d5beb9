//! Per-peer session handles.
//!
//! A `Session` does not own ratchet state; that lives in the shared
//! [`ProtocolStore`]. The handle pins the peer address and tracks whether
//! the session may still be used.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use libsignal_protocol::ProtocolAddress;
use tokio::sync::Mutex;

use crate::stores::ProtocolStore;

/// The protocol store shared by a manager and its session handles. The lock
/// serializes every ratchet step.
pub type SharedProtocolStore = Arc<Mutex<ProtocolStore>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    /// Terminal. Only a fresh `create_session` or first-contact message
    /// yields a usable session again.
    Invalidated,
}

/// Cheap-to-clone handle to one peer's session; clones share state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    peer_id: String,
    address: ProtocolAddress,
    store: SharedProtocolStore,
    epoch: u64,
    current_epoch: Arc<AtomicU64>,
    invalidated: AtomicBool,
}

impl Session {
    pub(crate) fn new(
        peer_id: &str,
        address: ProtocolAddress,
        store: SharedProtocolStore,
        current_epoch: Arc<AtomicU64>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                peer_id: peer_id.to_string(),
                address,
                store,
                epoch: current_epoch.load(Ordering::SeqCst),
                current_epoch,
                invalidated: AtomicBool::new(false),
            }),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.inner.peer_id
    }

    pub fn address(&self) -> &ProtocolAddress {
        &self.inner.address
    }

    pub fn state(&self) -> SessionState {
        let stale = self.inner.current_epoch.load(Ordering::SeqCst) != self.inner.epoch;
        if stale || self.inner.invalidated.load(Ordering::SeqCst) {
            SessionState::Invalidated
        } else {
            SessionState::Active
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub(crate) fn mark_invalidated(&self) {
        self.inner.invalidated.store(true, Ordering::SeqCst);
    }

    pub(crate) fn store(&self) -> &SharedProtocolStore {
        &self.inner.store
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("peer_id", &self.inner.peer_id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityKeys;

    fn session(epoch: &Arc<AtomicU64>) -> Session {
        let identity = IdentityKeys::generate().unwrap();
        let store = Arc::new(Mutex::new(ProtocolStore::new(&identity, 1)));
        let address = ProtocolAddress::new("bob".into(), 1.into());
        Session::new("bob", address, store, epoch.clone())
    }

    #[test]
    fn new_session_is_active() {
        let epoch = Arc::new(AtomicU64::new(0));
        let s = session(&epoch);
        assert_eq!(s.state(), SessionState::Active);
        assert_eq!(s.peer_id(), "bob");
    }

    #[test]
    fn invalidation_is_shared_by_clones() {
        let epoch = Arc::new(AtomicU64::new(0));
        let s = session(&epoch);
        let clone = s.clone();
        s.mark_invalidated();
        assert_eq!(clone.state(), SessionState::Invalidated);
    }

    #[test]
    fn epoch_bump_invalidates() {
        let epoch = Arc::new(AtomicU64::new(4));
        let s = session(&epoch);
        epoch.fetch_add(1, Ordering::SeqCst);
        assert!(!s.is_active());
        assert!(format!("{s:?}").contains("Invalidated"));
    }
}
