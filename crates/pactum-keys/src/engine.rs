//! Adapter between the key manager and libsignal's session engine.
//!
//! Uses X3DH key agreement to establish sessions, then the Double Ratchet
//! algorithm for ongoing message encryption with forward secrecy. Plaintext
//! marshalling and timestamps go through the injected [`Primitives`].

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use libsignal_protocol::{
    message_decrypt, message_decrypt_prekey, message_encrypt, process_prekey_bundle,
    CiphertextMessage, CiphertextMessageType, PreKeySignalMessage, ProtocolAddress,
    SignalMessage, SignalProtocolError,
};
use pactum_compat::{BufferSource, CompatError, Encoding, Long, Primitives};
use rand::rngs::OsRng;
use thiserror::Error;

use crate::message::EncryptedMessage;
use crate::prekey::PreKeyBundle;
use crate::stores::ProtocolStore;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Protocol(#[from] SignalProtocolError),

    #[error("marshalling failed: {0}")]
    Marshal(#[from] CompatError),

    #[error("unexpected ciphertext type: {0}")]
    UnexpectedMessageType(String),
}

pub struct SignalEngine {
    primitives: Arc<dyn Primitives>,
}

impl SignalEngine {
    pub fn new(primitives: Arc<dyn Primitives>) -> Self {
        Self { primitives }
    }

    pub fn primitives(&self) -> &dyn Primitives {
        self.primitives.as_ref()
    }

    pub fn address(&self, peer_id: &str, device_id: u32) -> ProtocolAddress {
        ProtocolAddress::new(peer_id.to_string(), device_id.into())
    }

    /// Current time in epoch milliseconds, as an unsigned `Long`.
    pub fn timestamp_now(&self) -> Long {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        self.primitives.long_from_number(millis as f64, true)
    }

    /// Process a remote pre-key bundle, leaving fresh ratchet state for
    /// `address` in `store`.
    pub async fn build_session(
        &self,
        store: &mut ProtocolStore,
        address: &ProtocolAddress,
        bundle: &PreKeyBundle,
    ) -> Result<(), EngineError> {
        let bundle = bundle.to_signal_bundle()?;
        process_prekey_bundle(
            address,
            &mut store.session,
            &mut store.trust,
            &bundle,
            SystemTime::now(),
            &mut OsRng,
        )
        .await?;
        Ok(())
    }

    pub async fn encrypt(
        &self,
        store: &mut ProtocolStore,
        address: &ProtocolAddress,
        plaintext: &str,
    ) -> Result<EncryptedMessage, EngineError> {
        let payload = self.primitives.encode_str(plaintext, Encoding::Utf8)?;

        let ciphertext = message_encrypt(
            &payload.to_bytes(),
            address,
            &mut store.session,
            &mut store.trust,
            SystemTime::now(),
        )
        .await?;

        let body = ciphertext.serialize().to_vec();
        match ciphertext.message_type() {
            CiphertextMessageType::PreKey => Ok(EncryptedMessage::FirstContact { body }),
            CiphertextMessageType::Whisper => Ok(EncryptedMessage::Ordinary { body }),
            other => Err(EngineError::UnexpectedMessageType(format!("{other:?}"))),
        }
    }

    pub async fn decrypt(
        &self,
        store: &mut ProtocolStore,
        address: &ProtocolAddress,
        message: &EncryptedMessage,
    ) -> Result<String, EngineError> {
        let plaintext = match message {
            EncryptedMessage::FirstContact { body } => {
                let msg = PreKeySignalMessage::try_from(body.as_slice())?;
                message_decrypt_prekey(
                    &msg,
                    address,
                    &mut store.session,
                    &mut store.trust,
                    &mut store.prekey,
                    &mut store.signed_prekey,
                    &mut store.kyber,
                    &mut OsRng,
                )
                .await?
            }
            EncryptedMessage::Ordinary { body } => {
                let msg = SignalMessage::try_from(body.as_slice())?;
                let ciphertext_msg = CiphertextMessage::SignalMessage(msg);
                message_decrypt(
                    &ciphertext_msg,
                    address,
                    &mut store.session,
                    &mut store.trust,
                    &mut store.prekey,
                    &mut store.signed_prekey,
                    &mut store.kyber,
                    &mut OsRng,
                )
                .await?
            }
        };

        let buffer = self.primitives.wrap(BufferSource::Region(&plaintext))?;
        Ok(self.primitives.decode_str(&buffer, Encoding::Utf8)?)
    }
}

#[cfg(test)]
mod tests {
    use pactum_compat::NativePrimitives;

    use super::*;

    #[test]
    fn timestamp_is_recent_and_unsigned() {
        let engine = SignalEngine::new(Arc::new(NativePrimitives));
        let ts = engine.timestamp_now();
        assert!(ts.is_unsigned());
        // 2020-01-01 in epoch millis
        assert!(ts.to_u64() > 1_577_836_800_000);
    }

    #[test]
    fn address_uses_device_id() {
        let engine = SignalEngine::new(Arc::new(NativePrimitives));
        let address = engine.address("bob", 3);
        assert_eq!(address.name(), "bob");
        assert_eq!(address.device_id().to_string(), "3");
    }
}
