//! Ciphertext as it leaves [`crate::KeyManager::encrypt`] and its one-byte
//! tagged wire framing.

use pactum_compat::{BufferSource, Primitives};

use crate::error::KeyError;

/// Wire tag of a first-contact (pre-key) message, libsignal's numbering.
pub const FIRST_CONTACT_TAG: u8 = 3;
/// Wire tag of an ordinary ratchet message.
pub const ORDINARY_TAG: u8 = 2;

/// Ciphertext produced by [`crate::KeyManager::encrypt`].
///
/// The variant decides the decrypt path: a first-contact message carries
/// enough for the receiver to build the session, an ordinary one needs an
/// established session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptedMessage {
    FirstContact { body: Vec<u8> },
    Ordinary { body: Vec<u8> },
}

impl EncryptedMessage {
    pub fn body(&self) -> &[u8] {
        match self {
            EncryptedMessage::FirstContact { body } | EncryptedMessage::Ordinary { body } => body,
        }
    }

    pub fn body_mut(&mut self) -> &mut Vec<u8> {
        match self {
            EncryptedMessage::FirstContact { body } | EncryptedMessage::Ordinary { body } => body,
        }
    }

    pub fn is_first_contact(&self) -> bool {
        matches!(self, EncryptedMessage::FirstContact { .. })
    }

    pub fn tag(&self) -> u8 {
        match self {
            EncryptedMessage::FirstContact { .. } => FIRST_CONTACT_TAG,
            EncryptedMessage::Ordinary { .. } => ORDINARY_TAG,
        }
    }

    /// Frame as `[tag][body]` for transport.
    pub fn to_wire(&self, primitives: &dyn Primitives) -> Result<Vec<u8>, KeyError> {
        let framed = primitives
            .concat(&[
                BufferSource::Region(&[self.tag()]),
                BufferSource::Region(self.body()),
            ])
            .map_err(|e| KeyError::Serialization(e.to_string()))?;
        Ok(framed.to_bytes().to_vec())
    }

    pub fn from_wire(primitives: &dyn Primitives, wire: &[u8]) -> Result<Self, KeyError> {
        let mut buf = primitives
            .wrap(BufferSource::Region(wire))
            .map_err(|e| KeyError::Serialization(e.to_string()))?;
        let tag = buf
            .read_u8()
            .map_err(|_| KeyError::Serialization("empty message frame".into()))?;
        let body = buf
            .read_bytes(buf.remaining())
            .map_err(|e| KeyError::Serialization(e.to_string()))?
            .to_vec();
        match tag {
            FIRST_CONTACT_TAG => Ok(EncryptedMessage::FirstContact { body }),
            ORDINARY_TAG => Ok(EncryptedMessage::Ordinary { body }),
            other => Err(KeyError::Serialization(format!(
                "unknown message type: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use pactum_compat::NativePrimitives;

    use super::*;

    #[test]
    fn wire_framing() {
        let msg = EncryptedMessage::FirstContact {
            body: vec![0xDE, 0xAD],
        };
        let wire = msg.to_wire(&NativePrimitives).unwrap();
        assert_eq!(wire, vec![FIRST_CONTACT_TAG, 0xDE, 0xAD]);
        assert_eq!(EncryptedMessage::from_wire(&NativePrimitives, &wire).unwrap(), msg);
    }

    #[test]
    fn ordinary_with_empty_body() {
        let wire = [ORDINARY_TAG];
        let msg = EncryptedMessage::from_wire(&NativePrimitives, &wire).unwrap();
        assert!(!msg.is_first_contact());
        assert!(msg.body().is_empty());
    }

    #[test]
    fn unknown_tag_rejected() {
        let err = EncryptedMessage::from_wire(&NativePrimitives, &[9, 1, 2]).unwrap_err();
        assert!(err.to_string().contains("unknown message type"));
        assert!(EncryptedMessage::from_wire(&NativePrimitives, &[]).is_err());
    }
}
