//! The capability handed to the session engine adapter.
//!
//! The engine marshals its integers and binary payloads through whatever
//! `Primitives` it was constructed with. Nothing is looked up globally.

use crate::buffer::{BufferSource, ByteBuffer, Encoding};
use crate::error::CompatError;
use crate::long::Long;

pub trait Primitives: Send + Sync {
    fn long_from_number(&self, value: f64, unsigned: bool) -> Long {
        Long::from_number(value, unsigned)
    }

    fn long_from_string(&self, text: &str, unsigned: bool) -> Long {
        Long::from_string(text, unsigned)
    }

    fn allocate(&self, capacity: usize) -> ByteBuffer {
        ByteBuffer::allocate(capacity)
    }

    fn wrap(&self, source: BufferSource<'_>) -> Result<ByteBuffer, CompatError> {
        ByteBuffer::wrap(source)
    }

    fn concat(&self, parts: &[BufferSource<'_>]) -> Result<ByteBuffer, CompatError> {
        ByteBuffer::concat(parts)
    }

    fn encode_str(&self, text: &str, encoding: Encoding) -> Result<ByteBuffer, CompatError> {
        ByteBuffer::from_string(text, encoding)
    }

    fn decode_str(&self, buffer: &ByteBuffer, encoding: Encoding) -> Result<String, CompatError> {
        buffer.to_string_with(encoding)
    }
}

/// The stock implementation backed by [`Long`] and [`ByteBuffer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePrimitives;

impl Primitives for NativePrimitives {}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn native_primitives_as_trait_object() {
        let p: Arc<dyn Primitives> = Arc::new(NativePrimitives);
        let buf = p.encode_str("hi", Encoding::Utf8).unwrap();
        let framed = p
            .concat(&[BufferSource::Region(&[7]), BufferSource::Buffer(&buf)])
            .unwrap();
        assert_eq!(&framed.to_bytes()[..], &[7, b'h', b'i']);
        assert_eq!(p.long_from_string("42", true).to_u64(), 42);
        assert_eq!(p.decode_str(&buf, Encoding::Hex).unwrap(), "6869");
    }
}
