//! Fixed-capacity byte buffer with read/write cursor.
//!
//! `offset` is the cursor, `limit` bounds reads and conversions, and an
//! optional `mark` remembers a cursor position for [`ByteBuffer::reset`].
//! Capacity never changes after construction.

use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::{Bytes, BytesMut};

use crate::error::CompatError;
use crate::long::Long;

/// Text encodings understood by [`ByteBuffer::to_string_with`] and
/// [`ByteBuffer::from_string`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    Utf8,
    Base64,
    Hex,
    /// One char per byte (latin-1).
    Binary,
}

impl Encoding {
    pub fn label(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf8",
            Encoding::Base64 => "base64",
            Encoding::Hex => "hex",
            Encoding::Binary => "binary",
        }
    }

    fn encode(self, bytes: &[u8]) -> Result<String, CompatError> {
        match self {
            Encoding::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|_| CompatError::InvalidUtf8),
            Encoding::Base64 => Ok(BASE64.encode(bytes)),
            Encoding::Hex => Ok(hex::encode(bytes)),
            Encoding::Binary => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }

    fn decode(self, text: &str) -> Result<Vec<u8>, CompatError> {
        let invalid = || CompatError::InvalidEncodedInput {
            encoding: self.label(),
        };
        match self {
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Base64 => BASE64.decode(text).map_err(|_| invalid()),
            Encoding::Hex => hex::decode(text).map_err(|_| invalid()),
            Encoding::Binary => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).map_err(|_| invalid()))
                .collect(),
        }
    }
}

impl FromStr for Encoding {
    type Err = CompatError;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        match label.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "base64" => Ok(Encoding::Base64),
            "hex" => Ok(Encoding::Hex),
            "binary" | "latin1" => Ok(Encoding::Binary),
            _ => Err(CompatError::UnknownEncoding(label.to_string())),
        }
    }
}

/// Anything that can be wrapped into, or concatenated onto, a [`ByteBuffer`].
#[derive(Debug, Clone, Copy)]
pub enum BufferSource<'a> {
    /// A raw binary region, taken whole.
    Region(&'a [u8]),
    /// A byte-array view over part of a region.
    View {
        region: &'a [u8],
        offset: usize,
        len: usize,
    },
    /// Another buffer; contributes its `offset..limit` window.
    Buffer(&'a ByteBuffer),
}

impl<'a> BufferSource<'a> {
    pub fn as_slice(self) -> Result<&'a [u8], CompatError> {
        match self {
            BufferSource::Region(region) => Ok(region),
            BufferSource::View {
                region,
                offset,
                len,
            } => offset
                .checked_add(len)
                .and_then(|end| region.get(offset..end))
                .ok_or(CompatError::ViewOutOfBounds {
                    offset,
                    len,
                    region: region.len(),
                }),
            BufferSource::Buffer(buffer) => Ok(buffer.window()),
        }
    }
}

impl<'a> From<&'a [u8]> for BufferSource<'a> {
    fn from(region: &'a [u8]) -> Self {
        BufferSource::Region(region)
    }
}

impl<'a> From<&'a Vec<u8>> for BufferSource<'a> {
    fn from(region: &'a Vec<u8>) -> Self {
        BufferSource::Region(region.as_slice())
    }
}

impl<'a> From<&'a ByteBuffer> for BufferSource<'a> {
    fn from(buffer: &'a ByteBuffer) -> Self {
        BufferSource::Buffer(buffer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteBuffer {
    data: BytesMut,
    offset: usize,
    limit: usize,
    mark: Option<usize>,
}

impl ByteBuffer {
    /// A zero-filled buffer of `capacity` bytes, limit at capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: BytesMut::zeroed(capacity),
            offset: 0,
            limit: capacity,
            mark: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(0)
    }

    /// Copy `bytes` into a new buffer sized exactly to them.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: BytesMut::from(bytes),
            offset: 0,
            limit: bytes.len(),
            mark: None,
        }
    }

    pub fn allocate(capacity: usize) -> Self {
        Self::new(capacity)
    }

    /// Wrap a region, view or buffer. The result owns a copy of the bytes.
    pub fn wrap(source: BufferSource<'_>) -> Result<Self, CompatError> {
        Ok(Self::from_bytes(source.as_slice()?))
    }

    /// Concatenate heterogeneous sources into one buffer.
    ///
    /// Sizes are resolved up front so the result is allocated exactly once.
    pub fn concat(parts: &[BufferSource<'_>]) -> Result<Self, CompatError> {
        let slices = parts
            .iter()
            .map(|part| part.as_slice())
            .collect::<Result<Vec<_>, _>>()?;
        let total = slices.iter().map(|s| s.len()).sum();

        let mut out = Self::allocate(total);
        let mut at = 0;
        for slice in slices {
            out.data[at..at + slice.len()].copy_from_slice(slice);
            at += slice.len();
        }
        Ok(out)
    }

    /// Decode `text` into a new buffer.
    pub fn from_string(text: &str, encoding: Encoding) -> Result<Self, CompatError> {
        Ok(Self::from_bytes(&encoding.decode(text)?))
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.offset)
    }

    pub fn set_limit(&mut self, limit: usize) -> Result<(), CompatError> {
        if limit > self.capacity() {
            return Err(CompatError::Overflow {
                needed: limit,
                available: self.capacity(),
            });
        }
        self.limit = limit;
        self.offset = self.offset.min(limit);
        Ok(())
    }

    /// Limit to what was written and rewind for reading.
    pub fn flip(&mut self) -> &mut Self {
        self.limit = self.offset;
        self.offset = 0;
        self.mark = None;
        self
    }

    pub fn mark(&mut self) -> &mut Self {
        self.mark = Some(self.offset);
        self
    }

    /// Return to the mark, or to the start when nothing is marked.
    pub fn reset(&mut self) -> &mut Self {
        self.offset = self.mark.take().unwrap_or(0);
        self
    }

    pub fn clear(&mut self) -> &mut Self {
        self.offset = 0;
        self.limit = self.capacity();
        self.mark = None;
        self
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, CompatError> {
        let end = self.offset + bytes.len();
        if end > self.capacity() {
            return Err(CompatError::Overflow {
                needed: bytes.len(),
                available: self.capacity() - self.offset,
            });
        }
        self.data[self.offset..end].copy_from_slice(bytes);
        self.offset = end;
        Ok(self)
    }

    pub fn write_u8(&mut self, value: u8) -> Result<&mut Self, CompatError> {
        self.write_bytes(&[value])
    }

    pub fn write_u32(&mut self, value: u32) -> Result<&mut Self, CompatError> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Big-endian, high half first.
    pub fn write_long(&mut self, value: Long) -> Result<&mut Self, CompatError> {
        self.write_bytes(&value.to_u64().to_be_bytes())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes, CompatError> {
        if len > self.remaining() {
            return Err(CompatError::Underflow {
                needed: len,
                available: self.remaining(),
            });
        }
        let out = Bytes::copy_from_slice(&self.data[self.offset..self.offset + len]);
        self.offset += len;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CompatError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, CompatError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.read_bytes(4)?);
        Ok(u32::from_be_bytes(raw))
    }

    pub fn read_long(&mut self, unsigned: bool) -> Result<Long, CompatError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.read_bytes(8)?);
        let value = u64::from_be_bytes(raw);
        Ok(if unsigned {
            Long::from_u64(value)
        } else {
            Long::from_i64(value as i64)
        })
    }

    /// Copy of `begin..end`, bounded by capacity.
    pub fn slice(&self, begin: usize, end: usize) -> Result<Self, CompatError> {
        let region = self
            .data
            .get(begin..end)
            .ok_or(CompatError::ViewOutOfBounds {
                offset: begin,
                len: end.saturating_sub(begin),
                region: self.capacity(),
            })?;
        Ok(Self::from_bytes(region))
    }

    /// Trimmed copy of `0..limit`. Capacity beyond the limit is never
    /// included.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data[..self.limit])
    }

    pub fn to_string_with(&self, encoding: Encoding) -> Result<String, CompatError> {
        encoding.encode(&self.data[..self.limit])
    }

    pub fn to_utf8_string(&self) -> Result<String, CompatError> {
        self.to_string_with(Encoding::Utf8)
    }

    fn window(&self) -> &[u8] {
        &self.data[self.offset.min(self.limit)..self.limit]
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_is_zero_filled() {
        let buf = ByteBuffer::allocate(8);
        assert_eq!(buf.capacity(), 8);
        assert_eq!(buf.limit(), 8);
        assert_eq!(&buf.to_bytes()[..], &[0u8; 8]);
    }

    #[test]
    fn to_bytes_is_bounded_by_limit() {
        let mut buf = ByteBuffer::allocate(16);
        buf.write_bytes(b"abc").unwrap();
        buf.flip();
        assert_eq!(buf.capacity(), 16);
        assert_eq!(&buf.to_bytes()[..], b"abc");
        assert_eq!(buf.to_utf8_string().unwrap(), "abc");
    }

    #[test]
    fn wrap_view_takes_only_the_view() {
        let region = b"hello world";
        let buf = ByteBuffer::wrap(BufferSource::View {
            region,
            offset: 6,
            len: 5,
        })
        .unwrap();
        assert_eq!(buf.to_utf8_string().unwrap(), "world");
    }

    #[test]
    fn wrap_view_out_of_bounds() {
        let err = ByteBuffer::wrap(BufferSource::View {
            region: b"abc",
            offset: 2,
            len: 5,
        })
        .unwrap_err();
        assert!(matches!(err, CompatError::ViewOutOfBounds { .. }));
    }

    #[test]
    fn concat_heterogeneous_sources_in_order() {
        let mut partly_read = ByteBuffer::from_bytes(b"xxBC");
        partly_read.read_bytes(2).unwrap();
        let raw = vec![b'D', b'E'];
        let out = ByteBuffer::concat(&[
            BufferSource::Region(b"A"),
            BufferSource::Buffer(&partly_read),
            (&raw).into(),
            BufferSource::View {
                region: b"..F..",
                offset: 2,
                len: 1,
            },
        ])
        .unwrap();
        assert_eq!(out.capacity(), 6);
        assert_eq!(out.to_utf8_string().unwrap(), "ABCDEF");
    }

    #[test]
    fn concat_of_nothing_is_empty() {
        let out = ByteBuffer::concat(&[]).unwrap();
        assert_eq!(out, ByteBuffer::empty());
    }

    #[test]
    fn write_past_capacity_overflows() {
        let mut buf = ByteBuffer::allocate(3);
        let err = buf.write_u32(1).unwrap_err();
        assert_eq!(
            err,
            CompatError::Overflow {
                needed: 4,
                available: 3
            }
        );
    }

    #[test]
    fn cursor_mark_and_reset() {
        let mut buf = ByteBuffer::from_bytes(&[1, 2, 3, 4]);
        assert_eq!(buf.read_u8().unwrap(), 1);
        buf.mark();
        assert_eq!(buf.read_u8().unwrap(), 2);
        buf.reset();
        assert_eq!(buf.read_u8().unwrap(), 2);
        buf.reset();
        assert_eq!(buf.offset(), 0);
        assert!(buf.read_bytes(5).is_err());
    }

    #[test]
    fn long_write_read() {
        let mut buf = ByteBuffer::allocate(12);
        buf.write_long(Long::from_i64(-5))
            .unwrap()
            .write_u32(0xDEAD_BEEF)
            .unwrap();
        buf.flip();
        assert_eq!(buf.read_long(false).unwrap().to_i64(), -5);
        assert_eq!(buf.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn string_encodings() {
        let buf = ByteBuffer::from_bytes(&[0x00, 0xFF, 0x41]);
        assert_eq!(buf.to_string_with(Encoding::Hex).unwrap(), "00ff41");
        assert_eq!(buf.to_string_with(Encoding::Base64).unwrap(), "AP9B");
        assert_eq!(buf.to_string_with(Encoding::Binary).unwrap(), "\u{0}\u{ff}A");
        assert_eq!(buf.to_utf8_string().unwrap_err(), CompatError::InvalidUtf8);

        let back = ByteBuffer::from_string("\u{0}\u{ff}A", Encoding::Binary).unwrap();
        assert_eq!(back, buf);
        assert!(ByteBuffer::from_string("\u{100}", Encoding::Binary).is_err());
        assert!(ByteBuffer::from_string("zz", Encoding::Hex).is_err());
    }

    #[test]
    fn encoding_labels() {
        assert_eq!("UTF-8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("latin1".parse::<Encoding>().unwrap(), Encoding::Binary);
        assert!(matches!(
            "ucs2".parse::<Encoding>(),
            Err(CompatError::UnknownEncoding(_))
        ));
    }

    #[test]
    fn slice_copies_range() {
        let buf = ByteBuffer::from_bytes(b"abcdef");
        assert_eq!(buf.slice(1, 4).unwrap().to_utf8_string().unwrap(), "bcd");
        assert!(buf.slice(4, 9).is_err());
    }
}
