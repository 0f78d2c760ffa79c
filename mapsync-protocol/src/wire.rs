//! Wire primitives.
//!
//! All integers are big-endian. Strings are a `u16` byte length followed by
//! UTF-8 bytes; blobs are a `u32` byte length followed by raw bytes. Every
//! read is checked against the bytes actually remaining, so a hostile length
//! field can never make a read run past the payload or allocate beyond it.

use crate::error::ProtocolError;
use crate::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_STRING_LEN};
use bytes::{Buf, BufMut, Bytes};

/// Size bounds enforced while encoding and decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecLimits {
    /// Maximum frame length (packet id + payload) in bytes.
    pub max_frame_size: u32,
    /// Maximum byte length of a single string field.
    pub max_string_len: u16,
}

impl Default for CodecLimits {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_string_len: DEFAULT_MAX_STRING_LEN,
        }
    }
}

impl CodecLimits {
    pub fn with_max_frame_size(mut self, max: u32) -> Self {
        self.max_frame_size = max;
        self
    }

    pub fn with_max_string_len(mut self, max: u16) -> Self {
        self.max_string_len = max;
        self
    }
}

fn ensure_remaining(buf: &Bytes, needed: usize, what: &str) -> Result<(), ProtocolError> {
    if buf.remaining() < needed {
        return Err(ProtocolError::malformed(format!(
            "{what}: need {needed} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

pub fn read_u8(buf: &mut Bytes) -> Result<u8, ProtocolError> {
    ensure_remaining(buf, 1, "u8")?;
    Ok(buf.get_u8())
}

pub fn read_i8(buf: &mut Bytes) -> Result<i8, ProtocolError> {
    ensure_remaining(buf, 1, "i8")?;
    Ok(buf.get_i8())
}

pub fn read_u16(buf: &mut Bytes) -> Result<u16, ProtocolError> {
    ensure_remaining(buf, 2, "u16")?;
    Ok(buf.get_u16())
}

pub fn read_i16(buf: &mut Bytes) -> Result<i16, ProtocolError> {
    ensure_remaining(buf, 2, "i16")?;
    Ok(buf.get_i16())
}

pub fn read_u32(buf: &mut Bytes) -> Result<u32, ProtocolError> {
    ensure_remaining(buf, 4, "u32")?;
    Ok(buf.get_u32())
}

pub fn read_i32(buf: &mut Bytes) -> Result<i32, ProtocolError> {
    ensure_remaining(buf, 4, "i32")?;
    Ok(buf.get_i32())
}

pub fn read_u64(buf: &mut Bytes) -> Result<u64, ProtocolError> {
    ensure_remaining(buf, 8, "u64")?;
    Ok(buf.get_u64())
}

pub fn read_i64(buf: &mut Bytes) -> Result<i64, ProtocolError> {
    ensure_remaining(buf, 8, "i64")?;
    Ok(buf.get_i64())
}

/// Writes a `u16`-length-prefixed UTF-8 string.
///
/// Fails with [`ProtocolError::StringTooLong`] if the encoded string exceeds
/// `max_len` bytes.
pub fn write_string(buf: &mut impl BufMut, s: &str, max_len: u16) -> Result<(), ProtocolError> {
    let len = s.len();
    if len > max_len as usize {
        return Err(ProtocolError::StringTooLong {
            len,
            max: max_len as usize,
        });
    }
    buf.put_u16(len as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}

/// Shortens `s` to at most `max_len` bytes without splitting a character.
pub fn truncate_str(s: &str, max_len: u16) -> &str {
    let max = max_len as usize;
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Reads a `u16`-length-prefixed UTF-8 string.
pub fn read_string(buf: &mut Bytes, max_len: u16) -> Result<String, ProtocolError> {
    let len = read_u16(buf)? as usize;
    if len > max_len as usize {
        return Err(ProtocolError::malformed(format!(
            "string length {len} exceeds maximum {max_len}"
        )));
    }
    ensure_remaining(buf, len, "string")?;
    let data = buf.split_to(len);
    String::from_utf8(data.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Writes a `u32`-length-prefixed byte blob.
pub fn write_blob(buf: &mut impl BufMut, data: &[u8]) -> Result<(), ProtocolError> {
    let len = u32::try_from(data.len())
        .map_err(|_| ProtocolError::malformed(format!("blob of {} bytes", data.len())))?;
    buf.put_u32(len);
    buf.put_slice(data);
    Ok(())
}

/// Reads a `u32`-length-prefixed byte blob without copying.
pub fn read_blob(buf: &mut Bytes) -> Result<Bytes, ProtocolError> {
    let len = read_u32(buf)? as usize;
    ensure_remaining(buf, len, "blob")?;
    Ok(buf.split_to(len))
}

/// Fails if a decoder left bytes behind in the payload.
pub fn expect_end(buf: &Bytes, packet: &str) -> Result<(), ProtocolError> {
    if buf.has_remaining() {
        return Err(ProtocolError::malformed(format!(
            "{} trailing bytes after {packet}",
            buf.remaining()
        )));
    }
    Ok(())
}
