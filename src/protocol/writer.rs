//! Binary message writer for the logon and world protocols
//!
//! Mirrors [`MessageReader`](super::MessageReader): little-endian by default,
//! explicit `_be` variants for header fields.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    #[error("String of {len} bytes does not fit a one-byte length prefix")]
    StringTooLong { len: usize },

    #[error("String has a NUL byte at offset {offset}")]
    InteriorNul { offset: usize },
}

/// Binary message writer that builds byte buffers.
pub struct MessageWriter {
    buffer: Vec<u8>,
}

impl MessageWriter {
    /// Create a new writer with default capacity.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(128),
        }
    }

    /// Create a new writer with specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Get the current length of the buffer.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buffer.push(value);
        self
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_u16_be(&mut self, value: u16) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn write_u32_be(&mut self, value: u32) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn write_f32(&mut self, value: f32) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Write a null-terminated string. A NUL inside `value` would end the
    /// string early on the wire, so it is refused and nothing is written.
    pub fn write_cstring(&mut self, value: &str) -> Result<&mut Self, WriteError> {
        if let Some(offset) = value.bytes().position(|b| b == 0) {
            return Err(WriteError::InteriorNul { offset });
        }
        self.buffer.extend_from_slice(value.as_bytes());
        self.buffer.push(0);
        Ok(self)
    }

    /// Write a string with a single length byte in front of it.
    pub fn write_pstring(&mut self, value: &str) -> Result<&mut Self, WriteError> {
        let len = u8::try_from(value.len())
            .map_err(|_| WriteError::StringTooLong { len: value.len() })?;
        self.buffer.push(len);
        self.buffer.extend_from_slice(value.as_bytes());
        Ok(self)
    }

    /// Write a four-character code in the client's reversed byte order.
    pub fn write_fourcc(&mut self, value: &str) -> &mut Self {
        let mut raw = [0u8; 4];
        // "x86" is sent as "68x\0": reversed text first, padding last
        for (slot, byte) in raw.iter_mut().zip(value.bytes().rev().take(4)) {
            *slot = byte;
        }
        self.buffer.extend_from_slice(&raw);
        self
    }

    /// Write a 64-bit identifier in packed form: a presence mask followed by
    /// the non-zero bytes in ascending order.
    pub fn write_packed_guid(&mut self, value: u64) -> &mut Self {
        let mask_pos = self.buffer.len();
        self.buffer.push(0);
        let mut mask = 0u8;
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            if byte != 0 {
                mask |= 1 << i;
                self.buffer.push(byte);
            }
        }
        self.buffer[mask_pos] = mask;
        self
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(bytes);
        self
    }

    /// Overwrite a little-endian u16 at `offset`, for length fields that are
    /// only known once the body is complete.
    pub fn patch_u16_at(&mut self, offset: usize, value: u16) {
        self.buffer[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Consume the writer and return the built buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the internal buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}

impl Default for MessageWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl From<MessageWriter> for Vec<u8> {
    fn from(writer: MessageWriter) -> Self {
        writer.into_bytes()
    }
}
