//! Binary message reader for the logon and world protocols
//!
//! Integers are little-endian unless the method name says otherwise. Every read
//! checks the remaining length first and leaves the cursor untouched on failure.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("Buffer underrun: needed {needed} bytes, only {available} available")]
    BufferUnderrun { needed: usize, available: usize },

    #[error("String not null-terminated")]
    StringNotTerminated,

    #[error("Invalid UTF-8 in string")]
    InvalidUtf8,
}

pub type ReadResult<T> = Result<T, ReadError>;

/// Cursor over a borrowed message body.
pub struct MessageReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MessageReader<'a> {
    /// Create a new reader from a byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Get the current read position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Get the number of bytes remaining.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Check if we've reached the end of the message.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Get the total length of the data.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    fn take(&mut self, count: usize) -> ReadResult<&'a [u8]> {
        if count > self.remaining() {
            return Err(ReadError::BufferUnderrun {
                needed: count,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    /// Skip a number of bytes.
    pub fn skip(&mut self, count: usize) -> ReadResult<()> {
        self.take(count).map(|_| ())
    }

    pub fn read_u8(&mut self) -> ReadResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> ReadResult<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> ReadResult<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> ReadResult<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    /// Read an unsigned 16-bit integer (big-endian). Used by world packet headers.
    pub fn read_u16_be(&mut self) -> ReadResult<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32_be(&mut self) -> ReadResult<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_f32(&mut self) -> ReadResult<f32> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    /// Read a fixed-size array, e.g. a 32-byte public value or a 20-byte digest.
    pub fn read_array<const N: usize>(&mut self) -> ReadResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read a fixed-length byte array.
    pub fn read_bytes(&mut self, len: usize) -> ReadResult<Vec<u8>> {
        Ok(self.take(len)?.to_vec())
    }

    /// Read a null-terminated string.
    ///
    /// Advances position past the null terminator.
    pub fn read_cstring(&mut self) -> ReadResult<String> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ReadError::StringNotTerminated)?;
        let value = std::str::from_utf8(&rest[..end])
            .map_err(|_| ReadError::InvalidUtf8)?
            .to_string();
        self.pos += end + 1;
        Ok(value)
    }

    /// Read a string prefixed by a single length byte.
    pub fn read_pstring(&mut self) -> ReadResult<String> {
        let start = self.pos;
        let len = self.read_u8()? as usize;
        let bytes = match self.take(len) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.pos = start;
                return Err(e);
            }
        };
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_string()),
            Err(_) => {
                self.pos = start;
                Err(ReadError::InvalidUtf8)
            }
        }
    }

    /// Read a four-character code as sent by the client (byte-reversed,
    /// NUL padded), e.g. `"68x\0"` becomes `"x86"`.
    pub fn read_fourcc(&mut self) -> ReadResult<String> {
        let raw: [u8; 4] = self.read_array()?;
        Ok(raw
            .iter()
            .rev()
            .filter(|&&b| b != 0)
            .map(|&b| b as char)
            .collect())
    }

    /// Read a packed (mask-prefixed) 64-bit identifier.
    pub fn read_packed_guid(&mut self) -> ReadResult<u64> {
        let start = self.pos;
        let mask = self.read_u8()?;
        let needed = mask.count_ones() as usize;
        if needed > self.remaining() {
            let available = self.remaining();
            self.pos = start;
            return Err(ReadError::BufferUnderrun { needed, available });
        }
        let mut value = 0u64;
        for i in 0..8 {
            if mask & (1 << i) != 0 {
                value |= (self.read_u8()? as u64) << (i * 8);
            }
        }
        Ok(value)
    }

    /// Peek at the next byte without consuming it.
    pub fn peek_u8(&self) -> ReadResult<u8> {
        self.data.get(self.pos).copied().ok_or(ReadError::BufferUnderrun {
            needed: 1,
            available: 0,
        })
    }

    /// Get a slice of the remaining data.
    pub fn remaining_data(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u8() {
        let data = [0x42, 0xFF, 0x00];
        let mut reader = MessageReader::new(&data);

        assert_eq!(reader.read_u8().unwrap(), 0x42);
        assert_eq!(reader.read_u8().unwrap(), 0xFF);
        assert_eq!(reader.read_u8().unwrap(), 0x00);
        assert!(reader.read_u8().is_err());
    }

    #[test]
    fn test_read_u16_both_orders() {
        let data = [0x34, 0x12, 0x12, 0x34];
        let mut reader = MessageReader::new(&data);

        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.read_u16_be().unwrap(), 0x1234);
    }

    #[test]
    fn test_read_u32_and_u64_little_endian() {
        let data = [
            0x78, 0x56, 0x34, 0x12, 0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01,
        ];
        let mut reader = MessageReader::new(&data);

        assert_eq!(reader.read_u32().unwrap(), 0x12345678);
        assert_eq!(reader.read_u64().unwrap(), 0x0102030405060708);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_underrun_reports_sizes_and_keeps_cursor() {
        let data = [1, 2, 3];
        let mut reader = MessageReader::new(&data);
        reader.read_u8().unwrap();

        assert_eq!(
            reader.read_u32(),
            Err(ReadError::BufferUnderrun {
                needed: 4,
                available: 2
            })
        );
        assert_eq!(reader.position(), 1);
        assert_eq!(reader.read_u16().unwrap(), 0x0302);
    }

    #[test]
    fn test_read_bytes_never_reads_past_end() {
        let data = [0xAA; 10];
        for declared in 11..20 {
            let mut reader = MessageReader::new(&data);
            assert!(matches!(
                reader.read_bytes(declared),
                Err(ReadError::BufferUnderrun { available: 10, .. })
            ));
        }
    }

    #[test]
    fn test_read_cstring() {
        let data = b"Hello\x00World\x00";
        let mut reader = MessageReader::new(data);

        assert_eq!(reader.read_cstring().unwrap(), "Hello");
        assert_eq!(reader.read_cstring().unwrap(), "World");
    }

    #[test]
    fn test_cstring_not_terminated() {
        let mut reader = MessageReader::new(b"Hello");

        assert_eq!(reader.read_cstring(), Err(ReadError::StringNotTerminated));
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_read_pstring() {
        let data = [6, b'T', b'E', b'S', b'T', b'E', b'R', 0, 0xFF];
        let mut reader = MessageReader::new(&data);

        assert_eq!(reader.read_pstring().unwrap(), "TESTER");
        assert_eq!(reader.read_pstring().unwrap(), "");
        assert!(reader.read_pstring().is_err());
    }

    #[test]
    fn test_pstring_length_past_end() {
        let data = [9, b'A', b'B'];
        let mut reader = MessageReader::new(&data);

        assert_eq!(
            reader.read_pstring(),
            Err(ReadError::BufferUnderrun {
                needed: 9,
                available: 2
            })
        );
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_read_fourcc() {
        let mut reader = MessageReader::new(b"68x\x00niW\x00SUne");

        assert_eq!(reader.read_fourcc().unwrap(), "x86");
        assert_eq!(reader.read_fourcc().unwrap(), "Win");
        assert_eq!(reader.read_fourcc().unwrap(), "enUS");
    }

    #[test]
    fn test_read_packed_guid() {
        // mask 0b0000_0101: bytes 0 and 2 present
        let data = [0x05, 0x2A, 0x10];
        let mut reader = MessageReader::new(&data);

        assert_eq!(reader.read_packed_guid().unwrap(), 0x0010_002A);
    }

    #[test]
    fn test_packed_guid_truncated() {
        let data = [0xFF, 1, 2, 3];
        let mut reader = MessageReader::new(&data);

        assert_eq!(
            reader.read_packed_guid(),
            Err(ReadError::BufferUnderrun {
                needed: 8,
                available: 3
            })
        );
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_peek() {
        let data = [0x10, 0x00];
        let reader = MessageReader::new(&data);

        assert_eq!(reader.peek_u8().unwrap(), 0x10);
        assert_eq!(reader.position(), 0);
    }
}
