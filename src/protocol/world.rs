//! Packet headers and gateway messages for the world protocol
//!
//! Client headers are 6 bytes: a big-endian size that counts the 4-byte
//! opcode plus the body, then a little-endian u32 opcode. Server headers are
//! 4 bytes (big-endian size counting the 2-byte opcode, little-endian u16
//! opcode), or 5 bytes when the size does not fit 15 bits.

use super::reader::ReadResult;
use super::{MessageReader, MessageWriter, ResponseCode, WriteError};
use crate::constants::{
    CLIENT_HEADER_SIZE, DIGEST_LENGTH, LARGE_PACKET_THRESHOLD, MAX_CLIENT_PACKET_SIZE,
    MIN_CLIENT_PACKET_SIZE, NUM_MSG_TYPES,
};

// =============================================================================
// HEADERS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHeader {
    pub size: u16,
    pub opcode: u32,
}

impl ClientHeader {
    /// Decode an already-decrypted header.
    pub fn from_bytes(raw: &[u8; CLIENT_HEADER_SIZE]) -> Self {
        Self {
            size: u16::from_be_bytes([raw[0], raw[1]]),
            opcode: u32::from_le_bytes([raw[2], raw[3], raw[4], raw[5]]),
        }
    }

    pub fn to_bytes(self) -> [u8; CLIENT_HEADER_SIZE] {
        let mut raw = [0u8; CLIENT_HEADER_SIZE];
        raw[..2].copy_from_slice(&self.size.to_be_bytes());
        raw[2..].copy_from_slice(&self.opcode.to_le_bytes());
        raw
    }

    pub fn is_valid_size(self) -> bool {
        self.size >= MIN_CLIENT_PACKET_SIZE && self.size < MAX_CLIENT_PACKET_SIZE
    }

    pub fn is_valid_opcode(self) -> bool {
        self.opcode < NUM_MSG_TYPES as u32
    }

    /// Body bytes that follow the header.
    pub fn body_len(self) -> usize {
        (self.size - MIN_CLIENT_PACKET_SIZE) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerHeader {
    len: usize,
    raw: [u8; 5],
}

impl ServerHeader {
    pub fn new(body_len: usize, opcode: u16) -> Self {
        let size = body_len + 2;
        let mut raw = [0u8; 5];
        let len = if size > LARGE_PACKET_THRESHOLD {
            raw[0] = 0x80 | ((size >> 16) & 0xFF) as u8;
            raw[1] = (size >> 8) as u8;
            raw[2] = size as u8;
            raw[3..5].copy_from_slice(&opcode.to_le_bytes());
            5
        } else {
            raw[..2].copy_from_slice(&(size as u16).to_be_bytes());
            raw[2..4].copy_from_slice(&opcode.to_le_bytes());
            4
        };
        Self { len, raw }
    }

    pub fn is_large(&self) -> bool {
        self.len == 5
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw[..self.len]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.raw[..self.len]
    }
}

// =============================================================================
// AUTH
// =============================================================================

/// SMSG_AUTH_CHALLENGE body.
#[derive(Debug, Clone)]
pub struct AuthChallenge {
    pub seed: [u8; 4],
    pub random: [u8; 32],
}

impl AuthChallenge {
    pub fn write(&self, writer: &mut MessageWriter) {
        writer
            .write_u32(1)
            .write_bytes(&self.seed)
            .write_bytes(&self.random);
    }
}

/// CMSG_AUTH_SESSION body.
#[derive(Debug, Clone)]
pub struct AuthSessionRequest {
    pub build: u32,
    pub login_server_id: u32,
    pub account: String,
    pub login_server_type: u32,
    pub client_seed: [u8; 4],
    pub region_id: u32,
    pub battlegroup_id: u32,
    pub realm_id: u32,
    pub dos_response: u64,
    pub digest: [u8; DIGEST_LENGTH],
    pub addon_data: Vec<u8>,
}

impl AuthSessionRequest {
    pub fn parse(reader: &mut MessageReader) -> ReadResult<Self> {
        Ok(Self {
            build: reader.read_u32()?,
            login_server_id: reader.read_u32()?,
            account: reader.read_cstring()?,
            login_server_type: reader.read_u32()?,
            client_seed: reader.read_array()?,
            region_id: reader.read_u32()?,
            battlegroup_id: reader.read_u32()?,
            realm_id: reader.read_u32()?,
            dos_response: reader.read_u64()?,
            digest: reader.read_array()?,
            addon_data: reader.remaining_data().to_vec(),
        })
    }

    pub fn write(&self, writer: &mut MessageWriter) -> Result<(), WriteError> {
        writer
            .write_u32(self.build)
            .write_u32(self.login_server_id)
            .write_cstring(&self.account)?
            .write_u32(self.login_server_type)
            .write_bytes(&self.client_seed)
            .write_u32(self.region_id)
            .write_u32(self.battlegroup_id)
            .write_u32(self.realm_id)
            .write_u64(self.dos_response)
            .write_bytes(&self.digest)
            .write_bytes(&self.addon_data);
        Ok(())
    }
}

/// Smallest possible CMSG_AUTH_SESSION body: every fixed field plus an empty
/// account name.
pub const MIN_AUTH_SESSION_BODY: usize = 4 + 4 + 1 + 4 + 4 + 4 + 4 + 4 + 8 + DIGEST_LENGTH;

/// SMSG_AUTH_RESPONSE body on success.
pub fn write_auth_ok(writer: &mut MessageWriter, expansion: u8) {
    writer
        .write_u8(ResponseCode::AuthOk.code())
        .write_u32(0) // billing time remaining
        .write_u8(0) // billing plan flags
        .write_u32(0) // billing time rested
        .write_u8(expansion);
}

pub fn write_auth_failure(writer: &mut MessageWriter, code: ResponseCode) {
    writer.write_u8(code.code());
}

// =============================================================================
// PING
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingRequest {
    pub ping: u32,
    pub latency: u32,
}

impl PingRequest {
    pub fn parse(reader: &mut MessageReader) -> ReadResult<Self> {
        Ok(Self {
            ping: reader.read_u32()?,
            latency: reader.read_u32()?,
        })
    }
}

pub fn write_pong(writer: &mut MessageWriter, ping: u32) {
    writer.write_u32(ping);
}
