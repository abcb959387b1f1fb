//! Session-level errors shared by the logon and world protocols

use thiserror::Error;

use crate::db::StoreError;
use crate::protocol::ReadError;
use crate::session::SessionState;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Message decoding failed: {0}")]
    BufferUnderrun(#[from] ReadError),

    #[error("Unknown message 0x{opcode:04X}")]
    UnknownMessage { opcode: u16 },

    #[error("{name} not accepted in state {state}")]
    InvalidState {
        name: &'static str,
        state: SessionState,
    },

    #[error("{name} body too short: {len} bytes, need {min}")]
    TruncatedMessage {
        name: &'static str,
        len: usize,
        min: usize,
    },

    #[error("{name} body too long: {len} bytes, max {max}")]
    OversizedMessage {
        name: &'static str,
        len: usize,
        max: usize,
    },

    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("{name} requires a higher security level")]
    PermissionDenied { name: &'static str },

    #[error("Cryptographic verification failed for {account}")]
    CryptoVerificationFailed { account: String },

    #[error("Account {account} is locked to another address")]
    AccountLocked { account: String },

    #[error("Account {account} is banned")]
    AccountBanned { account: String },

    #[error("Rate limit exceeded for {ip}")]
    RateLimited { ip: String },

    #[error("Account store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Errors that leave the stream position intact, so the next frame can
    /// still be read.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnknownMessage { .. })
    }
}
