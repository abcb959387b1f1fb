//! Command and opcode definitions for the logon and world protocols
//!
//! Each enum converts to and from its wire value. The Display impls provide
//! the names used in log lines.

use std::fmt;

// =============================================================================
// LOGON COMMANDS
// =============================================================================

/// First byte of every logon-server message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AuthCmd {
    LogonChallenge = 0x00,
    LogonProof = 0x01,
    ReconnectChallenge = 0x02,
    ReconnectProof = 0x03,
    RealmList = 0x10,
    XferInitiate = 0x30,
    XferData = 0x31,
    XferAccept = 0x32,
    XferResume = 0x33,
    XferCancel = 0x34,
}

impl AuthCmd {
    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            0x00 => Self::LogonChallenge,
            0x01 => Self::LogonProof,
            0x02 => Self::ReconnectChallenge,
            0x03 => Self::ReconnectProof,
            0x10 => Self::RealmList,
            0x30 => Self::XferInitiate,
            0x31 => Self::XferData,
            0x32 => Self::XferAccept,
            0x33 => Self::XferResume,
            0x34 => Self::XferCancel,
            _ => return None,
        })
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Patch transfer commands are recognised but never handled.
    pub fn is_xfer(self) -> bool {
        matches!(
            self,
            Self::XferInitiate | Self::XferData | Self::XferAccept | Self::XferResume | Self::XferCancel
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::LogonChallenge => "AUTH_LOGON_CHALLENGE",
            Self::LogonProof => "AUTH_LOGON_PROOF",
            Self::ReconnectChallenge => "AUTH_RECONNECT_CHALLENGE",
            Self::ReconnectProof => "AUTH_RECONNECT_PROOF",
            Self::RealmList => "REALM_LIST",
            Self::XferInitiate => "XFER_INITIATE",
            Self::XferData => "XFER_DATA",
            Self::XferAccept => "XFER_ACCEPT",
            Self::XferResume => "XFER_RESUME",
            Self::XferCancel => "XFER_CANCEL",
        }
    }
}

impl fmt::Display for AuthCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result codes the logon server sends back in challenge and proof responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthResult {
    Success = 0x00,
    FailBanned = 0x03,
    FailUnknownAccount = 0x04,
    FailIncorrectPassword = 0x05,
    FailAlreadyOnline = 0x06,
    FailDbBusy = 0x08,
    FailVersionInvalid = 0x09,
    FailSuspended = 0x0C,
    FailNoAccess = 0x0D,
    FailLockedEnforced = 0x10,
}

impl AuthResult {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x00 => Self::Success,
            0x03 => Self::FailBanned,
            0x04 => Self::FailUnknownAccount,
            0x05 => Self::FailIncorrectPassword,
            0x06 => Self::FailAlreadyOnline,
            0x08 => Self::FailDbBusy,
            0x09 => Self::FailVersionInvalid,
            0x0C => Self::FailSuspended,
            0x0D => Self::FailNoAccess,
            0x10 => Self::FailLockedEnforced,
            _ => return None,
        })
    }
}

impl fmt::Display for AuthResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "WOW_SUCCESS",
            Self::FailBanned => "WOW_FAIL_BANNED",
            Self::FailUnknownAccount => "WOW_FAIL_UNKNOWN_ACCOUNT",
            Self::FailIncorrectPassword => "WOW_FAIL_INCORRECT_PASSWORD",
            Self::FailAlreadyOnline => "WOW_FAIL_ALREADY_ONLINE",
            Self::FailDbBusy => "WOW_FAIL_DB_BUSY",
            Self::FailVersionInvalid => "WOW_FAIL_VERSION_INVALID",
            Self::FailSuspended => "WOW_FAIL_SUSPENDED",
            Self::FailNoAccess => "WOW_FAIL_NOACCESS",
            Self::FailLockedEnforced => "WOW_FAIL_LOCKED_ENFORCED",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// WORLD OPCODES
// =============================================================================

/// World opcodes the gateway itself understands. Gameplay modules register
/// their own opcodes by raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum WorldOpcode {
    CmsgPing = 0x1DC,
    SmsgPong = 0x1DD,
    SmsgAuthChallenge = 0x1EC,
    CmsgAuthSession = 0x1ED,
    SmsgAuthResponse = 0x1EE,
    CmsgKeepAlive = 0x407,
}

impl WorldOpcode {
    pub fn from_id(id: u16) -> Option<Self> {
        Some(match id {
            0x1DC => Self::CmsgPing,
            0x1DD => Self::SmsgPong,
            0x1EC => Self::SmsgAuthChallenge,
            0x1ED => Self::CmsgAuthSession,
            0x1EE => Self::SmsgAuthResponse,
            0x407 => Self::CmsgKeepAlive,
            _ => return None,
        })
    }

    pub fn id(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for WorldOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CmsgPing => "CMSG_PING",
            Self::SmsgPong => "SMSG_PONG",
            Self::SmsgAuthChallenge => "SMSG_AUTH_CHALLENGE",
            Self::CmsgAuthSession => "CMSG_AUTH_SESSION",
            Self::SmsgAuthResponse => "SMSG_AUTH_RESPONSE",
            Self::CmsgKeepAlive => "CMSG_KEEP_ALIVE",
        };
        write!(f, "{}", name)
    }
}

/// Name of a world opcode for logging, falling back to its hex value.
pub fn describe_opcode(opcode: u16) -> String {
    match WorldOpcode::from_id(opcode) {
        Some(op) => op.to_string(),
        None => format!("0x{:04X}", opcode),
    }
}

/// Result codes carried by SMSG_AUTH_RESPONSE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    AuthOk = 0x0C,
    AuthFailed = 0x0D,
    AuthReject = 0x0E,
    AuthUnavailable = 0x10,
    AuthSystemError = 0x11,
    AuthVersionMismatch = 0x14,
    AuthUnknownAccount = 0x15,
    AuthBanned = 0x1C,
    AuthSuspended = 0x20,
    AuthLockedEnforced = 0x22,
    RealmListRealmNotFound = 0x27,
}

impl ResponseCode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AuthOk => "AUTH_OK",
            Self::AuthFailed => "AUTH_FAILED",
            Self::AuthReject => "AUTH_REJECT",
            Self::AuthUnavailable => "AUTH_UNAVAILABLE",
            Self::AuthSystemError => "AUTH_SYSTEM_ERROR",
            Self::AuthVersionMismatch => "AUTH_VERSION_MISMATCH",
            Self::AuthUnknownAccount => "AUTH_UNKNOWN_ACCOUNT",
            Self::AuthBanned => "AUTH_BANNED",
            Self::AuthSuspended => "AUTH_SUSPENDED",
            Self::AuthLockedEnforced => "AUTH_LOCKED_ENFORCED",
            Self::RealmListRealmNotFound => "REALM_LIST_REALM_NOT_FOUND",
        };
        write!(f, "{}", name)
    }
}
