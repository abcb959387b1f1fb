//! Protocol constants for the 3.3.5a (build 12340) client
//!
//! All values are fixed by the client and cannot be changed.

// =============================================================================
// SERVER CONFIGURATION
// =============================================================================

pub const DEFAULT_LOGON_PORT: u16 = 3724;
pub const DEFAULT_WORLD_PORT: u16 = 8085;
pub const DEFAULT_ADMIN_PORT: u16 = 8080;

/// Builds accepted when the config does not list any.
pub const DEFAULT_ALLOWED_BUILDS: &[u16] = &[12340];

/// Connection limits
pub const MAX_TOTAL_CONNECTIONS: usize = 1000;
pub const MAX_CONNECTIONS_PER_IP: usize = 10;

/// Timing constants
pub const CLEANUP_INTERVAL_SECS: u64 = 60;
pub const READ_CHUNK_SIZE: usize = 4096;

// =============================================================================
// SRP6
// =============================================================================

/// Safe prime N, big-endian.
pub const SRP6_N_BE: [u8; 32] = [
    0x89, 0x4B, 0x64, 0x5E, 0x89, 0xE1, 0x53, 0x5B, 0xBD, 0xAD, 0x5B, 0x8B, 0x29, 0x06, 0x50,
    0x53, 0x08, 0x01, 0xB1, 0x8E, 0xBF, 0xBF, 0x5E, 0x8F, 0xAB, 0x3C, 0x82, 0x87, 0x2A, 0x3E,
    0x9B, 0xB7,
];
pub const SRP6_G: u32 = 7;
pub const SRP6_K: u32 = 3;

pub const SALT_LENGTH: usize = 32;
pub const EPHEMERAL_KEY_LENGTH: usize = 32;
pub const PRIVATE_KEY_LENGTH: usize = 19;
pub const SESSION_KEY_LENGTH: usize = 40;
pub const DIGEST_LENGTH: usize = 20;

/// Random challenge exchanged during reconnect.
pub const RECONNECT_SEED_LENGTH: usize = 16;

/// Sent in the challenge response; the client echoes a checksum we do not verify.
pub const VERSION_CHALLENGE: [u8; 16] = [
    0xBA, 0xA3, 0x1E, 0x99, 0xA0, 0x0B, 0x21, 0x57, 0xFC, 0x37, 0x3F, 0xB3, 0x69, 0xCD, 0xD2,
    0xF1,
];

// =============================================================================
// LOGON PROTOCOL
// =============================================================================

/// Challenge header (cmd, error, size) plus the declared body may not exceed this.
pub const MAX_ACCEPTED_CHALLENGE_SIZE: usize = 51;
pub const CHALLENGE_HEADER_SIZE: usize = 4;
pub const MIN_CHALLENGE_BODY: usize = 30;
pub const MAX_CHALLENGE_BODY: usize = MAX_ACCEPTED_CHALLENGE_SIZE - CHALLENGE_HEADER_SIZE;

pub const LOGON_PROOF_BODY: usize = 74;
pub const RECONNECT_PROOF_BODY: usize = 57;
pub const REALM_LIST_BODY: usize = 4;

/// Security flag in the challenge response asking for a TOTP token.
pub const SECURITY_FLAG_AUTHENTICATOR: u8 = 0x04;

/// Longest account name the client can send.
pub const MAX_ACCOUNT_NAME: usize = 16;
/// The client login screen accepts no more than this.
pub const MAX_PASSWORD_LENGTH: usize = 16;

// =============================================================================
// WORLD PROTOCOL
// =============================================================================

pub const CLIENT_HEADER_SIZE: usize = 6;
/// Client header size field covers the 4-byte opcode plus the body.
pub const MIN_CLIENT_PACKET_SIZE: u16 = 4;
pub const MAX_CLIENT_PACKET_SIZE: u16 = 10240;
/// Opcodes at or above this value are never valid.
pub const NUM_MSG_TYPES: u16 = 0x51F;

/// Server headers switch to a 3-byte size field above this.
pub const LARGE_PACKET_THRESHOLD: usize = 0x7FFF;

/// HMAC seeds for the header cipher, one per direction.
pub const SERVER_ENCRYPTION_KEY: [u8; 16] = [
    0xCC, 0x98, 0xAE, 0x04, 0xE8, 0x97, 0xEA, 0xCA, 0x12, 0xDD, 0xC0, 0x93, 0x42, 0x91, 0x53,
    0x57,
];
pub const SERVER_DECRYPTION_KEY: [u8; 16] = [
    0xC2, 0xB3, 0x72, 0x3C, 0xC6, 0xAE, 0xD9, 0xB5, 0x34, 0x3C, 0x53, 0xEE, 0x2F, 0x43, 0x67,
    0xCE,
];
pub const ARC4_DROP_BYTES: usize = 1024;

/// Pings closer together than this count as over-speed.
pub const MIN_PING_INTERVAL_SECS: u64 = 27;

/// Expansion level granted by AUTH_OK (Wrath of the Lich King).
pub const MAX_EXPANSION: u8 = 2;
