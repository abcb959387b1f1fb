//! Message structures for the logon protocol
//!
//! Request types parse a body whose command byte (and, for challenges, the
//! error byte and length) has already been consumed by the framer. Response
//! writers emit the complete message including the command byte.

use super::reader::ReadResult;
use super::{AuthCmd, AuthResult, MessageReader, MessageWriter, WriteError};
use crate::constants::{
    DIGEST_LENGTH, EPHEMERAL_KEY_LENGTH, MAX_ACCOUNT_NAME, RECONNECT_SEED_LENGTH, SALT_LENGTH,
    SECURITY_FLAG_AUTHENTICATOR, SRP6_G, SRP6_N_BE, VERSION_CHALLENGE,
};

// =============================================================================
// CHALLENGE
// =============================================================================

/// AUTH_LOGON_CHALLENGE / AUTH_RECONNECT_CHALLENGE body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRequest {
    pub game_name: [u8; 4],
    pub version: [u8; 3],
    pub build: u16,
    pub platform: String,
    pub os: String,
    pub locale: String,
    pub timezone_bias: u32,
    pub ip: u32,
    pub account: String,
}

impl ChallengeRequest {
    pub fn parse(reader: &mut MessageReader) -> ReadResult<Self> {
        Ok(Self {
            game_name: reader.read_array()?,
            version: reader.read_array()?,
            build: reader.read_u16()?,
            platform: reader.read_fourcc()?,
            os: reader.read_fourcc()?,
            locale: reader.read_fourcc()?,
            timezone_bias: reader.read_u32()?,
            ip: reader.read_u32()?,
            account: reader.read_pstring()?,
        })
    }

    /// Validate the parsed fields against the declared body length.
    pub fn validate(&self, body_len: usize) -> Result<(), &'static str> {
        if self.account.is_empty() || self.account.len() > MAX_ACCOUNT_NAME {
            return Err("Invalid account name length");
        }
        // 30 fixed bytes precede the name
        if body_len != 30 + self.account.len() {
            return Err("Declared size does not match account name length");
        }
        Ok(())
    }
}

/// Successful logon challenge response.
#[derive(Debug, Clone)]
pub struct ChallengeResponse {
    pub server_public: [u8; EPHEMERAL_KEY_LENGTH],
    pub salt: [u8; SALT_LENGTH],
    pub security_flags: u8,
}

impl ChallengeResponse {
    pub fn write(&self, writer: &mut MessageWriter) {
        let mut n_le = SRP6_N_BE;
        n_le.reverse();

        writer
            .write_u8(AuthCmd::LogonChallenge.id())
            .write_u8(0)
            .write_u8(AuthResult::Success.code())
            .write_bytes(&self.server_public)
            .write_u8(1)
            .write_u8(SRP6_G as u8)
            .write_u8(EPHEMERAL_KEY_LENGTH as u8)
            .write_bytes(&n_le)
            .write_bytes(&self.salt)
            .write_bytes(&VERSION_CHALLENGE)
            .write_u8(self.security_flags);
    }
}

/// Rejected logon or reconnect challenge.
pub fn write_challenge_failure(writer: &mut MessageWriter, cmd: AuthCmd, result: AuthResult) {
    writer.write_u8(cmd.id());
    if cmd == AuthCmd::LogonChallenge {
        writer.write_u8(0);
    }
    writer.write_u8(result.code());
}

// =============================================================================
// PROOF
// =============================================================================

/// AUTH_LOGON_PROOF body.
#[derive(Debug, Clone)]
pub struct LogonProofRequest {
    pub client_public: [u8; EPHEMERAL_KEY_LENGTH],
    pub client_proof: [u8; DIGEST_LENGTH],
    pub crc_hash: [u8; DIGEST_LENGTH],
    pub key_count: u8,
    pub security_flags: u8,
    pub token: Option<String>,
}

impl LogonProofRequest {
    pub fn parse(reader: &mut MessageReader) -> ReadResult<Self> {
        let client_public = reader.read_array()?;
        let client_proof = reader.read_array()?;
        let crc_hash = reader.read_array()?;
        let key_count = reader.read_u8()?;
        let security_flags = reader.read_u8()?;
        let token = if security_flags & SECURITY_FLAG_AUTHENTICATOR != 0 {
            Some(reader.read_pstring()?)
        } else {
            None
        };

        Ok(Self {
            client_public,
            client_proof,
            crc_hash,
            key_count,
            security_flags,
            token,
        })
    }

    /// Total body length implied by the first bytes of a proof, once the
    /// token length byte (if any) is available.
    pub fn body_len(body: &[u8]) -> Option<usize> {
        const FIXED: usize = 74;
        let flags = *body.get(FIXED - 1)?;
        if flags & SECURITY_FLAG_AUTHENTICATOR == 0 {
            return Some(FIXED);
        }
        let token_len = *body.get(FIXED)? as usize;
        Some(FIXED + 1 + token_len)
    }
}

/// Successful proof response carrying the server proof M2.
pub fn write_proof_success(writer: &mut MessageWriter, server_proof: &[u8; DIGEST_LENGTH]) {
    writer
        .write_u8(AuthCmd::LogonProof.id())
        .write_u8(AuthResult::Success.code())
        .write_bytes(server_proof)
        .write_u32(0x0080_0000) // account flags
        .write_u32(0) // survey id
        .write_u16(0); // login flags
}

pub fn write_proof_failure(writer: &mut MessageWriter, result: AuthResult) {
    writer
        .write_u8(AuthCmd::LogonProof.id())
        .write_u8(result.code())
        .write_u8(0)
        .write_u8(0);
}

// =============================================================================
// RECONNECT
// =============================================================================

pub fn write_reconnect_challenge(writer: &mut MessageWriter, seed: &[u8; RECONNECT_SEED_LENGTH]) {
    writer
        .write_u8(AuthCmd::ReconnectChallenge.id())
        .write_u8(AuthResult::Success.code())
        .write_bytes(seed)
        .write_bytes(&VERSION_CHALLENGE);
}

/// AUTH_RECONNECT_PROOF body.
#[derive(Debug, Clone)]
pub struct ReconnectProofRequest {
    pub r1: [u8; RECONNECT_SEED_LENGTH],
    pub r2: [u8; DIGEST_LENGTH],
    pub r3: [u8; DIGEST_LENGTH],
    pub key_count: u8,
}

impl ReconnectProofRequest {
    pub fn parse(reader: &mut MessageReader) -> ReadResult<Self> {
        Ok(Self {
            r1: reader.read_array()?,
            r2: reader.read_array()?,
            r3: reader.read_array()?,
            key_count: reader.read_u8()?,
        })
    }
}

pub fn write_reconnect_proof(writer: &mut MessageWriter, result: AuthResult) {
    writer
        .write_u8(AuthCmd::ReconnectProof.id())
        .write_u8(result.code())
        .write_u16(0);
}

// =============================================================================
// REALM LIST
// =============================================================================

/// One row of the realm list as the client sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct RealmEntry {
    pub id: u8,
    pub realm_type: u8,
    pub locked: bool,
    pub flags: u8,
    pub name: String,
    pub address: String,
    pub population: f32,
    pub characters: u8,
    pub timezone: u8,
}

/// REALM_LIST response: header, one block per realm, footer. On error the
/// writer holds a partial packet and should be discarded.
pub fn write_realm_list(writer: &mut MessageWriter, realms: &[RealmEntry]) -> Result<(), WriteError> {
    let start = writer.len();
    writer
        .write_u8(AuthCmd::RealmList.id())
        .write_u16(0)
        .write_u32(0)
        .write_u16(realms.len() as u16);

    for realm in realms {
        writer
            .write_u8(realm.realm_type)
            .write_u8(realm.locked as u8)
            .write_u8(realm.flags)
            .write_cstring(&realm.name)?
            .write_cstring(&realm.address)?
            .write_f32(realm.population)
            .write_u8(realm.characters)
            .write_u8(realm.timezone)
            .write_u8(realm.id);
    }

    writer.write_u8(0x10).write_u8(0x00);

    let size = writer.len() - start - 3;
    writer.patch_u16_at(start + 1, size as u16);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge_body(account: &str, build: u16) -> Vec<u8> {
        let mut writer = MessageWriter::new();
        writer
            .write_bytes(b"WoW\0")
            .write_bytes(&[3, 3, 5])
            .write_u16(build)
            .write_fourcc("x86")
            .write_fourcc("Win")
            .write_fourcc("enUS")
            .write_u32(60)
            .write_u32(0x0100_007F);
        writer.write_pstring(account).unwrap();
        writer.into_bytes()
    }

    #[test]
    fn test_parse_challenge() {
        let body = challenge_body("TESTER", 12340);
        let mut reader = MessageReader::new(&body);
        let request = ChallengeRequest::parse(&mut reader).unwrap();

        assert_eq!(&request.game_name, b"WoW\0");
        assert_eq!(request.version, [3, 3, 5]);
        assert_eq!(request.build, 12340);
        assert_eq!(request.platform, "x86");
        assert_eq!(request.os, "Win");
        assert_eq!(request.locale, "enUS");
        assert_eq!(request.account, "TESTER");
        assert!(reader.is_empty());
        assert!(request.validate(body.len()).is_ok());
    }

    #[test]
    fn test_challenge_size_mismatch_rejected() {
        let body = challenge_body("TESTER", 12340);
        let mut reader = MessageReader::new(&body);
        let request = ChallengeRequest::parse(&mut reader).unwrap();

        assert!(request.validate(body.len() + 1).is_err());
    }

    #[test]
    fn test_challenge_response_layout() {
        let response = ChallengeResponse {
            server_public: [0xAB; 32],
            salt: [0xCD; 32],
            security_flags: 0,
        };
        let mut writer = MessageWriter::new();
        response.write(&mut writer);
        let bytes = writer.into_bytes();

        assert_eq!(bytes.len(), 3 + 32 + 2 + 1 + 32 + 32 + 16 + 1);
        assert_eq!(&bytes[..3], &[0x00, 0x00, 0x00]);
        assert_eq!(&bytes[35..38], &[1, 7, 32]);
        // N is sent little-endian
        assert_eq!(bytes[38], 0xB7);
        assert_eq!(bytes[69], 0x89);
    }

    #[test]
    fn test_challenge_failure_layout() {
        let mut writer = MessageWriter::new();
        write_challenge_failure(&mut writer, AuthCmd::LogonChallenge, AuthResult::FailVersionInvalid);
        assert_eq!(writer.as_bytes(), &[0x00, 0x00, 0x09]);

        let mut writer = MessageWriter::new();
        write_challenge_failure(&mut writer, AuthCmd::ReconnectChallenge, AuthResult::FailBanned);
        assert_eq!(writer.as_bytes(), &[0x02, 0x03]);
    }

    #[test]
    fn test_proof_body_len() {
        let mut body = vec![0u8; 74];
        assert_eq!(LogonProofRequest::body_len(&body[..73]), None);
        assert_eq!(LogonProofRequest::body_len(&body), Some(74));

        body[73] = SECURITY_FLAG_AUTHENTICATOR;
        assert_eq!(LogonProofRequest::body_len(&body), None);
        body.push(6);
        assert_eq!(LogonProofRequest::body_len(&body), Some(81));
    }

    #[test]
    fn test_parse_proof_with_token() {
        let mut body = vec![0x11; 32];
        body.extend_from_slice(&[0x22; 20]);
        body.extend_from_slice(&[0x33; 20]);
        body.push(0);
        body.push(SECURITY_FLAG_AUTHENTICATOR);
        body.push(6);
        body.extend_from_slice(b"123456");

        let mut reader = MessageReader::new(&body);
        let proof = LogonProofRequest::parse(&mut reader).unwrap();

        assert_eq!(proof.client_public, [0x11; 32]);
        assert_eq!(proof.client_proof, [0x22; 20]);
        assert_eq!(proof.token.as_deref(), Some("123456"));
        assert!(reader.is_empty());
    }

    #[test]
    fn test_proof_responses() {
        let mut writer = MessageWriter::new();
        write_proof_success(&mut writer, &[0xEE; 20]);
        let bytes = writer.into_bytes();
        assert_eq!(bytes.len(), 2 + 20 + 4 + 4 + 2);
        assert_eq!(&bytes[..2], &[0x01, 0x00]);

        let mut writer = MessageWriter::new();
        write_proof_failure(&mut writer, AuthResult::FailUnknownAccount);
        assert_eq!(writer.as_bytes(), &[0x01, 0x04, 0x00, 0x00]);
    }

    #[test]
    fn test_realm_list_size_field() {
        let realms = vec![RealmEntry {
            id: 1,
            realm_type: 1,
            locked: false,
            flags: 0,
            name: "Gate".to_string(),
            address: "127.0.0.1:8085".to_string(),
            population: 0.5,
            characters: 2,
            timezone: 1,
        }];
        let mut writer = MessageWriter::new();
        write_realm_list(&mut writer, &realms).unwrap();
        let bytes = writer.into_bytes();

        let mut reader = MessageReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 0x10);
        let size = reader.read_u16().unwrap() as usize;
        assert_eq!(size, bytes.len() - 3);
        assert_eq!(reader.read_u32().unwrap(), 0);
        assert_eq!(reader.read_u16().unwrap(), 1);
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert_eq!(reader.read_u8().unwrap(), 0);
        assert_eq!(reader.read_u8().unwrap(), 0);
        assert_eq!(reader.read_cstring().unwrap(), "Gate");
        assert_eq!(reader.read_cstring().unwrap(), "127.0.0.1:8085");
        assert_eq!(reader.read_f32().unwrap(), 0.5);
        assert_eq!(reader.read_u8().unwrap(), 2);
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert_eq!(reader.remaining_data(), &[0x10, 0x00]);
    }
}
