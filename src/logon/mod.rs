//! Logon server protocol
//!
//! One [`LogonSession`] per client connection. The client proves its
//! password with SRP6, optionally a TOTP token, then asks for the realm list.
//! A returning client can skip SRP6 with a reconnect proof over the key
//! stored at its last logon.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tracing::warn;

use crate::config::SecurityConfig;
use crate::constants::{
    CHALLENGE_HEADER_SIZE, LOGON_PROOF_BODY, MAX_CHALLENGE_BODY, MIN_CHALLENGE_BODY,
    RECONNECT_PROOF_BODY, RECONNECT_SEED_LENGTH, REALM_LIST_BODY,
};
use crate::crypto::{random_bytes, SessionKey, Srp6Transcript};
use crate::db::{AccountRecord, AccountStore, WrongPasswordPolicy};
use crate::error::SessionError;
use crate::protocol::{AuthCmd, LogonProofRequest, MessageWriter};
use crate::rate_limit::RateLimiter;
use crate::session::{
    AccountLevel, BodySize, DispatchEntry, DispatchError, DispatchTable, DispatchTableBuilder,
    Frame, Protocol, Session, SessionState, StateSet,
};

mod handlers;

/// Services shared by every logon session.
pub struct LogonContext {
    pub store: Arc<dyn AccountStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub security: SecurityConfig,
    /// Keys the fake salts handed out for unknown names.
    fake_salt_secret: [u8; 32],
}

impl LogonContext {
    pub fn new(
        store: Arc<dyn AccountStore>,
        rate_limiter: Arc<RateLimiter>,
        security: SecurityConfig,
    ) -> Self {
        Self {
            store,
            rate_limiter,
            security,
            fake_salt_secret: random_bytes(),
        }
    }

    pub fn wrong_password_policy(&self) -> WrongPasswordPolicy {
        WrongPasswordPolicy::from(&self.security)
    }
}

/// Client details from the challenge.
#[derive(Debug, Clone, Default)]
struct ClientInfo {
    build: u16,
    os: String,
    locale: String,
}

pub struct LogonSession {
    peer: SocketAddr,
    state: SessionState,
    outbound: Vec<u8>,
    username: Option<String>,
    client: ClientInfo,
    /// Set once the store has confirmed the name exists.
    account: Option<AccountRecord>,
    transcript: Option<Srp6Transcript>,
    reconnect_seed: [u8; RECONNECT_SEED_LENGTH],
    security: AccountLevel,
    session_key: Option<SessionKey>,
}

impl LogonSession {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            state: SessionState::Initial,
            outbound: Vec::new(),
            username: None,
            client: ClientInfo::default(),
            account: None,
            transcript: None,
            reconnect_seed: [0; RECONNECT_SEED_LENGTH],
            security: AccountLevel::Player,
            session_key: None,
        }
    }

    /// Key agreed by the last successful proof.
    pub fn session_key(&self) -> Option<&SessionKey> {
        self.session_key.as_ref()
    }

    fn reply(&mut self, write: impl FnOnce(&mut MessageWriter)) {
        let mut writer = MessageWriter::new();
        write(&mut writer);
        self.outbound.extend_from_slice(writer.as_bytes());
    }

    /// Step the state machine, refusing transitions the protocol does not have.
    fn advance(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.state.can_advance_to(next, Protocol::Logon) {
            warn!("{}: illegal transition {} -> {}", self.peer, self.state, next);
            return Err(SessionError::InvalidState {
                name: "state transition",
                state: self.state,
            });
        }
        self.state = next;
        Ok(())
    }

    fn ip(&self) -> String {
        self.peer.ip().to_string()
    }

    fn username(&self) -> &str {
        self.username.as_deref().unwrap_or("")
    }
}

impl Session for LogonSession {
    const PROTOCOL: Protocol = Protocol::Logon;

    fn state(&self) -> SessionState {
        self.state
    }

    fn close(&mut self) {
        self.state = SessionState::Closed;
        self.transcript = None;
    }

    fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn security(&self) -> AccountLevel {
        self.security
    }

    fn account(&self) -> Option<&str> {
        self.username.as_deref()
    }

    fn next_frame(&mut self, inbound: &mut BytesMut) -> Result<Option<Frame>, SessionError> {
        let Some(&id) = inbound.first() else {
            return Ok(None);
        };
        // Logon commands carry no length of their own, so anything we cannot
        // size ends the stream.
        let unknown = SessionError::UnknownMessage { opcode: id as u16 };
        let Some(cmd) = AuthCmd::from_id(id) else {
            return Err(unknown);
        };

        let (header_len, body_len) = match cmd {
            AuthCmd::LogonChallenge | AuthCmd::ReconnectChallenge => {
                if inbound.len() < CHALLENGE_HEADER_SIZE {
                    return Ok(None);
                }
                let size = u16::from_le_bytes([inbound[2], inbound[3]]) as usize;
                if size > MAX_CHALLENGE_BODY {
                    return Err(SessionError::OversizedMessage {
                        name: cmd.name(),
                        len: size,
                        max: MAX_CHALLENGE_BODY,
                    });
                }
                (CHALLENGE_HEADER_SIZE, size)
            }
            AuthCmd::LogonProof => match LogonProofRequest::body_len(&inbound[1..]) {
                Some(len) => (1, len),
                None => return Ok(None),
            },
            AuthCmd::ReconnectProof => (1, RECONNECT_PROOF_BODY),
            AuthCmd::RealmList => (1, REALM_LIST_BODY),
            // patch transfer is not served
            _ => return Err(unknown),
        };

        if inbound.len() < header_len + body_len {
            return Ok(None);
        }
        let mut frame = inbound.split_to(header_len + body_len);
        let body = frame.split_off(header_len);
        Ok(Some(Frame {
            opcode: id as u16,
            body,
        }))
    }

    fn take_outbound(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbound)
    }
}

/// Build the logon dispatch table around a shared context.
pub fn logon_table(ctx: Arc<LogonContext>) -> Result<DispatchTable<LogonSession>, DispatchError> {
    use SessionState::*;

    let mut builder = DispatchTableBuilder::new(0x100);

    let c = ctx.clone();
    builder.register(DispatchEntry::new(
        AuthCmd::LogonChallenge.id() as u16,
        AuthCmd::LogonChallenge.name(),
        StateSet::of(&[Initial]),
        BodySize::Between(MIN_CHALLENGE_BODY, MAX_CHALLENGE_BODY),
        move |session: &mut LogonSession, reader| handlers::handle_logon_challenge(&c, session, reader),
    ))?;

    let c = ctx.clone();
    builder.register(DispatchEntry::new(
        AuthCmd::LogonProof.id() as u16,
        AuthCmd::LogonProof.name(),
        StateSet::of(&[LogonProofPending]),
        BodySize::AtLeast(LOGON_PROOF_BODY),
        move |session: &mut LogonSession, reader| handlers::handle_logon_proof(&c, session, reader),
    ))?;

    let c = ctx.clone();
    builder.register(DispatchEntry::new(
        AuthCmd::ReconnectChallenge.id() as u16,
        AuthCmd::ReconnectChallenge.name(),
        StateSet::of(&[Initial]),
        BodySize::Between(MIN_CHALLENGE_BODY, MAX_CHALLENGE_BODY),
        move |session: &mut LogonSession, reader| handlers::handle_reconnect_challenge(&c, session, reader),
    ))?;

    let c = ctx.clone();
    builder.register(DispatchEntry::new(
        AuthCmd::ReconnectProof.id() as u16,
        AuthCmd::ReconnectProof.name(),
        StateSet::of(&[ReconnectProofPending]),
        BodySize::Exact(RECONNECT_PROOF_BODY),
        move |session: &mut LogonSession, reader| handlers::handle_reconnect_proof(&c, session, reader),
    ))?;

    builder.register(DispatchEntry::new(
        AuthCmd::RealmList.id() as u16,
        AuthCmd::RealmList.name(),
        StateSet::of(&[Authenticated]),
        BodySize::Exact(REALM_LIST_BODY),
        move |session: &mut LogonSession, reader| handlers::handle_realm_list(&ctx, session, reader),
    ))?;

    Ok(builder.build())
}
