//! World gateway protocol
//!
//! Authenticates a client against the key its logon session stored, switches
//! on the header cipher and then hands frames to whatever handlers the
//! gameplay side registered next to the built-in ones.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use tracing::{error, info, warn};

use crate::config::SecurityConfig;
use crate::constants::{CLIENT_HEADER_SIZE, NUM_MSG_TYPES};
use crate::crypto::{random_bytes, HeaderCrypt};
use crate::db::AccountStore;
use crate::error::SessionError;
use crate::protocol::world::{
    write_auth_failure, AuthChallenge, ClientHeader, ServerHeader, MIN_AUTH_SESSION_BODY,
};
use crate::protocol::{MessageWriter, ResponseCode, WorldOpcode};
use crate::rate_limit::RateLimiter;
use crate::session::{
    AccountLevel, BodySize, DispatchEntry, DispatchError, DispatchTableBuilder, Frame, Protocol,
    Session, SessionState, StateSet,
};

mod handlers;

/// Services shared by every world session.
pub struct WorldContext {
    pub store: Arc<dyn AccountStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub security: SecurityConfig,
    /// Realm this listener serves; clients asking for another are refused.
    pub realm_id: u32,
}

/// The authenticated account, as handlers see it.
#[derive(Debug, Clone)]
pub struct WorldAccount {
    pub id: i64,
    pub name: String,
    pub security: AccountLevel,
    pub expansion: u8,
}

pub struct WorldSession {
    peer: SocketAddr,
    state: SessionState,
    outbound: Vec<u8>,
    /// Server half of the auth digest.
    seed: [u8; 4],
    crypt: Option<HeaderCrypt>,
    /// Header already decrypted, waiting for its body.
    pending_header: Option<ClientHeader>,
    account: Option<WorldAccount>,
    last_ping: Option<Instant>,
    overspeed_pings: u32,
    latency: Option<u32>,
}

/// Session for a fresh connection. A banned address is answered with
/// AUTH_REJECT in place of the challenge and never gets a seed to answer.
pub async fn open_session(ctx: &WorldContext, peer: SocketAddr) -> WorldSession {
    match ctx.store.ip_ban(&peer.ip().to_string()).await {
        Ok(None) => WorldSession::new(peer),
        Ok(Some(ban)) => {
            info!("{}: address banned ({}), rejecting", peer, ban.reason);
            WorldSession::rejected(peer, ResponseCode::AuthReject)
        }
        Err(e) => {
            error!("{}: address ban lookup failed: {}", peer, e);
            WorldSession::rejected(peer, ResponseCode::AuthSystemError)
        }
    }
}

impl WorldSession {
    /// New session with SMSG_AUTH_CHALLENGE already queued.
    pub fn new(peer: SocketAddr) -> Self {
        let mut session = Self::blank(peer);
        let challenge = AuthChallenge {
            seed: session.seed,
            random: random_bytes(),
        };
        session.send(WorldOpcode::SmsgAuthChallenge, |w| challenge.write(w));
        session.state = SessionState::ChallengeSent;
        session
    }

    /// Closed session holding only an SMSG_AUTH_RESPONSE refusal.
    pub fn rejected(peer: SocketAddr, code: ResponseCode) -> Self {
        let mut session = Self::blank(peer);
        session.send(WorldOpcode::SmsgAuthResponse, |w| write_auth_failure(w, code));
        session.state = SessionState::Closed;
        session
    }

    fn blank(peer: SocketAddr) -> Self {
        Self {
            peer,
            state: SessionState::Initial,
            outbound: Vec::new(),
            seed: random_bytes(),
            crypt: None,
            pending_header: None,
            account: None,
            last_ping: None,
            overspeed_pings: 0,
            latency: None,
        }
    }

    pub fn world_account(&self) -> Option<&WorldAccount> {
        self.account.as_ref()
    }

    pub fn is_encrypted(&self) -> bool {
        self.crypt.is_some()
    }

    /// Queue one packet, encrypting its header once the cipher is on.
    pub fn send_packet(&mut self, opcode: u16, body: &[u8]) {
        let mut header = ServerHeader::new(body.len(), opcode);
        if let Some(crypt) = self.crypt.as_mut() {
            crypt.encrypt_send(header.as_bytes_mut());
        }
        self.outbound.extend_from_slice(header.as_bytes());
        self.outbound.extend_from_slice(body);
    }

    pub fn send(&mut self, opcode: WorldOpcode, write: impl FnOnce(&mut MessageWriter)) {
        let mut writer = MessageWriter::new();
        write(&mut writer);
        self.send_packet(opcode.id(), writer.as_bytes());
    }

    fn advance(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.state.can_advance_to(next, Protocol::World) {
            warn!("{}: illegal transition {} -> {}", self.peer, self.state, next);
            return Err(SessionError::InvalidState {
                name: "state transition",
                state: self.state,
            });
        }
        self.state = next;
        Ok(())
    }
}

impl Session for WorldSession {
    const PROTOCOL: Protocol = Protocol::World;

    fn state(&self) -> SessionState {
        self.state
    }

    fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn security(&self) -> AccountLevel {
        self.account
            .as_ref()
            .map(|a| a.security)
            .unwrap_or(AccountLevel::Player)
    }

    fn account(&self) -> Option<&str> {
        self.account.as_ref().map(|a| a.name.as_str())
    }

    fn latency_ms(&self) -> Option<u32> {
        self.latency
    }

    fn next_frame(&mut self, inbound: &mut BytesMut) -> Result<Option<Frame>, SessionError> {
        let header = match self.pending_header {
            Some(header) => header,
            None => {
                if inbound.len() < CLIENT_HEADER_SIZE {
                    return Ok(None);
                }
                let mut raw = [0u8; CLIENT_HEADER_SIZE];
                raw.copy_from_slice(&inbound.split_to(CLIENT_HEADER_SIZE));
                // The cipher is a stream: each header is decrypted exactly once.
                if let Some(crypt) = self.crypt.as_mut() {
                    crypt.decrypt_recv(&mut raw);
                }

                let header = ClientHeader::from_bytes(&raw);
                if !header.is_valid_size() || !header.is_valid_opcode() {
                    return Err(SessionError::MalformedHeader(format!(
                        "size {} opcode 0x{:X}",
                        header.size, header.opcode
                    )));
                }
                self.pending_header = Some(header);
                header
            }
        };

        if inbound.len() < header.body_len() {
            return Ok(None);
        }
        self.pending_header = None;
        let body = inbound.split_to(header.body_len());
        Ok(Some(Frame {
            opcode: header.opcode as u16,
            body,
        }))
    }

    fn take_outbound(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbound)
    }
}

/// Table builder with the gateway's own opcodes registered. Gameplay code
/// adds its handlers and calls `build`.
pub fn world_table_builder(
    ctx: Arc<WorldContext>,
) -> Result<DispatchTableBuilder<WorldSession>, DispatchError> {
    use SessionState::*;

    let mut builder = DispatchTableBuilder::new(NUM_MSG_TYPES);

    let c = ctx.clone();
    builder.register(DispatchEntry::new(
        WorldOpcode::CmsgAuthSession.id(),
        "CMSG_AUTH_SESSION",
        StateSet::of(&[ChallengeSent]),
        BodySize::AtLeast(MIN_AUTH_SESSION_BODY),
        move |session: &mut WorldSession, reader| handlers::handle_auth_session(&c, session, reader),
    ))?;

    builder.register(DispatchEntry::new(
        WorldOpcode::CmsgPing.id(),
        "CMSG_PING",
        StateSet::of(&[Authenticated]),
        BodySize::Exact(8),
        move |session: &mut WorldSession, reader| handlers::handle_ping(&ctx, session, reader),
    ))?;

    builder.register(DispatchEntry::new(
        WorldOpcode::CmsgKeepAlive.id(),
        "CMSG_KEEP_ALIVE",
        StateSet::of(&[Authenticated]),
        BodySize::Exact(0),
        handlers::handle_keep_alive,
    ))?;

    Ok(builder)
}

#[cfg(test)]
mod tests;
