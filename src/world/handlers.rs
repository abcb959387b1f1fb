//! Gateway handlers: session authentication and keep-alive traffic

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::{WorldAccount, WorldContext, WorldSession};
use crate::constants::{MAX_EXPANSION, MIN_PING_INTERVAL_SECS};
use crate::crypto::{ct_eq, world_auth_digest, HeaderCrypt};
use crate::db::{AccountRecord, BanInfo};
use crate::error::SessionError;
use crate::protocol::world::{
    write_auth_failure, write_auth_ok, write_pong, AuthSessionRequest, PingRequest,
};
use crate::protocol::{MessageReader, ResponseCode, WorldOpcode};
use crate::rate_limit::ActionType;
use crate::session::{continuation, AccountLevel, HandlerResult, Outcome, SessionState};

type AuthLookup = Result<Option<(AccountRecord, Option<BanInfo>)>, SessionError>;

impl WorldSession {
    fn refuse(&mut self, code: ResponseCode) -> HandlerResult<WorldSession> {
        self.send(WorldOpcode::SmsgAuthResponse, |w| write_auth_failure(w, code));
        Ok(Outcome::Close)
    }

    /// Refuse, then end the session with `err` once the answer is flushed.
    fn refuse_with(&mut self, code: ResponseCode, err: SessionError) -> HandlerResult<WorldSession> {
        self.send(WorldOpcode::SmsgAuthResponse, |w| write_auth_failure(w, code));
        Err(err)
    }
}

/// Handle CMSG_AUTH_SESSION
pub(super) fn handle_auth_session(
    ctx: &Arc<WorldContext>,
    session: &mut WorldSession,
    reader: &mut MessageReader,
) -> HandlerResult<WorldSession> {
    let request = AuthSessionRequest::parse(reader)?;
    debug!(
        "{}: auth session for {} (build {}, realm {})",
        session.peer, request.account, request.build, request.realm_id
    );

    let build_allowed = u16::try_from(request.build)
        .map(|build| ctx.security.is_build_allowed(build))
        .unwrap_or(false);
    if !build_allowed {
        info!("{}: build {} not allowed", session.peer, request.build);
        return session.refuse(ResponseCode::AuthVersionMismatch);
    }

    let ctx = ctx.clone();
    let ip = session.peer.ip().to_string();
    let username = request.account.to_ascii_uppercase();
    Ok(Outcome::suspend(async move {
        let lookup = lookup_account(&ctx, &ip, &username).await;
        continuation(move |session: &mut WorldSession| {
            finish_auth_session(&ctx, session, request, lookup)
        })
    }))
}

async fn lookup_account(ctx: &WorldContext, ip: &str, username: &str) -> AuthLookup {
    if !ctx.rate_limiter.check_ip(ip, ActionType::WorldAuth).await.is_allowed() {
        return Err(SessionError::RateLimited { ip: ip.to_string() });
    }
    let Some(account) = ctx.store.find_account(username).await? else {
        return Ok(None);
    };
    let ban = ctx.store.active_ban(account.id, ip).await?;
    Ok(Some((account, ban)))
}

fn finish_auth_session(
    ctx: &Arc<WorldContext>,
    session: &mut WorldSession,
    request: AuthSessionRequest,
    lookup: AuthLookup,
) -> HandlerResult<WorldSession> {
    let (account, ban) = match lookup {
        Ok(Some(found)) => found,
        Ok(None) => {
            info!("{}: unknown account {}", session.peer, request.account);
            return session.refuse(ResponseCode::AuthUnknownAccount);
        }
        Err(e @ SessionError::RateLimited { .. }) => {
            warn!("{}: {}", session.peer, e);
            return session.refuse(ResponseCode::AuthReject);
        }
        Err(e) => {
            error!("{}: account lookup for {} failed: {}", session.peer, request.account, e);
            return session.refuse(ResponseCode::AuthSystemError);
        }
    };

    let Some(key) = account.session_key.clone() else {
        info!("{}: {} has no logon session", session.peer, account.username);
        return session.refuse(ResponseCode::AuthUnknownAccount);
    };

    let expected = world_auth_digest(&request.account, &request.client_seed, &session.seed, &key);
    if !ct_eq(&expected, &request.digest) {
        warn!("{}: bad auth digest for {}", session.peer, account.username);
        return session.refuse_with(
            ResponseCode::AuthFailed,
            SessionError::CryptoVerificationFailed { account: account.username },
        );
    }

    // From here on the client expects encrypted headers, refusals included.
    match HeaderCrypt::new(&key) {
        Ok(crypt) => session.crypt = Some(crypt),
        Err(e) => {
            error!("{}: header cipher setup failed: {}", session.peer, e);
            return Ok(Outcome::Close);
        }
    }

    let ip = session.peer.ip().to_string();
    if let Some(ban) = ban {
        info!("{}: {} is banned", session.peer, account.username);
        let code = if ban.is_permanent() {
            ResponseCode::AuthBanned
        } else {
            ResponseCode::AuthSuspended
        };
        return session.refuse_with(code, SessionError::AccountBanned { account: account.username });
    }
    if account.locked && account.last_ip.as_deref() != Some(ip.as_str()) {
        info!("{}: {} is locked to another address", session.peer, account.username);
        return session.refuse_with(
            ResponseCode::AuthLockedEnforced,
            SessionError::AccountLocked { account: account.username },
        );
    }
    if request.realm_id != ctx.realm_id {
        info!(
            "{}: {} asked for realm {}, this is realm {}",
            session.peer, account.username, request.realm_id, ctx.realm_id
        );
        return session.refuse(ResponseCode::RealmListRealmNotFound);
    }
    if account.security < ctx.security.min_security_level {
        info!("{}: {} below the realm's security level", session.peer, account.username);
        return session.refuse(ResponseCode::AuthUnavailable);
    }

    session.advance(SessionState::Authenticated)?;
    let expansion = account.expansion.min(MAX_EXPANSION);
    session.account = Some(WorldAccount {
        id: account.id,
        name: account.username.clone(),
        security: account.security,
        expansion,
    });
    session.send(WorldOpcode::SmsgAuthResponse, |w| write_auth_ok(w, expansion));
    info!("{}: {} entered the world gateway", session.peer, account.username);

    let ctx = ctx.clone();
    Ok(Outcome::suspend(async move {
        let recorded = ctx.store.record_world_login(account.id, &ip).await;
        continuation(move |session: &mut WorldSession| {
            if let Err(e) = recorded {
                error!("{}: could not record address for {}: {}", session.peer, account.username, e);
            }
            Ok(Outcome::Continue)
        })
    }))
}

/// Handle CMSG_PING
pub(super) fn handle_ping(
    ctx: &Arc<WorldContext>,
    session: &mut WorldSession,
    reader: &mut MessageReader,
) -> HandlerResult<WorldSession> {
    let ping = PingRequest::parse(reader)?;

    let now = Instant::now();
    if let Some(last) = session.last_ping {
        if now.duration_since(last) < Duration::from_secs(MIN_PING_INTERVAL_SECS) {
            session.overspeed_pings += 1;
            let max = ctx.security.max_overspeed_pings;
            if max > 0 && session.overspeed_pings > max {
                let security = session.account.as_ref().map(|a| a.security);
                if security.map_or(true, |s| s == AccountLevel::Player) {
                    warn!(
                        "{}: {} over-speed pings, closing",
                        session.peer, session.overspeed_pings
                    );
                    return Ok(Outcome::Close);
                }
            }
        } else {
            session.overspeed_pings = 0;
        }
    }
    session.last_ping = Some(now);
    session.latency = Some(ping.latency);

    session.send(WorldOpcode::SmsgPong, |w| write_pong(w, ping.ping));
    Ok(Outcome::Continue)
}

/// Handle CMSG_KEEP_ALIVE
pub(super) fn handle_keep_alive(
    session: &mut WorldSession,
    _reader: &mut MessageReader,
) -> HandlerResult<WorldSession> {
    debug!("{}: keep-alive", session.peer);
    Ok(Outcome::Continue)
}
