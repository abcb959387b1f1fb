//! Logon command handlers
//!
//! Store lookups run inside suspended futures; everything that touches the
//! session happens in the continuation, after the session is known to be
//! still open.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::{ClientInfo, LogonContext, LogonSession};
use crate::constants::SECURITY_FLAG_AUTHENTICATOR;
use crate::crypto::{
    random_bytes, srp6, totp, verify_reconnect_proof, SessionKey, Srp6Proof, Srp6Transcript,
};
use crate::db::{unix_now, AccountRecord, StoreError};
use crate::error::SessionError;
use crate::protocol::{
    write_challenge_failure, write_proof_failure, write_proof_success, write_realm_list,
    write_reconnect_challenge, write_reconnect_proof, AuthCmd, AuthResult, ChallengeRequest,
    ChallengeResponse, LogonProofRequest, MessageReader, MessageWriter, RealmEntry,
    ReconnectProofRequest,
};
use crate::rate_limit::ActionType;
use crate::session::{continuation, HandlerResult, Outcome, SessionState};

/// Rate-limit the address, then look the name up.
async fn lookup_account(
    ctx: &LogonContext,
    ip: &str,
    username: &str,
    action: ActionType,
) -> Result<Option<AccountRecord>, SessionError> {
    if !ctx.rate_limiter.check_ip(ip, action).await.is_allowed() {
        return Err(SessionError::RateLimited { ip: ip.to_string() });
    }
    Ok(ctx.store.find_account(username).await?)
}

/// Ban and address-lock state, only consulted after a valid proof.
async fn account_standing(
    ctx: &LogonContext,
    account: &AccountRecord,
    ip: &str,
) -> Result<AuthResult, StoreError> {
    if let Some(ban) = ctx.store.active_ban(account.id, ip).await? {
        return Ok(if ban.is_permanent() {
            AuthResult::FailBanned
        } else {
            AuthResult::FailSuspended
        });
    }
    if account.locked && account.last_ip.as_deref() != Some(ip) {
        return Ok(AuthResult::FailLockedEnforced);
    }
    Ok(AuthResult::Success)
}

/// Parse and check a challenge body shared by both challenge commands.
/// Returns `None` when the session should be closed.
fn read_challenge(
    ctx: &LogonContext,
    session: &mut LogonSession,
    reader: &mut MessageReader,
    cmd: AuthCmd,
) -> Result<Option<ChallengeRequest>, SessionError> {
    let body_len = reader.len();
    let request = ChallengeRequest::parse(reader)?;
    if let Err(reason) = request.validate(body_len) {
        warn!("{}: rejected {}: {}", session.peer, cmd, reason);
        return Ok(None);
    }

    session.advance(SessionState::ChallengeSent)?;
    session.username = Some(request.account.to_ascii_uppercase());
    session.client = ClientInfo {
        build: request.build,
        os: request.os.clone(),
        locale: request.locale.clone(),
    };
    debug!(
        "{}: {} for {} (build {}, {} {})",
        session.peer,
        cmd,
        session.username(),
        request.build,
        request.os,
        request.locale
    );

    if !ctx.security.is_build_allowed(request.build) {
        info!(
            "{}: build {} not allowed for {}",
            session.peer,
            request.build,
            session.username()
        );
        session.reply(|w| write_challenge_failure(w, cmd, AuthResult::FailVersionInvalid));
        return Ok(None);
    }

    Ok(Some(request))
}

/// Handle AUTH_LOGON_CHALLENGE
pub(super) fn handle_logon_challenge(
    ctx: &Arc<LogonContext>,
    session: &mut LogonSession,
    reader: &mut MessageReader,
) -> HandlerResult<LogonSession> {
    if read_challenge(ctx, session, reader, AuthCmd::LogonChallenge)?.is_none() {
        return Ok(Outcome::Close);
    }

    let ctx = ctx.clone();
    let ip = session.ip();
    let username = session.username().to_string();
    Ok(Outcome::suspend(async move {
        let lookup = lookup_account(&ctx, &ip, &username, ActionType::LogonChallenge).await;
        continuation(move |session: &mut LogonSession| {
            finish_logon_challenge(&ctx, session, lookup)
        })
    }))
}

fn finish_logon_challenge(
    ctx: &LogonContext,
    session: &mut LogonSession,
    lookup: Result<Option<AccountRecord>, SessionError>,
) -> HandlerResult<LogonSession> {
    let username = session.username().to_string();
    let (transcript, security_flags) = match lookup {
        Ok(Some(account)) => {
            let flags = if account.totp_secret.is_some() {
                SECURITY_FLAG_AUTHENTICATOR
            } else {
                0
            };
            let transcript = Srp6Transcript::new(&username, account.salt, account.verifier);
            session.account = Some(account);
            (transcript, flags)
        }
        Ok(None) => {
            // Same shape of answer as a real account; the proof will fail.
            debug!("{}: unknown account {}", session.peer, username);
            let salt = srp6::fake_salt(&ctx.fake_salt_secret, &username);
            (Srp6Transcript::new(&username, salt, random_bytes()), 0)
        }
        Err(e) => {
            match &e {
                SessionError::RateLimited { .. } => warn!("{}: {}", session.peer, e),
                _ => error!("{}: account lookup for {} failed: {}", session.peer, username, e),
            }
            session.reply(|w| {
                write_challenge_failure(w, AuthCmd::LogonChallenge, AuthResult::FailDbBusy)
            });
            return Ok(Outcome::Close);
        }
    };

    let response = ChallengeResponse {
        server_public: *transcript.server_public(),
        salt: *transcript.salt(),
        security_flags,
    };
    session.reply(|w| response.write(w));
    session.transcript = Some(transcript);
    session.advance(SessionState::LogonProofPending)?;
    Ok(Outcome::Continue)
}

/// Handle AUTH_LOGON_PROOF
pub(super) fn handle_logon_proof(
    ctx: &Arc<LogonContext>,
    session: &mut LogonSession,
    reader: &mut MessageReader,
) -> HandlerResult<LogonSession> {
    let request = LogonProofRequest::parse(reader)?;

    // The transcript is single-use; it is wiped when dropped here.
    let proof = session
        .transcript
        .take()
        .and_then(|t| t.verify(&request.client_public, &request.client_proof));

    let verified = match (&session.account, proof) {
        (Some(account), Some(proof)) => {
            if token_accepted(account, request.token.as_deref()) {
                Some(proof)
            } else {
                warn!("{}: bad authenticator token for {}", session.peer, account.username);
                None
            }
        }
        _ => None,
    };

    match verified {
        Some(proof) => accept_proof(ctx, session, proof),
        None => reject_proof(ctx, session),
    }
}

fn token_accepted(account: &AccountRecord, token: Option<&str>) -> bool {
    match (&account.totp_secret, token) {
        (None, _) => true,
        (Some(secret), Some(token)) => totp::verify(secret, token, unix_now().max(0) as u64),
        (Some(_), None) => false,
    }
}

fn reject_proof(ctx: &Arc<LogonContext>, session: &mut LogonSession) -> HandlerResult<LogonSession> {
    let username = session.username().to_string();
    warn!("{}: failed logon proof for {}", session.peer, username);

    let Some(account) = session.account.take() else {
        session.reply(|w| write_proof_failure(w, AuthResult::FailUnknownAccount));
        return Err(SessionError::CryptoVerificationFailed { account: username });
    };

    // Count the failure before answering, so closing early does not skip it.
    let ctx = ctx.clone();
    let ip = session.ip();
    Ok(Outcome::suspend(async move {
        let policy = ctx.wrong_password_policy();
        let recorded = ctx.store.record_failed_login(account.id, &ip, &policy).await;
        continuation(move |session: &mut LogonSession| {
            match recorded {
                Ok(failed) if failed.banned => info!(
                    "{}: {} banned after {} failed logins",
                    session.peer, account.username, failed.attempts
                ),
                Ok(failed) => debug!(
                    "{}: {} failed logins for {}",
                    session.peer, failed.attempts, account.username
                ),
                Err(e) => error!("{}: could not record failed login: {}", session.peer, e),
            }
            session.reply(|w| write_proof_failure(w, AuthResult::FailUnknownAccount));
            Err(SessionError::CryptoVerificationFailed { account: account.username })
        })
    }))
}

/// The error a refusal after a valid proof closes the session with, if any.
fn standing_error(result: AuthResult, account: &AccountRecord) -> Option<SessionError> {
    let account = account.username.clone();
    match result {
        AuthResult::FailBanned | AuthResult::FailSuspended => {
            Some(SessionError::AccountBanned { account })
        }
        AuthResult::FailLockedEnforced => Some(SessionError::AccountLocked { account }),
        _ => None,
    }
}

fn accept_proof(
    ctx: &Arc<LogonContext>,
    session: &mut LogonSession,
    proof: Srp6Proof,
) -> HandlerResult<LogonSession> {
    let Some(account) = session.account.take() else {
        return Ok(Outcome::Close);
    };

    let ctx = ctx.clone();
    let ip = session.ip();
    let os = session.client.os.clone();
    Ok(Outcome::suspend(async move {
        let standing = match account_standing(&ctx, &account, &ip).await {
            Ok(AuthResult::Success) => ctx
                .store
                .record_login(account.id, &proof.session_key, &ip, &os)
                .await
                .map(|_| AuthResult::Success),
            other => other,
        };
        continuation(move |session: &mut LogonSession| {
            finish_logon_proof(session, account, proof, standing)
        })
    }))
}

fn finish_logon_proof(
    session: &mut LogonSession,
    account: AccountRecord,
    proof: Srp6Proof,
    standing: Result<AuthResult, StoreError>,
) -> HandlerResult<LogonSession> {
    match standing {
        Ok(AuthResult::Success) => {
            session.reply(|w| write_proof_success(w, &proof.server_proof));
            session.security = account.security;
            session.session_key = Some(proof.session_key.clone());
            session.advance(SessionState::Authenticated)?;
            info!(
                "{}: {} authenticated (build {}, locale {})",
                session.peer, account.username, session.client.build, session.client.locale
            );
            session.account = Some(account);
            Ok(Outcome::Continue)
        }
        Ok(result) => {
            warn!(
                "{}: refusing {} after valid proof: {}",
                session.peer, account.username, result
            );
            session.reply(|w| write_proof_failure(w, result));
            match standing_error(result, &account) {
                Some(e) => Err(e),
                None => Ok(Outcome::Close),
            }
        }
        Err(e) => {
            error!("{}: store error completing logon for {}: {}", session.peer, account.username, e);
            session.reply(|w| write_proof_failure(w, AuthResult::FailDbBusy));
            Ok(Outcome::Close)
        }
    }
}

/// Handle AUTH_RECONNECT_CHALLENGE
pub(super) fn handle_reconnect_challenge(
    ctx: &Arc<LogonContext>,
    session: &mut LogonSession,
    reader: &mut MessageReader,
) -> HandlerResult<LogonSession> {
    if read_challenge(ctx, session, reader, AuthCmd::ReconnectChallenge)?.is_none() {
        return Ok(Outcome::Close);
    }

    let ctx = ctx.clone();
    let ip = session.ip();
    let username = session.username().to_string();
    Ok(Outcome::suspend(async move {
        let lookup = lookup_account(&ctx, &ip, &username, ActionType::ReconnectChallenge).await;
        continuation(move |session: &mut LogonSession| {
            match lookup {
                Ok(account) => {
                    // Unknown names get a seed too; the proof can never match.
                    session.account = account;
                    session.reconnect_seed = random_bytes();
                    let seed = session.reconnect_seed;
                    session.reply(|w| write_reconnect_challenge(w, &seed));
                    session.advance(SessionState::ReconnectProofPending)?;
                    Ok(Outcome::Continue)
                }
                Err(e) => {
                    warn!("{}: reconnect lookup failed: {}", session.peer, e);
                    session.reply(|w| {
                        write_challenge_failure(w, AuthCmd::ReconnectChallenge, AuthResult::FailDbBusy)
                    });
                    Ok(Outcome::Close)
                }
            }
        })
    }))
}

/// Handle AUTH_RECONNECT_PROOF
pub(super) fn handle_reconnect_proof(
    ctx: &Arc<LogonContext>,
    session: &mut LogonSession,
    reader: &mut MessageReader,
) -> HandlerResult<LogonSession> {
    let request = ReconnectProofRequest::parse(reader)?;

    let key = session.account.as_ref().and_then(|a| a.session_key.clone());
    let verified = key.as_ref().is_some_and(|key| {
        verify_reconnect_proof(
            session.username(),
            &request.r1,
            &request.r2,
            &session.reconnect_seed,
            key,
        )
    });

    let (Some(account), Some(key), true) = (session.account.take(), key, verified) else {
        warn!("{}: failed reconnect proof for {}", session.peer, session.username());
        session.reply(|w| write_reconnect_proof(w, AuthResult::FailUnknownAccount));
        return Err(SessionError::CryptoVerificationFailed {
            account: session.username().to_string(),
        });
    };

    let ctx = ctx.clone();
    let ip = session.ip();
    Ok(Outcome::suspend(async move {
        let standing = account_standing(&ctx, &account, &ip).await;
        continuation(move |session: &mut LogonSession| {
            finish_reconnect_proof(session, account, key, standing)
        })
    }))
}

fn finish_reconnect_proof(
    session: &mut LogonSession,
    account: AccountRecord,
    key: SessionKey,
    standing: Result<AuthResult, StoreError>,
) -> HandlerResult<LogonSession> {
    let result = match standing {
        Ok(result) => result,
        Err(e) => {
            error!("{}: store error on reconnect for {}: {}", session.peer, account.username, e);
            AuthResult::FailDbBusy
        }
    };

    session.reply(|w| write_reconnect_proof(w, result));
    if result != AuthResult::Success {
        warn!("{}: refusing reconnect for {}: {}", session.peer, account.username, result);
        return match standing_error(result, &account) {
            Some(e) => Err(e),
            None => Ok(Outcome::Close),
        };
    }

    session.security = account.security;
    session.session_key = Some(key);
    session.advance(SessionState::Authenticated)?;
    info!("{}: {} reconnected", session.peer, account.username);
    session.account = Some(account);
    Ok(Outcome::Continue)
}

/// Handle REALM_LIST
pub(super) fn handle_realm_list(
    ctx: &Arc<LogonContext>,
    session: &mut LogonSession,
    _reader: &mut MessageReader,
) -> HandlerResult<LogonSession> {
    let Some(account_id) = session.account.as_ref().map(|a| a.id) else {
        return Ok(Outcome::Close);
    };
    session.advance(SessionState::AwaitingRealmList)?;

    let ctx = ctx.clone();
    Ok(Outcome::suspend(async move {
        let realms = ctx.store.realms().await;
        let counts = ctx.store.character_counts(account_id).await;
        continuation(move |session: &mut LogonSession| {
            let (realms, counts) = match (realms, counts) {
                (Ok(realms), Ok(counts)) => (realms, counts),
                (Err(e), _) | (_, Err(e)) => {
                    error!("{}: realm list unavailable: {}", session.peer, e);
                    return Ok(Outcome::Close);
                }
            };

            let entries: Vec<RealmEntry> = realms
                .iter()
                .filter_map(|realm| match u8::try_from(realm.id) {
                    Ok(id) => Some((id, realm)),
                    Err(_) => {
                        warn!("{}: realm {} has an id over 255, not listed", session.peer, realm.id);
                        None
                    }
                })
                .map(|(id, realm)| RealmEntry {
                    id,
                    realm_type: realm.realm_type,
                    locked: session.security < realm.allowed_security,
                    flags: realm.flags,
                    name: realm.name.clone(),
                    address: realm.address.clone(),
                    population: realm.population,
                    characters: counts.get(&realm.id).copied().unwrap_or(0),
                    timezone: realm.timezone,
                })
                .collect();

            let mut packet = MessageWriter::new();
            if let Err(e) = write_realm_list(&mut packet, &entries) {
                error!("{}: cannot encode realm list: {}", session.peer, e);
                return Ok(Outcome::Close);
            }
            debug!("{}: sending {} realms", session.peer, entries.len());
            session.reply(|w| {
                w.write_bytes(packet.as_bytes());
            });
            session.advance(SessionState::Authenticated)?;
            Ok(Outcome::Continue)
        })
    }))
}
