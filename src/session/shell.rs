//! Per-connection I/O loop
//!
//! One task per socket. Frames are processed strictly in arrival order; while
//! a handler is suspended the loop keeps buffering input but parses nothing
//! until the continuation has been applied.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::dispatch::{Continuation, Outcome, Pending};
use super::{DispatchTable, Session, SessionHandle};
use crate::config::NetworkConfig;
use crate::constants::READ_CHUNK_SIZE;
use crate::error::SessionError;

#[derive(Debug, Clone, Copy)]
pub struct ShellLimits {
    /// Inbound bytes held while waiting for a frame or a continuation.
    pub max_buffered_bytes: usize,
    pub unauthenticated_timeout: Duration,
    pub idle_timeout: Duration,
}

impl ShellLimits {
    pub fn from_config(network: &NetworkConfig) -> Self {
        Self {
            max_buffered_bytes: network.max_buffered_bytes,
            unauthenticated_timeout: Duration::from_secs(network.unauthenticated_timeout_secs),
            idle_timeout: Duration::from_secs(network.idle_timeout_secs),
        }
    }
}

async fn wait_pending<S>(pending: &mut Option<Pending<S>>) -> Continuation<S> {
    match pending {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

/// Fold a handler's result into the loop state. Returns the error that
/// ended the session, if any.
fn apply<S: Session>(
    session: &mut S,
    result: Result<Outcome<S>, SessionError>,
    pending: &mut Option<Pending<S>>,
) -> Option<SessionError> {
    match result {
        Ok(Outcome::Continue) => None,
        Ok(Outcome::Close) => {
            session.close();
            None
        }
        Ok(Outcome::Suspend(future)) => {
            *pending = Some(future);
            None
        }
        Err(e) if e.is_recoverable() => {
            debug!("{}: skipping frame: {}", session.peer(), e);
            None
        }
        Err(e) => {
            warn!("{}: closing session: {}", session.peer(), e);
            session.close();
            Some(e)
        }
    }
}

/// Drive `session` over `stream` until it closes.
pub async fn run<S, T>(
    mut stream: T,
    mut session: S,
    table: Arc<DispatchTable<S>>,
    limits: ShellLimits,
    handle: SessionHandle,
) -> Result<(), SessionError>
where
    S: Session,
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let peer = session.peer();
    let mut inbound = BytesMut::with_capacity(READ_CHUNK_SIZE);
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    let mut pending: Option<Pending<S>> = None;
    let mut failure: Option<SessionError> = None;
    let mut messages: u64 = 0;
    // Fixed at accept; input does not extend it.
    let auth_deadline = Instant::now() + limits.unauthenticated_timeout;

    handle.refresh(&session, messages);

    loop {
        let outbound = session.take_outbound();
        if !outbound.is_empty() {
            trace!("{} -> {} bytes", peer, outbound.len());
            if let Err(e) = stream.write_all(&outbound).await {
                debug!("{}: write failed: {}", peer, e);
                session.close();
                failure.get_or_insert(e.into());
            }
        }

        if session.state().is_closed() {
            break;
        }

        if pending.is_none() {
            match session.next_frame(&mut inbound) {
                Ok(Some(frame)) => {
                    messages += 1;
                    let result = table.dispatch(&mut session, frame.opcode, &frame.body);
                    if let Some(e) = apply(&mut session, result, &mut pending) {
                        failure = Some(e);
                    }
                    handle.refresh(&session, messages);
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("{}: framing error: {}", peer, e);
                    session.close();
                    failure = Some(e);
                    continue;
                }
            }
        }

        let authenticated = session.state().is_authenticated();
        let deadline = if authenticated {
            Instant::now() + limits.idle_timeout
        } else {
            auth_deadline
        };

        tokio::select! {
            next = wait_pending(&mut pending) => {
                pending = None;
                if session.state().is_closed() {
                    debug!("{}: dropping continuation for closed session", peer);
                } else {
                    let result = next(&mut session);
                    if let Some(e) = apply(&mut session, result, &mut pending) {
                        failure = Some(e);
                    }
                    handle.refresh(&session, messages);
                }
            }
            read = stream.read(&mut chunk) => match read {
                Ok(0) => {
                    debug!("{}: peer closed the connection", peer);
                    session.close();
                }
                Ok(n) => {
                    if inbound.len() + n > limits.max_buffered_bytes {
                        warn!("{}: inbound buffer over {} bytes", peer, limits.max_buffered_bytes);
                        session.close();
                        failure = Some(SessionError::OversizedMessage {
                            name: "inbound buffer",
                            len: inbound.len() + n,
                            max: limits.max_buffered_bytes,
                        });
                    } else {
                        inbound.extend_from_slice(&chunk[..n]);
                    }
                }
                Err(e) => {
                    debug!("{}: read failed: {}", peer, e);
                    session.close();
                    failure = Some(e.into());
                }
            },
            _ = tokio::time::sleep_until(deadline) => {
                if authenticated {
                    info!("{}: idle for {:?}, closing", peer, limits.idle_timeout);
                } else {
                    info!(
                        "{}: not authenticated within {:?}, closing",
                        peer, limits.unauthenticated_timeout
                    );
                }
                session.close();
            }
            _ = handle.kicked() => {
                info!("{}: kicked", peer);
                session.close();
            }
        }
    }

    // Dropping an unfinished lookup cancels it.
    drop(pending);
    handle.refresh(&session, messages);
    let _ = stream.shutdown().await;

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::dispatch::{continuation, BodySize, DispatchEntry, DispatchTableBuilder};
    use crate::session::test_support::ScriptedSession;
    use crate::session::{Protocol, SessionRegistry, SessionState, StateSet};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::io::duplex;
    use tokio::sync::oneshot;

    const AUTHED: StateSet = StateSet::of(&[SessionState::Authenticated]);

    fn limits() -> ShellLimits {
        ShellLimits {
            max_buffered_bytes: 64,
            unauthenticated_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(5),
        }
    }

    /// 0x01 echoes its body, 0x02 closes, 0x03 suspends until `gate` fires.
    fn table(gate: Arc<tokio::sync::Mutex<Option<oneshot::Receiver<()>>>>, applied: Arc<AtomicBool>) -> Arc<DispatchTable<ScriptedSession>> {
        let mut builder = DispatchTableBuilder::new(8);
        builder
            .register(DispatchEntry::new(1, "ECHO", AUTHED, BodySize::AtLeast(0), |s: &mut ScriptedSession, r| {
                let body = r.remaining_data().to_vec();
                s.outbound.extend_from_slice(&body);
                r.skip(body.len())?;
                Ok(Outcome::Continue)
            }))
            .unwrap()
            .register(DispatchEntry::new(2, "BYE", AUTHED, BodySize::Exact(0), |s: &mut ScriptedSession, _| {
                s.outbound.extend_from_slice(b"bye");
                Ok(Outcome::Close)
            }))
            .unwrap()
            .register(DispatchEntry::new(3, "WAIT", AUTHED, BodySize::Exact(0), move |_: &mut ScriptedSession, _| {
                let gate = gate.clone();
                let applied = applied.clone();
                Ok(Outcome::suspend(async move {
                    if let Some(rx) = gate.lock().await.take() {
                        let _ = rx.await;
                    }
                    continuation(move |s: &mut ScriptedSession| {
                        applied.store(true, Ordering::SeqCst);
                        s.outbound.extend_from_slice(b"done");
                        Ok(Outcome::Continue)
                    })
                }))
            }))
            .unwrap();
        Arc::new(builder.build())
    }

    #[tokio::test]
    async fn test_frames_processed_in_order_and_flushed_before_close() {
        let (mut client, server) = duplex(256);
        let registry = Arc::new(SessionRegistry::new());
        let handle = registry.register(Protocol::Logon, "127.0.0.1:1".parse().unwrap());
        let table = table(Arc::new(tokio::sync::Mutex::new(None)), Arc::new(AtomicBool::new(false)));
        let session = ScriptedSession::new(SessionState::Authenticated);

        let task = tokio::spawn(run(server, session, table, limits(), handle));
        client.write_all(&[1, 2, b'h', b'i', 1, 1, b'!', 2, 0]).await.unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hi!bye");
        assert!(task.await.unwrap().is_ok());
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_suspension_blocks_later_frames() {
        let (mut client, server) = duplex(256);
        let registry = Arc::new(SessionRegistry::new());
        let handle = registry.register(Protocol::Logon, "127.0.0.1:1".parse().unwrap());
        let (tx, rx) = oneshot::channel();
        let applied = Arc::new(AtomicBool::new(false));
        let table = table(Arc::new(tokio::sync::Mutex::new(Some(rx))), applied.clone());

        let task = tokio::spawn(run(server, ScriptedSession::new(SessionState::Authenticated), table, limits(), handle));
        // WAIT, then ECHO "x", then BYE
        client.write_all(&[3, 0, 1, 1, b'x', 2, 0]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!applied.load(Ordering::SeqCst));

        tx.send(()).unwrap();
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();

        assert_eq!(received, b"donexbye");
        assert!(applied.load(Ordering::SeqCst));
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_close_while_suspended_drops_continuation() {
        let (mut client, server) = duplex(256);
        let registry = Arc::new(SessionRegistry::new());
        let handle = registry.register(Protocol::Logon, "127.0.0.1:1".parse().unwrap());
        let (tx, rx) = oneshot::channel::<()>();
        let applied = Arc::new(AtomicBool::new(false));
        let table = table(Arc::new(tokio::sync::Mutex::new(Some(rx))), applied.clone());

        let task = tokio::spawn(run(server, ScriptedSession::new(SessionState::Authenticated), table, limits(), handle));
        client.write_all(&[3, 0]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(client);

        assert!(task.await.unwrap().is_ok());
        assert!(!applied.load(Ordering::SeqCst));
        // the suspended future was dropped along with its receiver
        assert!(tx.send(()).is_err());
    }

    #[tokio::test]
    async fn test_invalid_state_closes() {
        let (mut client, server) = duplex(256);
        let registry = Arc::new(SessionRegistry::new());
        let handle = registry.register(Protocol::Logon, "127.0.0.1:1".parse().unwrap());
        let table = table(Arc::new(tokio::sync::Mutex::new(None)), Arc::new(AtomicBool::new(false)));

        let task = tokio::spawn(run(server, ScriptedSession::new(SessionState::ChallengeSent), table, limits(), handle));
        client.write_all(&[1, 1, b'x']).await.unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
        assert!(matches!(
            task.await.unwrap(),
            Err(SessionError::InvalidState { name: "ECHO", .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_opcode_skipped() {
        let (mut client, server) = duplex(256);
        let registry = Arc::new(SessionRegistry::new());
        let handle = registry.register(Protocol::Logon, "127.0.0.1:1".parse().unwrap());
        let table = table(Arc::new(tokio::sync::Mutex::new(None)), Arc::new(AtomicBool::new(false)));

        let task = tokio::spawn(run(server, ScriptedSession::new(SessionState::Authenticated), table, limits(), handle));
        client.write_all(&[7, 2, 0, 0, 1, 1, b'k', 2, 0]).await.unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"kbye");
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_buffer_limit_closes() {
        let (mut client, server) = duplex(1024);
        let registry = Arc::new(SessionRegistry::new());
        let handle = registry.register(Protocol::Logon, "127.0.0.1:1".parse().unwrap());
        let table = table(Arc::new(tokio::sync::Mutex::new(None)), Arc::new(AtomicBool::new(false)));

        let task = tokio::spawn(run(server, ScriptedSession::new(SessionState::Authenticated), table, limits(), handle));
        // declares a 200-byte body; the 64-byte buffer fills first
        let mut data = vec![1u8, 200];
        data.extend_from_slice(&[0u8; 100]);
        client.write_all(&data).await.unwrap();

        assert!(matches!(
            task.await.unwrap(),
            Err(SessionError::OversizedMessage { .. })
        ));
    }

    #[tokio::test]
    async fn test_kick_closes_session() {
        let (_client, server) = duplex(256);
        let registry = Arc::new(SessionRegistry::new());
        let handle = registry.register(Protocol::World, "127.0.0.1:1".parse().unwrap());
        let id = handle.id();
        let table = table(Arc::new(tokio::sync::Mutex::new(None)), Arc::new(AtomicBool::new(false)));

        let task = tokio::spawn(run(server, ScriptedSession::new(SessionState::Authenticated), table, limits(), handle));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(registry.kick(&id));

        assert!(task.await.unwrap().is_ok());
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout() {
        let (_client, server) = duplex(256);
        let registry = Arc::new(SessionRegistry::new());
        let handle = registry.register(Protocol::Logon, "127.0.0.1:1".parse().unwrap());
        let table = table(Arc::new(tokio::sync::Mutex::new(None)), Arc::new(AtomicBool::new(false)));

        let result = run(server, ScriptedSession::new(SessionState::ChallengeSent), table, limits(), handle).await;

        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trickled_bytes_do_not_extend_auth_deadline() {
        let (mut client, server) = duplex(256);
        let registry = Arc::new(SessionRegistry::new());
        let handle = registry.register(Protocol::Logon, "127.0.0.1:1".parse().unwrap());
        let table = table(Arc::new(tokio::sync::Mutex::new(None)), Arc::new(AtomicBool::new(false)));

        // a 60-byte frame fed one byte at a time, never completing in time
        let writer = tokio::spawn(async move {
            let _ = client.write_all(&[1, 60]).await;
            for _ in 0..30 {
                tokio::time::sleep(Duration::from_secs(4)).await;
                if client.write_all(&[0]).await.is_err() {
                    break;
                }
            }
        });

        let started = Instant::now();
        let result = run(server, ScriptedSession::new(SessionState::ChallengeSent), table, limits(), handle).await;

        assert!(result.is_ok());
        assert!(started.elapsed() < Duration::from_secs(6), "closed after {:?}", started.elapsed());
        assert_eq!(registry.connection_count(), 0);
        writer.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_authenticated_traffic_resets_idle_timer() {
        let (mut client, server) = duplex(256);
        let registry = Arc::new(SessionRegistry::new());
        let handle = registry.register(Protocol::World, "127.0.0.1:1".parse().unwrap());
        let table = table(Arc::new(tokio::sync::Mutex::new(None)), Arc::new(AtomicBool::new(false)));

        let task = tokio::spawn(run(server, ScriptedSession::new(SessionState::Authenticated), table, limits(), handle));
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(4)).await;
            client.write_all(&[1, 1, b'.']).await.unwrap();
        }
        assert!(!task.is_finished());

        client.write_all(&[2, 0]).await.unwrap();
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"....bye");
        assert!(task.await.unwrap().is_ok());
    }
}
