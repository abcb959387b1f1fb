use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::*;
use crate::crypto::{world_auth_digest, SessionKey};
use crate::db::memory::MemoryAccountStore;
use crate::db::unix_now;
use crate::protocol::world::AuthSessionRequest;
use crate::session::{shell, SessionRegistry, ShellLimits};

const AUTH_RESPONSE: u16 = 0x1EE;
const PONG: u16 = 0x1DD;

fn key() -> SessionKey {
    SessionKey::new([0x42; 40])
}

fn store() -> Arc<MemoryAccountStore> {
    let store = MemoryAccountStore::new().with_account("tester", "secret");
    store.update("TESTER", |a| a.session_key = Some(key()));
    Arc::new(store)
}

fn context(store: Arc<MemoryAccountStore>) -> Arc<WorldContext> {
    let store: Arc<dyn AccountStore> = store;
    Arc::new(WorldContext {
        store,
        rate_limiter: Arc::new(RateLimiter::new()),
        security: SecurityConfig::default(),
        realm_id: 1,
    })
}

struct Harness {
    client: TcpStream,
    task: JoinHandle<Result<(), SessionError>>,
    server_seed: [u8; 4],
    crypt: Option<HeaderCrypt>,
}

/// Accept one connection; nothing is read from it yet.
async fn accept(ctx: Arc<WorldContext>) -> Harness {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (server, peer) = listener.accept().await.unwrap();

    let session = open_session(&ctx, peer).await;
    let table = Arc::new(world_table_builder(ctx).unwrap().build());
    let registry = Arc::new(SessionRegistry::new());
    let handle = registry.register(Protocol::World, peer);
    let limits = ShellLimits {
        max_buffered_bytes: 4096,
        unauthenticated_timeout: Duration::from_secs(5),
        idle_timeout: Duration::from_secs(5),
    };
    let task = tokio::spawn(shell::run(server, session, table, limits, handle));

    Harness {
        client,
        task,
        server_seed: [0; 4],
        crypt: None,
    }
}

async fn connect(ctx: Arc<WorldContext>) -> Harness {
    let mut h = accept(ctx).await;
    let (opcode, body) = h.recv_packet().await;
    assert_eq!(opcode, 0x1EC);
    assert_eq!(body.len(), 40);
    assert_eq!(&body[..4], &[1, 0, 0, 0]);
    h.server_seed.copy_from_slice(&body[4..8]);
    h
}

impl Harness {
    async fn send_packet(&mut self, opcode: u32, body: &[u8]) {
        let mut header = ClientHeader {
            size: body.len() as u16 + 4,
            opcode,
        }
        .to_bytes();
        if let Some(crypt) = self.crypt.as_mut() {
            crypt.encrypt_send(&mut header);
        }
        self.client.write_all(&header).await.unwrap();
        self.client.write_all(body).await.unwrap();
    }

    async fn read(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        tokio::time::timeout(Duration::from_secs(5), self.client.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf
    }

    async fn recv_packet(&mut self) -> (u16, Vec<u8>) {
        let mut header = self.read(4).await;
        if let Some(crypt) = self.crypt.as_mut() {
            crypt.decrypt_recv(&mut header);
        }
        let size = u16::from_be_bytes([header[0], header[1]]) as usize;
        let opcode = u16::from_le_bytes([header[2], header[3]]);
        (opcode, self.read(size - 2).await)
    }

    async fn rest(&mut self) -> Vec<u8> {
        let mut buf = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), self.client.read_to_end(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf
    }

    fn auth_request(&self, account: &str, key: &SessionKey) -> AuthSessionRequest {
        let client_seed = [9, 8, 7, 6];
        AuthSessionRequest {
            build: 12340,
            login_server_id: 0,
            account: account.to_string(),
            login_server_type: 0,
            client_seed,
            region_id: 0,
            battlegroup_id: 0,
            realm_id: 1,
            dos_response: 0,
            digest: world_auth_digest(account, &client_seed, &self.server_seed, key),
            addon_data: Vec::new(),
        }
    }

    async fn send_auth(&mut self, request: &AuthSessionRequest) {
        let mut body = MessageWriter::new();
        request.write(&mut body).unwrap();
        self.send_packet(WorldOpcode::CmsgAuthSession.id() as u32, body.as_bytes())
            .await;
    }

    /// Authenticate and switch the client side of the cipher on.
    async fn authenticate(&mut self, request: &AuthSessionRequest) -> (u16, Vec<u8>) {
        self.send_auth(request).await;
        self.crypt = Some(HeaderCrypt::new_client(&key()).unwrap());
        self.recv_packet().await
    }

    async fn ping(&mut self, ping: u32, latency: u32) {
        let mut body = MessageWriter::new();
        body.write_u32(ping).write_u32(latency);
        self.send_packet(WorldOpcode::CmsgPing.id() as u32, body.as_bytes())
            .await;
    }
}

#[tokio::test]
async fn test_auth_session_then_ping() {
    let mut h = connect(context(store())).await;

    let request = h.auth_request("TESTER", &key());
    let (opcode, body) = h.authenticate(&request).await;
    assert_eq!(opcode, AUTH_RESPONSE);
    assert_eq!(body, vec![0x0C, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);

    h.ping(7, 30).await;
    assert_eq!(h.recv_packet().await, (PONG, 7u32.to_le_bytes().to_vec()));

    h.send_packet(WorldOpcode::CmsgKeepAlive.id() as u32, &[]).await;
    h.ping(8, 30).await;
    assert_eq!(h.recv_packet().await, (PONG, 8u32.to_le_bytes().to_vec()));
}

#[tokio::test]
async fn test_bad_digest_refused_in_clear() {
    let mut h = connect(context(store())).await;

    let request = h.auth_request("TESTER", &SessionKey::new([0x43; 40]));
    h.send_auth(&request).await;

    assert_eq!(h.recv_packet().await, (AUTH_RESPONSE, vec![0x0D]));
    assert!(h.rest().await.is_empty());
    assert!(matches!(
        h.task.await.unwrap(),
        Err(SessionError::CryptoVerificationFailed { account }) if account == "TESTER"
    ));
}

#[tokio::test]
async fn test_unknown_account() {
    let mut h = connect(context(store())).await;

    let request = h.auth_request("NOBODY", &key());
    h.send_auth(&request).await;

    assert_eq!(h.recv_packet().await, (AUTH_RESPONSE, vec![0x15]));
}

#[tokio::test]
async fn test_account_without_logon_session() {
    let store = Arc::new(MemoryAccountStore::new().with_account("tester", "secret"));
    let mut h = connect(context(store)).await;

    let request = h.auth_request("TESTER", &key());
    h.send_auth(&request).await;

    assert_eq!(h.recv_packet().await, (AUTH_RESPONSE, vec![0x15]));
}

#[tokio::test]
async fn test_disallowed_build() {
    let mut h = connect(context(store())).await;

    let mut request = h.auth_request("TESTER", &key());
    request.build = 8606;
    h.send_auth(&request).await;

    assert_eq!(h.recv_packet().await, (AUTH_RESPONSE, vec![0x14]));
}

#[tokio::test]
async fn test_broken_store_reports_system_error() {
    let mut h = accept(context(Arc::new(MemoryAccountStore::broken()))).await;

    // the address screen fails first, before any challenge
    assert_eq!(h.rest().await, vec![0x00, 0x03, 0xEE, 0x01, 0x11]);
}

#[tokio::test]
async fn test_refusals_after_digest_are_encrypted() {
    let store = store();
    store.ban(1, None);
    let mut h = connect(context(store)).await;
    let request = h.auth_request("TESTER", &key());
    assert_eq!(h.authenticate(&request).await, (AUTH_RESPONSE, vec![0x1C]));
    assert!(matches!(h.task.await.unwrap(), Err(SessionError::AccountBanned { .. })));

    let store = self::store();
    store.ban(1, Some(unix_now() + 3600));
    let mut h = connect(context(store)).await;
    let request = h.auth_request("TESTER", &key());
    assert_eq!(h.authenticate(&request).await, (AUTH_RESPONSE, vec![0x20]));
    assert!(matches!(h.task.await.unwrap(), Err(SessionError::AccountBanned { .. })));

    let store = self::store();
    store.update("TESTER", |a| {
        a.locked = true;
        a.last_ip = Some("10.1.2.3".to_string());
    });
    let mut h = connect(context(store)).await;
    let request = h.auth_request("TESTER", &key());
    assert_eq!(h.authenticate(&request).await, (AUTH_RESPONSE, vec![0x22]));
    assert!(matches!(
        h.task.await.unwrap(),
        Err(SessionError::AccountLocked { account }) if account == "TESTER"
    ));
}

#[tokio::test]
async fn test_banned_address_rejected_before_challenge() {
    let store = store();
    store.ban_ip("127.0.0.1");
    let mut h = accept(context(store)).await;

    // AUTH_REJECT in a clear header, and no SMSG_AUTH_CHALLENGE at all
    assert_eq!(h.rest().await, vec![0x00, 0x03, 0xEE, 0x01, 0x0E]);
    assert!(h.task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_other_address_ban_still_challenged() {
    let store = store();
    store.ban_ip("10.9.9.9");
    let mut h = connect(context(store)).await;

    let request = h.auth_request("TESTER", &key());
    assert_eq!(h.authenticate(&request).await.0, AUTH_RESPONSE);
}

#[tokio::test]
async fn test_world_login_records_address() {
    let store = store();
    store.update("TESTER", |a| a.last_ip = Some("10.1.2.3".to_string()));
    let mut h = connect(context(store.clone())).await;
    let request = h.auth_request("TESTER", &key());
    h.authenticate(&request).await;

    // the pong only comes once the address has been written
    h.ping(1, 0).await;
    assert_eq!(h.recv_packet().await.0, PONG);

    assert_eq!(store.account("TESTER").last_ip.as_deref(), Some("127.0.0.1"));
}

#[tokio::test]
async fn test_wrong_realm() {
    let mut h = connect(context(store())).await;

    let mut request = h.auth_request("TESTER", &key());
    request.realm_id = 2;

    assert_eq!(h.authenticate(&request).await, (AUTH_RESPONSE, vec![0x27]));
}

#[tokio::test]
async fn test_security_level_below_realm_minimum() {
    let store = store();
    let mut security = SecurityConfig::default();
    security.min_security_level = AccountLevel::GameMaster;
    let ctx = Arc::new(WorldContext {
        store,
        rate_limiter: Arc::new(RateLimiter::new()),
        security,
        realm_id: 1,
    });
    let mut h = connect(ctx).await;

    let request = h.auth_request("TESTER", &key());

    assert_eq!(h.authenticate(&request).await, (AUTH_RESPONSE, vec![0x10]));
}

#[tokio::test]
async fn test_overspeed_pings_close_player_session() {
    let mut h = connect(context(store())).await;
    let request = h.auth_request("TESTER", &key());
    h.authenticate(&request).await;

    // The first ping sets the clock; the next two are tolerated.
    for ping in 1..=3 {
        h.ping(ping, 10).await;
        assert_eq!(h.recv_packet().await.0, PONG);
    }
    h.ping(4, 10).await;

    assert!(h.rest().await.is_empty());
    assert!(h.task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_overspeed_pings_tolerated_for_staff() {
    let store = store();
    store.update("TESTER", |a| a.security = AccountLevel::GameMaster);
    let mut h = connect(context(store)).await;
    let request = h.auth_request("TESTER", &key());
    h.authenticate(&request).await;

    for ping in 1..=5 {
        h.ping(ping, 10).await;
        assert_eq!(h.recv_packet().await, (PONG, ping.to_le_bytes().to_vec()));
    }
}

#[tokio::test]
async fn test_unregistered_opcode_skipped() {
    let mut h = connect(context(store())).await;
    let request = h.auth_request("TESTER", &key());
    h.authenticate(&request).await;

    h.send_packet(0x100, &[1, 2]).await;
    h.ping(5, 10).await;

    assert_eq!(h.recv_packet().await, (PONG, 5u32.to_le_bytes().to_vec()));
}

#[tokio::test]
async fn test_ping_before_auth_closes() {
    let mut h = connect(context(store())).await;

    h.ping(1, 0).await;

    assert!(h.rest().await.is_empty());
    assert!(matches!(
        h.task.await.unwrap(),
        Err(SessionError::InvalidState {
            name: "CMSG_PING",
            state: SessionState::ChallengeSent
        })
    ));
}

#[tokio::test]
async fn test_invalid_header_closes() {
    let mut h = connect(context(store())).await;

    h.client
        .write_all(&[0x00, 0x02, 0xDC, 0x01, 0x00, 0x00])
        .await
        .unwrap();

    assert!(h.rest().await.is_empty());
    assert!(matches!(
        h.task.await.unwrap(),
        Err(SessionError::MalformedHeader(_))
    ));
}

#[test]
fn test_header_waits_for_body_and_decrypts_once() {
    let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
    let mut session = WorldSession::new(peer);
    session.crypt = Some(HeaderCrypt::new(&key()).unwrap());
    let mut client = HeaderCrypt::new_client(&key()).unwrap();

    let mut header = ClientHeader {
        size: 12,
        opcode: 0x1DC,
    }
    .to_bytes();
    client.encrypt_send(&mut header);

    let mut inbound = BytesMut::from(&header[..]);
    inbound.extend_from_slice(&[1, 0, 0, 0]);
    assert!(session.next_frame(&mut inbound).unwrap().is_none());

    inbound.extend_from_slice(&[0, 0, 0, 0]);
    let frame = session.next_frame(&mut inbound).unwrap().unwrap();
    assert_eq!(frame.opcode, 0x1DC);
    assert_eq!(&frame.body[..], &[1, 0, 0, 0, 0, 0, 0, 0]);
    assert!(inbound.is_empty());

    // The stream stays in step for the next header.
    let mut header = ClientHeader {
        size: 4,
        opcode: 0x407,
    }
    .to_bytes();
    client.encrypt_send(&mut header);
    inbound.extend_from_slice(&header);
    let frame = session.next_frame(&mut inbound).unwrap().unwrap();
    assert_eq!(frame.opcode, 0x407);
    assert!(frame.body.is_empty());
}

#[test]
fn test_challenge_queued_on_creation() {
    let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
    let mut session = WorldSession::new(peer);

    assert_eq!(session.state(), SessionState::ChallengeSent);
    let out = session.take_outbound();
    assert_eq!(&out[..4], &[0x00, 0x2A, 0xEC, 0x01]);
    assert_eq!(&out[8..12], &session.seed);
}
