//! Realmgate
//!
//! Logon and world-gateway session server for the 3.3.5a (build 12340) client.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

mod admin;
mod config;
mod constants;
mod crypto;
mod db;
mod error;
mod logon;
mod protocol;
mod rate_limit;
mod session;
mod world;

use config::Config;
use constants::CLEANUP_INTERVAL_SECS;
use db::{AccountStore, DbPool, SqliteAccountStore};
use logon::{LogonContext, LogonSession};
use rate_limit::RateLimiter;
use session::{shell, DispatchTable, Protocol, Session, SessionRegistry, ShellLimits};
use world::WorldContext;

/// Shared server state
pub struct Server {
    pub config: Config,
    pub db: DbPool,
    pub registry: Arc<SessionRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub limits: ShellLimits,
}

impl Server {
    /// Open the database and set up shared state.
    pub async fn new(config: Config) -> Result<Self> {
        let db = db::create_pool(&config.server.database_url).await?;
        db::init_database(&db).await?;

        let limits = ShellLimits::from_config(&config.network);
        Ok(Self {
            config,
            db,
            registry: Arc::new(SessionRegistry::new()),
            rate_limiter: Arc::new(RateLimiter::new()),
            limits,
        })
    }

    fn store(&self) -> Arc<dyn AccountStore> {
        Arc::new(SqliteAccountStore::new(self.db.clone()))
    }

    /// Connection limits, checked before a session is created.
    fn admit(&self, addr: &SocketAddr) -> bool {
        if self.registry.connection_count() >= self.config.server.max_connections {
            warn!("Connection limit reached, rejecting {}", addr);
            return false;
        }
        if self.registry.ip_connection_count(&addr.ip()) >= self.config.server.max_connections_per_ip {
            warn!("IP connection limit reached for {}", addr.ip());
            return false;
        }
        true
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Realmgate v{}", env!("CARGO_PKG_VERSION"));

    let server = Arc::new(Server::new(config).await?);
    info!("Database initialized");

    let logon_ctx = Arc::new(LogonContext::new(
        server.store(),
        server.rate_limiter.clone(),
        server.config.security.clone(),
    ));
    let logon_table = Arc::new(logon::logon_table(logon_ctx)?);

    let world_ctx = Arc::new(WorldContext {
        store: server.store(),
        rate_limiter: server.rate_limiter.clone(),
        security: server.config.security.clone(),
        realm_id: server.config.realm.id,
    });
    let world_table = Arc::new(world::world_table_builder(world_ctx.clone())?.build());

    let host = &server.config.server.host;
    let logon_addr = format!("{}:{}", host, server.config.server.logon_port);
    let world_addr = format!("{}:{}", host, server.config.server.world_port);
    let logon_listener = TcpListener::bind(&logon_addr).await?;
    let world_listener = TcpListener::bind(&world_addr).await?;
    info!("Logon server listening on {}", logon_addr);
    info!("World gateway listening on {} (realm {})", world_addr, server.config.realm.id);

    spawn_background_tasks(server.clone());

    if server.config.admin.enabled {
        let state = Arc::new(admin::AdminState {
            db: server.db.clone(),
            api_key: server.config.admin.api_key.clone(),
            registry: server.registry.clone(),
            started_at: chrono::Utc::now(),
        });
        let admin_host = server.config.admin.host.clone();
        let admin_port = server.config.admin.port;
        tokio::spawn(async move {
            if let Err(e) = admin::start_server(&admin_host, admin_port, state).await {
                error!("Admin API error: {}", e);
            }
        });
    }

    let logon = tokio::spawn(accept_loop(
        logon_listener,
        server.clone(),
        Protocol::Logon,
        logon_table,
        |addr| async move { LogonSession::new(addr) },
    ));
    let world = tokio::spawn(accept_loop(
        world_listener,
        server.clone(),
        Protocol::World,
        world_table,
        move |addr| {
            let ctx = world_ctx.clone();
            async move { world::open_session(&ctx, addr).await }
        },
    ));

    tokio::select! {
        _ = logon => error!("Logon accept loop stopped"),
        _ = world => error!("World accept loop stopped"),
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}

/// Accept connections and run one session task per socket.
async fn accept_loop<S, F, Fut>(
    listener: TcpListener,
    server: Arc<Server>,
    protocol: Protocol,
    table: Arc<DispatchTable<S>>,
    new_session: F,
) where
    S: Session,
    F: Fn(SocketAddr) -> Fut + Send + 'static,
    Fut: Future<Output = S> + Send + 'static,
{
    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                if !server.admit(&addr) {
                    continue;
                }
                let handle = server.registry.register(protocol, addr);
                let session = new_session(addr);
                let table = table.clone();
                let limits = server.limits;

                tokio::spawn(async move {
                    debug!("{} connection from {}", protocol.name(), addr);
                    let session = session.await;
                    if let Err(e) = run_connection(socket, session, table, limits, handle).await {
                        warn!("{} session {} ended: {}", protocol.name(), addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn run_connection<S: Session>(
    socket: TcpStream,
    session: S,
    table: Arc<DispatchTable<S>>,
    limits: ShellLimits,
    handle: session::SessionHandle,
) -> Result<()> {
    socket.set_nodelay(true)?;
    shell::run(socket, session, table, limits, handle).await?;
    Ok(())
}

/// Spawn background maintenance tasks.
fn spawn_background_tasks(server: Arc<Server>) {
    rate_limit::spawn_rate_limit_cleanup(server.rate_limiter.clone());

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));
        loop {
            interval.tick().await;

            match db::expire_bans(&server.db, db::unix_now()).await {
                Ok(0) => {}
                Ok(expired) => info!("Expired {} bans", expired),
                Err(e) => error!("Failed to expire bans: {}", e),
            }
            debug!(
                "Sessions: {} total, {} logon authenticated, {} world authenticated",
                server.registry.connection_count(),
                server.registry.authenticated_count(Protocol::Logon),
                server.registry.authenticated_count(Protocol::World)
            );
        }
    });
}
