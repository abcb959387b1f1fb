//! Account store for the logon and world listeners
//!
//! Uses SQLite through sqlx. Sessions only see the [`AccountStore`] trait;
//! the admin API calls the free functions directly.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;

use crate::config::SecurityConfig;
use crate::crypto::SessionKey;

mod accounts;
mod bans;
mod realms;

pub use accounts::*;
pub use bans::*;
pub use realms::*;

/// Database connection pool type.
pub type DbPool = SqlitePool;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Corrupt {field} for account {account}")]
    Corrupt { account: String, field: &'static str },
}

/// Create a database connection pool.
pub async fn create_pool(database_url: &str) -> Result<DbPool, StoreError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(50)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Initialize the database schema.
pub async fn init_database(pool: &DbPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// What to do after repeated wrong passwords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrongPasswordPolicy {
    /// 0 disables automatic bans.
    pub max_attempts: u32,
    pub ban_secs: u64,
    pub ban_ip: bool,
}

impl From<&SecurityConfig> for WrongPasswordPolicy {
    fn from(config: &SecurityConfig) -> Self {
        Self {
            max_attempts: config.max_wrong_password,
            ban_secs: config.wrong_password_ban_secs,
            ban_ip: config.wrong_password_ban_ip,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailedLogin {
    pub attempts: u32,
    /// A ban was issued by this failure.
    pub banned: bool,
}

/// Everything a session needs to know about accounts, bans and realms.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_account(&self, username: &str) -> Result<Option<AccountRecord>, StoreError>;

    /// The ban in force for this account or address, if any.
    async fn active_ban(&self, account_id: i64, ip: &str) -> Result<Option<BanInfo>, StoreError>;

    /// Address-only ban, checked before a world client is challenged.
    async fn ip_ban(&self, ip: &str) -> Result<Option<BanInfo>, StoreError>;

    /// Store the new session key and reset the failure counter.
    async fn record_login(
        &self,
        account_id: i64,
        key: &SessionKey,
        ip: &str,
        os: &str,
    ) -> Result<(), StoreError>;

    async fn record_failed_login(
        &self,
        account_id: i64,
        ip: &str,
        policy: &WrongPasswordPolicy,
    ) -> Result<FailedLogin, StoreError>;

    /// Remember the address a world session authenticated from.
    async fn record_world_login(&self, account_id: i64, ip: &str) -> Result<(), StoreError>;

    async fn realms(&self) -> Result<Vec<RealmRecord>, StoreError>;

    /// Characters per realm id for one account.
    async fn character_counts(&self, account_id: i64) -> Result<HashMap<u32, u8>, StoreError>;
}

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// [`AccountStore`] backed by the SQLite pool.
#[derive(Clone)]
pub struct SqliteAccountStore {
    pool: DbPool,
}

impl SqliteAccountStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl AccountStore for SqliteAccountStore {
    async fn find_account(&self, username: &str) -> Result<Option<AccountRecord>, StoreError> {
        find_account_by_username(&self.pool, username).await
    }

    async fn active_ban(&self, account_id: i64, ip: &str) -> Result<Option<BanInfo>, StoreError> {
        find_active_ban(&self.pool, account_id, ip, unix_now()).await
    }

    async fn ip_ban(&self, ip: &str) -> Result<Option<BanInfo>, StoreError> {
        find_active_ip_ban(&self.pool, ip, unix_now()).await
    }

    async fn record_login(
        &self,
        account_id: i64,
        key: &SessionKey,
        ip: &str,
        os: &str,
    ) -> Result<(), StoreError> {
        update_login(&self.pool, account_id, key, ip, os).await
    }

    async fn record_failed_login(
        &self,
        account_id: i64,
        ip: &str,
        policy: &WrongPasswordPolicy,
    ) -> Result<FailedLogin, StoreError> {
        let attempts = increment_failed_logins(&self.pool, account_id).await?;
        let banned = policy.max_attempts > 0 && attempts >= policy.max_attempts;
        if banned {
            let expires_at = unix_now() + policy.ban_secs as i64;
            let reason = format!("Failed login ({} attempts)", attempts);
            if policy.ban_ip {
                ban_ip(&self.pool, ip, Some(expires_at), "realmgate", &reason).await?;
            } else {
                ban_account(&self.pool, account_id, Some(expires_at), "realmgate", &reason).await?;
            }
            reset_failed_logins(&self.pool, account_id).await?;
        }
        Ok(FailedLogin { attempts, banned })
    }

    async fn record_world_login(&self, account_id: i64, ip: &str) -> Result<(), StoreError> {
        update_last_ip(&self.pool, account_id, ip).await
    }

    async fn realms(&self) -> Result<Vec<RealmRecord>, StoreError> {
        list_realms(&self.pool).await
    }

    async fn character_counts(&self, account_id: i64) -> Result<HashMap<u32, u8>, StoreError> {
        get_character_counts(&self.pool, account_id).await
    }
}
