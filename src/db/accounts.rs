//! Account database operations

use sqlx::FromRow;

use super::{unix_now, DbPool, StoreError};
use crate::constants::SALT_LENGTH;
use crate::crypto::SessionKey;
use crate::session::AccountLevel;

/// Account row as stored.
#[derive(Debug, Clone, FromRow)]
struct AccountRow {
    id: i64,
    username: String,
    salt: Vec<u8>,
    verifier: Vec<u8>,
    session_key: Option<Vec<u8>>,
    last_ip: Option<String>,
    locked: bool,
    failed_logins: i64,
    security: i64,
    expansion: i64,
    totp_secret: Option<Vec<u8>>,
    os: Option<String>,
    created_at: i64,
    last_login: Option<i64>,
}

/// Account with its credentials decoded.
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub id: i64,
    pub username: String,
    pub salt: [u8; SALT_LENGTH],
    pub verifier: [u8; 32],
    pub session_key: Option<SessionKey>,
    pub last_ip: Option<String>,
    /// Only the last address may log in.
    pub locked: bool,
    pub failed_logins: u32,
    pub security: AccountLevel,
    pub expansion: u8,
    pub totp_secret: Option<Vec<u8>>,
    pub os: Option<String>,
    pub created_at: i64,
    pub last_login: Option<i64>,
}

impl TryFrom<AccountRow> for AccountRecord {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let corrupt = |field| StoreError::Corrupt {
            account: row.username.clone(),
            field,
        };
        let salt = row.salt.as_slice().try_into().map_err(|_| corrupt("salt"))?;
        let verifier = row
            .verifier
            .as_slice()
            .try_into()
            .map_err(|_| corrupt("verifier"))?;
        // A malformed stored key only disables reconnects, so treat it as absent.
        let session_key = row.session_key.as_deref().and_then(SessionKey::from_slice);

        Ok(Self {
            id: row.id,
            salt,
            verifier,
            session_key,
            last_ip: row.last_ip,
            locked: row.locked,
            failed_logins: row.failed_logins.clamp(0, u32::MAX as i64) as u32,
            security: AccountLevel::from_level(row.security),
            expansion: row.expansion.clamp(0, u8::MAX as i64) as u8,
            totp_secret: row.totp_secret.filter(|s| !s.is_empty()),
            os: row.os,
            created_at: row.created_at,
            last_login: row.last_login,
            username: row.username,
        })
    }
}

const ACCOUNT_COLUMNS: &str = "id, username, salt, verifier, session_key, last_ip, locked, \
     failed_logins, security, expansion, totp_secret, os, created_at, last_login";

/// Create a new account from SRP registration values.
pub async fn create_account(
    pool: &DbPool,
    username: &str,
    salt: &[u8; SALT_LENGTH],
    verifier: &[u8; 32],
    security: AccountLevel,
) -> Result<i64, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO accounts (username, salt, verifier, security)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(username.to_ascii_uppercase())
    .bind(salt.as_slice())
    .bind(verifier.as_slice())
    .bind(security.level())
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Find an account by username, ignoring case.
pub async fn find_account_by_username(
    pool: &DbPool,
    username: &str,
) -> Result<Option<AccountRecord>, StoreError> {
    let row = sqlx::query_as::<_, AccountRow>(&format!(
        "SELECT {} FROM accounts WHERE username = ?",
        ACCOUNT_COLUMNS
    ))
    .bind(username)
    .fetch_optional(pool)
    .await?;

    row.map(AccountRecord::try_from).transpose()
}

pub async fn find_account_by_id(pool: &DbPool, id: i64) -> Result<Option<AccountRecord>, StoreError> {
    let row = sqlx::query_as::<_, AccountRow>(&format!(
        "SELECT {} FROM accounts WHERE id = ?",
        ACCOUNT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(AccountRecord::try_from).transpose()
}

/// Page through accounts, optionally filtered by a name substring.
pub async fn list_accounts(
    pool: &DbPool,
    search: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<AccountRecord>, StoreError> {
    let pattern = format!("%{}%", search.unwrap_or(""));
    let rows = sqlx::query_as::<_, AccountRow>(&format!(
        "SELECT {} FROM accounts WHERE username LIKE ? ORDER BY id LIMIT ? OFFSET ?",
        ACCOUNT_COLUMNS
    ))
    .bind(pattern)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(AccountRecord::try_from).collect()
}

pub async fn count_accounts(pool: &DbPool) -> Result<i64, StoreError> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM accounts")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Check if a username already exists.
pub async fn username_exists(pool: &DbPool, username: &str) -> Result<bool, StoreError> {
    let result = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM accounts WHERE username = ?")
        .bind(username)
        .fetch_one(pool)
        .await?;

    Ok(result > 0)
}

/// Store the key from a successful proof and reset the failure counter.
pub async fn update_login(
    pool: &DbPool,
    account_id: i64,
    key: &SessionKey,
    ip: &str,
    os: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE accounts
        SET session_key = ?, last_ip = ?, os = ?, failed_logins = 0, last_login = ?
        WHERE id = ?
        "#,
    )
    .bind(key.as_bytes().as_slice())
    .bind(ip)
    .bind(os)
    .bind(unix_now())
    .bind(account_id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn update_last_ip(pool: &DbPool, account_id: i64, ip: &str) -> Result<(), StoreError> {
    sqlx::query("UPDATE accounts SET last_ip = ? WHERE id = ?")
        .bind(ip)
        .bind(account_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Bump the failure counter, returning the new value.
pub async fn increment_failed_logins(pool: &DbPool, account_id: i64) -> Result<u32, StoreError> {
    let attempts = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE accounts
        SET failed_logins = failed_logins + 1
        WHERE id = ?
        RETURNING failed_logins
        "#,
    )
    .bind(account_id)
    .fetch_optional(pool)
    .await?;

    Ok(attempts.unwrap_or(0).clamp(0, u32::MAX as i64) as u32)
}

pub async fn reset_failed_logins(pool: &DbPool, account_id: i64) -> Result<(), StoreError> {
    sqlx::query("UPDATE accounts SET failed_logins = 0 WHERE id = ?")
        .bind(account_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Replace the SRP credentials. The stored session key is dropped, so
/// reconnects with the old password fail.
pub async fn update_credentials(
    pool: &DbPool,
    account_id: i64,
    salt: &[u8; SALT_LENGTH],
    verifier: &[u8; 32],
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET salt = ?, verifier = ?, session_key = NULL, failed_logins = 0
        WHERE id = ?
        "#,
    )
    .bind(salt.as_slice())
    .bind(verifier.as_slice())
    .bind(account_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn set_locked(pool: &DbPool, account_id: i64, locked: bool) -> Result<bool, StoreError> {
    let result = sqlx::query("UPDATE accounts SET locked = ? WHERE id = ?")
        .bind(locked)
        .bind(account_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_security(
    pool: &DbPool,
    account_id: i64,
    security: AccountLevel,
) -> Result<bool, StoreError> {
    let result = sqlx::query("UPDATE accounts SET security = ? WHERE id = ?")
        .bind(security.level())
        .bind(account_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Set or clear the authenticator secret.
pub async fn set_totp_secret(
    pool: &DbPool,
    account_id: i64,
    secret: Option<&[u8]>,
) -> Result<bool, StoreError> {
    let result = sqlx::query("UPDATE accounts SET totp_secret = ? WHERE id = ?")
        .bind(secret)
        .bind(account_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
