//! Account and IP bans

use serde::Serialize;
use sqlx::FromRow;

use super::{DbPool, StoreError};

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BanInfo {
    pub id: i64,
    pub account_id: Option<i64>,
    pub ip: Option<String>,
    pub banned_at: i64,
    /// `None` for a permanent ban.
    pub expires_at: Option<i64>,
    pub banned_by: String,
    pub reason: String,
    pub active: bool,
}

impl BanInfo {
    pub fn is_permanent(&self) -> bool {
        self.expires_at.is_none()
    }

    pub fn is_in_force(&self, now: i64) -> bool {
        self.active && self.expires_at.map(|t| t > now).unwrap_or(true)
    }
}

pub async fn ban_account(
    pool: &DbPool,
    account_id: i64,
    expires_at: Option<i64>,
    banned_by: &str,
    reason: &str,
) -> Result<i64, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO bans (account_id, banned_at, expires_at, banned_by, reason)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(account_id)
    .bind(super::unix_now())
    .bind(expires_at)
    .bind(banned_by)
    .bind(reason)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn ban_ip(
    pool: &DbPool,
    ip: &str,
    expires_at: Option<i64>,
    banned_by: &str,
    reason: &str,
) -> Result<i64, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO bans (ip, banned_at, expires_at, banned_by, reason)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(ip)
    .bind(super::unix_now())
    .bind(expires_at)
    .bind(banned_by)
    .bind(reason)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// The longest-running ban in force for the account or the address.
pub async fn find_active_ban(
    pool: &DbPool,
    account_id: i64,
    ip: &str,
    now: i64,
) -> Result<Option<BanInfo>, StoreError> {
    let ban = sqlx::query_as::<_, BanInfo>(
        r#"
        SELECT id, account_id, ip, banned_at, expires_at, banned_by, reason, active
        FROM bans
        WHERE active = 1
          AND (expires_at IS NULL OR expires_at > ?)
          AND (account_id = ? OR ip = ?)
        ORDER BY expires_at IS NULL DESC, expires_at DESC
        LIMIT 1
        "#,
    )
    .bind(now)
    .bind(account_id)
    .bind(ip)
    .fetch_optional(pool)
    .await?;

    Ok(ban)
}

/// An address ban in force, ignoring account bans.
pub async fn find_active_ip_ban(
    pool: &DbPool,
    ip: &str,
    now: i64,
) -> Result<Option<BanInfo>, StoreError> {
    let ban = sqlx::query_as::<_, BanInfo>(
        r#"
        SELECT id, account_id, ip, banned_at, expires_at, banned_by, reason, active
        FROM bans
        WHERE active = 1
          AND (expires_at IS NULL OR expires_at > ?)
          AND ip = ?
        ORDER BY expires_at IS NULL DESC, expires_at DESC
        LIMIT 1
        "#,
    )
    .bind(now)
    .bind(ip)
    .fetch_optional(pool)
    .await?;

    Ok(ban)
}

pub async fn list_active_bans(pool: &DbPool, now: i64) -> Result<Vec<BanInfo>, StoreError> {
    let bans = sqlx::query_as::<_, BanInfo>(
        r#"
        SELECT id, account_id, ip, banned_at, expires_at, banned_by, reason, active
        FROM bans
        WHERE active = 1 AND (expires_at IS NULL OR expires_at > ?)
        ORDER BY banned_at DESC
        "#,
    )
    .bind(now)
    .fetch_all(pool)
    .await?;

    Ok(bans)
}

/// Lift every active ban on an account. Returns how many were lifted.
pub async fn unban_account(pool: &DbPool, account_id: i64) -> Result<u64, StoreError> {
    let result = sqlx::query("UPDATE bans SET active = 0 WHERE account_id = ? AND active = 1")
        .bind(account_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn unban_ip(pool: &DbPool, ip: &str) -> Result<u64, StoreError> {
    let result = sqlx::query("UPDATE bans SET active = 0 WHERE ip = ? AND active = 1")
        .bind(ip)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Mark bans past their expiry inactive. Returns how many changed.
pub async fn expire_bans(pool: &DbPool, now: i64) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE bans SET active = 0 WHERE active = 1 AND expires_at IS NOT NULL AND expires_at <= ?",
    )
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::srp6;
    use crate::db::{create_account, test_pool};
    use crate::session::AccountLevel;

    async fn setup() -> (DbPool, i64) {
        let pool = test_pool::pool().await;
        let (salt, verifier) = srp6::make_registration("mallory", "pw");
        let id = create_account(&pool, "mallory", &salt, &verifier, AccountLevel::Player)
            .await
            .unwrap();
        (pool, id)
    }

    #[tokio::test]
    async fn test_permanent_ban_wins() {
        let (pool, id) = setup().await;
        ban_account(&pool, id, Some(2_000), "gm", "spam").await.unwrap();
        ban_account(&pool, id, None, "gm", "cheating").await.unwrap();

        let ban = find_active_ban(&pool, id, "1.1.1.1", 1_000).await.unwrap().unwrap();

        assert!(ban.is_permanent());
        assert_eq!(ban.reason, "cheating");
    }

    #[tokio::test]
    async fn test_expired_ban_ignored() {
        let (pool, id) = setup().await;
        ban_account(&pool, id, Some(500), "gm", "old").await.unwrap();

        assert!(find_active_ban(&pool, id, "1.1.1.1", 1_000).await.unwrap().is_none());
        assert_eq!(expire_bans(&pool, 1_000).await.unwrap(), 1);
        assert!(list_active_bans(&pool, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ip_ban_and_unban() {
        let (pool, id) = setup().await;
        ban_ip(&pool, "6.6.6.6", None, "gm", "proxy").await.unwrap();

        assert!(find_active_ban(&pool, id, "6.6.6.6", 0).await.unwrap().is_some());
        assert!(find_active_ban(&pool, id, "6.6.6.7", 0).await.unwrap().is_none());

        assert_eq!(unban_ip(&pool, "6.6.6.6").await.unwrap(), 1);
        assert!(find_active_ban(&pool, id, "6.6.6.6", 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unban_account() {
        let (pool, id) = setup().await;
        ban_account(&pool, id, None, "gm", "a").await.unwrap();
        ban_account(&pool, id, None, "gm", "b").await.unwrap();

        assert_eq!(unban_account(&pool, id).await.unwrap(), 2);
        assert!(find_active_ban(&pool, id, "1.1.1.1", 0).await.unwrap().is_none());
    }

    #[test]
    fn test_in_force() {
        let ban = BanInfo {
            id: 1,
            account_id: Some(1),
            ip: None,
            banned_at: 0,
            expires_at: Some(100),
            banned_by: "gm".into(),
            reason: "x".into(),
            active: true,
        };
        assert!(ban.is_in_force(99));
        assert!(!ban.is_in_force(100));
        assert!(!BanInfo { active: false, ..ban }.is_in_force(0));
    }
}
