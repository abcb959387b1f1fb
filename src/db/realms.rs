//! Realm list and per-realm character counts

use std::collections::HashMap;

use serde::Serialize;
use sqlx::FromRow;
use tracing::warn;

use super::{DbPool, StoreError};
use crate::session::AccountLevel;

#[derive(Debug, Clone, FromRow)]
struct RealmRow {
    id: i64,
    name: String,
    address: String,
    realm_type: i64,
    flags: i64,
    timezone: i64,
    population: f64,
    allowed_security: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RealmRecord {
    pub id: u32,
    pub name: String,
    /// `host:port` the client connects to.
    pub address: String,
    pub realm_type: u8,
    pub flags: u8,
    pub timezone: u8,
    pub population: f32,
    /// Accounts below this level see the realm as locked.
    pub allowed_security: AccountLevel,
}

impl TryFrom<RealmRow> for RealmRecord {
    type Error = String;

    /// Fails for rows whose values do not fit the realm list's one-byte fields.
    fn try_from(row: RealmRow) -> Result<Self, Self::Error> {
        let byte = |field: &str, value: i64| {
            u8::try_from(value).map_err(|_| format!("{} {} out of range", field, value))
        };
        if row.name.contains('\0') || row.address.contains('\0') {
            return Err("NUL in name or address".to_string());
        }
        Ok(Self {
            id: u32::from(byte("id", row.id)?),
            realm_type: byte("realm_type", row.realm_type)?,
            flags: byte("flags", row.flags)?,
            timezone: byte("timezone", row.timezone)?,
            name: row.name,
            address: row.address,
            population: row.population as f32,
            allowed_security: AccountLevel::from_level(row.allowed_security),
        })
    }
}

/// Realms to advertise. Rows that cannot be sent are logged and skipped.
pub async fn list_realms(pool: &DbPool) -> Result<Vec<RealmRecord>, StoreError> {
    let rows = sqlx::query_as::<_, RealmRow>(
        r#"
        SELECT id, name, address, realm_type, flags, timezone, population, allowed_security
        FROM realms
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let name = row.name.clone();
            RealmRecord::try_from(row)
                .map_err(|e| warn!("Skipping realm '{}': {}", name, e))
                .ok()
        })
        .collect())
}

pub async fn get_character_counts(pool: &DbPool, account_id: i64) -> Result<HashMap<u32, u8>, StoreError> {
    let rows = sqlx::query_as::<_, (i64, i64)>(
        "SELECT realm_id, count FROM realm_characters WHERE account_id = ?",
    )
    .bind(account_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(realm, count)| (realm as u32, count.clamp(0, u8::MAX as i64) as u8))
        .collect())
}

/// Called by the character service when characters are created or deleted.
pub async fn set_character_count(
    pool: &DbPool,
    realm_id: u32,
    account_id: i64,
    count: u8,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO realm_characters (realm_id, account_id, count)
        VALUES (?, ?, ?)
        ON CONFLICT(realm_id, account_id) DO UPDATE SET count = excluded.count
        "#,
    )
    .bind(realm_id as i64)
    .bind(account_id)
    .bind(count as i64)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::srp6;
    use crate::db::{create_account, test_pool};

    #[tokio::test]
    async fn test_default_realm_seeded() {
        let pool = test_pool::pool().await;

        let realms = list_realms(&pool).await.unwrap();

        assert_eq!(realms.len(), 1);
        assert_eq!(realms[0].name, "Realmgate");
        assert_eq!(realms[0].address, "127.0.0.1:8085");
        assert_eq!(realms[0].allowed_security, AccountLevel::Player);
    }

    #[tokio::test]
    async fn test_unsendable_realms_skipped() {
        let pool = test_pool::pool().await;
        for (id, name, timezone) in [(300, "Wide", 1), (2, "Zone", 999), (3, "Bad\0Name", 1), (4, "Fine", 8)] {
            sqlx::query("INSERT INTO realms (id, name, address, timezone) VALUES (?, ?, '10.0.0.1:8085', ?)")
                .bind(id)
                .bind(name)
                .bind(timezone)
                .execute(&pool)
                .await
                .unwrap();
        }

        let realms = list_realms(&pool).await.unwrap();

        let names: Vec<&str> = realms.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Realmgate", "Fine"]);
        assert_eq!(realms[1].id, 4);
        assert_eq!(realms[1].timezone, 8);
    }

    #[tokio::test]
    async fn test_character_count_upsert() {
        let pool = test_pool::pool().await;
        let (salt, verifier) = srp6::make_registration("gina", "pw");
        let id = create_account(&pool, "gina", &salt, &verifier, AccountLevel::Player)
            .await
            .unwrap();

        set_character_count(&pool, 1, id, 2).await.unwrap();
        set_character_count(&pool, 1, id, 5).await.unwrap();

        assert_eq!(get_character_counts(&pool, id).await.unwrap().get(&1), Some(&5));
        assert!(get_character_counts(&pool, id + 1).await.unwrap().is_empty());
    }
}
