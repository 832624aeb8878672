// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Primary tier: SQLite via a lazily connected pool.
//!
//! The pool never connects at construction, so the broker starts even when
//! the database is unreachable. Schema creation is retried on every call
//! until it succeeds once.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tokio::sync::OnceCell;

use crate::credential::{epoch_ms, AccountCredential};
use crate::store::{CredentialTier, StoreError};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS account_credentials (
        account_id    TEXT PRIMARY KEY NOT NULL,
        client_id     TEXT NOT NULL,
        client_secret TEXT NOT NULL,
        refresh_token TEXT,
        token_url     TEXT NOT NULL,
        base_url      TEXT NOT NULL,
        app_name      TEXT NOT NULL,
        place_ids     TEXT NOT NULL DEFAULT '[]',
        updated_at_ms INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS active_account (
        slot          INTEGER PRIMARY KEY CHECK (slot = 1),
        account_id    TEXT NOT NULL,
        updated_at_ms INTEGER NOT NULL
    )",
];

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

pub struct SqliteTier {
    pool: SqlitePool,
    schema: OnceCell<()>,
}

impl SqliteTier {
    /// Build a tier for `url` (e.g. `sqlite://broker.db`) without connecting.
    pub fn connect_lazy(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        // Each in-memory connection is a separate database; pin to one.
        let in_memory = url.contains(":memory:");
        let mut pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .acquire_timeout(Duration::from_secs(5));
        if in_memory {
            pool = pool.idle_timeout(None).max_lifetime(None);
        }
        Ok(Self { pool: pool.connect_lazy_with(options), schema: OnceCell::new() })
    }

    async fn pool(&self) -> Result<&SqlitePool, StoreError> {
        self.schema
            .get_or_try_init(|| async {
                for stmt in SCHEMA {
                    sqlx::query(stmt).execute(&self.pool).await?;
                }
                Ok::<(), StoreError>(())
            })
            .await?;
        Ok(&self.pool)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_credential(row: &SqliteRow) -> Result<AccountCredential, StoreError> {
    let place_ids: String = row.try_get("place_ids")?;
    let place_ids: BTreeSet<String> = serde_json::from_str(&place_ids)?;
    let updated_at_ms: i64 = row.try_get("updated_at_ms")?;
    Ok(AccountCredential {
        account_id: row.try_get("account_id")?,
        client_id: row.try_get("client_id")?,
        client_secret: row.try_get("client_secret")?,
        refresh_token: row.try_get("refresh_token")?,
        token_url: row.try_get("token_url")?,
        base_url: row.try_get("base_url")?,
        app_name: row.try_get("app_name")?,
        place_ids,
        updated_at_ms: u64::try_from(updated_at_ms).unwrap_or_default(),
    })
}

#[async_trait]
impl CredentialTier for SqliteTier {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, account_id: &str) -> Result<Option<AccountCredential>, StoreError> {
        let pool = self.pool().await?;
        let row = sqlx::query("SELECT * FROM account_credentials WHERE account_id = ?1")
            .bind(account_id)
            .fetch_optional(pool)
            .await?;
        row.as_ref().map(row_to_credential).transpose()
    }

    async fn put(&self, credential: &AccountCredential) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        let place_ids = serde_json::to_string(&credential.place_ids)?;
        sqlx::query(
            "INSERT INTO account_credentials
                (account_id, client_id, client_secret, refresh_token, token_url,
                 base_url, app_name, place_ids, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(account_id) DO UPDATE SET
                client_id = excluded.client_id,
                client_secret = excluded.client_secret,
                refresh_token = excluded.refresh_token,
                token_url = excluded.token_url,
                base_url = excluded.base_url,
                app_name = excluded.app_name,
                place_ids = excluded.place_ids,
                updated_at_ms = excluded.updated_at_ms",
        )
        .bind(&credential.account_id)
        .bind(&credential.client_id)
        .bind(&credential.client_secret)
        .bind(&credential.refresh_token)
        .bind(&credential.token_url)
        .bind(&credential.base_url)
        .bind(&credential.app_name)
        .bind(place_ids)
        .bind(i64::try_from(credential.updated_at_ms).unwrap_or(i64::MAX))
        .execute(pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, account_id: &str) -> Result<bool, StoreError> {
        let pool = self.pool().await?;
        let result = sqlx::query("DELETE FROM account_credentials WHERE account_id = ?1")
            .bind(account_id)
            .execute(pool)
            .await?;
        sqlx::query("DELETE FROM active_account WHERE account_id = ?1")
            .bind(account_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let pool = self.pool().await?;
        let rows = sqlx::query("SELECT account_id FROM account_credentials ORDER BY account_id")
            .fetch_all(pool)
            .await?;
        rows.iter().map(|r| r.try_get("account_id").map_err(StoreError::from)).collect()
    }

    async fn get_active(&self) -> Result<Option<String>, StoreError> {
        let pool = self.pool().await?;
        let row = sqlx::query("SELECT account_id FROM active_account WHERE slot = 1")
            .fetch_optional(pool)
            .await?;
        Ok(row.map(|r| r.try_get("account_id")).transpose()?)
    }

    async fn set_active(&self, account_id: &str) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        sqlx::query(
            "INSERT INTO active_account (slot, account_id, updated_at_ms) VALUES (1, ?1, ?2)
             ON CONFLICT(slot) DO UPDATE SET
                account_id = excluded.account_id,
                updated_at_ms = excluded.updated_at_ms",
        )
        .bind(account_id)
        .bind(i64::try_from(epoch_ms()).unwrap_or(i64::MAX))
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;
