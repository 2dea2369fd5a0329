//! Keyed store with per-entry expiry, used for upload records, parse results
//! and rollback records between requests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::db::DbPool;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Entries past their expiry are invisible to `get` and `delete`.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    async fn put(&self, namespace: &str, key: &str, value: String, ttl: Duration)
        -> Result<(), StoreError>;

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError>;

    /// `true` when a live entry was removed.
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StoreError>;

    /// Drops expired entries and returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, StoreError>;
}

struct Slot {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Saturates instead of overflowing for very long TTLs.
fn expiry(ttl: Duration) -> DateTime<Utc> {
    Utc::now()
        .checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Slot {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Process-local store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<(String, String), Slot>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl KeyedStore for MemoryStore {
    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let slot = Slot {
            value,
            expires_at: expiry(ttl),
        };
        self.entries
            .write()
            .await
            .insert((namespace.to_string(), key.to_string()), slot);
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(&(namespace.to_string(), key.to_string()))
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.value.clone()))
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StoreError> {
        let now = Utc::now();
        let removed = self
            .entries
            .write()
            .await
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(removed.is_some_and(|slot| slot.is_live(now)))
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, slot| slot.is_live(now));
        Ok(before - entries.len())
    }
}

/// `kv_entries` table; shareable across processes that open the same file.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyedStore for SqliteStore {
    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let expires_at = expiry(ttl).timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO kv_entries (namespace, key, value, expires_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            "#,
        )
        .bind(namespace)
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT value FROM kv_entries WHERE namespace = ? AND key = ? AND expires_at > ?",
        )
        .bind(namespace)
        .bind(key)
        .bind(Utc::now().timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StoreError> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            "DELETE FROM kv_entries WHERE namespace = ? AND key = ? AND expires_at > ?",
        )
        .bind(namespace)
        .bind(key)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE expires_at <= ?")
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await?;
        let purged = result.rows_affected() as usize;
        if purged > 0 {
            tracing::debug!(purged, "purged expired store entries");
        }
        Ok(purged)
    }
}
