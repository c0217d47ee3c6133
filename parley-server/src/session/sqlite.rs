//! SQLite session backend

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use super::{KeyValueStore, StoreError};
use crate::db::sql::{
    SQL_DELETE_SESSION_VALUE, SQL_GET_SESSION_VALUE, SQL_PURGE_EXPIRED_SESSIONS,
    SQL_SET_SESSION_VALUE,
};

/// Session backend over the `sessions` table
///
/// Multi-key operations run inside one transaction.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Delete expired rows, returning how many were removed
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(SQL_PURGE_EXPIRED_SESSIONS)
            .bind(now_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = sqlx::query_scalar::<_, String>(SQL_GET_SESSION_VALUE)
            .bind(key)
            .bind(now_millis())
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_all(&self, entries: &[(String, String)], ttl: Duration) -> Result<(), StoreError> {
        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now_millis().saturating_add(ttl_millis);

        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            sqlx::query(SQL_SET_SESSION_VALUE)
                .bind(key)
                .bind(value)
                .bind(expires_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_all(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for key in keys {
            sqlx::query(SQL_DELETE_SESSION_VALUE)
                .bind(key)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::memory_pool;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = SqliteStore::new(memory_pool().await);
        let ttl = Duration::from_secs(60);

        store
            .set_all(
                &[
                    ("user:alice".to_string(), "t1".to_string()),
                    ("session:t1".to_string(), "alice".to_string()),
                ],
                ttl,
            )
            .await
            .unwrap();
        assert_eq!(store.get("user:alice").await.unwrap().as_deref(), Some("t1"));
        assert_eq!(store.get("session:t1").await.unwrap().as_deref(), Some("alice"));

        store
            .delete_all(&["user:alice".to_string(), "session:t1".to_string()])
            .await
            .unwrap();
        assert!(store.get("user:alice").await.unwrap().is_none());
        assert!(store.get("session:t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_overwrites_value() {
        let store = SqliteStore::new(memory_pool().await);
        let ttl = Duration::from_secs(60);

        store
            .set_all(&[("k".to_string(), "old".to_string())], ttl)
            .await
            .unwrap();
        store
            .set_all(&[("k".to_string(), "new".to_string())], ttl)
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_expired_rows_hidden_and_purged() {
        let store = SqliteStore::new(memory_pool().await);

        store
            .set_all(&[("old".to_string(), "v".to_string())], Duration::ZERO)
            .await
            .unwrap();
        store
            .set_all(&[("fresh".to_string(), "v".to_string())], Duration::from_secs(60))
            .await
            .unwrap();

        assert!(store.get("old").await.unwrap().is_none());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.get("fresh").await.unwrap().is_some());
    }
}
