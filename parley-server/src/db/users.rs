//! User account database operations

use chrono::Utc;
use sqlx::SqlitePool;

use super::sql::{SQL_GET_USER, SQL_INSERT_USER};

/// A stored user account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    pub username: String,
    pub password_hash: String,
    /// Unix seconds
    pub created_at: i64,
}

/// Database interface for user accounts
#[derive(Clone)]
pub struct UsersDb {
    pool: SqlitePool,
}

impl UsersDb {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a user account
    ///
    /// Returns `Ok(false)` without touching the table if the username is taken.
    ///
    /// # Errors
    ///
    /// Returns an error on any database failure other than the unique violation.
    pub async fn create_user(&self, username: &str, password_hash: &str) -> sqlx::Result<bool> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(SQL_INSERT_USER)
            .bind(username)
            .bind(password_hash)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Look up a user account by username
    pub async fn get_user(&self, username: &str) -> sqlx::Result<Option<UserAccount>> {
        let row: Option<(String, String, i64)> = sqlx::query_as(SQL_GET_USER)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(username, password_hash, created_at)| UserAccount {
            username,
            password_hash,
            created_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::memory_pool;

    #[tokio::test]
    async fn test_create_and_get_user() {
        let users = UsersDb::new(memory_pool().await);

        assert!(users.create_user("alice", "$FAST$pw").await.unwrap());

        let account = users.get_user("alice").await.unwrap().unwrap();
        assert_eq!(account.username, "alice");
        assert_eq!(account.password_hash, "$FAST$pw");
        assert!(account.created_at > 0);
    }

    #[tokio::test]
    async fn test_create_duplicate_user() {
        let users = UsersDb::new(memory_pool().await);

        assert!(users.create_user("alice", "$FAST$one").await.unwrap());
        assert!(!users.create_user("alice", "$FAST$two").await.unwrap());

        // Original hash is untouched
        let account = users.get_user("alice").await.unwrap().unwrap();
        assert_eq!(account.password_hash, "$FAST$one");
    }

    #[tokio::test]
    async fn test_get_missing_user() {
        let users = UsersDb::new(memory_pool().await);
        assert!(users.get_user("nobody").await.unwrap().is_none());
    }
}
