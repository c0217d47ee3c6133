//! Session token issuance and validation
//!
//! Every session is stored as two entries with the same TTL:
//!
//! - `session:<token>` -> username
//! - `user:<username>` -> token
//!
//! A token is valid only while both directions agree. Issuing a new session
//! for a user overwrites the reverse entry, so any older token is rejected
//! with `SessionError::Mismatch` even if its forward entry still exists.

mod memory;
mod sqlite;

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use thiserror::Error;
use tracing::debug;

use crate::constants::{SESSION_TOKEN_BYTES, SESSION_TOKEN_PREFIX, SESSION_USER_PREFIX};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors from a key-value backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session backend error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Session lookup and issuance errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// A required entry is missing or expired
    #[error("session not found")]
    NotFound,
    /// The token maps to a user whose current token is a different one
    #[error("session superseded by a newer token")]
    Mismatch,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Key-value backend for session entries
///
/// Multi-key writes and deletes must be applied atomically.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Get an unexpired value
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set every entry with the same TTL, all or nothing
    async fn set_all(&self, entries: &[(String, String)], ttl: Duration) -> Result<(), StoreError>;

    /// Delete every key, all or nothing. Missing keys are ignored.
    async fn delete_all(&self, keys: &[String]) -> Result<(), StoreError>;
}

/// Single-active-session-per-user token store
pub struct SessionStore<B> {
    backend: B,
    ttl: Duration,
}

impl<B: KeyValueStore> SessionStore<B> {
    pub fn new(backend: B, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    /// The underlying backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Issue a fresh session for `username`, revoking any previous one
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Store` if the backend fails.
    pub async fn issue_session(&self, username: &str) -> Result<String, SessionError> {
        self.revoke_all_sessions(username).await?;

        let token = generate_token();
        let entries = [
            (token_key(&token), username.to_string()),
            (user_key(username), token.clone()),
        ];
        self.backend.set_all(&entries, self.ttl).await?;

        debug!(username = %username, "issued session");
        Ok(token)
    }

    /// Resolve a token to its username
    ///
    /// # Errors
    ///
    /// - `SessionError::NotFound` if either direction is missing or expired
    /// - `SessionError::Mismatch` if the user's current token is a different one
    pub async fn validate_session(&self, token: &str) -> Result<String, SessionError> {
        let username = self
            .backend
            .get(&token_key(token))
            .await?
            .ok_or(SessionError::NotFound)?;

        let current = self
            .backend
            .get(&user_key(&username))
            .await?
            .ok_or(SessionError::NotFound)?;

        if current != token {
            return Err(SessionError::Mismatch);
        }
        Ok(username)
    }

    /// Delete both directions of the user's current session, if any
    pub async fn revoke_all_sessions(&self, username: &str) -> Result<(), SessionError> {
        let user_key = user_key(username);
        let Some(token) = self.backend.get(&user_key).await? else {
            return Ok(());
        };
        self.backend
            .delete_all(&[token_key(&token), user_key])
            .await?;
        debug!(username = %username, "revoked session");
        Ok(())
    }
}

fn user_key(username: &str) -> String {
    format!("{}{}", SESSION_USER_PREFIX, username)
}

fn token_key(token: &str) -> String {
    format!("{}{}", SESSION_TOKEN_PREFIX, token)
}

/// 256 random bits, URL-safe base64 with padding
fn generate_token() -> String {
    use rand::RngExt;
    let bytes: [u8; SESSION_TOKEN_BYTES] = rand::rng().random();
    URL_SAFE.encode(bytes)
}
