//! Account signup, login, logout and token authentication

use parley_common::validators::{self, UsernameError};
use thiserror::Error;
use tracing::{info, warn};

use crate::db::{PasswordError, UsersDb, hash_password, verify_password};
use crate::session::{KeyValueStore, SessionError, SessionStore, StoreError};

/// Authentication failures
///
/// Missing, expired and superseded sessions all surface as `Unauthorized`;
/// so do unknown users and wrong passwords.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("username is already taken")]
    UsernameTaken,
    #[error("invalid username: {0:?}")]
    InvalidUsername(UsernameError),
    #[error("invalid password: {0:?}")]
    InvalidPassword(validators::PasswordError),
    #[error("password hashing failed: {0}")]
    Password(#[from] PasswordError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<SessionError> for AuthError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound | SessionError::Mismatch => AuthError::Unauthorized,
            SessionError::Store(e) => AuthError::Store(e),
        }
    }
}

impl AuthError {
    /// Message safe to show to the remote user
    pub fn public_message(&self) -> String {
        match self {
            AuthError::Unauthorized => "invalid username or password".to_string(),
            AuthError::UsernameTaken => "username is already taken".to_string(),
            AuthError::InvalidUsername(_) | AuthError::InvalidPassword(_) => self.to_string(),
            _ => "internal server error".to_string(),
        }
    }
}

/// Account service tying user records to the session store
pub struct AuthService<B> {
    users: UsersDb,
    sessions: SessionStore<B>,
    fast_hash: bool,
}

impl<B: KeyValueStore> AuthService<B> {
    /// # Arguments
    ///
    /// * `fast_hash` - Store `$FAST$` password hashes (tests only)
    pub fn new(users: UsersDb, sessions: SessionStore<B>, fast_hash: bool) -> Self {
        Self {
            users,
            sessions,
            fast_hash,
        }
    }

    pub fn sessions(&self) -> &SessionStore<B> {
        &self.sessions
    }

    /// Create an account and open its first session
    ///
    /// # Errors
    ///
    /// - `AuthError::InvalidUsername` / `AuthError::InvalidPassword` on bad input
    /// - `AuthError::UsernameTaken` if the account exists
    pub async fn signup(&self, username: &str, password: &str) -> Result<String, AuthError> {
        validators::validate_username(username).map_err(AuthError::InvalidUsername)?;
        validators::validate_password(password).map_err(AuthError::InvalidPassword)?;

        let fast = self.fast_hash;
        let password = password.to_string();
        let hash = tokio::task::spawn_blocking(move || hash_password(&password, fast)).await??;

        if !self.users.create_user(username, &hash).await? {
            return Err(AuthError::UsernameTaken);
        }
        info!(username = %username, "account created");

        Ok(self.sessions.issue_session(username).await?)
    }

    /// Check credentials and open a session, revoking any previous one
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Unauthorized` for an unknown user or a wrong password.
    pub async fn login(&self, username: &str, password: &str) -> Result<String, AuthError> {
        validators::validate_password_input(password).map_err(AuthError::InvalidPassword)?;

        let Some(account) = self.users.get_user(username).await? else {
            warn!(username = %username, "login for unknown user");
            return Err(AuthError::Unauthorized);
        };

        let password = password.to_string();
        let stored = account.password_hash;
        let valid =
            tokio::task::spawn_blocking(move || verify_password(&password, &stored)).await??;
        if !valid {
            warn!(username = %username, "login with wrong password");
            return Err(AuthError::Unauthorized);
        }

        Ok(self.sessions.issue_session(username).await?)
    }

    /// Revoke every session of `username`
    pub async fn logout(&self, username: &str) -> Result<(), AuthError> {
        self.sessions.revoke_all_sessions(username).await?;
        info!(username = %username, "logged out");
        Ok(())
    }

    /// Resolve a session token to its username
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Unauthorized` if the token is missing, expired or
    /// superseded.
    pub async fn authenticate(&self, token: &str) -> Result<String, AuthError> {
        Ok(self.sessions.validate_session(token).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::db::testing::memory_pool;
    use crate::session::MemoryStore;

    async fn service() -> AuthService<MemoryStore> {
        AuthService::new(
            UsersDb::new(memory_pool().await),
            SessionStore::new(MemoryStore::new(), Duration::from_secs(60)),
            true,
        )
    }

    #[tokio::test]
    async fn test_signup_then_authenticate() {
        let auth = service().await;
        let token = auth.signup("alice", "secret").await.unwrap();
        assert_eq!(auth.authenticate(&token).await.unwrap(), "alice");
    }

    #[tokio::test]
    async fn test_signup_duplicate_username() {
        let auth = service().await;
        auth.signup("alice", "secret").await.unwrap();
        assert!(matches!(
            auth.signup("alice", "other").await,
            Err(AuthError::UsernameTaken)
        ));
    }

    #[tokio::test]
    async fn test_signup_validates_input() {
        let auth = service().await;
        assert!(matches!(
            auth.signup("", "secret").await,
            Err(AuthError::InvalidUsername(UsernameError::Empty))
        ));
        assert!(matches!(
            auth.signup("alice", "").await,
            Err(AuthError::InvalidPassword(validators::PasswordError::Empty))
        ));
    }

    #[tokio::test]
    async fn test_login_rotates_session() {
        let auth = service().await;
        let first = auth.signup("alice", "secret").await.unwrap();
        let second = auth.login("alice", "secret").await.unwrap();

        assert!(matches!(
            auth.authenticate(&first).await,
            Err(AuthError::Unauthorized)
        ));
        assert_eq!(auth.authenticate(&second).await.unwrap(), "alice");
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let auth = service().await;
        auth.signup("alice", "secret").await.unwrap();

        let wrong_password = auth.login("alice", "nope").await.unwrap_err();
        let unknown_user = auth.login("mallory", "secret").await.unwrap_err();
        assert!(matches!(wrong_password, AuthError::Unauthorized));
        assert!(matches!(unknown_user, AuthError::Unauthorized));
        assert_eq!(
            wrong_password.public_message(),
            unknown_user.public_message()
        );
    }

    #[tokio::test]
    async fn test_logout_revokes_token() {
        let auth = service().await;
        let token = auth.signup("alice", "secret").await.unwrap();
        auth.logout("alice").await.unwrap();
        assert!(matches!(
            auth.authenticate(&token).await,
            Err(AuthError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_argon2_login() {
        let auth = AuthService::new(
            UsersDb::new(memory_pool().await),
            SessionStore::new(MemoryStore::new(), Duration::from_secs(60)),
            false,
        );
        auth.signup("alice", "secret").await.unwrap();
        assert!(auth.login("alice", "secret").await.is_ok());
        assert!(auth.login("alice", "wrong").await.is_err());
    }
}
