//! Encrypted conversation store
//!
//! Each local user owns one row in `user_conversations`: the whole
//! conversation set serialized to JSON, sealed by the credential vault, and
//! stored as unpadded base64 next to the key derivation parameters. The
//! password is needed for every read and write; the derived key is dropped
//! as soon as the operation finishes.

pub mod sql;

use std::io;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use chrono::Utc;
use parley_common::conversation::Conversation;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::constants::{APP_DIR_NAME, DATABASE_FILENAME, DEFAULT_KEY_LENGTH};
use crate::vault::{self, KdfParams, Key, VaultError};
use sql::{SQL_DELETE_RECORD, SQL_GET_RECORD, SQL_INSERT_RECORD, SQL_UPDATE_RECORD};

/// Errors raised while opening the local database
#[derive(Debug, Error)]
pub enum DbError {
    #[error("could not create data directory: {0}")]
    Io(#[from] io::Error),
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("no platform data directory available")]
    NoDataDir,
}

/// Errors from conversation store operations
#[derive(Debug, Error)]
pub enum ConversationStoreError {
    #[error("no conversation record for {0}")]
    NotFound(String),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored ciphertext is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("conversation data could not be (de)serialized: {0}")]
    Json(#[from] serde_json::Error),
    #[error("key derivation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ConversationStoreError {
    /// True when the password was wrong or the stored blob was tampered with
    pub fn is_decryption_failure(&self) -> bool {
        matches!(self, Self::Vault(VaultError::DecryptionFailed))
    }
}

/// One user's row in `user_conversations`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedRecord {
    pub username: String,
    /// Base64 (no padding) of `nonce || sealed JSON`
    pub ciphertext: String,
    /// `$argon2id$v=19$m=..,t=..,p=..$salt`
    pub encryption_params: String,
    /// Unix seconds
    pub created_at: i64,
    /// Unix seconds
    pub updated_at: i64,
}

/// Platform default database path (`<data dir>/parley/parley.db`)
pub fn default_database_path() -> Result<PathBuf, DbError> {
    let data_dir = dirs::data_dir().ok_or(DbError::NoDataDir)?;
    Ok(data_dir.join(APP_DIR_NAME).join(DATABASE_FILENAME))
}

/// Open (or create) the local database and run pending migrations
pub async fn init_db(path: &Path) -> Result<SqlitePool, DbError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);
    let pool = SqlitePool::connect_with(options).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

/// Password-protected conversation history
#[derive(Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
    params: KdfParams,
    key_length: usize,
}

impl ConversationStore {
    /// Store using the default KDF cost and a 24-byte key
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_params(pool, KdfParams::default(), DEFAULT_KEY_LENGTH)
    }

    /// Store with explicit KDF cost for new records and key length
    pub fn with_params(pool: SqlitePool, params: KdfParams, key_length: usize) -> Self {
        Self {
            pool,
            params,
            key_length,
        }
    }

    /// Raw record for `username`, if one exists
    pub async fn get_record(&self, username: &str) -> sqlx::Result<Option<EncryptedRecord>> {
        let row: Option<(String, String, String, i64, i64)> = sqlx::query_as(SQL_GET_RECORD)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(
            |(username, ciphertext, encryption_params, created_at, updated_at)| EncryptedRecord {
                username,
                ciphertext,
                encryption_params,
                created_at,
                updated_at,
            },
        ))
    }

    /// Load and decrypt every conversation of `username`
    ///
    /// A user with no record yet gets an empty list, and an encrypted empty
    /// record is written so later saves have parameters to derive from.
    ///
    /// # Errors
    ///
    /// `Vault(DecryptionFailed)` for a wrong password or a damaged record.
    pub async fn get_conversations(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Vec<Conversation>, ConversationStoreError> {
        let Some(record) = self.get_record(username).await? else {
            return self.bootstrap(username, password).await;
        };

        let key = derive_blocking(password, &record.encryption_params, self.key_length).await?;
        open(&key, &record.ciphertext)
    }

    /// Replace the stored conversation set of `username`
    ///
    /// The existing record is decrypted first, so a wrong password fails
    /// instead of overwriting the history under a different key.
    ///
    /// # Errors
    ///
    /// `NotFound` if the user has never loaded their conversations.
    pub async fn update_conversations(
        &self,
        username: &str,
        password: &str,
        conversations: &[Conversation],
    ) -> Result<(), ConversationStoreError> {
        let record = self
            .get_record(username)
            .await?
            .ok_or_else(|| ConversationStoreError::NotFound(username.to_string()))?;

        let key = derive_blocking(password, &record.encryption_params, self.key_length).await?;
        open(&key, &record.ciphertext)?;
        let ciphertext = seal(&key, conversations)?;

        sqlx::query(SQL_UPDATE_RECORD)
            .bind(&ciphertext)
            .bind(&record.encryption_params)
            .bind(Utc::now().timestamp())
            .bind(username)
            .execute(&self.pool)
            .await?;

        debug!(username = %username, count = conversations.len(), "saved conversations");
        Ok(())
    }

    /// Re-seal the history of `username` under a new salt and KDF cost
    ///
    /// This is the only operation that changes `encryption_params`.
    pub async fn reencrypt(
        &self,
        username: &str,
        password: &str,
        params: KdfParams,
    ) -> Result<(), ConversationStoreError> {
        let record = self
            .get_record(username)
            .await?
            .ok_or_else(|| ConversationStoreError::NotFound(username.to_string()))?;

        let old_key = derive_blocking(password, &record.encryption_params, self.key_length).await?;
        let conversations = open(&old_key, &record.ciphertext)?;
        drop(old_key);

        let (new_key, encoded) = create_blocking(password, params, self.key_length).await?;
        let ciphertext = seal(&new_key, &conversations)?;

        sqlx::query(SQL_UPDATE_RECORD)
            .bind(&ciphertext)
            .bind(&encoded)
            .bind(Utc::now().timestamp())
            .bind(username)
            .execute(&self.pool)
            .await?;

        info!(username = %username, "re-encrypted conversations");
        Ok(())
    }

    /// Erase the record of `username`; returns whether one existed
    pub async fn delete(&self, username: &str) -> sqlx::Result<bool> {
        let result = sqlx::query(SQL_DELETE_RECORD)
            .bind(username)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn bootstrap(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Vec<Conversation>, ConversationStoreError> {
        let (key, encoded) = create_blocking(password, self.params, self.key_length).await?;
        let conversations: Vec<Conversation> = Vec::new();
        let ciphertext = seal(&key, &conversations)?;

        let now = Utc::now().timestamp();
        sqlx::query(SQL_INSERT_RECORD)
            .bind(username)
            .bind(&ciphertext)
            .bind(&encoded)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;

        info!(username = %username, "created conversation record");
        Ok(conversations)
    }
}

fn seal(key: &[u8], conversations: &[Conversation]) -> Result<String, ConversationStoreError> {
    let json = Zeroizing::new(serde_json::to_vec(conversations)?);
    let blob = vault::encrypt(key, &json)?;
    Ok(STANDARD_NO_PAD.encode(blob))
}

fn open(key: &[u8], ciphertext: &str) -> Result<Vec<Conversation>, ConversationStoreError> {
    let blob = STANDARD_NO_PAD.decode(ciphertext)?;
    let plaintext = vault::decrypt(key, &blob)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

/// Argon2 is deliberately slow; keep it off the async workers
async fn derive_blocking(
    password: &str,
    encoded: &str,
    key_length: usize,
) -> Result<Key, ConversationStoreError> {
    let password = Zeroizing::new(password.to_string());
    let encoded = encoded.to_string();
    let key = tokio::task::spawn_blocking(move || {
        vault::derive_key(&password, &encoded, key_length)
    })
    .await??;
    Ok(key)
}

async fn create_blocking(
    password: &str,
    params: KdfParams,
    key_length: usize,
) -> Result<(Key, String), ConversationStoreError> {
    let password = Zeroizing::new(password.to_string());
    let (key, encoded) =
        tokio::task::spawn_blocking(move || vault::create_key(&password, &params, key_length))
            .await??;
    Ok((key, encoded.to_string()))
}
