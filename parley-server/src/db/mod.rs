//! Database module for persistent storage
//!
//! Holds user accounts and the rows behind the SQLite session backend.

mod password;
pub mod sql;
mod users;

use std::io;
use std::path::{Path, PathBuf};

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use thiserror::Error;

use crate::constants::{DATA_DIR_NAME, DATABASE_FILENAME};

pub use password::{PasswordError, hash_password, verify_password};
pub use users::{UserAccount, UsersDb};

/// Errors raised while opening the database
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

/// All database handles used by the server
///
/// `SqlitePool` is reference counted, so cloning is cheap.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
    pub users: UsersDb,
}

impl Database {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            users: UsersDb::new(pool.clone()),
            pool,
        }
    }
}

/// Platform default database path (`<data dir>/parleyd/parley.db`)
///
/// # Errors
///
/// Returns `DbError::NoDataDir` if the platform has no data directory.
pub fn default_database_path() -> Result<PathBuf, DbError> {
    let data_dir = dirs::data_dir().ok_or(DbError::NoDataDir)?;
    Ok(data_dir.join(DATA_DIR_NAME).join(DATABASE_FILENAME))
}

/// Open (or create) the database at `path` and run pending migrations
///
/// # Errors
///
/// Returns an error if the parent directory cannot be created, the file
/// cannot be opened, or a migration fails.
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
