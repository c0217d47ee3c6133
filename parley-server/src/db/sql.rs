//! SQL query constants for database operations
//!
//! Each query is documented with its parameters and special behaviors.

// ========================================================================
// User Query Operations
// ========================================================================

/// Insert a new user account
///
/// **Parameters:**
/// 1. `username: &str`
/// 2. `password_hash: &str` - Argon2id PHC string
/// 3. `created_at: i64` - Unix seconds
/// 4. `updated_at: i64` - Unix seconds
///
/// **Note:** Fails with a unique violation if the username exists.
pub const SQL_INSERT_USER: &str =
    "INSERT INTO users (username, password_hash, created_at, updated_at) VALUES (?, ?, ?, ?)";

/// Get a user account by username
///
/// **Parameters:**
/// 1. `username: &str`
///
/// **Returns:** `(username, password_hash, created_at)`
pub const SQL_GET_USER: &str =
    "SELECT username, password_hash, created_at FROM users WHERE username = ?";

// ========================================================================
// Session Query Operations
// ========================================================================

/// Get an unexpired session value
///
/// **Parameters:**
/// 1. `key: &str` - `user:<name>` or `session:<token>`
/// 2. `now: i64` - Current unix time in milliseconds
///
/// **Returns:** `(value: String)`
pub const SQL_GET_SESSION_VALUE: &str =
    "SELECT value FROM sessions WHERE key = ? AND expires_at > ?";

/// Insert or overwrite a session row
///
/// **Parameters:**
/// 1. `key: &str`
/// 2. `value: &str`
/// 3. `expires_at: i64` - Unix time in milliseconds
pub const SQL_SET_SESSION_VALUE: &str =
    "INSERT OR REPLACE INTO sessions (key, value, expires_at) VALUES (?, ?, ?)";

/// Delete a session row
///
/// **Parameters:**
/// 1. `key: &str`
pub const SQL_DELETE_SESSION_VALUE: &str = "DELETE FROM sessions WHERE key = ?";

/// Delete every expired session row
///
/// **Parameters:**
/// 1. `now: i64` - Current unix time in milliseconds
pub const SQL_PURGE_EXPIRED_SESSIONS: &str = "DELETE FROM sessions WHERE expires_at <= ?";
