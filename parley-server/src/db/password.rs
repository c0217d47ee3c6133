//! Password hashing for user accounts using Argon2id
//!
//! # Fast Mode
//!
//! When `fast: true` is passed to `hash_password`, it produces `$FAST$<password>`
//! instead of an Argon2 PHC string. `verify_password` detects the prefix and
//! compares directly.
//!
//! **Never use fast mode in production** - it stores passwords in plaintext.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use parley_common::validators;
use thiserror::Error;

/// Prefix for fast (test-only) password hashes
const FAST_HASH_PREFIX: &str = "$FAST$";

/// Error type for password operations
#[derive(Debug, Error)]
pub enum PasswordError {
    /// Password validation failed
    #[error("invalid password: {0:?}")]
    Validation(validators::PasswordError),
    /// Hashing or verification failed
    #[error("{0}")]
    Hash(#[from] argon2::password_hash::Error),
}

/// Hash a password
///
/// # Arguments
///
/// * `password` - The plaintext password to hash
/// * `fast` - If true, use the plaintext test format. If false, use Argon2id.
///
/// # Errors
///
/// Returns `PasswordError::Validation` for an empty or oversized password and
/// `PasswordError::Hash` if Argon2 fails.
pub fn hash_password(password: &str, fast: bool) -> Result<String, PasswordError> {
    validators::validate_password(password).map_err(PasswordError::Validation)?;

    if fast {
        return Ok(format!("{}{}", FAST_HASH_PREFIX, password));
    }

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(password_hash.to_string())
}

/// Verify a password against a stored hash
///
/// # Returns
///
/// * `Ok(true)` - Password matches the hash
/// * `Ok(false)` - Password does not match the hash
/// * `Err` - The hash is malformed or the password fails input validation
pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, PasswordError> {
    validators::validate_password_input(password).map_err(PasswordError::Validation)?;

    if let Some(stored) = password_hash.strip_prefix(FAST_HASH_PREFIX) {
        return Ok(stored == password);
    }

    let parsed_hash = PasswordHash::new(password_hash)?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::Hash(e)),
    }
}
