//! Password validation
//!
//! - `validate_password_input` - For login (empty allowed, auth decides)
//! - `validate_password` - For signup (must not be empty)

/// Maximum length for passwords in bytes
///
/// Bounds the input fed to Argon2 on both sides.
pub const MAX_PASSWORD_LENGTH: usize = 256;

/// Validation error for passwords
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordError {
    /// Password is empty
    Empty,
    /// Password exceeds maximum length
    TooLong,
}

/// Validate a password for login
///
/// # Errors
///
/// Returns `PasswordError::TooLong` above 256 bytes.
pub fn validate_password_input(password: &str) -> Result<(), PasswordError> {
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(PasswordError::TooLong);
    }
    Ok(())
}

/// Validate a password for signup
///
/// Checks:
/// - Not empty
/// - Does not exceed maximum length (256 bytes)
///
/// Control characters are allowed since they may be part of a generated
/// passphrase.
///
/// # Errors
///
/// Returns a `PasswordError` variant describing the validation failure.
pub fn validate_password(password: &str) -> Result<(), PasswordError> {
    if password.is_empty() {
        return Err(PasswordError::Empty);
    }
    validate_password_input(password)
}
