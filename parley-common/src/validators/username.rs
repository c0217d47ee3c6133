//! Username validation

/// Maximum length for usernames in characters
pub const MAX_USERNAME_LENGTH: usize = 32;

/// Characters that are not allowed in usernames
///
/// `;` and `=` would break the session cookie, `/` and `.` the log file name.
const FORBIDDEN_CHARS: &[char] = &['/', '\\', ':', '.', ';', '=', ',', '"', '@'];

/// Validation error for usernames
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsernameError {
    /// Username is empty
    Empty,
    /// Username exceeds maximum length
    TooLong,
    /// Username contains invalid characters
    InvalidCharacters,
}

/// Validate a username
///
/// Checks:
/// - Not empty
/// - Does not exceed maximum length (32 characters)
/// - Only Unicode letters or ASCII graphic characters, none of the forbidden ones
///
/// `@` is reserved by the line-mode client for addressing recipients.
///
/// # Errors
///
/// Returns a `UsernameError` variant describing the validation failure.
pub fn validate_username(username: &str) -> Result<(), UsernameError> {
    if username.is_empty() {
        return Err(UsernameError::Empty);
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(UsernameError::TooLong);
    }
    for ch in username.chars() {
        if FORBIDDEN_CHARS.contains(&ch) {
            return Err(UsernameError::InvalidCharacters);
        }
        if !ch.is_alphabetic() && !ch.is_ascii_graphic() {
            return Err(UsernameError::InvalidCharacters);
        }
    }
    Ok(())
}
