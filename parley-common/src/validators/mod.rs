//! Input validation functions
//!
//! Validators shared between client and server. Clients use them for
//! pre-validation before signing up, the server uses them for enforcement.

mod password;
mod username;

pub use password::{
    MAX_PASSWORD_LENGTH, PasswordError, validate_password, validate_password_input,
};
pub use username::{MAX_USERNAME_LENGTH, UsernameError, validate_username};
