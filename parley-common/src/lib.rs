//! Parley Common Library
//!
//! Shared types, wire protocol, and validators for the Parley chat server
//! and client.

pub mod auth;
pub mod conversation;
pub mod protocol;
pub mod validators;

/// Default port for the Parley server
pub const DEFAULT_PORT: u16 = 8080;

/// Path of the real-time WebSocket endpoint
pub const WEBSOCKET_PATH: &str = "/ws";

/// Path of the account endpoint (signup, login, logout)
pub const AUTH_PATH: &str = "/auth";

/// Name of the cookie carrying the session token
pub const SESSION_COOKIE_NAME: &str = "session_id";

/// Lifetime of a session token in hours
///
/// Matches the expiry of the session cookie set on login.
pub const DEFAULT_SESSION_TTL_HOURS: u64 = 24;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_path_is_absolute() {
        assert!(WEBSOCKET_PATH.starts_with('/'));
    }

    #[test]
    fn test_default_port() {
        assert_eq!(DEFAULT_PORT, 8080);
    }
}
