//! Account endpoint messages
//!
//! The `/auth` WebSocket endpoint accepts exactly one [`AuthRequest`] text
//! frame, answers with one [`AuthResponse`] and closes. It is the only
//! endpoint reachable without a session token.

use serde::{Deserialize, Serialize};

/// Request sent to the account endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AuthRequest {
    /// Create an account and open a session
    Signup { username: String, password: String },
    /// Open a session, revoking any previous one
    Login { username: String, password: String },
    /// Revoke the session identified by `token`
    Logout { token: String },
}

/// Reply from the account endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuthResponse {
    /// A session was opened
    Session { username: String, token: String },
    /// The session was revoked
    LoggedOut,
    /// The request failed
    Error { message: String },
}
