//! Account requests against the server's `/auth` endpoint
//!
//! Each call opens a short-lived WebSocket, sends one request, reads one
//! reply and lets the server close the connection.

use futures_util::{SinkExt, StreamExt};
use parley_common::auth::{AuthRequest, AuthResponse};
use parley_common::{AUTH_PATH, WEBSOCKET_PATH};
use thiserror::Error;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info};

use crate::constants::CONNECT_TIMEOUT;
use crate::transport::websocket_url;

/// Account request failures
#[derive(Debug, Error)]
pub enum AuthClientError {
    /// The server refused the request; the message is safe to show
    #[error("{0}")]
    Rejected(String),
    #[error("server closed the connection without replying")]
    NoReply,
    #[error("unexpected reply from server")]
    UnexpectedReply,
    #[error("request timed out")]
    Timeout,
    #[error("malformed reply: {0}")]
    Json(#[from] serde_json::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),
}

/// Account endpoint URL for a real-time endpoint URL
///
/// A trailing `/ws` path is replaced by `/auth`; otherwise `/auth` is
/// appended.
pub fn auth_url(server_url: &str) -> String {
    let url = websocket_url(server_url);
    let base = url.trim_end_matches('/');
    let base = base.strip_suffix(WEBSOCKET_PATH).unwrap_or(base);
    format!("{}{}", base, AUTH_PATH)
}

/// Create an account and return its session token
pub async fn signup(
    server_url: &str,
    username: &str,
    password: &str,
) -> Result<String, AuthClientError> {
    let request = AuthRequest::Signup {
        username: username.to_string(),
        password: password.to_string(),
    };
    let token = expect_session(send_request(server_url, &request).await?)?;
    info!(username, "account created");
    Ok(token)
}

/// Log in and return a fresh session token
///
/// Any previous token for this user stops working.
pub async fn login(
    server_url: &str,
    username: &str,
    password: &str,
) -> Result<String, AuthClientError> {
    let request = AuthRequest::Login {
        username: username.to_string(),
        password: password.to_string(),
    };
    let token = expect_session(send_request(server_url, &request).await?)?;
    info!(username, "logged in");
    Ok(token)
}

/// Revoke `token`
pub async fn logout(server_url: &str, token: &str) -> Result<(), AuthClientError> {
    let request = AuthRequest::Logout {
        token: token.to_string(),
    };
    match send_request(server_url, &request).await? {
        AuthResponse::LoggedOut => Ok(()),
        AuthResponse::Error { message } => Err(AuthClientError::Rejected(message)),
        AuthResponse::Session { .. } => Err(AuthClientError::UnexpectedReply),
    }
}

fn expect_session(response: AuthResponse) -> Result<String, AuthClientError> {
    match response {
        AuthResponse::Session { token, .. } => Ok(token),
        AuthResponse::Error { message } => Err(AuthClientError::Rejected(message)),
        AuthResponse::LoggedOut => Err(AuthClientError::UnexpectedReply),
    }
}

async fn send_request(
    server_url: &str,
    request: &AuthRequest,
) -> Result<AuthResponse, AuthClientError> {
    let url = auth_url(server_url);
    debug!(%url, "sending account request");

    timeout(CONNECT_TIMEOUT, exchange(&url, request))
        .await
        .map_err(|_| AuthClientError::Timeout)?
}

async fn exchange(url: &str, request: &AuthRequest) -> Result<AuthResponse, AuthClientError> {
    let (mut ws, _) = connect_async(url).await?;
    ws.send(Message::text(serde_json::to_string(request)?))
        .await?;

    while let Some(frame) = ws.next().await {
        match frame? {
            Message::Text(text) => {
                let response = serde_json::from_str::<AuthResponse>(text.as_str())?;
                let _ = ws.close(None).await;
                return Ok(response);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(AuthClientError::NoReply)
}
