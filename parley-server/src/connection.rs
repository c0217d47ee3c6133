//! Client connection handling
//!
//! Every accepted socket goes through the WebSocket handshake first. The
//! request path picks the endpoint:
//!
//! - `/ws` needs a session token (cookie or bearer header). Without one the
//!   upgrade is refused with HTTP 401. A token that fails validation gets a
//!   policy close (1008) before the Hub ever sees the connection.
//! - `/auth` takes one signup, login or logout request and closes.
//!
//! A real-time connection runs a reader task feeding a payload channel and
//! an error channel, and a dispatch loop selecting over shutdown, errors and
//! payloads.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, Stream, StreamExt};
use parley_common::auth::{AuthRequest, AuthResponse};
use parley_common::protocol::Envelope;
use parley_common::{AUTH_PATH, SESSION_COOKIE_NAME, WEBSOCKET_PATH};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderMap, StatusCode, header};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, error, info, warn};

use crate::auth::AuthService;
use crate::constants::{
    AUTH_REQUEST_TIMEOUT, CLOSE_ACK_TIMEOUT, CLOSE_REASON_PROTOCOL, CLOSE_REASON_SHUTDOWN,
    CLOSE_REASON_UNAUTHORIZED, HANDSHAKE_TIMEOUT,
};
use crate::hub::{Connection, Hub, PeerSink, WsError, WsSink};
use crate::session::KeyValueStore;

/// Errors that end a connection before it is registered
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("handshake timed out")]
    HandshakeTimeout,
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Shared state handed to every connection task
pub struct ConnectionParams<B> {
    pub peer_addr: SocketAddr,
    pub hub: Arc<Hub>,
    pub auth: Arc<AuthService<B>>,
    pub shutdown: watch::Receiver<bool>,
}

/// Endpoint chosen from the handshake request
enum Route {
    Realtime { token: String },
    Auth,
}

/// A frame forwarded by the reader task
enum Inbound {
    Text(String),
    Binary,
}

/// Why a reader task stopped
#[derive(Debug)]
enum ReadError {
    /// The stream finished. `code` is the peer's close code, if it sent one.
    Closed { code: Option<u16> },
    Failed(WsError),
}

/// How the dispatch loop ended
enum Exit {
    Disconnected,
    Shutdown,
    ProtocolError,
}

/// Handle one accepted TCP connection
pub async fn handle_connection<B: KeyValueStore>(
    socket: TcpStream,
    params: ConnectionParams<B>,
) -> Result<(), ConnectionError> {
    let mut route = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        match request.uri().path() {
            AUTH_PATH => {
                route = Some(Route::Auth);
                Ok(response)
            }
            WEBSOCKET_PATH => match extract_token(request.headers()) {
                Some(token) => {
                    route = Some(Route::Realtime { token });
                    Ok(response)
                }
                None => Err(error_response(StatusCode::UNAUTHORIZED, "missing session token")),
            },
            _ => Err(error_response(StatusCode::NOT_FOUND, "not found")),
        }
    };

    let ws = timeout(HANDSHAKE_TIMEOUT, accept_hdr_async(socket, callback))
        .await
        .map_err(|_| ConnectionError::HandshakeTimeout)??;

    match route {
        Some(Route::Auth) => handle_auth_request(ws, &params).await,
        Some(Route::Realtime { token }) => handle_realtime(ws, token, params).await,
        // The callback either set a route or refused the upgrade
        None => Ok(()),
    }
}

/// Pull the session token from the `session_id` cookie or a bearer header
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    for value in headers.get_all(header::COOKIE) {
        let Ok(cookies) = value.to_str() else {
            continue;
        };
        for cookie in cookies.split(';') {
            if let Some((name, token)) = cookie.trim().split_once('=')
                && name == SESSION_COOKIE_NAME
                && !token.is_empty()
            {
                return Some(token.to_string());
            }
        }
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

fn error_response(status: StatusCode, body: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(body.to_string()));
    *response.status_mut() = status;
    response
}

async fn handle_realtime<B: KeyValueStore>(
    mut ws: WebSocketStream<TcpStream>,
    token: String,
    params: ConnectionParams<B>,
) -> Result<(), ConnectionError> {
    let ConnectionParams {
        peer_addr,
        hub,
        auth,
        mut shutdown,
    } = params;

    let username = match auth.authenticate(&token).await {
        Ok(username) => username,
        Err(e) => {
            warn!(peer = %peer_addr, error = %e, "rejected real-time connection");
            close_unregistered(&mut ws, CloseCode::Policy, CLOSE_REASON_UNAUTHORIZED).await;
            return Ok(());
        }
    };

    let (write, read) = ws.split();
    let sink: Arc<dyn PeerSink> = Arc::new(WsSink::new(write));
    let conn = hub.register(&username, sink).await;
    info!(username = %username, peer = %peer_addr, id = conn.id(), "user connected");

    let shutting_down = *shutdown.borrow();
    if !shutting_down {
        hub.broadcast_presence(&username, true).await;
    }

    let (payload_tx, payload_rx) = mpsc::unbounded_channel();
    let (error_tx, error_rx) = mpsc::unbounded_channel();
    let reader = tokio::spawn(read_loop(read, conn.clone(), payload_tx, error_tx));

    let exit = dispatch_loop(&hub, &conn, payload_rx, error_rx, &mut shutdown).await;
    match exit {
        Exit::Shutdown => {
            hub.close_connection(&conn, CloseCode::Away, CLOSE_REASON_SHUTDOWN)
                .await
        }
        Exit::ProtocolError => {
            hub.close_connection(&conn, CloseCode::Protocol, CLOSE_REASON_PROTOCOL)
                .await
        }
        Exit::Disconnected => {}
    }

    reader.abort();
    hub.unregister_connection(&username, conn.id()).await;
    conn.mark_gone();
    info!(username = %username, id = conn.id(), "user disconnected");

    if !*shutdown.borrow() && !hub.is_online(&username).await {
        hub.broadcast_presence(&username, false).await;
    }
    Ok(())
}

/// Forward frames from the read half until the stream ends
async fn read_loop<S>(
    mut read: S,
    conn: Arc<Connection>,
    payload_tx: mpsc::UnboundedSender<Inbound>,
    error_tx: mpsc::UnboundedSender<ReadError>,
) where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let mut close_code = None;
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                if payload_tx.send(Inbound::Text(text.to_string())).is_err() {
                    break;
                }
            }
            Some(Ok(Message::Binary(_))) => {
                if payload_tx.send(Inbound::Binary).is_err() {
                    break;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                // Keep reading so the close reply gets flushed
                close_code = Some(frame.map_or(u16::from(CloseCode::Status), |f| f.code.into()));
            }
            Some(Ok(_)) => {}
            Some(Err(WsError::ConnectionClosed)) | None => {
                let _ = error_tx.send(ReadError::Closed { code: close_code });
                break;
            }
            Some(Err(e)) => {
                let _ = error_tx.send(ReadError::Failed(e));
                break;
            }
        }
    }
    conn.mark_gone();
}

async fn dispatch_loop(
    hub: &Hub,
    conn: &Connection,
    mut payload_rx: mpsc::UnboundedReceiver<Inbound>,
    mut error_rx: mpsc::UnboundedReceiver<ReadError>,
    shutdown: &mut watch::Receiver<bool>,
) -> Exit {
    let username = conn.username();
    if *shutdown.borrow() {
        return Exit::Shutdown;
    }

    loop {
        tokio::select! {
            // Frames queued ahead of the reader's terminal error still get relayed
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Exit::Shutdown;
                }
            }

            frame = payload_rx.recv() => {
                let Some(frame) = frame else {
                    if let Ok(err) = error_rx.try_recv() {
                        log_read_error(username, err);
                    }
                    return Exit::Disconnected;
                };
                let text = match frame {
                    Inbound::Text(text) => text,
                    Inbound::Binary => {
                        error!(username = %username, "binary frame on text protocol, closing");
                        return Exit::ProtocolError;
                    }
                };

                match Envelope::decode(text.as_bytes()) {
                    Ok(Envelope::SendChatMessage(chat)) => {
                        if chat.message.author != username {
                            warn!(
                                username = %username,
                                author = %chat.message.author,
                                "dropping message with forged author"
                            );
                            continue;
                        }
                        let report = hub.send(&text, &chat.recipients).await;
                        for (recipient, reason) in &report.failed {
                            warn!(
                                username = %username,
                                recipient = %recipient,
                                error = %reason,
                                "failed to deliver chat message"
                            );
                        }
                        debug!(
                            username = %username,
                            delivered = report.delivered.len(),
                            offline = report.offline.len(),
                            "relayed chat message"
                        );
                    }
                    Ok(other) => {
                        error!(
                            username = %username,
                            envelope = ?other.envelope_type(),
                            "unexpected envelope from client, closing"
                        );
                        return Exit::ProtocolError;
                    }
                    Err(e) => {
                        error!(username = %username, error = %e, "protocol error, closing");
                        return Exit::ProtocolError;
                    }
                }
            }

            Some(err) = error_rx.recv() => {
                log_read_error(username, err);
                return Exit::Disconnected;
            }
        }
    }
}

fn log_read_error(username: &str, err: ReadError) {
    match err {
        ReadError::Closed { code: Some(code) } if code == u16::from(CloseCode::Normal) => {
            info!(username = %username, "connection closed normally");
        }
        ReadError::Closed { code } => {
            warn!(username = %username, code = ?code, "connection closed abnormally");
        }
        ReadError::Failed(e) => {
            warn!(username = %username, error = %e, "connection read failed");
        }
    }
}

/// Serve a single `/auth` request
async fn handle_auth_request<B: KeyValueStore>(
    mut ws: WebSocketStream<TcpStream>,
    params: &ConnectionParams<B>,
) -> Result<(), ConnectionError> {
    let request = match timeout(AUTH_REQUEST_TIMEOUT, next_text(&mut ws)).await {
        Ok(Some(text)) => text,
        Ok(None) => return Ok(()),
        Err(_) => {
            debug!(peer = %params.peer_addr, "auth request timed out");
            close_unregistered(&mut ws, CloseCode::Policy, "timeout").await;
            return Ok(());
        }
    };

    let response = match serde_json::from_str::<AuthRequest>(&request) {
        Ok(request) => process_auth_request(request, params).await,
        Err(e) => {
            warn!(peer = %params.peer_addr, error = %e, "malformed auth request");
            AuthResponse::Error {
                message: "malformed request".to_string(),
            }
        }
    };

    ws.send(Message::text(serde_json::to_string(&response)?))
        .await?;
    close_unregistered(&mut ws, CloseCode::Normal, "").await;
    Ok(())
}

async fn process_auth_request<B: KeyValueStore>(
    request: AuthRequest,
    params: &ConnectionParams<B>,
) -> AuthResponse {
    let auth = &params.auth;
    let result = match request {
        AuthRequest::Signup { username, password } => auth
            .signup(&username, &password)
            .await
            .map(|token| AuthResponse::Session { username, token }),
        AuthRequest::Login { username, password } => auth
            .login(&username, &password)
            .await
            .map(|token| AuthResponse::Session { username, token }),
        AuthRequest::Logout { token } => match auth.authenticate(&token).await {
            Ok(username) => {
                let result = auth.logout(&username).await;
                params.hub.close(&username).await;
                result.map(|()| AuthResponse::LoggedOut)
            }
            Err(e) => Err(e),
        },
    };

    result.unwrap_or_else(|e| {
        warn!(peer = %params.peer_addr, error = %e, "auth request failed");
        AuthResponse::Error {
            message: e.public_message(),
        }
    })
}

/// Next text frame, skipping control frames
async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> Option<String> {
    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Text(text)) => return Some(text.to_string()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

/// Close a stream that was never registered in the Hub, draining until the
/// peer acknowledges or the close timeout elapses
async fn close_unregistered(ws: &mut WebSocketStream<TcpStream>, code: CloseCode, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    if ws.close(Some(frame)).await.is_err() {
        return;
    }
    let _ = timeout(CLOSE_ACK_TIMEOUT, async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
}
