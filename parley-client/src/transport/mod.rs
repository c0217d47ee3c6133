//! Transport client
//!
//! Holds one logical WebSocket connection to the server. A reader task per
//! physical connection decodes envelopes onto a message channel and reports
//! its terminal error on a separate error channel. Both channels belong to
//! [`Inbound`], which outlives reconnects.
//!
//! Errors carry the generation of the connection that raised them. A
//! reconnect starts a new generation, so a terminal error the old reader
//! queued before it was replaced is never handed out afterwards.
//!
//! Reconnection is never automatic inside the transport. Callers either call
//! [`Transport::reconnect`] themselves or hand a [`ReconnectDecider`] to
//! [`Inbound::next_or_reconnect`].

mod reconnect;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parley_common::SESSION_COOKIE_NAME;
use parley_common::conversation::{ConversationMetadata, Message as ChatMessage};
use parley_common::protocol::{Envelope, ProtocolError, SendChatMessage};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use crate::constants::{CLOSE_TIMEOUT, CONNECT_TIMEOUT};

pub use reconnect::{ReconnectDecider, ReconnectPolicy, reconnect_unless_closed};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Normal closure close code
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code the server uses for a rejected session token
pub const CLOSE_POLICY: u16 = 1008;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection ended; `code` is the server's close code if it sent one
    #[error("connection closed (code {code:?})")]
    Closed { code: Option<u16> },
    #[error("not connected")]
    NotConnected,
    #[error("connection attempt timed out")]
    Timeout,
    #[error("session token cannot be sent as a header")]
    InvalidToken,
    #[error("gave up reconnecting after {attempts} attempts: {source}")]
    ReconnectFailed {
        attempts: u32,
        #[source]
        source: Box<TransportError>,
    },
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),
}

impl TransportError {
    /// True for a clean close with code 1000
    pub fn is_normal_closure(&self) -> bool {
        matches!(self, TransportError::Closed { code: Some(CLOSE_NORMAL) })
    }
}

/// Rewrite `http(s)://` to `ws(s)://`; other schemes pass through
pub fn websocket_url(uri: &str) -> String {
    if let Some(rest) = uri.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = uri.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        uri.to_string()
    }
}

/// One physical connection
struct Link {
    writer: WsWrite,
    reader: JoinHandle<()>,
    /// Flips to true once the server's close frame arrives or the stream ends
    peer_closed: watch::Receiver<bool>,
    /// Set while we close so the reader drops late frames silently
    discard: Arc<AtomicBool>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.discard.store(true, Ordering::Relaxed);
        self.reader.abort();
    }
}

/// A reader's terminal error tagged with its link generation
type LinkError = (u64, TransportError);

/// Persistent connection to the server
pub struct Transport {
    uri: String,
    token: String,
    policy: ReconnectPolicy,
    link: Mutex<Option<Link>>,
    generation: Arc<AtomicU64>,
    message_tx: mpsc::UnboundedSender<Envelope>,
    error_tx: mpsc::UnboundedSender<LinkError>,
}

/// Receiving side of a [`Transport`]
pub struct Inbound {
    messages: mpsc::UnboundedReceiver<Envelope>,
    errors: mpsc::UnboundedReceiver<LinkError>,
    generation: Arc<AtomicU64>,
}

impl Transport {
    /// Connect with the default reconnect policy
    pub async fn connect(uri: &str, token: &str) -> Result<(Transport, Inbound), TransportError> {
        Self::connect_with_policy(uri, token, ReconnectPolicy::default()).await
    }

    /// Connect and arm the reader task
    ///
    /// The token travels as the `session_id` cookie.
    pub async fn connect_with_policy(
        uri: &str,
        token: &str,
        policy: ReconnectPolicy,
    ) -> Result<(Transport, Inbound), TransportError> {
        let (message_tx, messages) = mpsc::unbounded_channel();
        let (error_tx, errors) = mpsc::unbounded_channel();
        let generation = Arc::new(AtomicU64::new(0));

        let transport = Transport {
            uri: websocket_url(uri),
            token: token.to_string(),
            policy,
            link: Mutex::new(None),
            generation: generation.clone(),
            message_tx,
            error_tx,
        };

        let link = transport.open_link().await?;
        *transport.link.lock().await = Some(link);
        info!(uri = %transport.uri, "connected");

        Ok((
            transport,
            Inbound {
                messages,
                errors,
                generation,
            },
        ))
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub async fn is_connected(&self) -> bool {
        self.link.lock().await.is_some()
    }

    /// Encode and write one envelope
    ///
    /// # Errors
    ///
    /// `NotConnected` after `close` or a failed reconnect. Write errors are
    /// returned as-is and never retried.
    pub async fn send_envelope(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let text = envelope.encode()?;
        let mut guard = self.link.lock().await;
        let link = guard.as_mut().ok_or(TransportError::NotConnected)?;
        link.writer.send(Message::text(text)).await?;
        Ok(())
    }

    /// Send a chat message to `recipients`
    pub async fn send_chat_message(
        &self,
        message: ChatMessage,
        conversation_metadata: ConversationMetadata,
        recipients: Vec<String>,
    ) -> Result<(), TransportError> {
        let envelope = Envelope::SendChatMessage(SendChatMessage {
            conversation_metadata,
            message,
            recipients,
        });
        self.send_envelope(&envelope).await
    }

    /// Replace the connection, retrying per the reconnect policy
    ///
    /// Blocks for the whole backoff sequence. The session token is sent
    /// again on every attempt. Errors still queued from the replaced
    /// connection are dropped.
    ///
    /// # Errors
    ///
    /// `ReconnectFailed` carrying the last attempt's error.
    pub async fn reconnect(&self) -> Result<(), TransportError> {
        let mut guard = self.link.lock().await;
        drop(guard.take());
        self.generation.fetch_add(1, Ordering::SeqCst);

        let mut last_error = TransportError::NotConnected;
        for attempt in 1..=self.policy.max_attempts {
            match self.open_link().await {
                Ok(link) => {
                    *guard = Some(link);
                    info!(uri = %self.uri, attempt, "reconnected");
                    return Ok(());
                }
                Err(e) => {
                    warn!(uri = %self.uri, attempt, error = %e, "reconnect attempt failed");
                    last_error = e;
                }
            }

            if attempt < self.policy.max_attempts {
                let delay = self.policy.jittered_delay(attempt);
                debug!(delay_ms = delay.as_millis() as u64, "backing off");
                tokio::time::sleep(delay).await;
            }
        }

        Err(TransportError::ReconnectFailed {
            attempts: self.policy.max_attempts,
            source: Box::new(last_error),
        })
    }

    /// Close gracefully
    ///
    /// Sends a normal close frame, then waits up to the close timeout for the
    /// server's close frame while discarding anything else that arrives. A
    /// transport that is not connected returns `Ok` immediately.
    pub async fn close(&self) -> Result<(), TransportError> {
        let Some(mut link) = self.link.lock().await.take() else {
            return Ok(());
        };
        link.discard.store(true, Ordering::Relaxed);

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        let result = match link.writer.send(Message::Close(Some(frame))).await {
            Ok(()) => {
                if timeout(CLOSE_TIMEOUT, link.peer_closed.wait_for(|closed| *closed))
                    .await
                    .is_err()
                {
                    debug!("server did not answer close frame");
                }
                Ok(())
            }
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::WebSocket(e)),
        };

        link.reader.abort();
        let _ = link.writer.close().await;
        info!(uri = %self.uri, "connection closed");
        result
    }

    async fn open_link(&self) -> Result<Link, TransportError> {
        let mut request = self.uri.as_str().into_client_request()?;
        let cookie = HeaderValue::from_str(&format!("{}={}", SESSION_COOKIE_NAME, self.token))
            .map_err(|_| TransportError::InvalidToken)?;
        request.headers_mut().insert(header::COOKIE, cookie);

        let (ws, _) = timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| TransportError::Timeout)??;
        let (writer, read) = ws.split();

        let (closed_tx, peer_closed) = watch::channel(false);
        let discard = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(
            read,
            self.generation.load(Ordering::SeqCst),
            self.message_tx.clone(),
            self.error_tx.clone(),
            closed_tx,
            discard.clone(),
        ));

        Ok(Link {
            writer,
            reader,
            peer_closed,
            discard,
        })
    }
}

/// Decode frames until the connection ends, then report why
async fn read_loop(
    mut read: WsRead,
    generation: u64,
    message_tx: mpsc::UnboundedSender<Envelope>,
    error_tx: mpsc::UnboundedSender<LinkError>,
    closed_tx: watch::Sender<bool>,
    discard: Arc<AtomicBool>,
) {
    let mut close_code = None;
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                if discard.load(Ordering::Relaxed) {
                    continue;
                }
                match Envelope::decode(text.as_bytes()) {
                    Ok(envelope) => {
                        if message_tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "undecodable envelope from server");
                        let _ = error_tx.send((generation, TransportError::Protocol(e)));
                        break;
                    }
                }
            }
            Some(Ok(Message::Close(frame))) => {
                close_code = Some(frame.map_or(u16::from(CloseCode::Status), |f| f.code.into()));
                let _ = closed_tx.send(true);
                // Keep polling so the close reply is flushed
            }
            Some(Ok(_)) => {}
            Some(Err(WsError::ConnectionClosed)) | None => {
                if !discard.load(Ordering::Relaxed) {
                    match close_code {
                        Some(CLOSE_NORMAL) => info!("server closed the connection"),
                        code => warn!(code = ?code, "connection closed abnormally"),
                    }
                    let _ = error_tx.send((generation, TransportError::Closed { code: close_code }));
                }
                break;
            }
            Some(Err(e)) => {
                if !discard.load(Ordering::Relaxed) {
                    warn!(error = %e, "connection read failed");
                    let _ = error_tx.send((generation, TransportError::WebSocket(e)));
                }
                break;
            }
        }
    }
    let _ = closed_tx.send(true);
}

impl Inbound {
    /// Next envelope, the connection's terminal error, or `Cancelled`
    ///
    /// Pending envelopes are always handed out before an error.
    pub async fn next(
        &mut self,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Envelope, TransportError> {
        let mut messages_open = true;
        let mut errors_open = true;
        loop {
            if *cancel.borrow() {
                return Err(TransportError::Cancelled);
            }
            if !messages_open && !errors_open {
                return Err(TransportError::NotConnected);
            }
            tokio::select! {
                biased;
                changed = cancel.changed() => {
                    if changed.is_err() {
                        return Err(TransportError::Cancelled);
                    }
                }
                message = self.messages.recv(), if messages_open => match message {
                    Some(envelope) => return Ok(envelope),
                    None => messages_open = false,
                },
                error = self.errors.recv(), if errors_open => match error {
                    Some((generation, err)) => {
                        if generation == self.generation.load(Ordering::SeqCst) {
                            return Err(err);
                        }
                        debug!(error = %err, "dropping error from a replaced connection");
                    }
                    None => errors_open = false,
                },
            }
        }
    }

    /// Like [`next`](Self::next), but reconnects when `decider` says so
    ///
    /// Gives up with the reconnect error once the policy is exhausted.
    pub async fn next_or_reconnect<D: ReconnectDecider>(
        &mut self,
        transport: &Transport,
        cancel: &mut watch::Receiver<bool>,
        decider: &mut D,
    ) -> Result<Envelope, TransportError> {
        loop {
            match self.next(cancel).await {
                Err(e) if !matches!(e, TransportError::Cancelled) && decider.should_reconnect(&e) => {
                    warn!(error = %e, "connection lost, reconnecting");
                    transport.reconnect().await?;
                }
                other => return other,
            }
        }
    }
}
