//! Connection Hub
//!
//! Maps usernames to live connections and routes raw payloads to exactly the
//! requested set of online recipients. There is at most one connection per
//! username; registering again replaces the routing entry and leaves the old
//! connection to fail on its own read.
//!
//! Fan-out is independent per recipient. Every write is bounded by the send
//! timeout and runs concurrently, so one slow or dead peer never delays the
//! others. Offline recipients are skipped without error.

mod connection;
mod sink;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use parley_common::protocol::{Envelope, NotifyConnection};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};

use crate::constants::{
    CLOSE_ACK_TIMEOUT, CLOSE_REASON_DELIVERY_FAILED, CLOSE_REASON_SHUTDOWN, SEND_TIMEOUT,
};

pub use connection::{Connection, ConnectionId, ConnectionState};
pub use sink::{PeerSink, WsError, WsSink};

/// Hub errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// At least one online recipient could not be written to
    #[error("delivery failed for: {}", recipients.join(", "))]
    DeliveryFailed { recipients: Vec<String> },
}

/// Per-recipient outcome of a `Hub::send`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Recipients whose write completed
    pub delivered: Vec<String>,
    /// Recipients with no registered connection
    pub offline: Vec<String>,
    /// Recipients whose write failed or timed out, with the reason
    pub failed: Vec<(String, String)>,
}

impl SendReport {
    /// True when no online recipient failed
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Turn any failure into `HubError::DeliveryFailed`
    pub fn into_result(self) -> Result<SendReport, HubError> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(HubError::DeliveryFailed {
                recipients: self.failed.into_iter().map(|(name, _)| name).collect(),
            })
        }
    }
}

/// Registry of live connections
pub struct Hub {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    next_id: AtomicU64,
    send_timeout: Duration,
    close_ack_timeout: Duration,
}

impl Hub {
    pub fn new() -> Self {
        Self::with_timeouts(SEND_TIMEOUT, CLOSE_ACK_TIMEOUT)
    }

    /// Hub with custom write and close-acknowledgement bounds
    pub fn with_timeouts(send_timeout: Duration, close_ack_timeout: Duration) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            send_timeout,
            close_ack_timeout,
        }
    }

    /// Register a connection for `username`, replacing any previous one
    ///
    /// The replaced connection is not closed here. It drops out of routing
    /// and ends when its own reader fails.
    pub async fn register(&self, username: &str, sink: Arc<dyn PeerSink>) -> Arc<Connection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = Arc::new(Connection::new(id, username.to_string(), sink));

        let previous = {
            let mut connections = self.connections.write().await;
            conn.advance(ConnectionState::Registered);
            connections.insert(username.to_string(), conn.clone())
        };

        if let Some(previous) = previous {
            previous.advance(ConnectionState::Unregistering);
            info!(
                username = %username,
                old_id = previous.id(),
                new_id = id,
                "replaced existing connection"
            );
        } else {
            info!(username = %username, id, "registered connection");
        }
        conn
    }

    /// Remove whatever connection is registered for `username`
    ///
    /// Idempotent. Returns whether a mapping was removed.
    pub async fn unregister(&self, username: &str) -> bool {
        let removed = self.connections.write().await.remove(username);
        match removed {
            Some(conn) => {
                conn.advance(ConnectionState::Unregistering);
                debug!(username = %username, id = conn.id(), "unregistered connection");
                true
            }
            None => false,
        }
    }

    /// Remove the mapping for `username` only if it still points at `id`
    ///
    /// A connection task calls this on exit so it never evicts a newer
    /// connection of the same user.
    pub async fn unregister_connection(&self, username: &str, id: ConnectionId) -> bool {
        let removed = {
            let mut connections = self.connections.write().await;
            match connections.get(username) {
                Some(current) if current.id() == id => connections.remove(username),
                _ => None,
            }
        };
        match removed {
            Some(conn) => {
                conn.advance(ConnectionState::Unregistering);
                debug!(username = %username, id, "unregistered connection");
                true
            }
            None => false,
        }
    }

    /// Currently registered connection for `username`
    pub async fn get(&self, username: &str) -> Option<Arc<Connection>> {
        self.connections.read().await.get(username).cloned()
    }

    pub async fn is_online(&self, username: &str) -> bool {
        self.connections.read().await.contains_key(username)
    }

    /// Sorted list of registered usernames
    pub async fn online_usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Deliver `payload` to each listed recipient that is online
    ///
    /// Duplicate names are delivered once. The routing table is only read
    /// locked for the lookup; writes happen outside the lock, concurrently,
    /// each bounded by the send timeout. A recipient whose write fails is
    /// unregistered and sent a close frame.
    pub async fn send(&self, payload: &str, recipients: &[String]) -> SendReport {
        let mut seen = HashSet::new();
        let mut report = SendReport::default();
        let mut targets = Vec::new();

        {
            let connections = self.connections.read().await;
            for name in recipients {
                if !seen.insert(name.as_str()) {
                    continue;
                }
                match connections.get(name) {
                    Some(conn) if conn.state() == ConnectionState::Registered => {
                        targets.push(conn.clone())
                    }
                    _ => report.offline.push(name.clone()),
                }
            }
        }

        let send_timeout = self.send_timeout;
        let results = join_all(targets.iter().map(|conn| async move {
            match timeout(send_timeout, conn.sink().send_text(payload)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("write timed out after {:?}", send_timeout)),
            }
        }))
        .await;

        for (conn, result) in targets.into_iter().zip(results) {
            match result {
                Ok(()) => report.delivered.push(conn.username().to_string()),
                Err(reason) => {
                    warn!(
                        username = %conn.username(),
                        id = conn.id(),
                        error = %reason,
                        "delivery failed, dropping connection"
                    );
                    self.drop_failed(&conn).await;
                    report.failed.push((conn.username().to_string(), reason));
                }
            }
        }

        report
    }

    /// Send a presence change to every online user except `username`
    pub async fn broadcast_presence(&self, username: &str, connected: bool) -> SendReport {
        let envelope = Envelope::NotifyConnection(NotifyConnection {
            username: username.to_string(),
            connected,
        });
        let payload = match envelope.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to encode presence");
                return SendReport::default();
            }
        };
        let others: Vec<String> = self
            .online_usernames()
            .await
            .into_iter()
            .filter(|name| name != username)
            .collect();
        self.send(&payload, &others).await
    }

    /// Close the connection registered for `username` with a normal closure
    ///
    /// Returns `false` if no connection was registered.
    pub async fn close(&self, username: &str) -> bool {
        match self.get(username).await {
            Some(conn) => {
                self.close_connection(&conn, CloseCode::Normal, CLOSE_REASON_SHUTDOWN)
                    .await;
                true
            }
            None => false,
        }
    }

    /// Send a close frame, wait (bounded) for the peer's acknowledgement,
    /// then release the connection
    ///
    /// Safe to call repeatedly. Only the first call writes the close frame.
    pub async fn close_connection(&self, conn: &Connection, code: CloseCode, reason: &str) {
        if conn.advance(ConnectionState::Closing) {
            let sent = timeout(self.send_timeout, conn.sink().send_close(code, reason)).await;
            if !matches!(sent, Ok(Ok(()))) {
                debug!(username = %conn.username(), id = conn.id(), "close frame not written");
                conn.mark_gone();
            }
        }

        if timeout(self.close_ack_timeout, conn.wait_gone()).await.is_err() {
            debug!(
                username = %conn.username(),
                id = conn.id(),
                "peer did not acknowledge close"
            );
        }

        self.unregister_connection(conn.username(), conn.id()).await;
        conn.mark_gone();
    }

    /// Close every registered connection (server shutdown)
    pub async fn close_all(&self) {
        let connections: Vec<Arc<Connection>> =
            self.connections.read().await.values().cloned().collect();
        if connections.is_empty() {
            return;
        }
        info!(count = connections.len(), "closing all connections");
        join_all(connections.iter().map(|conn| {
            self.close_connection(conn, CloseCode::Away, CLOSE_REASON_SHUTDOWN)
        }))
        .await;
    }

    async fn drop_failed(&self, conn: &Connection) {
        self.unregister_connection(conn.username(), conn.id()).await;
        if conn.advance(ConnectionState::Closing) {
            let _ = timeout(
                self.send_timeout,
                conn.sink()
                    .send_close(CloseCode::Error, CLOSE_REASON_DELIVERY_FAILED),
            )
            .await;
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
