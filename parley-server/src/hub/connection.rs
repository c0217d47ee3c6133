//! A live connection owned by the Hub

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use super::sink::PeerSink;

/// Unique id of a connection for the lifetime of the process
pub type ConnectionId = u64;

/// Lifecycle of a connection
///
/// States only move forward. `Gone` is terminal; a reconnecting client gets
/// a brand-new `Connection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, not yet routable
    Connecting,
    /// In the routing table
    Registered,
    /// Removed from routing (explicitly, evicted, or after a failed write)
    Unregistering,
    /// A close frame was sent, waiting for the peer
    Closing,
    /// The underlying stream is finished
    Gone,
}

impl ConnectionState {
    fn rank(self) -> u8 {
        match self {
            ConnectionState::Connecting => 0,
            ConnectionState::Registered => 1,
            ConnectionState::Unregistering => 2,
            ConnectionState::Closing => 3,
            ConnectionState::Gone => 4,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Registered => "registered",
            ConnectionState::Unregistering => "unregistering",
            ConnectionState::Closing => "closing",
            ConnectionState::Gone => "gone",
        };
        f.write_str(name)
    }
}

/// Username bound to a duplex stream
pub struct Connection {
    id: ConnectionId,
    username: String,
    sink: Arc<dyn PeerSink>,
    state: watch::Sender<ConnectionState>,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, username: String, sink: Arc<dyn PeerSink>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            id,
            username,
            sink,
            state,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn sink(&self) -> &Arc<dyn PeerSink> {
        &self.sink
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Move to `next` if it is later in the lifecycle
    ///
    /// Returns whether the state changed.
    pub fn advance(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|current| {
            if next.rank() > current.rank() {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    /// Mark the underlying stream as finished
    pub fn mark_gone(&self) {
        self.advance(ConnectionState::Gone);
    }

    /// Wait until the connection reaches `Gone`
    pub async fn wait_gone(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so this only returns once Gone is observed
        let _ = rx.wait_for(|s| *s == ConnectionState::Gone).await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("state", &self.state())
            .finish()
    }
}
