//! Shared helpers for client integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parley_client::transport::ReconnectPolicy;
use parley_server::auth::AuthService;
use parley_server::db::{self, UsersDb};
use parley_server::hub::Hub;
use parley_server::server::Server;
use parley_server::session::{MemoryStore, SessionStore};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header;

/// How long tests wait for something that should happen
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Reconnect policy with millisecond backoff
pub fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
    }
}

/// Server side of one accepted mock connection
pub struct MockConnection {
    pub ws: WebSocketStream<TcpStream>,
    pub cookie: Option<String>,
}

impl MockConnection {
    /// Read until the client goes away so close replies get flushed
    pub async fn drain(mut self) {
        while let Some(Ok(_)) = self.ws.next().await {}
    }
}

/// Bare WebSocket endpoint that hands every accepted connection to the test
pub struct MockServer {
    pub addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<MockConnection>,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub async fn accept(&mut self) -> MockConnection {
        timeout(RECV_TIMEOUT, self.connections.recv())
            .await
            .expect("no connection arrived")
            .expect("mock server stopped")
    }

    /// Stop listening; later connection attempts are refused
    pub async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

pub async fn start_mock() -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, connections) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let mut cookie = None;
            let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                cookie = request
                    .headers()
                    .get(header::COOKIE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(response)
            };
            let Ok(ws) = accept_hdr_async(socket, callback).await else {
                continue;
            };
            if tx.send(MockConnection { ws, cookie }).is_err() {
                break;
            }
        }
    });

    MockServer {
        addr,
        connections,
        handle,
    }
}

/// A real parley server on an ephemeral port
pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: Arc<Hub>,
    shutdown: watch::Sender<bool>,
    _dir: TempDir,
}

impl TestServer {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub async fn wait_online(&self, username: &str) {
        timeout(RECV_TIMEOUT, async {
            while !self.hub.is_online(username).await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("user never came online");
    }
}

pub async fn start_server() -> TestServer {
    let dir = TempDir::new().unwrap();
    let pool = db::init_db(&dir.path().join("server.db")).await.unwrap();

    let sessions = SessionStore::new(MemoryStore::new(), Duration::from_secs(3600));
    let auth = Arc::new(AuthService::new(UsersDb::new(pool), sessions, true));
    let hub = Arc::new(Hub::with_timeouts(
        Duration::from_millis(500),
        Duration::from_millis(500),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::from_listener(listener, hub.clone(), auth);

    let (shutdown, shutdown_rx) = watch::channel(false);
    tokio::spawn(server.run(shutdown_rx));

    TestServer {
        addr,
        hub,
        shutdown,
        _dir: dir,
    }
}
