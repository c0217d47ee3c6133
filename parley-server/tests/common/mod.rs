//! Shared helpers for server integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parley_common::conversation::{ConversationMetadata, Message as ChatMessage};
use parley_common::protocol::{Envelope, SendChatMessage};
use parley_server::auth::AuthService;
use parley_server::db::UsersDb;
use parley_server::hub::Hub;
use parley_server::server::Server;
use parley_server::session::{MemoryStore, SessionStore};
use sqlx::SqlitePool;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long tests wait for a frame that should arrive
pub const RECV_TIMEOUT: Duration = Duration::from_secs(3);

/// How long tests wait to be sure nothing arrives
pub const QUIET_PERIOD: Duration = Duration::from_millis(300);

pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: Arc<Hub>,
    pub auth: Arc<AuthService<MemoryStore>>,
    shutdown: watch::Sender<bool>,
    pub handle: JoinHandle<()>,
}

impl TestServer {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn auth_url(&self) -> String {
        format!("ws://{}/auth", self.addr)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Create an account and return its session token
    pub async fn signup(&self, username: &str) -> String {
        self.auth
            .signup(username, "password")
            .await
            .expect("signup failed")
    }

    /// Sign up, connect and wait until the Hub has registered the user
    pub async fn connect_user(&self, username: &str) -> WsClient {
        let token = self.signup(username).await;
        let ws = connect_with_token(&self.ws_url(), &token).await;
        self.wait_online(username).await;
        ws
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

    pub async fn wait_offline(&self, username: &str) {
        timeout(RECV_TIMEOUT, async {
            while self.hub.is_online(username).await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("user never went offline");
    }
}

/// Start a server on an ephemeral port with an in-memory database
pub async fn start_server() -> TestServer {
    let pool = SqlitePool::connect(":memory:")
        .await
        .expect("Failed to create test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let sessions = SessionStore::new(MemoryStore::new(), Duration::from_secs(3600));
    let auth = Arc::new(AuthService::new(UsersDb::new(pool), sessions, true));
    let hub = Arc::new(Hub::with_timeouts(
        Duration::from_millis(500),
        Duration::from_millis(500),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::from_listener(listener, hub.clone(), auth.clone());

    let (shutdown, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(server.run(shutdown_rx));

    TestServer {
        addr,
        hub,
        auth,
        shutdown,
        handle,
    }
}

/// Open a real-time connection carrying `token` as the session cookie
pub async fn connect_with_token(url: &str, token: &str) -> WsClient {
    let mut request = url.into_client_request().unwrap();
    request.headers_mut().insert(
        header::COOKIE,
        HeaderValue::from_str(&format!("session_id={}", token)).unwrap(),
    );
    let (ws, _) = connect_async(request).await.expect("connect failed");
    ws
}

/// Encoded chat envelope from `author` to `recipients`
pub fn chat_frame(author: &str, recipients: &[&str], content: &str) -> String {
    let mut participants: Vec<String> = recipients.iter().map(|s| s.to_string()).collect();
    participants.push(author.to_string());
    Envelope::SendChatMessage(SendChatMessage {
        conversation_metadata: ConversationMetadata::new("test", participants),
        message: ChatMessage::now(author, content),
        recipients: recipients.iter().map(|s| s.to_string()).collect(),
    })
    .encode()
    .unwrap()
}

/// Next frame of any kind, or `None` on timeout or end of stream
pub async fn next_frame(ws: &mut WsClient, wait: Duration) -> Option<Message> {
    match timeout(wait, ws.next()).await {
        Ok(Some(Ok(message))) => Some(message),
        _ => None,
    }
}

/// Next chat text frame, skipping presence notifications
pub async fn next_chat(ws: &mut WsClient, wait: Duration) -> Option<String> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match next_frame(ws, remaining).await? {
            Message::Text(text) => {
                if let Ok(Envelope::SendChatMessage(_)) = Envelope::decode(text.as_bytes()) {
                    return Some(text.to_string());
                }
            }
            Message::Close(_) => return None,
            _ => {}
        }
    }
}

/// Next close frame code, skipping everything else
pub async fn next_close_code(ws: &mut WsClient, wait: Duration) -> Option<u16> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if let Message::Close(frame) = next_frame(ws, remaining).await? {
            return frame.map(|f| f.code.into());
        }
    }
}
