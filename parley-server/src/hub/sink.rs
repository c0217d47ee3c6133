//! Write half of a peer connection

use async_trait::async_trait;
use futures_util::{Sink, SinkExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

pub use tokio_tungstenite::tungstenite::Error as WsError;

/// Anything the Hub can write text frames to
#[async_trait]
pub trait PeerSink: Send + Sync {
    /// Write one text frame
    async fn send_text(&self, text: &str) -> Result<(), WsError>;

    /// Write a close frame
    async fn send_close(&self, code: CloseCode, reason: &str) -> Result<(), WsError>;
}

/// `PeerSink` over the write half of a split WebSocket stream
///
/// Writes are serialized through an async mutex so fan-out from several
/// senders never interleaves frames.
pub struct WsSink<S> {
    inner: Mutex<S>,
}

impl<S> WsSink<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }
}

#[async_trait]
impl<S> PeerSink for WsSink<S>
where
    S: Sink<Message, Error = WsError> + Unpin + Send,
{
    async fn send_text(&self, text: &str) -> Result<(), WsError> {
        let mut sink = self.inner.lock().await;
        sink.send(Message::text(text.to_string())).await
    }

    async fn send_close(&self, code: CloseCode, reason: &str) -> Result<(), WsError> {
        let mut sink = self.inner.lock().await;
        let frame = CloseFrame {
            code,
            reason: reason.to_string().into(),
        };
        sink.send(Message::Close(Some(frame))).await
    }
}
