//! Transport client against a bare WebSocket endpoint

mod common;

use common::{RECV_TIMEOUT, fast_policy, start_mock};
use futures_util::{SinkExt, StreamExt};
use parley_client::transport::{Transport, TransportError, reconnect_unless_closed};
use parley_common::conversation::{ConversationMetadata, Message as ChatMessage};
use parley_common::protocol::{Envelope, NotifyConnection, ProtocolError};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

fn presence(username: &str) -> Envelope {
    Envelope::NotifyConnection(NotifyConnection {
        username: username.to_string(),
        connected: true,
    })
}

fn close_frame(code: CloseCode) -> Option<CloseFrame> {
    Some(CloseFrame {
        code,
        reason: "".into(),
    })
}

#[tokio::test]
async fn test_token_sent_as_cookie() {
    let mut mock = start_mock().await;
    let (_transport, _inbound) = Transport::connect(&mock.url(), "tok123").await.unwrap();

    let connection = mock.accept().await;
    assert_eq!(connection.cookie.as_deref(), Some("session_id=tok123"));
}

#[tokio::test]
async fn test_http_scheme_is_rewritten() {
    let mut mock = start_mock().await;
    let url = format!("http://{}/ws", mock.addr);
    let (transport, _inbound) = Transport::connect(&url, "tok").await.unwrap();

    assert!(transport.uri().starts_with("ws://"));
    mock.accept().await;
}

#[tokio::test]
async fn test_receives_and_sends_envelopes() {
    let mut mock = start_mock().await;
    let (transport, mut inbound) = Transport::connect(&mock.url(), "tok").await.unwrap();
    let mut connection = mock.accept().await;
    let (_cancel_tx, mut cancel) = watch::channel(false);

    let envelope = presence("bob");
    connection
        .ws
        .send(Message::text(envelope.encode().unwrap()))
        .await
        .unwrap();
    let received = timeout(RECV_TIMEOUT, inbound.next(&mut cancel))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, envelope);

    let metadata = ConversationMetadata::new("bob", vec!["alice".into(), "bob".into()]);
    let message = ChatMessage::now("alice", "hello");
    transport
        .send_chat_message(message.clone(), metadata.clone(), vec!["bob".into()])
        .await
        .unwrap();

    let frame = timeout(RECV_TIMEOUT, connection.ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let Message::Text(text) = frame else {
        panic!("expected text frame");
    };
    match Envelope::decode(text.as_bytes()).unwrap() {
        Envelope::SendChatMessage(chat) => {
            assert_eq!(chat.message, message);
            assert_eq!(chat.conversation_metadata, metadata);
            assert_eq!(chat.recipients, vec!["bob".to_string()]);
        }
        other => panic!("expected chat message, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_type_is_protocol_error() {
    let mut mock = start_mock().await;
    let (_transport, mut inbound) = Transport::connect(&mock.url(), "tok").await.unwrap();
    let mut connection = mock.accept().await;
    let (_cancel_tx, mut cancel) = watch::channel(false);

    connection
        .ws
        .send(Message::text(r#"{"type":999,"payload":{}}"#))
        .await
        .unwrap();

    let result = timeout(RECV_TIMEOUT, inbound.next(&mut cancel)).await.unwrap();
    assert!(matches!(
        result,
        Err(TransportError::Protocol(ProtocolError::UnknownType(999)))
    ));
}

#[tokio::test]
async fn test_server_normal_close_is_reported() {
    let mut mock = start_mock().await;
    let (_transport, mut inbound) = Transport::connect(&mock.url(), "tok").await.unwrap();
    let mut connection = mock.accept().await;
    let (_cancel_tx, mut cancel) = watch::channel(false);

    connection.ws.close(close_frame(CloseCode::Normal)).await.unwrap();
    tokio::spawn(connection.drain());

    let err = timeout(RECV_TIMEOUT, inbound.next(&mut cancel))
        .await
        .unwrap()
        .unwrap_err();
    assert!(err.is_normal_closure(), "got {:?}", err);
    assert!(!reconnect_unless_closed(&err));
}

#[tokio::test]
async fn test_policy_close_is_not_retried() {
    let mut mock = start_mock().await;
    let (_transport, mut inbound) = Transport::connect(&mock.url(), "stale").await.unwrap();
    let mut connection = mock.accept().await;
    let (_cancel_tx, mut cancel) = watch::channel(false);

    connection.ws.close(close_frame(CloseCode::Policy)).await.unwrap();
    tokio::spawn(connection.drain());

    let err = timeout(RECV_TIMEOUT, inbound.next(&mut cancel))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, TransportError::Closed { code: Some(1008) }));
    assert!(!reconnect_unless_closed(&err));
}

#[tokio::test]
async fn test_close_handshake_then_not_connected() {
    let mut mock = start_mock().await;
    let (transport, mut inbound) = Transport::connect(&mock.url(), "tok").await.unwrap();
    let mut connection = mock.accept().await;

    let server = tokio::spawn(async move {
        let mut close_code = None;
        while let Some(Ok(frame)) = connection.ws.next().await {
            if let Message::Close(Some(frame)) = frame {
                close_code = Some(u16::from(frame.code));
            }
        }
        close_code
    });

    timeout(RECV_TIMEOUT, transport.close()).await.unwrap().unwrap();
    assert!(!transport.is_connected().await);
    assert_eq!(timeout(RECV_TIMEOUT, server).await.unwrap().unwrap(), Some(1000));

    let result = transport.send_envelope(&presence("alice")).await;
    assert!(matches!(result, Err(TransportError::NotConnected)));

    // A deliberate close leaves nothing on the error channel
    let (_cancel_tx, mut cancel) = watch::channel(false);
    assert!(
        timeout(std::time::Duration::from_millis(200), inbound.next(&mut cancel))
            .await
            .is_err()
    );

    // Closing twice is harmless
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_next_or_reconnect_resumes_on_new_connection() {
    let mut mock = start_mock().await;
    let (transport, mut inbound) = Transport::connect_with_policy(&mock.url(), "tok", fast_policy(3))
        .await
        .unwrap();

    let mut first = mock.accept().await;
    first.ws.close(close_frame(CloseCode::Away)).await.unwrap();
    tokio::spawn(first.drain());

    let envelope = presence("carol");
    let frame = envelope.encode().unwrap();
    let server = tokio::spawn(async move {
        let mut second = mock.accept().await;
        second.ws.send(Message::text(frame)).await.unwrap();
        second
    });

    let (_cancel_tx, mut cancel) = watch::channel(false);
    let mut decider = reconnect_unless_closed;
    let received = timeout(
        RECV_TIMEOUT,
        inbound.next_or_reconnect(&transport, &mut cancel, &mut decider),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(received, envelope);

    let second = server.await.unwrap();
    assert_eq!(second.cookie.as_deref(), Some("session_id=tok"));
    assert!(transport.is_connected().await);
}

#[tokio::test]
async fn test_manual_reconnect_drops_stale_error() {
    let mut mock = start_mock().await;
    let (transport, mut inbound) = Transport::connect_with_policy(&mock.url(), "tok", fast_policy(3))
        .await
        .unwrap();

    let mut first = mock.accept().await;
    first.ws.close(close_frame(CloseCode::Away)).await.unwrap();
    first.drain().await;
    // Give the old reader time to queue its terminal error
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    transport.reconnect().await.unwrap();
    let mut second = mock.accept().await;
    let envelope = presence("dave");
    second
        .ws
        .send(Message::text(envelope.encode().unwrap()))
        .await
        .unwrap();

    let (_cancel_tx, mut cancel) = watch::channel(false);
    let received = timeout(RECV_TIMEOUT, inbound.next(&mut cancel))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, envelope);
}

#[tokio::test]
async fn test_decider_can_refuse_reconnect() {
    let mut mock = start_mock().await;
    let (transport, mut inbound) = Transport::connect(&mock.url(), "tok").await.unwrap();
    let mut connection = mock.accept().await;
    connection.ws.close(close_frame(CloseCode::Away)).await.unwrap();
    tokio::spawn(connection.drain());

    let (_cancel_tx, mut cancel) = watch::channel(false);
    let mut seen = Vec::new();
    let mut decider = |e: &TransportError| {
        seen.push(format!("{}", e));
        false
    };
    let err = timeout(
        RECV_TIMEOUT,
        inbound.next_or_reconnect(&transport, &mut cancel, &mut decider),
    )
    .await
    .unwrap()
    .unwrap_err();

    assert!(matches!(err, TransportError::Closed { code: Some(1001) }));
    assert_eq!(seen.len(), 1);
}

#[tokio::test]
async fn test_reconnect_gives_up() {
    let mut mock = start_mock().await;
    let (transport, _inbound) = Transport::connect_with_policy(&mock.url(), "tok", fast_policy(2))
        .await
        .unwrap();
    let connection = mock.accept().await;
    mock.stop().await;
    drop(connection);

    let err = timeout(RECV_TIMEOUT, transport.reconnect())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        err,
        TransportError::ReconnectFailed { attempts: 2, .. }
    ));
    assert!(!transport.is_connected().await);
    assert!(matches!(
        transport.send_envelope(&presence("alice")).await,
        Err(TransportError::NotConnected)
    ));
}

#[tokio::test]
async fn test_cancel_interrupts_next() {
    let mut mock = start_mock().await;
    let (_transport, mut inbound) = Transport::connect(&mock.url(), "tok").await.unwrap();
    let _connection = mock.accept().await;

    let (cancel_tx, mut cancel) = watch::channel(false);
    let waiter = tokio::spawn(async move { inbound.next(&mut cancel).await });
    cancel_tx.send(true).unwrap();

    let result = timeout(RECV_TIMEOUT, waiter).await.unwrap().unwrap();
    assert!(matches!(result, Err(TransportError::Cancelled)));
}
