//! Integration tests for the connection lifecycle against a loopback server

use futures_util::{SinkExt, StreamExt};
use promptcast::client::{
    ClientError, ConnectionManager, ConnectionStatus, Credentials, Failure, Role,
};
use promptcast::config::{Config, ReconnectConfig};
use promptcast::protocol::OutboundMessage;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const WAIT: Duration = Duration::from_secs(5);

fn test_config(base_url: String) -> Config {
    let mut config = Config::default();
    config.server.base_url = base_url;
    config.connection.heartbeat_interval_secs = 1;
    config.reconnect = ReconnectConfig {
        max_attempts: 5,
        base_delay_ms: 10,
        max_delay_ms: 40,
    };
    config
}

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, format!("http://{}", addr))
}

/// Next JSON text frame from the client, skipping everything else
async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Option<Value> {
    while let Some(Ok(msg)) = ws.next().await {
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).ok();
        }
    }
    None
}

/// Read until the client goes away
async fn drain(mut ws: WebSocketStream<TcpStream>) {
    while let Some(Ok(_)) = ws.next().await {}
}

#[tokio::test]
async fn test_open_routes_messages_and_sends_heartbeat() {
    let (listener, base_url) = bind().await;
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Value>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::text(
            r#"{"type":"prompt","statement":"Describe a loop","requires_input":true}"#,
        ))
        .await
        .unwrap();
        while let Some(frame) = next_json(&mut ws).await {
            if frames_tx.send(frame).is_err() {
                break;
            }
        }
    });

    let mut manager = ConnectionManager::new(test_config(base_url));
    let connection = manager
        .open("s1", Role::Participant, Credentials::none())
        .await
        .unwrap();

    let snapshot = connection
        .wait_for(WAIT, "prompt", |s| s.prompt.is_some())
        .await
        .unwrap();
    assert_eq!(snapshot.status, ConnectionStatus::Connected);
    assert_eq!(snapshot.prompt.unwrap().statement, "Describe a loop");

    connection
        .send(OutboundMessage::Chat {
            message: "hello".to_string(),
        })
        .await
        .unwrap();

    let chat = timeout(WAIT, frames_rx.recv()).await.unwrap().unwrap();
    assert_eq!(chat["type"], "chat");
    assert_eq!(chat["message"], "hello");

    let ping = timeout(WAIT, frames_rx.recv()).await.unwrap().unwrap();
    assert_eq!(ping, serde_json::json!({ "type": "ping" }));

    manager.close().await;
    assert_eq!(connection.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_handshake_carries_credential() {
    let (listener, base_url) = bind().await;
    let (seen_tx, seen_rx) = oneshot::channel::<(String, Option<String>)>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let cookie = request
                .headers()
                .get("cookie")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let _ = seen_tx.send((request.uri().to_string(), cookie));
            Ok(response)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();
        drain(ws).await;
    });

    let mut manager = ConnectionManager::new(test_config(base_url));
    let _connection = manager
        .open("s1", Role::Instructor, Credentials::token("abc123"))
        .await
        .unwrap();

    let (uri, cookie) = timeout(WAIT, seen_rx).await.unwrap().unwrap();
    assert_eq!(uri, "/ws/instructor/s1?token=abc123");
    assert_eq!(cookie.as_deref(), Some("session_token=abc123"));

    manager.close().await;
}

#[tokio::test]
async fn test_send_fails_when_not_connected() {
    let (listener, base_url) = bind().await;
    // Nothing will ever complete a handshake
    drop(listener);

    let mut manager = ConnectionManager::new(test_config(base_url));
    let connection = manager
        .open("s1", Role::Participant, Credentials::none())
        .await
        .unwrap();

    let result = connection.send(OutboundMessage::Ping).await;
    assert!(matches!(result, Err(ClientError::NotConnected)));

    manager.close().await;
}

#[tokio::test]
async fn test_protocol_error_close_is_not_retried() {
    let (listener, base_url) = bind().await;
    let accepts = Arc::new(AtomicUsize::new(0));

    let counter = accepts.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let _ = ws
                    .close(Some(CloseFrame {
                        code: CloseCode::Protocol,
                        reason: "bad frame".into(),
                    }))
                    .await;
                drain(ws).await;
            });
        }
    });

    let mut manager = ConnectionManager::new(test_config(base_url));
    let connection = manager
        .open("s1", Role::Participant, Credentials::none())
        .await
        .unwrap();

    let snapshot = connection
        .wait_for(WAIT, "failure", |s| s.failure.is_some())
        .await
        .unwrap();
    assert_eq!(snapshot.status, ConnectionStatus::Error);
    assert_eq!(snapshot.failure, Some(Failure::Reauthenticate));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 1);

    manager.close().await;
}

#[tokio::test]
async fn test_rejected_handshake_requires_reauthentication() {
    let (listener, base_url) = bind().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = |_request: &Request, _response: Response| -> Result<Response, ErrorResponse> {
            let mut rejection = ErrorResponse::new(Some("bad token".to_string()));
            *rejection.status_mut() = StatusCode::UNAUTHORIZED;
            Err(rejection)
        };
        let _ = tokio_tungstenite::accept_hdr_async(stream, callback).await;
    });

    let mut manager = ConnectionManager::new(test_config(base_url));
    let connection = manager
        .open("s1", Role::Participant, Credentials::token("expired"))
        .await
        .unwrap();

    let snapshot = connection
        .wait_for(WAIT, "failure", |s| s.failure.is_some())
        .await
        .unwrap();
    assert_eq!(snapshot.failure, Some(Failure::Reauthenticate));

    manager.close().await;
}

#[tokio::test]
async fn test_gives_up_after_retry_budget() {
    let (listener, base_url) = bind().await;
    let accepts = Arc::new(AtomicUsize::new(0));

    let counter = accepts.clone();
    tokio::spawn(async move {
        // Drop every socket before the handshake completes
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });

    let mut manager = ConnectionManager::new(test_config(base_url));
    let connection = manager
        .open("s1", Role::Participant, Credentials::none())
        .await
        .unwrap();

    let snapshot = connection
        .wait_for(WAIT, "failure", |s| s.failure.is_some())
        .await
        .unwrap();
    assert_eq!(snapshot.status, ConnectionStatus::Error);
    assert_eq!(
        snapshot.failure,
        Some(Failure::CouldNotReconnect { attempts: 5 })
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 6);

    assert!(matches!(
        connection.send(OutboundMessage::Ping).await,
        Err(ClientError::NotConnected)
    ));

    manager.close().await;
}

#[tokio::test]
async fn test_open_replaces_previous_connection() {
    let (listener, base_url) = bind().await;
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<usize>();

    tokio::spawn(async move {
        let mut index = 0;
        while let Ok((stream, _)) = listener.accept().await {
            let closed_tx = closed_tx.clone();
            let this = index;
            index += 1;
            tokio::spawn(async move {
                let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                drain(ws).await;
                let _ = closed_tx.send(this);
            });
        }
    });

    let mut manager = ConnectionManager::new(test_config(base_url));
    let first = manager
        .open("s1", Role::Participant, Credentials::none())
        .await
        .unwrap();
    first
        .wait_for(WAIT, "first connection", |s| s.status.is_open())
        .await
        .unwrap();

    let second = manager
        .open("s2", Role::Participant, Credentials::none())
        .await
        .unwrap();

    assert_ne!(first.id(), second.id());
    assert_eq!(first.status(), ConnectionStatus::Disconnected);
    assert!(matches!(
        first.send(OutboundMessage::Ping).await,
        Err(ClientError::NotConnected)
    ));
    assert_eq!(timeout(WAIT, closed_rx.recv()).await.unwrap(), Some(0));

    second
        .wait_for(WAIT, "second connection", |s| s.status.is_open())
        .await
        .unwrap();
    assert_eq!(manager.current().map(|c| c.id()), Some(second.id()));

    manager.close().await;
    assert!(manager.current().is_none());
}

#[tokio::test]
async fn test_manual_reconnect_recovers_from_error() {
    let (listener, base_url) = bind().await;
    let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel::<usize>();

    tokio::spawn(async move {
        let mut index = 0;
        while let Ok((stream, _)) = listener.accept().await {
            let this = index;
            index += 1;
            let _ = accepted_tx.send(this);
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                if this == 0 {
                    let _ = ws
                        .close(Some(CloseFrame {
                            code: CloseCode::Policy,
                            reason: "expired".into(),
                        }))
                        .await;
                }
                drain(ws).await;
            });
        }
    });

    let mut manager = ConnectionManager::new(test_config(base_url));
    let connection = manager
        .open("s1", Role::Participant, Credentials::none())
        .await
        .unwrap();

    connection
        .wait_for(WAIT, "failure", |s| s.failure.is_some())
        .await
        .unwrap();
    assert_eq!(timeout(WAIT, accepted_rx.recv()).await.unwrap(), Some(0));

    connection.reconnect().unwrap();
    assert_eq!(timeout(WAIT, accepted_rx.recv()).await.unwrap(), Some(1));

    let snapshot = connection
        .wait_for(WAIT, "reconnect", |s| s.status == ConnectionStatus::Connected)
        .await
        .unwrap();
    assert!(snapshot.failure.is_none());
    assert_eq!(snapshot.attempt, 0);

    manager.close().await;
}

#[tokio::test]
async fn test_zero_periods_do_not_stop_the_task() {
    let (listener, base_url) = bind().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::text(r#"{"type":"prompt","statement":"Still here"}"#))
            .await
            .unwrap();
        drain(ws).await;
    });

    let mut config = test_config(base_url);
    config.connection.heartbeat_interval_secs = 0;
    config.timer.tick_interval_ms = 0;

    let mut manager = ConnectionManager::new(config);
    let connection = manager
        .open("s1", Role::Participant, Credentials::none())
        .await
        .unwrap();

    let snapshot = connection
        .wait_for(WAIT, "prompt", |s| s.prompt.is_some())
        .await
        .unwrap();
    assert_eq!(snapshot.status, ConnectionStatus::Connected);
    assert_eq!(snapshot.prompt.unwrap().statement, "Still here");

    manager.close().await;
    assert_eq!(connection.status(), ConnectionStatus::Disconnected);
}
