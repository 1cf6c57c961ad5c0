//! The native connector against a real WebSocket server on localhost.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use societas_client::{
    ConnectionManager, ConnectionState, RealtimeConfig, ReconnectPolicy, SessionStore,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    while let Some(message) = ws.next().await {
        if let Message::Text(text) = message.unwrap() {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
    panic!("client went away");
}

#[tokio::test]
async fn authenticates_subscribes_and_receives_pushes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let authenticate = next_json(&mut ws).await;
        let reply = json!({
            "type": "auth_response",
            "status": "success",
            "available_channels": ["events"],
        });
        ws.send(Message::text(reply.to_string())).await.unwrap();

        let subscribe = next_json(&mut ws).await;
        let push = json!({"type": "channel_update", "channel": "events", "data": {"n": 1}});
        ws.send(Message::text(push.to_string())).await.unwrap();

        let unsubscribe = next_json(&mut ws).await;
        (authenticate, subscribe, unsubscribe)
    });

    let session = SessionStore::in_memory("loopback_session");
    session.set_token("secret");
    let config = RealtimeConfig::new(format!("ws://{addr}/ws"));
    let manager = ConnectionManager::with_default_connector(config, session);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let subscription = manager.subscribe("events", move |push| {
        tx.send(push.payload().clone())?;
        Ok(())
    });
    manager.connect();

    let pushed = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(pushed, json!({"n": 1}));
    assert_eq!(manager.status(), ConnectionState::Authenticated);
    assert!(manager.is_channel_supported("events"));

    drop(subscription);
    let (authenticate, subscribe, unsubscribe) = timeout(WAIT, server).await.unwrap().unwrap();
    manager.shutdown();

    assert_eq!(authenticate, json!({"type": "authenticate", "token": "secret"}));
    assert_eq!(subscribe, json!({"type": "subscribe", "channel": "events"}));
    assert_eq!(unsubscribe, json!({"type": "unsubscribe", "channel": "events"}));
}

#[tokio::test]
async fn unreachable_server_gives_up_after_the_cap() {
    // Bind then drop to get a port nothing listens on.
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();

    let policy = ReconnectPolicy {
        max_attempts: 2,
        initial_delay_ms: 10,
        max_delay_ms: 50,
        backoff_multiplier: 2,
    };
    let config = RealtimeConfig::new(format!("ws://{addr}/ws")).with_reconnect(policy);
    let manager =
        ConnectionManager::with_default_connector(config, SessionStore::in_memory("unused"));
    let mut status = manager.watch_status();

    manager.connect();
    let settled = timeout(
        WAIT,
        status.wait_for(|state| {
            matches!(state, ConnectionState::Error { reason } if reason.starts_with("Max reconnect"))
        }),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();

    assert_eq!(
        settled,
        ConnectionState::Error {
            reason: "Max reconnect attempts (2) reached".into()
        }
    );
    assert_eq!(manager.attempts(), 2);
    manager.shutdown();
}
