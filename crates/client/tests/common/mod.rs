//! Shared fixtures: an in-memory connector that records every socket the
//! manager opens and lets tests play the server's side of it.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_channel::mpsc::UnboundedReceiver;
use serde_json::{json, Value};
use societas_client::realtime::{Connector, EventSink, SocketCommand, SocketEvent};
use societas_client::{ConnectionManager, RealtimeConfig, SessionStore};

pub const TEST_URL: &str = "ws://dashboard.test/ws";

#[derive(Clone, Default)]
pub struct MockConnector {
    sockets: Arc<Mutex<Vec<Arc<MockSocket>>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sockets opened so far.
    pub fn opened(&self) -> usize {
        self.sockets.lock().unwrap().len()
    }

    pub fn socket(&self, index: usize) -> Arc<MockSocket> {
        self.sockets.lock().unwrap()[index].clone()
    }

    pub fn last(&self) -> Arc<MockSocket> {
        self.sockets
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no socket opened")
    }
}

impl Connector for MockConnector {
    fn open(&self, url: &str, events: EventSink, commands: UnboundedReceiver<SocketCommand>) {
        self.sockets.lock().unwrap().push(Arc::new(MockSocket {
            url: url.to_string(),
            events,
            commands: Mutex::new(commands),
            log: Mutex::new(Vec::new()),
        }));
    }
}

/// The server's view of one socket.
pub struct MockSocket {
    pub url: String,
    events: EventSink,
    commands: Mutex<UnboundedReceiver<SocketCommand>>,
    log: Mutex<Vec<SocketCommand>>,
}

impl MockSocket {
    pub fn generation(&self) -> u64 {
        self.events.generation()
    }

    pub fn emit(&self, event: SocketEvent) -> bool {
        self.events.emit(event)
    }

    pub fn open(&self) {
        self.emit(SocketEvent::Open);
    }

    pub fn send_json(&self, value: Value) {
        self.emit(SocketEvent::Message(value.to_string()));
    }

    pub fn send_raw(&self, text: &str) {
        self.emit(SocketEvent::Message(text.to_string()));
    }

    pub fn accept(&self, channels: &[&str]) {
        self.send_json(json!({
            "type": "auth_response",
            "status": "success",
            "available_channels": channels,
        }));
    }

    pub fn reject(&self, message: &str) {
        self.send_json(json!({
            "type": "auth_response",
            "status": "error",
            "message": message,
        }));
    }

    /// Push `data` on `channel` in the server's envelope.
    pub fn push(&self, channel: &str, data: Value) {
        self.send_json(json!({
            "type": "channel_update",
            "channel": channel,
            "data": data,
        }));
    }

    pub fn error(&self, reason: &str) {
        self.emit(SocketEvent::Error(reason.to_string()));
    }

    pub fn close(&self, code: u16) {
        self.emit(SocketEvent::Closed {
            code,
            reason: String::new(),
        });
    }

    fn drain(&self) -> Vec<SocketCommand> {
        let mut commands = self.commands.lock().unwrap();
        let mut log = self.log.lock().unwrap();
        while let Ok(Some(command)) = commands.try_next() {
            log.push(command);
        }
        log.clone()
    }

    /// Everything the manager asked of this socket, in order.
    pub fn commands(&self) -> Vec<SocketCommand> {
        self.drain()
    }

    /// Frames the client sent, decoded.
    pub fn sent(&self) -> Vec<Value> {
        self.drain()
            .into_iter()
            .filter_map(|command| match command {
                SocketCommand::Send(text) => Some(serde_json::from_str(&text).unwrap()),
                SocketCommand::Close { .. } => None,
            })
            .collect()
    }

    pub fn sent_of_type(&self, kind: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|frame| frame["type"] == kind)
            .collect()
    }

    /// Channels named in `subscribe` frames, in send order.
    pub fn subscribes(&self) -> Vec<String> {
        channels_of(self.sent_of_type("subscribe"))
    }

    pub fn unsubscribes(&self) -> Vec<String> {
        channels_of(self.sent_of_type("unsubscribe"))
    }

    /// The close the manager requested, if any.
    pub fn close_request(&self) -> Option<(u16, String)> {
        self.drain().into_iter().find_map(|command| match command {
            SocketCommand::Close { code, reason } => Some((code, reason)),
            SocketCommand::Send(_) => None,
        })
    }
}

fn channels_of(frames: Vec<Value>) -> Vec<String> {
    frames
        .into_iter()
        .map(|frame| frame["channel"].as_str().unwrap().to_string())
        .collect()
}

pub fn test_config() -> RealtimeConfig {
    RealtimeConfig::new(TEST_URL)
}

pub struct Harness {
    pub manager: ConnectionManager,
    pub connector: MockConnector,
    pub session: SessionStore,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: RealtimeConfig) -> Self {
        let connector = MockConnector::new();
        let session = SessionStore::in_memory("test_session");
        let manager = ConnectionManager::new(config, connector.clone(), session.clone());
        Self {
            manager,
            connector,
            session,
        }
    }

    /// Connect and complete the handshake on the new socket.
    pub fn authenticate(&self, channels: &[&str]) -> Arc<MockSocket> {
        self.manager.connect();
        let socket = self.connector.last();
        socket.open();
        socket.accept(channels);
        socket
    }
}

/// Let spawned tasks (status watchers, fetches) run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

pub async fn advance(millis: u64) {
    tokio::time::sleep(Duration::from_millis(millis)).await;
    settle().await;
}
