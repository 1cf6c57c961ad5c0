//! Socket abstraction driven by the connection manager.
//!
//! A [`Connector`] opens one socket per call and reports everything that
//! happens on it through an [`EventSink`]. The manager talks back through a
//! [`SocketHandle`]. Each socket is tagged with a generation number so events
//! from a socket that has since been replaced are ignored.

use std::sync::Weak;

use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::error::RealtimeError;

/// Something that happened on a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    /// A text frame.
    Message(String),
    Error(String),
    /// The socket is gone. Always the last event of a socket.
    Closed { code: u16, reason: String },
}

/// Instruction for the task that owns a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
    Send(String),
    Close { code: u16, reason: String },
}

/// Receiver of socket events, implemented by the connection manager.
pub(crate) trait SocketEventHandler: Send + Sync {
    fn on_socket_event(&self, generation: u64, event: SocketEvent);
}

/// Where a connector reports the events of one socket.
#[derive(Clone)]
pub struct EventSink {
    generation: u64,
    handler: Weak<dyn SocketEventHandler>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, handler: Weak<dyn SocketEventHandler>) -> Self {
        Self {
            generation,
            handler,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event. Returns `false` once the manager is gone.
    pub fn emit(&self, event: SocketEvent) -> bool {
        match self.handler.upgrade() {
            Some(handler) => {
                handler.on_socket_event(self.generation, event);
                true
            }
            None => false,
        }
    }
}

/// The manager's end of a socket.
#[derive(Debug)]
pub struct SocketHandle {
    generation: u64,
    commands: UnboundedSender<SocketCommand>,
}

impl SocketHandle {
    pub(crate) fn new(generation: u64, commands: UnboundedSender<SocketCommand>) -> Self {
        Self {
            generation,
            commands,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn send_text(&self, text: String) -> Result<(), RealtimeError> {
        self.commands
            .unbounded_send(SocketCommand::Send(text))
            .map_err(|_| RealtimeError::SocketClosed)
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.commands.unbounded_send(SocketCommand::Close {
            code,
            reason: reason.to_string(),
        });
        self.commands.close_channel();
    }
}

/// Opens sockets for the connection manager.
pub trait Connector: Send + Sync + 'static {
    /// Start opening a socket to `url` and return immediately.
    ///
    /// The implementation must report `Open` once the socket is usable, every
    /// inbound text frame as `Message`, and finish with exactly one `Closed`
    /// (also when opening fails). Frames and close requests from the manager
    /// arrive on `commands`.
    fn open(&self, url: &str, events: EventSink, commands: UnboundedReceiver<SocketCommand>);
}

#[cfg(not(target_arch = "wasm32"))]
mod native;
#[cfg(not(target_arch = "wasm32"))]
pub use native::TungsteniteConnector;

#[cfg(target_arch = "wasm32")]
mod wasm;
#[cfg(target_arch = "wasm32")]
pub use wasm::WebSysConnector;

/// The connector for the current target.
#[cfg(not(target_arch = "wasm32"))]
pub fn default_connector() -> TungsteniteConnector {
    TungsteniteConnector
}

#[cfg(target_arch = "wasm32")]
pub fn default_connector() -> WebSysConnector {
    WebSysConnector
}
