//! Errors surfaced by the realtime client.

use societas_shared::ProtocolError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RealtimeError {
    /// No socket exists to carry the frame.
    #[error("not connected")]
    NotConnected,
    /// The socket task is gone.
    #[error("socket closed")]
    SocketClosed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, RealtimeError>;
