//! Connection lifecycle states.

use std::fmt;

/// Lifecycle of the shared realtime connection.
///
/// `Disconnected → Connecting → Connected → Authenticated`, with `AuthFailed`
/// (caller may retry) and `Error` (socket failure, or attempts exhausted).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// Socket open, handshake not yet answered.
    Connected,
    Authenticated,
    AuthFailed {
        reason: String,
    },
    Error {
        reason: String,
    },
}

impl ConnectionState {
    /// Live updates can only be expected in this state.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, ConnectionState::Authenticated)
    }

    /// A socket exists or is being opened; `connect()` is a no-op here.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Authenticated
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            ConnectionState::AuthFailed { .. } | ConnectionState::Error { .. }
        )
    }

    /// Short label for diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::AuthFailed { .. } => "auth_failed",
            ConnectionState::Error { .. } => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::AuthFailed { reason } | ConnectionState::Error { reason } => {
                write!(f, "{} ({})", self.label(), reason)
            }
            _ => f.write_str(self.label()),
        }
    }
}
