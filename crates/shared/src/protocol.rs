//! Realtime wire protocol: JSON text frames exchanged over the dashboard socket.
//!
//! Outbound frames are a closed enum serialized with a `type` tag. Inbound
//! frames are loosely shaped on the wire, so they are parsed into a raw JSON
//! object first and then classified into [`ServerFrame`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

const REDACTED: &str = "<redacted>";

/// Close code for an intentional, normal closure. Never triggers a reconnect.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when the peer vanished without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// `type` value of the authentication response frame.
pub const AUTH_RESPONSE_TYPE: &str = "auth_response";

/// `status` value of a successful authentication response.
pub const AUTH_STATUS_SUCCESS: &str = "success";

/// Whether a close code is the normal-closure code.
pub fn is_normal_close(code: u16) -> bool {
    code == CLOSE_NORMAL
}

/// How the client identifies itself in the `authenticate` frame.
///
/// `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthCredentials {
    /// Bearer token taken from the session store.
    Token { token: String },
    /// No token available: degrade to public, read-only capability.
    Public { mode: PublicMode },
}

/// Marker for `mode: "public"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicMode {
    Public,
}

impl AuthCredentials {
    /// Build credentials from an optional bearer token.
    pub fn from_token(token: Option<String>) -> Self {
        match token {
            Some(token) if !token.trim().is_empty() => AuthCredentials::Token { token },
            _ => AuthCredentials::Public {
                mode: PublicMode::Public,
            },
        }
    }

    pub fn is_public(&self) -> bool {
        matches!(self, AuthCredentials::Public { .. })
    }
}

impl fmt::Debug for AuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthCredentials::Token { .. } => f
                .debug_struct("Token")
                .field("token", &REDACTED)
                .finish(),
            AuthCredentials::Public { mode } => {
                f.debug_struct("Public").field("mode", mode).finish()
            }
        }
    }
}

/// Frames sent from the client to the server.
///
/// `Display` gives a log-safe summary; use [`ClientFrame::to_text`] for the
/// wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Authenticate {
        #[serde(flatten)]
        credentials: AuthCredentials,
    },
    Subscribe {
        channel: String,
    },
    Unsubscribe {
        channel: String,
    },
}

impl ClientFrame {
    pub fn authenticate(token: Option<String>) -> Self {
        ClientFrame::Authenticate {
            credentials: AuthCredentials::from_token(token),
        }
    }

    pub fn subscribe(channel: impl Into<String>) -> Self {
        ClientFrame::Subscribe {
            channel: channel.into(),
        }
    }

    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        ClientFrame::Unsubscribe {
            channel: channel.into(),
        }
    }

    /// Encode as a JSON text frame.
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// The channel this frame targets, if any.
    pub fn channel(&self) -> Option<&str> {
        match self {
            ClientFrame::Subscribe { channel } | ClientFrame::Unsubscribe { channel } => {
                Some(channel)
            }
            ClientFrame::Authenticate { .. } => None,
        }
    }
}

impl fmt::Display for ClientFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientFrame::Authenticate {
                credentials: AuthCredentials::Token { .. },
            } => write!(f, "authenticate(token={REDACTED})"),
            ClientFrame::Authenticate {
                credentials: AuthCredentials::Public { .. },
            } => f.write_str("authenticate(public)"),
            ClientFrame::Subscribe { channel } => write!(f, "subscribe({channel})"),
            ClientFrame::Unsubscribe { channel } => write!(f, "unsubscribe({channel})"),
        }
    }
}

/// Body of an `auth_response` frame.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_channels: Option<Vec<String>>,
}

impl AuthResponse {
    pub fn is_success(&self) -> bool {
        self.status == AUTH_STATUS_SUCCESS
    }

    /// Human-readable reason for a rejected handshake.
    pub fn failure_reason(&self) -> String {
        match self.message.as_deref() {
            Some(message) if !message.trim().is_empty() => message.to_string(),
            _ => format!("authentication rejected (status: {})", self.status),
        }
    }
}

/// A push addressed to a channel. Keeps the whole envelope so consumers can
/// read fields beyond `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelPush {
    pub channel: String,
    pub envelope: Value,
}

impl ChannelPush {
    pub fn new(channel: impl Into<String>, envelope: Value) -> Self {
        Self {
            channel: channel.into(),
            envelope,
        }
    }

    /// The `type` field of the envelope, if present.
    pub fn kind(&self) -> Option<&str> {
        self.envelope.get("type").and_then(Value::as_str)
    }

    /// The `data` field when present, otherwise the envelope itself.
    pub fn payload(&self) -> &Value {
        match self.envelope.get("data") {
            Some(data) => data,
            None => &self.envelope,
        }
    }
}

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    AuthResponse(AuthResponse),
    ChannelPush(ChannelPush),
    /// Neither an auth response nor addressed to a channel. Dropped by the client.
    Unrecognized { kind: Option<String> },
}

impl ServerFrame {
    /// Parse and classify a text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        Self::classify(value)
    }

    /// Classify an already-decoded JSON value.
    pub fn classify(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(object) = value else {
            return Err(ProtocolError::NotAnObject);
        };

        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string);

        if kind.as_deref() == Some(AUTH_RESPONSE_TYPE) {
            let response = auth_response_from(&object)?;
            return Ok(ServerFrame::AuthResponse(response));
        }

        match object.get("channel").and_then(Value::as_str) {
            Some(channel) => {
                let channel = channel.to_string();
                Ok(ServerFrame::ChannelPush(ChannelPush {
                    channel,
                    envelope: Value::Object(object),
                }))
            }
            None => Ok(ServerFrame::Unrecognized { kind }),
        }
    }
}

fn auth_response_from(object: &Map<String, Value>) -> Result<AuthResponse, ProtocolError> {
    serde_json::from_value(Value::Object(object.clone()))
        .map_err(|e| ProtocolError::InvalidField(format!("auth_response: {}", e)))
}
