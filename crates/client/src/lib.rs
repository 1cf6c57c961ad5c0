//! Societas Client - realtime data layer for the Societas dashboard
//!
//! One authenticated WebSocket connection per application, multiplexed
//! into named channels, plus the per-feature data hook that merges an
//! initial HTTP fetch with live pushes. Runs natively (tokio) and in the
//! browser (wasm).

pub mod api_client;
pub mod config;
pub mod error;
pub mod logging;
pub mod realtime;
pub mod runtime;
pub mod session;
pub mod storage;

pub use api_client::ApiClient;
pub use config::RealtimeConfig;
pub use error::RealtimeError;
pub use realtime::{
    ChannelData, ChannelDataOptions, ChannelSnapshot, ConnectionManager, ConnectionState,
    ReconnectPolicy, Subscription,
};
pub use session::{CredentialSource, SessionStore};
pub use societas_shared::{ApiError, ChannelPush};
