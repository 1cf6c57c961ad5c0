//! Realtime channel subscriptions over one shared WebSocket.
//!
//! - [`ConnectionManager`]: owns the socket, authentication, reconnects and
//!   the channel registry.
//! - [`ChannelData`]: per-feature initial fetch reconciled with live pushes.
//! - `hooks` (feature `dioxus`): provider component and `use_*` hooks.

pub mod backoff;
pub mod channel_data;
pub mod manager;
pub mod registry;
pub mod state;
pub mod transport;

#[cfg(feature = "dioxus")]
pub mod hooks;

pub use backoff::ReconnectPolicy;
pub use channel_data::{
    ChannelData, ChannelDataOptions, ChannelSnapshot, DEFAULT_SUBSCRIBE_DEBOUNCE,
    FETCH_ERROR_MESSAGE,
};
pub use manager::{ConnectionManager, Subscription};
pub use registry::{ChannelCallback, SubscriberId};
pub use state::ConnectionState;
pub use transport::{default_connector, Connector, EventSink, SocketCommand, SocketEvent};

#[cfg(feature = "dioxus")]
pub use hooks::{
    use_channel_data, use_connection_status, use_realtime, RealtimeProvider, UseChannelData,
};
