//! The shared realtime connection.
//!
//! One [`ConnectionManager`] exists per application. It owns the socket, the
//! connection state machine, the authentication handshake and the channel
//! registry that multiplexes independent features over the one socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_channel::mpsc::unbounded;
use futures_util::future::AbortHandle;
use societas_shared::{
    is_normal_close, AuthResponse, ChannelPush, ClientFrame, ServerFrame, CLOSE_NORMAL,
};
use tokio::sync::watch;

use super::backoff::ReconnectPolicy;
use super::registry::{dispatch, Removal, SubscriberId, SubscriptionRegistry};
use super::state::ConnectionState;
use super::transport::{Connector, EventSink, SocketEvent, SocketEventHandler, SocketHandle};
use crate::config::RealtimeConfig;
use crate::error::{RealtimeError, Result};
use crate::runtime;
use crate::session::CredentialSource;

/// Cheap, cloneable handle to the application's realtime connection.
///
/// Construct exactly one per application (at startup) and pass clones to every
/// consumer; call [`ConnectionManager::shutdown`] once at application exit.
/// Tests construct a fresh one each.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: RealtimeConfig,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialSource>,
    shared: Mutex<Shared>,
    status: watch::Sender<ConnectionState>,
    self_ref: Weak<ManagerInner>,
}

#[derive(Default)]
struct Shared {
    state: ConnectionState,
    attempts: u32,
    supported_channels: Vec<String>,
    socket: Option<SocketHandle>,
    /// Token sent in the handshake of the current socket.
    handshake_token: Option<String>,
    next_generation: u64,
    /// Pending reconnect (backoff or token resync).
    timer: Option<AbortHandle>,
    /// Bumped whenever the pending reconnect is cancelled or replaced.
    timer_generation: u64,
    credential_watch: Option<AbortHandle>,
    registry: SubscriptionRegistry,
    /// Set by connect/reconnect, cleared by disconnect/shutdown.
    wants_connection: bool,
    torn_down: bool,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.socket.as_ref().map(SocketHandle::generation) == Some(generation)
    }

    fn cancel_timer(&mut self) {
        self.timer_generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn send_frame(&self, frame: &ClientFrame) -> Result<()> {
        let socket = self.socket.as_ref().ok_or(RealtimeError::NotConnected)?;
        let text = frame.to_text()?;
        crate::log_debug!("Realtime send: {}", frame);
        socket.send_text(text)
    }
}

impl ConnectionManager {
    pub fn new(
        config: RealtimeConfig,
        connector: impl Connector,
        credentials: impl CredentialSource,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionState::Disconnected);
        let inner = Arc::new_cyclic(|self_ref| ManagerInner {
            config,
            connector: Arc::new(connector),
            credentials: Arc::new(credentials),
            shared: Mutex::new(Shared::default()),
            status,
            self_ref: self_ref.clone(),
        });
        Self { inner }
    }

    /// Manager using the platform's default socket implementation.
    pub fn with_default_connector(
        config: RealtimeConfig,
        credentials: impl CredentialSource,
    ) -> Self {
        Self::new(config, super::transport::default_connector(), credentials)
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    /// Open the socket unless one is already open or opening.
    ///
    /// Settles in `Error` without opening anything once the attempt cap has
    /// been reached; use [`ConnectionManager::reconnect`] to start over.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Close the socket normally. Never triggers an automatic reconnect.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Start over: drop any socket and pending retry, reset the attempt
    /// counter, then connect. This is the recovery path out of `Error` and
    /// `AuthFailed`.
    pub fn reconnect(&self) {
        {
            let mut shared = self.inner.lock();
            if shared.torn_down {
                return;
            }
            shared.cancel_timer();
            if let Some(socket) = shared.socket.take() {
                socket.close(CLOSE_NORMAL, "client reconnect");
            }
            shared.attempts = 0;
            self.inner.set_state(&mut shared, ConnectionState::Disconnected);
        }
        self.inner.connect();
    }

    /// Tear the manager down. Idempotent; later `connect()` calls do nothing.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn status(&self) -> ConnectionState {
        self.inner.lock().state.clone()
    }

    /// Receiver notified on every state transition.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.inner.status.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.lock().state.is_authenticated()
    }

    /// Connect attempts made since the last successful authentication.
    pub fn attempts(&self) -> u32 {
        self.inner.lock().attempts
    }

    /// Channels the server declared in its last successful auth response.
    pub fn supported_channels(&self) -> Vec<String> {
        self.inner.lock().supported_channels.clone()
    }

    /// Advisory: subscriptions to unknown channels are still sent.
    pub fn is_channel_supported(&self, channel: &str) -> bool {
        self.inner
            .lock()
            .supported_channels
            .iter()
            .any(|c| c == channel)
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner.lock().registry.subscriber_count(channel)
    }

    pub fn active_channels(&self) -> Vec<String> {
        self.inner.lock().registry.active_channels()
    }

    /// Register `callback` for pushes on `channel`.
    ///
    /// The first callback on a channel sends a `subscribe` frame right away
    /// when authenticated; otherwise the post-authentication resync sends it.
    /// The returned [`Subscription`] unsubscribes when told to or dropped.
    pub fn subscribe<F>(&self, channel: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&ChannelPush) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let channel = channel.into();
        let id = {
            let mut shared = self.inner.lock();
            let (id, first) = shared.registry.add(&channel, Arc::new(callback));
            if first && shared.state.is_authenticated() {
                if let Err(e) = shared.send_frame(&ClientFrame::subscribe(channel.as_str())) {
                    crate::log_warn!("Failed to subscribe to '{}': {}", channel, e);
                }
            }
            id
        };
        crate::log_debug!("Subscribed to '{}' ({:?})", channel, id);

        Subscription {
            channel,
            id,
            manager: Arc::downgrade(&self.inner),
            active: AtomicBool::new(true),
        }
    }
}

impl ManagerInner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn policy(&self) -> &ReconnectPolicy {
        &self.config.reconnect
    }

    fn set_state(&self, shared: &mut Shared, next: ConnectionState) {
        if shared.state != next {
            crate::log_info!("Realtime connection: {} -> {}", shared.state, next);
        }
        shared.state = next.clone();
        self.status.send_replace(next);
    }

    fn connect(&self) {
        self.open_socket(None);
    }

    /// Open a socket. `timer` is the generation of the reconnect timer that
    /// fired, if any; a cancelled or replaced timer opens nothing.
    fn open_socket(&self, timer: Option<u64>) {
        let (generation, commands) = {
            let mut shared = self.lock();
            if let Some(armed) = timer {
                if shared.timer_generation != armed || !shared.wants_connection {
                    crate::log_debug!("Ignoring superseded reconnect timer");
                    return;
                }
                shared.timer = None;
            }
            if shared.torn_down || shared.state.is_active() {
                return;
            }
            shared.wants_connection = true;

            if self.policy().is_exhausted(shared.attempts) {
                let reason = format!(
                    "Max reconnect attempts ({}) reached",
                    self.policy().max_attempts
                );
                self.set_state(&mut shared, ConnectionState::Error { reason });
                return;
            }

            shared.cancel_timer();
            shared.attempts += 1;
            shared.next_generation += 1;
            let generation = shared.next_generation;

            let (tx, rx) = unbounded();
            if let Some(previous) = shared.socket.replace(SocketHandle::new(generation, tx)) {
                previous.close(CLOSE_NORMAL, "replaced");
            }
            shared.handshake_token = None;
            crate::log_info!(
                "Opening realtime socket #{} to {} (attempt {})",
                generation,
                self.config.ws_url,
                shared.attempts
            );
            self.set_state(&mut shared, ConnectionState::Connecting);
            (generation, rx)
        };

        // Outside the lock: a connector may report events synchronously.
        let handler: Weak<dyn SocketEventHandler> = self.self_ref.clone();
        self.connector.open(
            &self.config.ws_url,
            EventSink::new(generation, handler),
            commands,
        );
        self.ensure_credential_watch();
    }

    fn disconnect(&self) {
        let mut shared = self.lock();
        shared.wants_connection = false;
        shared.cancel_timer();
        if let Some(socket) = shared.socket.take() {
            socket.close(CLOSE_NORMAL, "client disconnect");
        }
        self.set_state(&mut shared, ConnectionState::Disconnected);
    }

    fn shutdown(&self) {
        let mut shared = self.lock();
        if shared.torn_down {
            return;
        }
        shared.torn_down = true;
        shared.wants_connection = false;
        shared.cancel_timer();
        if let Some(watch) = shared.credential_watch.take() {
            watch.abort();
        }
        if let Some(socket) = shared.socket.take() {
            socket.close(CLOSE_NORMAL, "client shutdown");
        }
        self.set_state(&mut shared, ConnectionState::Disconnected);
        crate::log_info!("Realtime connection shut down");
    }

    fn handle_event(&self, generation: u64, event: SocketEvent) {
        let mut shared = self.lock();
        if !shared.is_current(generation) {
            crate::log_debug!("Ignoring {:?} from replaced socket #{}", event, generation);
            return;
        }

        match event {
            SocketEvent::Open => {
                self.set_state(&mut shared, ConnectionState::Connected);
                let token = self.credentials.token();
                let frame = ClientFrame::authenticate(token.clone());
                if token.is_none() {
                    crate::log_info!("No session token, authenticating as public");
                }
                shared.handshake_token = token;
                if let Err(e) = shared.send_frame(&frame) {
                    crate::log_error!("Failed to send authentication: {}", e);
                }
            }
            SocketEvent::Error(reason) => {
                crate::log_error!("Realtime socket #{} error: {}", generation, reason);
                self.set_state(&mut shared, ConnectionState::Error { reason });
            }
            SocketEvent::Closed { code, reason } => {
                shared.socket = None;
                shared.handshake_token = None;
                self.set_state(&mut shared, ConnectionState::Disconnected);
                if is_normal_close(code) {
                    crate::log_info!("Realtime socket #{} closed normally", generation);
                } else if !shared.torn_down {
                    crate::log_warn!(
                        "Realtime socket #{} closed abnormally ({}): {}",
                        generation,
                        code,
                        reason
                    );
                    self.schedule_reconnect(&mut shared);
                }
            }
            SocketEvent::Message(text) => {
                drop(shared);
                self.handle_text(generation, &text);
            }
        }
    }

    fn handle_text(&self, generation: u64, text: &str) {
        let frame = match ServerFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                crate::log_warn!("Dropping malformed realtime frame: {} ({})", e, text);
                return;
            }
        };

        match frame {
            ServerFrame::AuthResponse(response) => self.handle_auth_response(generation, response),
            ServerFrame::ChannelPush(push) => {
                let callbacks = {
                    let shared = self.lock();
                    if !shared.is_current(generation) {
                        return;
                    }
                    shared.registry.callbacks(&push.channel)
                };
                if callbacks.is_empty() {
                    crate::log_debug!("No subscribers for '{}', dropping push", push.channel);
                    return;
                }
                dispatch(&push, &callbacks);
            }
            ServerFrame::Unrecognized { kind } => {
                crate::log_debug!("Ignoring realtime frame of type {:?}", kind);
            }
        }
    }

    fn handle_auth_response(&self, generation: u64, response: AuthResponse) {
        let mut shared = self.lock();
        if !shared.is_current(generation) {
            return;
        }

        if !response.is_success() {
            let reason = response.failure_reason();
            crate::log_warn!("Realtime authentication failed: {}", reason);
            self.set_state(&mut shared, ConnectionState::AuthFailed { reason });
            return;
        }

        shared.supported_channels = response.available_channels.unwrap_or_default();
        shared.attempts = 0;
        self.set_state(&mut shared, ConnectionState::Authenticated);

        // Subscriptions do not survive a reconnect server-side; resend them all.
        for channel in shared.registry.active_channels() {
            if let Err(e) = shared.send_frame(&ClientFrame::subscribe(channel.as_str())) {
                crate::log_warn!("Failed to resubscribe to '{}': {}", channel, e);
            }
        }
    }

    fn schedule_reconnect(&self, shared: &mut Shared) {
        let retry = shared.attempts.saturating_sub(1);
        let delay = self.policy().delay_for_attempt(retry);
        crate::log_info!(
            "Reconnecting in {}ms (attempt {} of {})",
            delay.as_millis(),
            shared.attempts + 1,
            self.policy().max_attempts
        );
        self.arm_timer(shared, delay);
    }

    fn arm_timer(&self, shared: &mut Shared, delay: std::time::Duration) {
        shared.cancel_timer();
        let armed = shared.timer_generation;
        let weak = self.self_ref.clone();
        shared.timer = Some(runtime::spawn_abortable(async move {
            runtime::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.open_socket(Some(armed));
            }
        }));
    }

    fn ensure_credential_watch(&self) {
        let mut shared = self.lock();
        if shared.torn_down || shared.credential_watch.is_some() {
            return;
        }
        let mut changes = self.credentials.watch();
        changes.borrow_and_update();
        let weak = self.self_ref.clone();
        shared.credential_watch = Some(runtime::spawn_abortable(async move {
            while changes.changed().await.is_ok() {
                let token = changes.borrow_and_update().clone();
                match weak.upgrade() {
                    Some(inner) => inner.on_credentials_changed(token),
                    None => break,
                }
            }
        }));
    }

    fn on_credentials_changed(&self, token: Option<String>) {
        let mut shared = self.lock();
        if shared.torn_down || !shared.wants_connection {
            return;
        }
        match shared.state {
            // The pending handshake reads the token when the socket opens.
            ConnectionState::Connecting => return,
            ConnectionState::Connected | ConnectionState::Authenticated
                if shared.handshake_token == token =>
            {
                return
            }
            _ => {}
        }

        crate::log_info!("Session credentials changed, resynchronising realtime connection");
        if let Some(socket) = shared.socket.take() {
            socket.close(CLOSE_NORMAL, "credentials changed");
        }
        shared.handshake_token = None;
        shared.attempts = 0;
        self.set_state(&mut shared, ConnectionState::Disconnected);
        let delay = self.config.token_resync_delay;
        self.arm_timer(&mut shared, delay);
    }

    fn remove_subscriber(&self, channel: &str, id: SubscriberId) {
        let mut shared = self.lock();
        match shared.registry.remove(channel, id) {
            Removal::LastRemoved => {
                crate::log_debug!("Last subscriber left '{}'", channel);
                if shared.state.is_authenticated() {
                    if let Err(e) = shared.send_frame(&ClientFrame::unsubscribe(channel)) {
                        crate::log_warn!("Failed to unsubscribe from '{}': {}", channel, e);
                    }
                }
            }
            Removal::Remaining(_) | Removal::NotFound => {}
        }
    }
}

impl SocketEventHandler for ManagerInner {
    fn on_socket_event(&self, generation: u64, event: SocketEvent) {
        self.handle_event(generation, event);
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        let shared = self.shared.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = shared.timer.take() {
            timer.abort();
        }
        if let Some(watch) = shared.credential_watch.take() {
            watch.abort();
        }
        if let Some(socket) = shared.socket.take() {
            socket.close(CLOSE_NORMAL, "client dropped");
        }
    }
}

/// One registration on a channel. Unsubscribes exactly once, on
/// [`Subscription::unsubscribe`] or on drop.
#[must_use = "dropping a Subscription unsubscribes"]
pub struct Subscription {
    channel: String,
    id: SubscriberId,
    manager: Weak<ManagerInner>,
    active: AtomicBool,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.manager.upgrade() {
            inner.remove_subscriber(&self.channel, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
