//! Dioxus bindings for the realtime client.
//!
//! Components never touch the socket. [`RealtimeProvider`] owns the single
//! [`ConnectionManager`]; features read channel data through
//! [`use_channel_data`], which mirrors a [`ChannelData`] into signals.

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use dioxus::prelude::*;
use serde::de::DeserializeOwned;

use super::channel_data::{ChannelData, ChannelDataOptions};
use super::manager::ConnectionManager;
use super::state::ConnectionState;
use crate::config::RealtimeConfig;
use crate::runtime::MaybeSend;
use crate::session::SessionStore;

/// Provider component that owns the application's realtime connection.
///
/// Uses the `RealtimeConfig` and `SessionStore` from context when an ancestor
/// provides them, otherwise the environment defaults and the persistent
/// session store.
#[component]
pub fn RealtimeProvider(children: Element) -> Element {
    let config = try_use_context::<RealtimeConfig>();
    let session = try_use_context::<SessionStore>();

    let manager = use_hook(move || {
        let config = config.unwrap_or_else(RealtimeConfig::from_env);
        let session =
            session.unwrap_or_else(|| SessionStore::persistent(config.session_key.clone()));
        #[cfg(target_arch = "wasm32")]
        session.listen_for_storage_events();

        let manager = ConnectionManager::with_default_connector(config, session);
        manager.connect();
        manager
    });
    use_context_provider({
        let manager = manager.clone();
        move || manager
    });

    use_drop(move || manager.shutdown());

    rsx! {
        {children}
    }
}

/// The application's connection manager.
pub fn use_realtime() -> ConnectionManager {
    use_context::<ConnectionManager>()
}

/// Connection state, kept in sync with the manager.
pub fn use_connection_status() -> Signal<ConnectionState> {
    let manager = use_realtime();
    let mut status = use_signal(|| manager.status());

    use_hook(move || {
        let mut changes = manager.watch_status();
        spawn(async move {
            while changes.changed().await.is_ok() {
                let next = changes.borrow_and_update().clone();
                status.set(next);
            }
        });
    });

    status
}

/// Signals mirroring one [`ChannelData`].
pub struct UseChannelData<T: 'static> {
    pub data: Signal<Option<T>>,
    pub loading: Signal<bool>,
    pub error: Signal<Option<String>>,
    /// When `false`, `data` may be stale.
    pub is_connected: Signal<bool>,
    mounted: Rc<RefCell<Option<Mounted<T>>>>,
}

impl<T: 'static> Clone for UseChannelData<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data,
            loading: self.loading,
            error: self.error,
            is_connected: self.is_connected,
            mounted: self.mounted.clone(),
        }
    }
}

impl<T> UseChannelData<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Run the fetch again.
    pub fn refresh(&self) {
        if let Some(mounted) = self.mounted.borrow().as_ref() {
            let _ = mounted.handle.refresh();
        }
    }

    /// Ask the server for a fresh stream. Debounced.
    pub fn resubscribe(&self) -> bool {
        self.mounted
            .borrow()
            .as_ref()
            .is_some_and(|mounted| mounted.handle.resubscribe())
    }
}

struct Mounted<T> {
    handle: ChannelData<T>,
    bridge: Task,
}

impl<T> Mounted<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn release(self) {
        self.bridge.cancel();
        self.handle.unmount();
    }
}

/// Channel data for a component: the initial fetch plus live pushes on
/// `channel`. The underlying instance is re-created when `channel` changes
/// and unmounted when the component is dropped.
pub fn use_channel_data<T, F, Fut>(
    channel: impl Into<String>,
    fetch: F,
    options: ChannelDataOptions<T>,
) -> UseChannelData<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<T>>> + MaybeSend + 'static,
{
    let channel = channel.into();
    let manager = use_realtime();

    let data = use_signal(|| None::<T>);
    let loading = use_signal(|| false);
    let error = use_signal(|| None::<String>);
    let is_connected = use_signal(|| false);
    let mounted = use_hook(|| Rc::new(RefCell::new(None::<Mounted<T>>)));

    let stale = mounted
        .borrow()
        .as_ref()
        .map_or(true, |current| current.handle.channel() != channel);
    if stale {
        if let Some(previous) = mounted.borrow_mut().take() {
            previous.release();
        }
        let handle = ChannelData::mount(manager, channel, fetch, options);
        let bridge = spawn(mirror_into_signals(
            handle.clone(),
            data,
            loading,
            error,
            is_connected,
        ));
        *mounted.borrow_mut() = Some(Mounted { handle, bridge });
    }

    use_drop({
        let mounted = mounted.clone();
        move || {
            if let Some(current) = mounted.borrow_mut().take() {
                current.release();
            }
        }
    });

    UseChannelData {
        data,
        loading,
        error,
        is_connected,
        mounted,
    }
}

async fn mirror_into_signals<T>(
    handle: ChannelData<T>,
    mut data: Signal<Option<T>>,
    mut loading: Signal<bool>,
    mut error: Signal<Option<String>>,
    mut is_connected: Signal<bool>,
) where
    T: Clone + Send + Sync + 'static,
{
    let mut changes = handle.watch();
    loop {
        let snapshot = changes.borrow_and_update().clone();
        data.set(snapshot.data);
        loading.set(snapshot.loading);
        error.set(snapshot.error);
        is_connected.set(snapshot.is_connected);
        if changes.changed().await.is_err() {
            break;
        }
    }
}
