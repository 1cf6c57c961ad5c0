//! Per-feature channel data: an initial fetch merged with live pushes.
//!
//! A [`ChannelData`] instance belongs to one UI feature. On mount it fetches
//! the current value once and, independently, subscribes to the feature's
//! channel as soon as the shared connection is authenticated. Pushes replace
//! the value (last write wins); `loading` only tracks fetches.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_channel::oneshot;
use futures_util::future::AbortHandle;
use serde::de::DeserializeOwned;
use societas_shared::ChannelPush;
use tokio::sync::watch;

use super::manager::{ConnectionManager, Subscription};
use super::state::ConnectionState;
use crate::runtime::{self, BoxFuture, Instant, MaybeSend};

/// Message exposed when a fetch fails. The cause is logged, not shown.
pub const FETCH_ERROR_MESSAGE: &str = "Failed to load data";

/// Default minimum spacing between two subscribe attempts of one instance.
pub const DEFAULT_SUBSCRIBE_DEBOUNCE: Duration = Duration::from_millis(1000);

pub type FetchFn<T> = Arc<dyn Fn() -> BoxFuture<anyhow::Result<Option<T>>> + Send + Sync>;
pub type ProcessFn<T> = Arc<dyn Fn(&ChannelPush) -> Option<T> + Send + Sync>;

/// Options for [`ChannelData::mount`].
pub struct ChannelDataOptions<T> {
    /// Do not fetch on mount; data arrives from pushes or `refresh()`.
    pub skip_initial_fetch: bool,
    /// Map a push to the consumer's value. `None` leaves the data untouched.
    /// Defaults to deserializing the push payload.
    pub process_data: Option<ProcessFn<T>>,
    pub subscribe_debounce: Duration,
}

impl<T> Default for ChannelDataOptions<T> {
    fn default() -> Self {
        Self {
            skip_initial_fetch: false,
            process_data: None,
            subscribe_debounce: DEFAULT_SUBSCRIBE_DEBOUNCE,
        }
    }
}

impl<T> ChannelDataOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_initial_fetch(mut self, skip: bool) -> Self {
        self.skip_initial_fetch = skip;
        self
    }

    pub fn process_data<F>(mut self, process: F) -> Self
    where
        F: Fn(&ChannelPush) -> Option<T> + Send + Sync + 'static,
    {
        self.process_data = Some(Arc::new(process));
        self
    }

    pub fn subscribe_debounce(mut self, debounce: Duration) -> Self {
        self.subscribe_debounce = debounce;
        self
    }
}

/// Point-in-time view of a [`ChannelData`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSnapshot<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<String>,
    /// Live updates are flowing. When `false`, `data` may be stale.
    pub is_connected: bool,
    /// When `data` last changed.
    pub updated_at: Option<DateTime<Utc>>,
}

impl<T> Default for ChannelSnapshot<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
            is_connected: false,
            updated_at: None,
        }
    }
}

/// Handle to one consumer's channel data. Clones share the instance; the
/// instance unmounts when [`ChannelData::unmount`] is called or the last
/// clone is dropped.
pub struct ChannelData<T> {
    inner: Arc<HookInner<T>>,
}

impl<T> Clone for ChannelData<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct HookInner<T> {
    channel: String,
    manager: ConnectionManager,
    fetch: FetchFn<T>,
    process: ProcessFn<T>,
    debounce: Duration,
    state: Mutex<HookState<T>>,
    snapshot: watch::Sender<ChannelSnapshot<T>>,
    self_ref: Weak<HookInner<T>>,
}

struct HookState<T> {
    data: Option<T>,
    error: Option<String>,
    updated_at: Option<DateTime<Utc>>,
    fetches_in_flight: usize,
    initial_fetch_done: bool,
    subscription: Option<Subscription>,
    last_subscribe_attempt: Option<Instant>,
    mounted: bool,
    status_watch: Option<AbortHandle>,
    /// Deferred subscribe after a debounced attempt.
    pending_retry: Option<AbortHandle>,
}

impl<T> HookState<T> {
    fn new() -> Self {
        Self {
            data: None,
            error: None,
            updated_at: None,
            fetches_in_flight: 0,
            initial_fetch_done: false,
            subscription: None,
            last_subscribe_attempt: None,
            mounted: false,
            status_watch: None,
            pending_retry: None,
        }
    }
}

impl<T> ChannelData<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Mount a consumer of `channel`.
    ///
    /// `fetch` returns the initial value (or `None`); it runs once now unless
    /// `skip_initial_fetch` is set, and again on every [`ChannelData::refresh`].
    pub fn mount<F, Fut>(
        manager: ConnectionManager,
        channel: impl Into<String>,
        fetch: F,
        options: ChannelDataOptions<T>,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<T>>> + MaybeSend + 'static,
    {
        let channel = channel.into();
        let fetch: FetchFn<T> = Arc::new(move || runtime::boxed(fetch()));
        let process: ProcessFn<T> = match options.process_data {
            Some(process) => process,
            None => Arc::new(deserialize_payload::<T>),
        };
        // Taken before the first check: a transition in between still wakes the watcher.
        let status = manager.watch_status();
        let is_connected = manager.is_authenticated();

        let (snapshot, _) = watch::channel(ChannelSnapshot {
            is_connected,
            ..ChannelSnapshot::default()
        });

        let inner = Arc::new_cyclic(|self_ref| HookInner {
            channel,
            manager,
            fetch,
            process,
            debounce: options.subscribe_debounce,
            state: Mutex::new(HookState::new()),
            snapshot,
            self_ref: self_ref.clone(),
        });

        inner.lock().mounted = true;
        crate::log_debug!("Mounted channel data for '{}'", inner.channel);

        if !options.skip_initial_fetch {
            inner.start_fetch(true, None);
        }
        inner.sync_subscription();
        inner.watch_connection(status);

        Self { inner }
    }

    /// Fetch again, regardless of earlier fetches. The fetch starts
    /// immediately; awaiting the returned future waits for its result to be
    /// applied.
    pub fn refresh(&self) -> impl Future<Output = ()> + Send + 'static {
        let (done_tx, done_rx) = oneshot::channel();
        self.inner.start_fetch(false, Some(done_tx));
        async move {
            let _ = done_rx.await;
        }
    }
}

impl<T> ChannelData<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    /// Replace the subscription with a fresh one so the server resends its
    /// authoritative state. Subject to the same debounce as mount-time
    /// subscription; returns whether it went through.
    pub fn resubscribe(&self) -> bool {
        self.inner.resubscribe()
    }

    /// Stop receiving updates. Idempotent; late fetch results are discarded.
    pub fn unmount(&self) {
        self.inner.unmount();
    }

    pub fn snapshot(&self) -> ChannelSnapshot<T> {
        self.inner.snapshot.borrow().clone()
    }

    /// Receiver notified whenever the snapshot changes.
    pub fn watch(&self) -> watch::Receiver<ChannelSnapshot<T>> {
        self.inner.snapshot.subscribe()
    }

    pub fn data(&self) -> Option<T> {
        self.inner.lock().data.clone()
    }

    pub fn loading(&self) -> bool {
        self.inner.lock().fetches_in_flight > 0
    }

    pub fn error(&self) -> Option<String> {
        self.inner.lock().error.clone()
    }

    /// The shared connection is authenticated, so pushes can arrive.
    pub fn is_connected(&self) -> bool {
        self.inner.manager.is_authenticated()
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.lock().subscription.is_some()
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.lock().mounted
    }
}

impl<T> HookInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn lock(&self) -> MutexGuard<'_, HookState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &HookState<T>) {
        self.snapshot.send_replace(ChannelSnapshot {
            data: state.data.clone(),
            loading: state.fetches_in_flight > 0,
            error: state.error.clone(),
            is_connected: self.manager.is_authenticated(),
            updated_at: state.updated_at,
        });
    }

    fn start_fetch(&self, initial: bool, done: Option<oneshot::Sender<()>>) {
        {
            let mut state = self.lock();
            if !state.mounted || (initial && state.initial_fetch_done) {
                return;
            }
            state.fetches_in_flight += 1;
            self.publish(&state);
        }

        let pending = (self.fetch)();
        let weak = self.self_ref.clone();
        runtime::spawn(async move {
            let result = pending.await;
            if let Some(inner) = weak.upgrade() {
                inner.finish_fetch(initial, result);
            }
            if let Some(done) = done {
                let _ = done.send(());
            }
        });
    }

    fn finish_fetch(&self, initial: bool, result: anyhow::Result<Option<T>>) {
        let mut state = self.lock();
        if !state.mounted {
            crate::log_debug!("Discarding fetch result for unmounted '{}'", self.channel);
            return;
        }

        state.fetches_in_flight = state.fetches_in_flight.saturating_sub(1);
        if initial {
            state.initial_fetch_done = true;
        }
        match result {
            Ok(Some(value)) => {
                state.data = Some(value);
                state.error = None;
                state.updated_at = Some(Utc::now());
            }
            Ok(None) => {}
            Err(e) => {
                crate::log_error!("Fetching '{}' failed: {:#}", self.channel, e);
                state.error = Some(FETCH_ERROR_MESSAGE.to_string());
            }
        }
        self.publish(&state);
    }

    fn on_push(&self, push: &ChannelPush) {
        let Some(value) = (self.process)(push) else {
            return;
        };
        let mut state = self.lock();
        if !state.mounted {
            return;
        }
        state.data = Some(value);
        state.updated_at = Some(Utc::now());
        self.publish(&state);
    }

    /// Subscribe if authenticated and not yet subscribed.
    fn sync_subscription(&self) {
        let mut state = self.lock();
        if !state.mounted || state.subscription.is_some() || !self.manager.is_authenticated() {
            return;
        }
        self.try_subscribe(&mut state, true);
    }

    fn resubscribe(&self) -> bool {
        let mut state = self.lock();
        if !state.mounted || !self.manager.is_authenticated() || self.debounced(&state) {
            return false;
        }
        if let Some(previous) = state.subscription.take() {
            previous.unsubscribe();
        }
        self.try_subscribe(&mut state, false)
    }

    fn debounced(&self, state: &HookState<T>) -> bool {
        state
            .last_subscribe_attempt
            .is_some_and(|last| last.elapsed() < self.debounce)
    }

    fn try_subscribe(&self, state: &mut HookState<T>, retry_later: bool) -> bool {
        if let Some(last) = state.last_subscribe_attempt {
            let elapsed = last.elapsed();
            if elapsed < self.debounce {
                crate::log_debug!(
                    "Subscribe to '{}' suppressed, last attempt {}ms ago",
                    self.channel,
                    elapsed.as_millis()
                );
                if retry_later {
                    self.schedule_retry(state, self.debounce - elapsed);
                }
                return false;
            }
        }

        state.last_subscribe_attempt = Some(Instant::now());
        let weak = self.self_ref.clone();
        let subscription = self.manager.subscribe(self.channel.clone(), move |push| {
            if let Some(inner) = weak.upgrade() {
                inner.on_push(push);
            }
            Ok(())
        });
        state.subscription = Some(subscription);
        self.publish(state);
        true
    }

    fn schedule_retry(&self, state: &mut HookState<T>, after: Duration) {
        if state.pending_retry.is_some() {
            return;
        }
        let weak = self.self_ref.clone();
        state.pending_retry = Some(runtime::spawn_abortable(async move {
            runtime::sleep(after).await;
            if let Some(inner) = weak.upgrade() {
                inner.lock().pending_retry = None;
                inner.sync_subscription();
            }
        }));
    }

    fn watch_connection(&self, mut status: watch::Receiver<ConnectionState>) {
        let weak = self.self_ref.clone();
        let handle = runtime::spawn_abortable(async move {
            while status.changed().await.is_ok() {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.sync_subscription();
                let state = inner.lock();
                if state.mounted {
                    inner.publish(&state);
                }
            }
        });

        let mut state = self.lock();
        if state.mounted {
            state.status_watch = Some(handle);
        } else {
            handle.abort();
        }
    }

    fn unmount(&self) {
        let mut state = self.lock();
        if !state.mounted {
            return;
        }
        state.mounted = false;
        if let Some(watch) = state.status_watch.take() {
            watch.abort();
        }
        if let Some(retry) = state.pending_retry.take() {
            retry.abort();
        }
        if let Some(subscription) = state.subscription.take() {
            subscription.unsubscribe();
        }
        crate::log_debug!("Unmounted channel data for '{}'", self.channel);
    }
}

impl<T> Drop for HookInner<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.mounted = false;
        if let Some(watch) = state.status_watch.take() {
            watch.abort();
        }
        if let Some(retry) = state.pending_retry.take() {
            retry.abort();
        }
        if let Some(subscription) = state.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

/// Default push mapping: the push payload deserialized into `T`.
fn deserialize_payload<T: DeserializeOwned>(push: &ChannelPush) -> Option<T> {
    let payload = push.payload();
    if payload.is_null() {
        return None;
    }
    match serde_json::from_value(payload.clone()) {
        Ok(value) => Some(value),
        Err(e) => {
            crate::log_warn!("Push on '{}' did not match the expected shape: {}", push.channel, e);
            None
        }
    }
}
