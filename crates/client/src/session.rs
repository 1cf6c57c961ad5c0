//! Session credential store.
//!
//! Holds the bearer token the realtime connection authenticates with and
//! publishes every change, so the connection manager can resynchronise when
//! the token is rotated or cleared (including from another browser tab).

use std::sync::Arc;

use tokio::sync::watch;

/// Source of the bearer token plus a stream of changes to it.
pub trait CredentialSource: Send + Sync + 'static {
    /// The current token, if a user is signed in.
    fn token(&self) -> Option<String>;

    /// Receiver that is notified whenever the token changes.
    fn watch(&self) -> watch::Receiver<Option<String>>;
}

/// Process-wide token store keyed by a storage key.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    key: String,
    persistent: bool,
    token: watch::Sender<Option<String>>,
}

impl SessionStore {
    /// A store that lives only in memory (tests, public kiosks).
    pub fn in_memory(key: impl Into<String>) -> Self {
        Self::build(key.into(), false, None)
    }

    /// A store backed by [`crate::storage`], seeded with the stored token.
    pub fn persistent(key: impl Into<String>) -> Self {
        let key = key.into();
        let initial = crate::storage::load(&key);
        Self::build(key, true, initial)
    }

    fn build(key: String, persistent: bool, initial: Option<String>) -> Self {
        let (token, _) = watch::channel(normalize(initial));
        Self {
            inner: Arc::new(SessionInner {
                key,
                persistent,
                token,
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Store a new token (login or rotation).
    pub fn set_token(&self, token: impl Into<String>) {
        let token = normalize(Some(token.into()));
        if self.inner.persistent {
            match token.as_deref() {
                Some(value) => {
                    if !crate::storage::save(&self.inner.key, value) {
                        crate::log_warn!("Failed to persist session token '{}'", self.inner.key);
                    }
                }
                None => crate::storage::remove(&self.inner.key),
            }
        }
        self.publish(token);
    }

    /// Forget the token (logout).
    pub fn clear(&self) {
        if self.inner.persistent {
            crate::storage::remove(&self.inner.key);
        }
        self.publish(None);
    }

    /// Record a change made to shared storage by someone else, without
    /// writing it back.
    pub fn apply_external_change(&self, token: Option<String>) {
        self.publish(normalize(token));
    }

    fn publish(&self, token: Option<String>) {
        let changed = self.inner.token.send_if_modified(|current| {
            if *current == token {
                false
            } else {
                *current = token;
                true
            }
        });
        if changed {
            crate::log_info!("Session token for '{}' changed", self.inner.key);
        }
    }

    /// Follow `storage` events so a login, logout or token rotation in
    /// another tab reaches this tab's connection.
    #[cfg(target_arch = "wasm32")]
    pub fn listen_for_storage_events(&self) {
        use wasm_bindgen::prelude::*;

        let Some(window) = web_sys::window() else {
            return;
        };
        let store = self.clone();
        let listener = Closure::wrap(Box::new(move |e: web_sys::StorageEvent| {
            if e.key().as_deref() == Some(store.key()) {
                store.apply_external_change(e.new_value());
            }
        }) as Box<dyn FnMut(web_sys::StorageEvent)>);
        if window
            .add_event_listener_with_callback("storage", listener.as_ref().unchecked_ref())
            .is_err()
        {
            crate::log_warn!("Could not listen for storage events");
        }
        listener.forget();
    }
}

impl CredentialSource for SessionStore {
    fn token(&self) -> Option<String> {
        self.inner.token.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<String>> {
        self.inner.token.subscribe()
    }
}

fn normalize(token: Option<String>) -> Option<String> {
    token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
