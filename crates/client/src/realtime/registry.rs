//! Channel subscription registry.
//!
//! Maps channel names to the callbacks registered by independent features.
//! The registry only keeps the bookkeeping; the connection manager decides
//! when a 0↔1 transition turns into a protocol frame.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use societas_shared::ChannelPush;

/// Callback invoked for every push on a channel.
pub type ChannelCallback = Arc<dyn Fn(&ChannelPush) -> anyhow::Result<()> + Send + Sync>;

/// Identifies one registration, so unsubscribe removes exactly that callback
/// even when the same closure was registered twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

/// Outcome of removing a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Unknown channel or id (already removed).
    NotFound,
    /// Other callbacks remain on the channel.
    Remaining(usize),
    /// That was the last callback; the entry is gone.
    LastRemoved,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    channels: HashMap<String, Vec<(SubscriberId, ChannelCallback)>>,
    next_id: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. Returns its id and whether it is the channel's
    /// first callback.
    pub fn add(&mut self, channel: &str, callback: ChannelCallback) -> (SubscriberId, bool) {
        self.next_id += 1;
        let id = SubscriberId(self.next_id);
        let entry = self.channels.entry(channel.to_string()).or_default();
        entry.push((id, callback));
        (id, entry.len() == 1)
    }

    /// Remove exactly one registration. Empty entries are deleted.
    pub fn remove(&mut self, channel: &str, id: SubscriberId) -> Removal {
        let Some(entry) = self.channels.get_mut(channel) else {
            return Removal::NotFound;
        };
        let Some(pos) = entry.iter().position(|(existing, _)| *existing == id) else {
            return Removal::NotFound;
        };
        entry.remove(pos);

        if entry.is_empty() {
            self.channels.remove(channel);
            Removal::LastRemoved
        } else {
            Removal::Remaining(entry.len())
        }
    }

    /// Snapshot of the callbacks for a channel, in registration order.
    pub fn callbacks(&self, channel: &str) -> Vec<ChannelCallback> {
        self.channels
            .get(channel)
            .map(|entry| entry.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, Vec::len)
    }

    /// Channels with at least one callback, sorted by name.
    pub fn active_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.channels.keys().cloned().collect();
        channels.sort();
        channels
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Invoke every callback with the push, isolating failures.
///
/// A callback that returns an error or panics is logged and skipped; the
/// remaining callbacks still run. Returns the number of failed callbacks.
pub fn dispatch(push: &ChannelPush, callbacks: &[ChannelCallback]) -> usize {
    let mut failures = 0;
    for (index, callback) in callbacks.iter().enumerate() {
        match catch_unwind(AssertUnwindSafe(|| callback(push))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failures += 1;
                crate::log_error!(
                    "Subscriber #{} on channel '{}' failed: {:#}",
                    index,
                    push.channel,
                    e
                );
            }
            Err(_) => {
                failures += 1;
                crate::log_error!(
                    "Subscriber #{} on channel '{}' panicked",
                    index,
                    push.channel
                );
            }
        }
    }
    failures
}
