//! Channel data instances: initial fetch reconciled with live pushes.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{advance, settle, Harness};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Deserialize;
use serde_json::json;
use societas_client::realtime::FETCH_ERROR_MESSAGE;
use societas_client::{ChannelData, ChannelDataOptions};

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Count {
    count: u32,
}

type FetchResult = anyhow::Result<Option<Count>>;

/// A fetch that counts its calls, waits `delay_ms`, then yields `result()`.
fn fetch_after(
    delay_ms: u64,
    result: fn() -> FetchResult,
) -> (
    Arc<AtomicUsize>,
    impl Fn() -> BoxFuture<'static, FetchResult> + Send + Sync + 'static,
) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let fetch = move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            result()
        }
        .boxed()
    };
    (calls, fetch)
}

fn five() -> FetchResult {
    Ok(Some(Count { count: 5 }))
}

fn nothing() -> FetchResult {
    Ok(None)
}

fn failure() -> FetchResult {
    Err(anyhow::anyhow!("HTTP 500: upstream unavailable"))
}

#[tokio::test(start_paused = true)]
async fn initial_fetch_populates_data() {
    let h = Harness::new();
    let (calls, fetch) = fetch_after(0, five);

    let hook = ChannelData::mount(h.manager.clone(), "metrics", fetch, ChannelDataOptions::new());
    assert!(hook.loading());

    settle().await;
    let snapshot = hook.snapshot();
    assert_eq!(snapshot.data, Some(Count { count: 5 }));
    assert!(!snapshot.loading);
    assert_eq!(snapshot.error, None);
    assert!(snapshot.updated_at.is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_fetch_result_leaves_data_unset() {
    let h = Harness::new();
    let (_, fetch) = fetch_after(0, nothing);

    let hook = ChannelData::mount(h.manager.clone(), "metrics", fetch, ChannelDataOptions::new());
    settle().await;

    assert_eq!(hook.data(), None);
    assert!(!hook.loading());
    assert_eq!(hook.error(), None);
}

#[tokio::test(start_paused = true)]
async fn push_during_fetch_sets_data_but_not_loading() {
    let h = Harness::new();
    let socket = h.authenticate(&["metrics"]);
    let (_, fetch) = fetch_after(1_000, five);

    let hook = ChannelData::mount(h.manager.clone(), "metrics", fetch, ChannelDataOptions::new());
    assert_eq!(socket.subscribes(), vec!["metrics"]);

    socket.push("metrics", json!({"count": 9}));
    assert_eq!(hook.data(), Some(Count { count: 9 }));
    assert!(hook.loading());

    advance(1_001).await;
    assert!(!hook.loading());
    // Last write wins: the fetch resolved after the push.
    assert_eq!(hook.data(), Some(Count { count: 5 }));

    socket.push("metrics", json!({"count": 11}));
    assert_eq!(hook.data(), Some(Count { count: 11 }));
}

#[tokio::test(start_paused = true)]
async fn failed_fetch_sets_generic_error() {
    let h = Harness::new();
    let (_, fetch) = fetch_after(10, failure);

    let hook = ChannelData::mount(h.manager.clone(), "metrics", fetch, ChannelDataOptions::new());
    advance(11).await;

    let snapshot = hook.snapshot();
    assert_eq!(snapshot.error.as_deref(), Some(FETCH_ERROR_MESSAGE));
    assert_eq!(snapshot.data, None);
    assert!(!snapshot.loading);
}

#[tokio::test(start_paused = true)]
async fn successful_refresh_clears_error() {
    let h = Harness::new();
    let attempt = Arc::new(AtomicUsize::new(0));
    let counter = attempt.clone();
    let fetch = move || {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                failure()
            } else {
                five()
            }
        }
    };

    let hook = ChannelData::mount(h.manager.clone(), "metrics", fetch, ChannelDataOptions::new());
    settle().await;
    assert!(hook.error().is_some());

    hook.refresh().await;
    assert_eq!(hook.error(), None);
    assert_eq!(hook.data(), Some(Count { count: 5 }));
}

#[tokio::test(start_paused = true)]
async fn skip_initial_fetch_waits_for_refresh() {
    let h = Harness::new();
    let (calls, fetch) = fetch_after(0, five);

    let hook = ChannelData::mount(
        h.manager.clone(),
        "metrics",
        fetch,
        ChannelDataOptions::new().skip_initial_fetch(true),
    );
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!hook.loading());
    assert_eq!(hook.data(), None);

    hook.refresh().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(hook.data(), Some(Count { count: 5 }));

    hook.refresh().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn subscribes_once_the_connection_authenticates() {
    let h = Harness::new();
    let (_, fetch) = fetch_after(0, nothing);
    let hook = ChannelData::mount(h.manager.clone(), "metrics", fetch, ChannelDataOptions::new());
    settle().await;
    assert!(!hook.is_subscribed());
    assert!(!hook.snapshot().is_connected);

    let socket = h.authenticate(&["metrics"]);
    settle().await;

    assert!(hook.is_subscribed());
    assert!(hook.is_connected());
    assert!(hook.snapshot().is_connected);
    assert_eq!(socket.subscribes(), vec!["metrics"]);

    socket.push("metrics", json!({"count": 3}));
    assert_eq!(hook.data(), Some(Count { count: 3 }));
}

#[tokio::test(start_paused = true)]
async fn subscription_survives_reconnect_without_duplicates() {
    let h = Harness::new();
    let first = h.authenticate(&[]);
    let (_, fetch) = fetch_after(0, nothing);
    let hook = ChannelData::mount(h.manager.clone(), "metrics", fetch, ChannelDataOptions::new());
    settle().await;

    first.close(1006);
    settle().await;
    assert!(!hook.snapshot().is_connected);

    advance(1_001).await;
    let second = h.connector.last();
    second.open();
    second.accept(&[]);
    settle().await;

    assert_eq!(second.subscribes(), vec!["metrics"]);
    assert_eq!(h.manager.subscriber_count("metrics"), 1);
    assert!(hook.snapshot().is_connected);

    second.push("metrics", json!({"count": 4}));
    assert_eq!(hook.data(), Some(Count { count: 4 }));
}

#[tokio::test(start_paused = true)]
async fn resubscribe_is_debounced() {
    let h = Harness::new();
    let socket = h.authenticate(&[]);
    let (_, fetch) = fetch_after(0, nothing);
    let hook = ChannelData::mount(h.manager.clone(), "metrics", fetch, ChannelDataOptions::new());
    assert_eq!(socket.subscribes(), vec!["metrics"]);

    advance(500).await;
    assert!(!hook.resubscribe());
    assert_eq!(socket.subscribes(), vec!["metrics"]);

    advance(501).await;
    assert!(hook.resubscribe());
    assert_eq!(socket.unsubscribes(), vec!["metrics"]);
    assert_eq!(socket.subscribes(), vec!["metrics", "metrics"]);
    assert_eq!(h.manager.subscriber_count("metrics"), 1);

    assert!(!hook.resubscribe());
}

#[tokio::test(start_paused = true)]
async fn resubscribe_requires_authentication() {
    let h = Harness::new();
    let (_, fetch) = fetch_after(0, nothing);
    let hook = ChannelData::mount(h.manager.clone(), "metrics", fetch, ChannelDataOptions::new());

    assert!(!hook.resubscribe());
    assert!(!hook.is_subscribed());
}

#[tokio::test(start_paused = true)]
async fn sibling_instances_share_one_server_subscription() {
    let h = Harness::new();
    let socket = h.authenticate(&[]);
    let (_, fetch_a) = fetch_after(0, nothing);
    let (_, fetch_b) = fetch_after(0, nothing);

    let a = ChannelData::mount(h.manager.clone(), "metrics", fetch_a, ChannelDataOptions::new());
    let b = ChannelData::mount(h.manager.clone(), "metrics", fetch_b, ChannelDataOptions::new());
    assert_eq!(socket.subscribes(), vec!["metrics"]);

    socket.push("metrics", json!({"count": 2}));
    assert_eq!(a.data(), Some(Count { count: 2 }));
    assert_eq!(b.data(), Some(Count { count: 2 }));

    a.unmount();
    assert!(socket.unsubscribes().is_empty());
    b.unmount();
    assert_eq!(socket.unsubscribes(), vec!["metrics"]);
}

#[tokio::test(start_paused = true)]
async fn unmount_mid_fetch_discards_the_result() {
    let h = Harness::new();
    let socket = h.authenticate(&[]);
    let (_, fetch) = fetch_after(1_000, five);
    let hook = ChannelData::mount(h.manager.clone(), "metrics", fetch, ChannelDataOptions::new());
    let mut changes = hook.watch();
    changes.borrow_and_update();

    advance(500).await;
    hook.unmount();
    hook.unmount();
    assert!(!hook.is_mounted());
    assert_eq!(socket.unsubscribes(), vec!["metrics"]);

    advance(1_000).await;
    assert!(!changes.has_changed().unwrap());
    assert_eq!(hook.data(), None);

    socket.push("metrics", json!({"count": 8}));
    assert_eq!(hook.data(), None);
    assert_eq!(h.manager.subscriber_count("metrics"), 0);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_last_handle_unsubscribes() {
    let h = Harness::new();
    let socket = h.authenticate(&[]);
    let (_, fetch) = fetch_after(0, nothing);
    let hook = ChannelData::mount(h.manager.clone(), "metrics", fetch, ChannelDataOptions::new());
    let clone = hook.clone();

    drop(hook);
    assert_eq!(h.manager.subscriber_count("metrics"), 1);
    drop(clone);
    assert_eq!(h.manager.subscriber_count("metrics"), 0);
    assert_eq!(socket.unsubscribes(), vec!["metrics"]);
}

#[tokio::test(start_paused = true)]
async fn custom_processing_maps_pushes() {
    let h = Harness::new();
    let socket = h.authenticate(&[]);
    let (_, fetch) = fetch_after(0, nothing);
    let options = ChannelDataOptions::new().process_data(|push| {
        let total = push.payload().get("total")?.as_u64()?;
        Some(Count {
            count: u32::try_from(total).ok()?,
        })
    });
    let hook = ChannelData::mount(h.manager.clone(), "metrics", fetch, options);

    socket.push("metrics", json!({"total": 12, "breakdown": []}));
    assert_eq!(hook.data(), Some(Count { count: 12 }));

    // Unmappable pushes leave the data alone.
    socket.push("metrics", json!({"status": "recomputing"}));
    assert_eq!(hook.data(), Some(Count { count: 12 }));
}

#[tokio::test(start_paused = true)]
async fn mismatched_push_is_ignored_by_default() {
    let h = Harness::new();
    let socket = h.authenticate(&[]);
    let (_, fetch) = fetch_after(0, five);
    let hook = ChannelData::mount(h.manager.clone(), "metrics", fetch, ChannelDataOptions::new());
    settle().await;

    socket.push("metrics", json!({"unexpected": true}));
    socket.push("metrics", json!(null));
    assert_eq!(hook.data(), Some(Count { count: 5 }));
}

#[tokio::test(start_paused = true)]
async fn watch_reports_each_change() {
    let h = Harness::new();
    let socket = h.authenticate(&[]);
    let (_, fetch) = fetch_after(100, five);
    let hook = ChannelData::mount(h.manager.clone(), "metrics", fetch, ChannelDataOptions::new());
    let mut changes = hook.watch();

    let snapshot = changes
        .wait_for(|snapshot| !snapshot.loading)
        .await
        .unwrap()
        .clone();
    assert_eq!(snapshot.data, Some(Count { count: 5 }));
    assert!(snapshot.is_connected);

    socket.push("metrics", json!({"count": 6}));
    assert!(changes.has_changed().unwrap());
    assert_eq!(
        changes.borrow_and_update().data,
        Some(Count { count: 6 })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mount_racing_authentication_still_subscribes() {
    for _ in 0..200 {
        let h = Harness::new();
        h.manager.connect();
        let socket = h.connector.last();
        socket.open();

        let barrier = Arc::new(std::sync::Barrier::new(2));
        let server = {
            let barrier = barrier.clone();
            let socket = socket.clone();
            std::thread::spawn(move || {
                barrier.wait();
                socket.accept(&["metrics"]);
            })
        };

        barrier.wait();
        let (_, fetch) = fetch_after(0, five);
        let hook = ChannelData::mount(
            h.manager.clone(),
            "metrics",
            fetch,
            ChannelDataOptions::new().skip_initial_fetch(true),
        );
        server.join().unwrap();

        let subscribed = tokio::time::timeout(Duration::from_secs(2), async {
            while socket.subscribes().is_empty() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await;
        assert!(subscribed.is_ok(), "hook never subscribed");
        assert_eq!(socket.subscribes(), vec!["metrics"]);
        assert!(hook.is_subscribed());
    }
}
