//! Target-specific task spawning, timers and clock.
//!
//! Native builds run on tokio; the web build runs on the browser event loop
//! through `wasm_bindgen_futures`. Everything above this module is written
//! once against these helpers.

use std::future::Future;
use std::time::Duration;

use futures_util::future::{abortable, AbortHandle};

/// `Send` on native targets, nothing on wasm where futures are not `Send`.
#[cfg(not(target_arch = "wasm32"))]
pub trait MaybeSend: Send {}
#[cfg(not(target_arch = "wasm32"))]
impl<T: Send> MaybeSend for T {}

#[cfg(target_arch = "wasm32")]
pub trait MaybeSend {}
#[cfg(target_arch = "wasm32")]
impl<T> MaybeSend for T {}

/// Boxed future returned by fetch functions.
#[cfg(not(target_arch = "wasm32"))]
pub type BoxFuture<T> = futures_util::future::BoxFuture<'static, T>;
#[cfg(target_arch = "wasm32")]
pub type BoxFuture<T> = futures_util::future::LocalBoxFuture<'static, T>;

/// Box a future with whatever `Send`-ness the target needs.
#[cfg(not(target_arch = "wasm32"))]
pub fn boxed<T, F>(fut: F) -> BoxFuture<T>
where
    F: Future<Output = T> + Send + 'static,
{
    Box::pin(fut)
}

#[cfg(target_arch = "wasm32")]
pub fn boxed<T, F>(fut: F) -> BoxFuture<T>
where
    F: Future<Output = T> + 'static,
{
    Box::pin(fut)
}

/// Run a future in the background.
#[cfg(not(target_arch = "wasm32"))]
pub fn spawn<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(fut);
}

#[cfg(target_arch = "wasm32")]
pub fn spawn<F>(fut: F)
where
    F: Future<Output = ()> + 'static,
{
    wasm_bindgen_futures::spawn_local(fut);
}

/// Run a future in the background and return a handle that cancels it.
pub fn spawn_abortable<F>(fut: F) -> AbortHandle
where
    F: Future<Output = ()> + MaybeSend + 'static,
{
    let (task, handle) = abortable(fut);
    spawn(async move {
        let _ = task.await;
    });
    handle
}

#[cfg(not(target_arch = "wasm32"))]
pub async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}

#[cfg(target_arch = "wasm32")]
pub async fn sleep(duration: Duration) {
    let millis = u32::try_from(duration.as_millis()).unwrap_or(u32::MAX);
    gloo_timers::future::TimeoutFuture::new(millis).await;
}

/// Monotonic instant. On native this is tokio's, so paused test clocks apply.
#[cfg(not(target_arch = "wasm32"))]
pub use tokio::time::Instant;

#[cfg(target_arch = "wasm32")]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Instant(f64);

#[cfg(target_arch = "wasm32")]
impl Instant {
    pub fn now() -> Self {
        Self(web_sys::js_sys::Date::now())
    }

    pub fn elapsed(&self) -> Duration {
        let millis = (web_sys::js_sys::Date::now() - self.0).max(0.0);
        Duration::from_millis(millis as u64)
    }
}
