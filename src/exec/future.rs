//! Interop between emitters and Rust futures.
//!
//! Tasks can be authored as `async` blocks and lifted into cold emitters,
//! and any emitter can be awaited. Cancellation crosses the boundary in
//! both directions: a lifted future is raced against the handler's stop
//! token, and dropping the awaiting side of [`Emitter::into_future`]
//! discards the eventual result.

use std::future::Future;

use crate::status::Status;

use super::combine::tie;
use super::emitter::{Emitter, EmitterResult};
use super::stop::StopToken;

/// Resolve once a stop has been requested through `token`. Pends forever
/// on the null token.
pub(crate) async fn wait_stopped(token: &StopToken) {
    if !token.stop_possible() {
        std::future::pending::<()>().await;
        return;
    }
    let notify = std::sync::Arc::new(tokio::sync::Notify::new());
    let woken = notify.clone();
    let _guard = token.register(move || woken.notify_one());
    // A stop requested before registration ran the callback inline, which
    // left a permit behind; `notified` returns immediately in that case.
    notify.notified().await;
}

impl Emitter {
    /// Await this emitter. Connecting and starting happen when the future
    /// is first polled, preserving cold-start semantics.
    pub fn into_future(self) -> impl Future<Output = EmitterResult> + Send + 'static {
        async move {
            let (op, rx) = tie(self);
            op.start();
            match rx.await {
                Ok(res) => res,
                Err(_) => EmitterResult::from_status(Status::cancelled()),
            }
        }
    }

    /// Lift a future into a cold emitter. Nothing runs until the operation
    /// is started; the spawned task races the future against the handler's
    /// stop token and completes with `ECANCELED` if the stop wins.
    pub fn from_future<F>(handle: tokio::runtime::Handle, future: F) -> Emitter
    where
        F: Future<Output = EmitterResult> + Send + 'static,
    {
        Emitter::from_start(move |h| {
            let token = h.stop_token();
            handle.spawn(async move {
                tokio::select! {
                    res = future => h.complete(res),
                    _ = wait_stopped(&token) => {
                        h.complete(EmitterResult::from_status(Status::cancelled()));
                    }
                }
            });
        })
    }
}
