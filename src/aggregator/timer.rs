//! Per-group timers.
//!
//! Each armed group owns one spawned sleep. Every arm gets a fresh token so a
//! callback can tell whether it is still the group's current timer.

use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub(crate) struct GroupTimer {
    token: u64,
    handle: JoinHandle<()>,
}

impl GroupTimer {
    /// Run `on_fire` after `delay` on the given runtime
    pub(crate) fn spawn<F>(runtime: &Handle, token: u64, delay: Duration, on_fire: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire.await;
        });
        Self { token, handle }
    }

    #[cfg(test)]
    pub(crate) fn from_handle(token: u64, handle: JoinHandle<()>) -> Self {
        Self { token, handle }
    }

    pub(crate) fn token(&self) -> u64 {
        self.token
    }

    pub(crate) fn cancel(self) {
        self.handle.abort();
    }

    /// Release the handle without aborting; used by the timer's own callback,
    /// which must keep running to deliver its batch.
    pub(crate) fn detach(self) {}
}
