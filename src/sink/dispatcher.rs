//! # Sink Dispatcher
//!
//! Background task that drains the outlet queue and offers each batch to the
//! configured [`BatchSink`]. Every `accept` call runs under the configured
//! timeout; failures are reported as `SinkRejected` and never retried.
//!
//! ```text
//! BatchOutlet ──mpsc──→ SinkDispatcher::run ──accept (timeout)──→ BatchSink
//!                              ↑
//!          DispatcherHandle::stop (oneshot) ─ close queue, drain, exit
//! ```

use super::BatchSink;
use crate::constants::events;
use crate::error::PipelineError;
use crate::logging::{log_batch_operation, log_error};
use crate::models::Batch;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct AtomicStats {
    delivered: AtomicU64,
    rejected: AtomicU64,
}

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub delivered: u64,
    pub rejected: u64,
}

/// Owns the drain loop; spawn [`SinkDispatcher::run`] or use [`SinkDispatcher::spawn`]
pub struct SinkDispatcher {
    receiver: mpsc::Receiver<Batch>,
    sink: Arc<dyn BatchSink>,
    accept_timeout: Duration,
    stop: oneshot::Receiver<()>,
    stats: Arc<AtomicStats>,
    is_running: Arc<AtomicBool>,
}

impl std::fmt::Debug for SinkDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkDispatcher")
            .field("sink", &self.sink.name())
            .field("accept_timeout", &self.accept_timeout)
            .field("is_running", &self.is_running.load(Ordering::SeqCst))
            .finish()
    }
}

/// Control side of a running dispatcher
pub struct DispatcherHandle {
    control: Mutex<Option<(oneshot::Sender<()>, Option<JoinHandle<()>>)>>,
    stats: Arc<AtomicStats>,
    is_running: Arc<AtomicBool>,
}

impl std::fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherHandle")
            .field("stats", &self.stats())
            .field("is_running", &self.is_running())
            .finish()
    }
}

impl SinkDispatcher {
    /// Create a dispatcher and its handle. The dispatcher must be spawned.
    pub fn new(
        receiver: mpsc::Receiver<Batch>,
        sink: Arc<dyn BatchSink>,
        accept_timeout: Duration,
    ) -> (Self, DispatcherHandle) {
        let (stop_tx, stop_rx) = oneshot::channel();
        let stats = Arc::new(AtomicStats::default());
        let is_running = Arc::new(AtomicBool::new(false));

        let handle = DispatcherHandle {
            control: Mutex::new(Some((stop_tx, None))),
            stats: Arc::clone(&stats),
            is_running: Arc::clone(&is_running),
        };
        let dispatcher = Self {
            receiver,
            sink,
            accept_timeout,
            stop: stop_rx,
            stats,
            is_running,
        };
        (dispatcher, handle)
    }

    /// Create and spawn on the current runtime
    pub fn spawn(
        receiver: mpsc::Receiver<Batch>,
        sink: Arc<dyn BatchSink>,
        accept_timeout: Duration,
    ) -> DispatcherHandle {
        let (dispatcher, handle) = Self::new(receiver, sink, accept_timeout);
        // Marked before the task starts so the handle never reports a stopped dispatcher early
        handle.is_running.store(true, Ordering::SeqCst);
        let join = tokio::spawn(dispatcher.run());
        if let Some((_, slot)) = handle.control.lock().as_mut() {
            *slot = Some(join);
        }
        handle
    }

    /// Drain loop. Returns once stopped and the queue is empty, or when every
    /// outlet sender is gone.
    pub async fn run(mut self) {
        self.is_running.store(true, Ordering::SeqCst);
        info!(sink = self.sink.name(), "Sink dispatcher started");

        loop {
            tokio::select! {
                biased;
                _ = &mut self.stop => {
                    self.receiver.close();
                    let mut drained = 0usize;
                    while let Some(batch) = self.receiver.recv().await {
                        self.dispatch(batch).await;
                        drained += 1;
                    }
                    info!(sink = self.sink.name(), drained = drained, "Sink dispatcher drained");
                    break;
                }
                next = self.receiver.recv() => match next {
                    Some(batch) => self.dispatch(batch).await,
                    None => break,
                },
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!(sink = self.sink.name(), "Sink dispatcher stopped");
    }

    async fn dispatch(&self, batch: Batch) {
        let outcome = match tokio::time::timeout(self.accept_timeout, self.sink.accept(&batch)).await
        {
            Ok(result) => result,
            Err(_) => Err(PipelineError::sink_rejected(
                &batch.correlation_id,
                batch.batch_id,
                format!(
                    "{} sink did not accept within {}ms",
                    self.sink.name(),
                    self.accept_timeout.as_millis()
                ),
            )),
        };

        match outcome {
            Ok(()) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                log_batch_operation(
                    events::BATCH_DELIVERED,
                    &batch.correlation_id,
                    Some(batch.batch_id),
                    batch.len(),
                    "delivered",
                    Some(self.sink.name()),
                );
            }
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                log_error(
                    self.sink.name(),
                    events::BATCH_REJECTED,
                    Some(batch.correlation_id.as_str()),
                    &e.to_string(),
                );
            }
        }
    }
}

impl DispatcherHandle {
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.stats.delivered.load(Ordering::SeqCst),
            rejected: self.stats.rejected.load(Ordering::SeqCst),
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Ask the dispatcher to finish the queued batches and exit.
    ///
    /// Waits for the drain when the dispatcher was started with
    /// [`SinkDispatcher::spawn`]. Later calls return the final counters.
    pub async fn stop(&self) -> DispatchStats {
        let control = self.control.lock().take();
        if let Some((stop_tx, join)) = control {
            // Err only if the dispatcher already exited
            let _ = stop_tx.send(());
            if let Some(join) = join {
                if let Err(e) = join.await {
                    warn!(error = %e, "Sink dispatcher task ended abnormally");
                }
            }
        }
        self.stats()
    }
}
