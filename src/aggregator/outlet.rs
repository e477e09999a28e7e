//! Bounded hand-off from the aggregator to the sink dispatcher.
//!
//! The outlet is the single return path for released batches: count-threshold
//! releases are forwarded by the submitting caller, timeout and shutdown
//! releases by the aggregator itself.

use crate::config::{DropPolicy, SinkConfig};
use crate::error::{PipelineError, Result};
use crate::models::Batch;
use std::time::Duration;
use tokio::sync::mpsc::{
    self,
    error::{SendTimeoutError, TrySendError},
};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct BatchOutlet {
    sender: mpsc::Sender<Batch>,
    drop_policy: DropPolicy,
    enqueue_timeout: Duration,
}

impl BatchOutlet {
    /// Create an outlet and the receiver the dispatcher drains
    pub fn channel(config: &SinkConfig) -> (Self, mpsc::Receiver<Batch>) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let outlet = Self {
            sender,
            drop_policy: config.drop_policy,
            enqueue_timeout: config.enqueue_timeout(),
        };
        (outlet, receiver)
    }

    /// Enqueue a batch for the sink.
    ///
    /// Never waits longer than the configured enqueue timeout. A batch that
    /// cannot be queued is reported as `SinkRejected` and not retried.
    pub async fn deliver(&self, batch: Batch) -> Result<()> {
        let correlation_id = batch.correlation_id.clone();
        let batch_id = batch.batch_id;

        let outcome = match self.drop_policy {
            DropPolicy::Block => match self.sender.send_timeout(batch, self.enqueue_timeout).await {
                Ok(()) => Ok(()),
                Err(SendTimeoutError::Timeout(_)) => Err(format!(
                    "outlet queue still full after {}ms",
                    self.enqueue_timeout.as_millis()
                )),
                Err(SendTimeoutError::Closed(_)) => Err("outlet queue closed".to_string()),
            },
            DropPolicy::DropNewest => match self.sender.try_send(batch) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err("outlet queue full, batch dropped".to_string()),
                Err(TrySendError::Closed(_)) => Err("outlet queue closed".to_string()),
            },
        };

        match outcome {
            Ok(()) => {
                debug!(
                    correlation_id = %correlation_id,
                    batch_id = %batch_id,
                    queue_depth = self.depth(),
                    "Batch queued for sink"
                );
                Ok(())
            }
            Err(reason) => Err(PipelineError::sink_rejected(correlation_id, batch_id, reason)),
        }
    }

    /// Batches currently waiting in the queue
    pub fn depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}
