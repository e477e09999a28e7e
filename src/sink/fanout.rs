//! Sink that forwards every batch to several sinks.

use super::BatchSink;
use crate::error::{PipelineError, Result};
use crate::models::Batch;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;

/// Offers each batch to every inner sink concurrently.
///
/// All sinks are tried even when one fails; the failures are combined, in
/// sink order, into a single `SinkRejected`.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn BatchSink>>,
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &self.sinks.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl FanoutSink {
    pub fn with_sink(mut self, sink: Arc<dyn BatchSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl BatchSink for FanoutSink {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn accept(&self, batch: &Batch) -> Result<()> {
        let outcomes = join_all(self.sinks.iter().map(|sink| sink.accept(batch))).await;
        let failures: Vec<String> = self
            .sinks
            .iter()
            .zip(outcomes)
            .filter_map(|(sink, outcome)| outcome.err().map(|e| format!("{}: {e}", sink.name())))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::sink_rejected(
                &batch.correlation_id,
                batch.batch_id,
                failures.join("; "),
            ))
        }
    }
}
