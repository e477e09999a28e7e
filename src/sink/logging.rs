//! Sink that writes each batch to the log.

use super::BatchSink;
use crate::error::Result;
use crate::models::Batch;
use async_trait::async_trait;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct LoggingSink;

impl LoggingSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BatchSink for LoggingSink {
    fn name(&self) -> &str {
        "logging"
    }

    async fn accept(&self, batch: &Batch) -> Result<()> {
        info!(
            correlation_id = %batch.correlation_id,
            batch_id = %batch.batch_id,
            reason = %batch.reason,
            complete = batch.complete,
            released_at = %batch.released_at.to_rfc3339(),
            size = batch.len(),
            payloads = ?batch.payloads(),
            "Batch received"
        );
        Ok(())
    }
}
