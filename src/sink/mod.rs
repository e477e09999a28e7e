//! # Batch Sinks
//!
//! Consumers of released batches. The aggregator never calls a sink directly:
//! batches go through the [`BatchOutlet`](crate::aggregator::BatchOutlet)
//! queue and the [`SinkDispatcher`] calls [`BatchSink::accept`] under a
//! timeout, so a slow sink only ever delays the queue.

pub mod directory;
pub mod dispatcher;
pub mod fanout;
pub mod logging;

pub use directory::DirectorySink;
pub use dispatcher::{DispatchStats, DispatcherHandle, SinkDispatcher};
pub use fanout::FanoutSink;
pub use logging::LoggingSink;

use crate::config::SinkConfig;
use crate::error::Result;
use crate::models::Batch;
use async_trait::async_trait;
use std::sync::Arc;

/// Destination for released batches.
///
/// Delivery is at most once: a failed or timed-out `accept` is reported and
/// the batch is not offered again.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn accept(&self, batch: &Batch) -> Result<()>;
}

/// Sink described by the configuration: the logging sink, plus a
/// [`DirectorySink`] when `output_directory` is set.
pub fn from_config(config: &SinkConfig) -> Result<Arc<dyn BatchSink>> {
    let logging: Arc<dyn BatchSink> = Arc::new(LoggingSink::new());
    match &config.output_directory {
        Some(dir) => Ok(Arc::new(
            FanoutSink::default()
                .with_sink(logging)
                .with_sink(Arc::new(DirectorySink::new(dir)?)),
        )),
        None => Ok(logging),
    }
}
