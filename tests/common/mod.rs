//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use filebatch::aggregator::{BatchAggregator, BatchOutlet};
use filebatch::config::{AggregatorConfig, FileBatchConfig, SinkConfig};
use filebatch::error::Result;
use filebatch::models::{Batch, Record};
use filebatch::sink::BatchSink;
use parking_lot::Mutex;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

/// Sink that keeps every accepted batch in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Batch>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().clone()
    }

    pub fn for_id(&self, correlation_id: &str) -> Vec<Batch> {
        self.batches
            .lock()
            .iter()
            .filter(|b| b.correlation_id == correlation_id)
            .cloned()
            .collect()
    }

    /// Wait (in real time) until at least `count` batches arrived
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Batch> {
        let _ = tokio::time::timeout(timeout, async {
            while self.batches.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        self.batches()
    }
}

#[async_trait]
impl BatchSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn accept(&self, batch: &Batch) -> Result<()> {
        self.batches.lock().push(batch.clone());
        Ok(())
    }
}

pub fn record(correlation_id: &str, sequence: u64) -> Record {
    Record::new(
        correlation_id,
        sequence,
        format!("{correlation_id} line {sequence}"),
        false,
    )
}

/// Records `0..count`, the last one flagged `is_last`
pub fn file_records(correlation_id: &str, count: u64) -> Vec<Record> {
    (0..count)
        .map(|seq| {
            let mut r = record(correlation_id, seq);
            r.is_last = seq + 1 == count;
            r
        })
        .collect()
}

pub fn aggregator_config(threshold: usize, timeout_ms: u64, send_partial: bool) -> AggregatorConfig {
    AggregatorConfig {
        count_threshold: threshold,
        group_timeout_ms: timeout_ms,
        send_partial_on_expiry: send_partial,
    }
}

/// Aggregator plus the receiving end of its outlet
pub fn aggregator(config: AggregatorConfig) -> (BatchAggregator, mpsc::Receiver<Batch>) {
    aggregator_with_outlet(config, &SinkConfig::default())
}

/// Aggregator whose outlet queue follows `sink`
pub fn aggregator_with_outlet(
    config: AggregatorConfig,
    sink: &SinkConfig,
) -> (BatchAggregator, mpsc::Receiver<Batch>) {
    let (outlet, receiver) = BatchOutlet::channel(sink);
    let aggregator = BatchAggregator::new(config, outlet).expect("valid aggregator config");
    (aggregator, receiver)
}

/// Pipeline configuration watching `dir`
pub fn pipeline_config(dir: &Path, threshold: usize, timeout_ms: u64) -> FileBatchConfig {
    let mut config = FileBatchConfig::default();
    config.source.watch_directory = dir.to_path_buf();
    config.source.poll_interval_ms = 20;
    config.aggregator.count_threshold = threshold;
    config.aggregator.group_timeout_ms = timeout_ms;
    config
}
