//! # Ingestion Pipeline
//!
//! Explicit composition of the four stages:
//!
//! ```text
//! DirectorySource::poll ──→ FileSplitter (spawn_blocking) ──mpsc──→ BatchAggregator::submit
//!                                                                        │
//!                                          BatchOutlet ←── releases ─────┘
//!                                               │
//!                                          SinkDispatcher ──→ BatchSink
//! ```
//!
//! Each discovered file is processed on its own task, so different
//! correlation ids are submitted concurrently. A semaphore sized by
//! `source.max_concurrent_files` bounds how many files are open at once;
//! the other tasks wait for a permit before opening theirs.

use crate::aggregator::{AggregatorStats, BatchAggregator, BatchOutlet, ShutdownSummary};
use crate::config::FileBatchConfig;
use crate::constants::events;
use crate::error::{PipelineError, Result};
use crate::logging::log_error;
use crate::models::Record;
use crate::sink::{BatchSink, DispatchStats, DispatcherHandle, SinkDispatcher};
use crate::source::DirectorySource;
use crate::splitter::{FileSplitter, SplitSummary};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Outcome of processing one file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub correlation_id: String,
    pub records_read: u64,
    /// Count-threshold releases triggered while reading this file
    pub batches_released: u64,
    /// Records the aggregator refused (late or after shutdown)
    pub records_rejected: u64,
    /// Set when the file could not be opened or read to the end
    pub read_error: Option<String>,
}

impl FileReport {
    fn new(path: &Path, correlation_id: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            correlation_id: correlation_id.to_string(),
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.read_error.is_none()
    }
}

/// Outcome of one directory scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub files: Vec<FileReport>,
}

impl PollReport {
    pub fn files_discovered(&self) -> usize {
        self.files.len()
    }

    pub fn records_read(&self) -> u64 {
        self.files.iter().map(|f| f.records_read).sum()
    }

    pub fn batches_released(&self) -> u64 {
        self.files.iter().map(|f| f.batches_released).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| !f.is_ok())
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Final counters returned by [`IngestPipeline::shutdown`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub files_seen: usize,
    pub shutdown: ShutdownSummary,
    pub aggregator: AggregatorStats,
    pub dispatch: DispatchStats,
}

pub struct IngestPipeline {
    config: FileBatchConfig,
    source: DirectorySource,
    splitter: FileSplitter,
    aggregator: BatchAggregator,
    dispatcher: DispatcherHandle,
    /// One permit per file being read
    file_permits: Arc<Semaphore>,
}

impl std::fmt::Debug for IngestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestPipeline")
            .field("watch_directory", &self.source.directory())
            .field("aggregator", &self.aggregator)
            .field("dispatcher", &self.dispatcher)
            .field("file_permits", &self.file_permits.available_permits())
            .finish()
    }
}

impl IngestPipeline {
    /// Validate the configuration and wire source, splitter, aggregator and sink.
    ///
    /// Spawns the sink dispatcher, so this must run inside a Tokio runtime.
    pub fn new(config: FileBatchConfig, sink: Arc<dyn BatchSink>) -> Result<Self> {
        config.validate()?;

        let source = DirectorySource::new(&config.source)?;
        let (outlet, receiver) = BatchOutlet::channel(&config.sink);
        let aggregator = BatchAggregator::new(config.aggregator.clone(), outlet)?;
        let dispatcher = SinkDispatcher::spawn(receiver, sink, config.sink.accept_timeout());
        let file_permits = Arc::new(Semaphore::new(config.source.max_concurrent_files));

        info!(
            watch_directory = %config.source.watch_directory.display(),
            file_pattern = %config.source.file_pattern,
            poll_interval_ms = config.source.poll_interval_ms,
            max_concurrent_files = config.source.max_concurrent_files,
            "Ingestion pipeline initialized"
        );

        Ok(Self {
            config,
            source,
            splitter: FileSplitter::new(),
            aggregator,
            dispatcher,
            file_permits,
        })
    }

    pub fn config(&self) -> &FileBatchConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &BatchAggregator {
        &self.aggregator
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Scan the watch directory once and feed every new file to the aggregator.
    ///
    /// Returns once all discovered files have been read. Partial releases
    /// for those files still happen later, on their group timers.
    pub async fn poll_once(&self) -> Result<PollReport> {
        if self.aggregator.is_shut_down() {
            return Err(PipelineError::shut_down(
                self.source.directory().display().to_string(),
            ));
        }

        let paths = self.source.poll().await?;
        let mut tasks = JoinSet::new();
        for path in paths {
            let aggregator = self.aggregator.clone();
            let splitter = self.splitter;
            let permits = Arc::clone(&self.file_permits);
            let buffer = self.config.splitter.record_buffer_size;
            tasks.spawn(async move {
                process_file(aggregator, splitter, permits, path, buffer).await
            });
        }

        let mut report = PollReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(file) => report.files.push(file),
                Err(e) => log_error("pipeline", events::FILE_READ_FAILED, None, &e.to_string()),
            }
        }
        report.files.sort_by(|a, b| a.path.cmp(&b.path));

        if !report.is_empty() {
            info!(
                files = report.files_discovered(),
                records = report.records_read(),
                batches_released = report.batches_released(),
                failures = report.failures().count(),
                "Poll completed"
            );
        }
        Ok(report)
    }

    /// Poll with a fixed delay between scans until `shutdown` resolves, then shut down.
    ///
    /// A scan already in progress is allowed to finish first.
    pub async fn run<F>(&self, shutdown: F) -> PipelineReport
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let interval = self.config.source.poll_interval();

        loop {
            if let Err(e) = self.poll_once().await {
                log_error(
                    "pipeline",
                    events::FILE_READ_FAILED,
                    e.correlation_id(),
                    &e.to_string(),
                );
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        self.shutdown().await
    }

    /// Flush open groups, drain the sink queue and stop. Safe to call twice.
    pub async fn shutdown(&self) -> PipelineReport {
        let shutdown = self.aggregator.shutdown().await;
        let dispatch = self.dispatcher.stop().await;

        let report = PipelineReport {
            files_seen: self.source.seen(),
            shutdown,
            aggregator: self.aggregator.stats(),
            dispatch,
        };
        info!(
            operation = events::PIPELINE_SHUTDOWN,
            files_seen = report.files_seen,
            batches_released = report.aggregator.batches_released,
            batches_delivered = report.dispatch.delivered,
            batches_rejected = report.dispatch.rejected,
            "Ingestion pipeline stopped"
        );
        report
    }
}

async fn process_file(
    aggregator: BatchAggregator,
    splitter: FileSplitter,
    permits: Arc<Semaphore>,
    path: PathBuf,
    buffer: usize,
) -> FileReport {
    let correlation_id = FileSplitter::correlation_id_for(&path);
    let mut report = FileReport::new(&path, &correlation_id);

    // Held until the reader thread has finished with the file
    let _permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => {
            log_error("pipeline", events::FILE_READ_FAILED, Some(correlation_id.as_str()), &e.to_string());
            report.read_error = Some(format!("file permit unavailable: {e}"));
            return report;
        }
    };

    let mut records = match splitter.split(&path, correlation_id.clone()) {
        Ok(records) => records,
        Err(e) => {
            log_error("splitter", events::FILE_READ_FAILED, Some(correlation_id.as_str()), &e.to_string());
            report.read_error = Some(e.to_string());
            return report;
        }
    };

    // Empty files still get a group so their timer expires it
    if let Err(e) = aggregator.open(&correlation_id) {
        report.read_error = Some(e.to_string());
        return report;
    }

    let (sender, mut receiver) = mpsc::channel::<Result<Record>>(buffer);
    let reader = tokio::task::spawn_blocking(move || {
        for item in records.by_ref() {
            if sender.blocking_send(item).is_err() {
                break;
            }
        }
        records.summary()
    });

    while let Some(item) = receiver.recv().await {
        match item {
            Ok(record) => {
                report.records_read += 1;
                match aggregator.submit(record) {
                    Ok(Some(batch)) => {
                        report.batches_released += 1;
                        if let Err(e) = aggregator.deliver(batch).await {
                            log_error(
                                "pipeline",
                                events::BATCH_REJECTED,
                                Some(correlation_id.as_str()),
                                &e.to_string(),
                            );
                        }
                    }
                    Ok(None) => {}
                    // Already reported by the aggregator
                    Err(_) => report.records_rejected += 1,
                }
            }
            Err(e) => {
                log_error("splitter", events::FILE_READ_FAILED, Some(correlation_id.as_str()), &e.to_string());
                report.read_error = Some(e.to_string());
            }
        }
    }

    match reader.await {
        Ok(SplitSummary {
            records_emitted,
            end_of_stream,
            ..
        }) => debug!(
            correlation_id = %correlation_id,
            records_emitted = records_emitted,
            end_of_stream = end_of_stream,
            "Reader finished"
        ),
        Err(e) => {
            warn!(correlation_id = %correlation_id, error = %e, "Reader task failed");
            report
                .read_error
                .get_or_insert_with(|| format!("reader task failed: {e}"));
        }
    }
    report
}
