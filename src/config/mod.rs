//! # Pipeline Configuration
//!
//! Typed configuration for every stage of the pipeline. Values are layered by
//! [`ConfigManager`]: built-in defaults, then `filebatch.{toml,yaml}`, then an
//! environment-specific file, then `FILEBATCH__SECTION__KEY` variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use filebatch::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let threshold = manager.config().aggregator.count_threshold;
//! let timeout = manager.config().aggregator.group_timeout();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::defaults;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring filebatch.toml
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FileBatchConfig {
    /// Directory polling settings
    pub source: SourceConfig,

    /// Line splitting settings
    pub splitter: SplitterConfig,

    /// Release policy for the batch aggregator
    pub aggregator: AggregatorConfig,

    /// Delivery queue and sink settings
    pub sink: SinkConfig,
}

impl FileBatchConfig {
    /// Validate every section, failing on the first invalid value
    pub fn validate(&self) -> ConfigResult<()> {
        self.source.validate()?;
        self.splitter.validate()?;
        self.aggregator.validate()?;
        self.sink.validate()?;
        Ok(())
    }
}

/// Directory polling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceConfig {
    pub watch_directory: PathBuf,
    /// Glob matched against the file name only
    pub file_pattern: String,
    pub poll_interval_ms: u64,
    /// Files read at the same time; each one holds an open descriptor
    pub max_concurrent_files: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            watch_directory: PathBuf::from(defaults::WATCH_DIRECTORY),
            file_pattern: defaults::FILE_PATTERN.to_string(),
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            max_concurrent_files: defaults::MAX_CONCURRENT_FILES,
        }
    }
}

impl SourceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.watch_directory.as_os_str().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "watch_directory",
                "source",
            ));
        }
        if let Err(e) = glob::Pattern::new(&self.file_pattern) {
            return Err(ConfigurationError::invalid_value(
                "source.file_pattern",
                self.file_pattern.clone(),
                format!("not a valid glob: {e}"),
            ));
        }
        require_positive("source.poll_interval_ms", self.poll_interval_ms)?;
        require_positive("source.max_concurrent_files", self.max_concurrent_files as u64)
    }
}

/// Line splitting configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SplitterConfig {
    /// Capacity of the per-file record queue between the reader thread and the aggregator
    pub record_buffer_size: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            record_buffer_size: defaults::RECORD_BUFFER_SIZE,
        }
    }
}

impl SplitterConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        require_positive("splitter.record_buffer_size", self.record_buffer_size as u64)
    }
}

/// Release policy configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Number of records that releases a group immediately
    pub count_threshold: usize,
    /// Idle time after which an open group is released as a partial batch
    pub group_timeout_ms: u64,
    /// When false, timed-out groups are discarded instead of released
    pub send_partial_on_expiry: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            count_threshold: defaults::COUNT_THRESHOLD,
            group_timeout_ms: defaults::GROUP_TIMEOUT_MS,
            send_partial_on_expiry: true,
        }
    }
}

impl AggregatorConfig {
    pub fn group_timeout(&self) -> Duration {
        Duration::from_millis(self.group_timeout_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        require_positive("aggregator.count_threshold", self.count_threshold as u64)?;
        require_positive("aggregator.group_timeout_ms", self.group_timeout_ms)
    }
}

/// Overflow behaviour of the outlet queue feeding the sink
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Wait up to `enqueue_timeout_ms` for space, then report the batch as rejected
    Block,
    /// Report the batch as rejected immediately when the queue is full
    DropNewest,
}

impl Default for DropPolicy {
    fn default() -> Self {
        Self::Block
    }
}

/// Delivery configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SinkConfig {
    pub queue_capacity: usize,
    /// Upper bound on a single `accept` call
    pub accept_timeout_ms: u64,
    /// Upper bound on waiting for queue space under [`DropPolicy::Block`]
    pub enqueue_timeout_ms: u64,
    pub drop_policy: DropPolicy,
    /// When set, every batch is also written here as JSON
    pub output_directory: Option<PathBuf>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: defaults::SINK_QUEUE_CAPACITY,
            accept_timeout_ms: defaults::SINK_ACCEPT_TIMEOUT_MS,
            enqueue_timeout_ms: defaults::SINK_ENQUEUE_TIMEOUT_MS,
            drop_policy: DropPolicy::Block,
            output_directory: None,
        }
    }
}

impl SinkConfig {
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        require_positive("sink.queue_capacity", self.queue_capacity as u64)?;
        require_positive("sink.accept_timeout_ms", self.accept_timeout_ms)?;
        require_positive("sink.enqueue_timeout_ms", self.enqueue_timeout_ms)
    }
}

fn require_positive(field: &str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigurationError::invalid_value(
            field,
            value.to_string(),
            "must be greater than zero",
        ));
    }
    Ok(())
}
