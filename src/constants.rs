//! # System Constants
//!
//! Default values for the configuration surface and the operation names used
//! in structured log events.

/// Built-in defaults applied when a configuration key is absent
pub mod defaults {
    pub const WATCH_DIRECTORY: &str = "input";
    pub const FILE_PATTERN: &str = "*.txt";
    pub const POLL_INTERVAL_MS: u64 = 1000;
    pub const MAX_CONCURRENT_FILES: usize = 16;

    pub const RECORD_BUFFER_SIZE: usize = 256;

    pub const COUNT_THRESHOLD: usize = 5;
    pub const GROUP_TIMEOUT_MS: u64 = 100;

    pub const SINK_QUEUE_CAPACITY: usize = 1024;
    pub const SINK_ACCEPT_TIMEOUT_MS: u64 = 5000;
    pub const SINK_ENQUEUE_TIMEOUT_MS: u64 = 1000;
}

/// Operation names attached to structured log events
pub mod events {
    // Source / splitter
    pub const FILE_DISCOVERED: &str = "file.discovered";
    pub const FILE_SPLIT_COMPLETED: &str = "file.split_completed";
    pub const FILE_READ_FAILED: &str = "file.read_failed";

    // Aggregator
    pub const GROUP_OPENED: &str = "group.opened";
    pub const GROUP_EXPIRED: &str = "group.expired";
    pub const GROUP_DISCARDED: &str = "group.discarded";
    pub const BATCH_RELEASED: &str = "batch.released";
    pub const RECORD_LATE: &str = "record.late";
    pub const RECORD_REJECTED: &str = "record.rejected";

    // Sink
    pub const BATCH_DELIVERED: &str = "batch.delivered";
    pub const BATCH_REJECTED: &str = "batch.rejected";

    // Lifecycle
    pub const AGGREGATOR_SHUTDOWN: &str = "aggregator.shutdown";
    pub const PIPELINE_SHUTDOWN: &str = "pipeline.shutdown";
}
