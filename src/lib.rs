#![allow(clippy::doc_markdown)] // Allow technical terms in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # filebatch
//!
//! Directory-watching line batcher.
//!
//! ## Overview
//!
//! New files in a watched directory are split into line records, one
//! correlation id per file. The batch aggregator regroups those records and
//! releases each group exactly once: as a complete batch when it reaches the
//! count threshold, or as a partial batch when its group timer fires or the
//! pipeline shuts down. Released batches are handed to a sink through a
//! bounded queue.
//!
//! ## Module Organization
//!
//! - [`source`] - Directory polling with an accept-once filter
//! - [`splitter`] - Lazy file-to-record splitting
//! - [`aggregator`] - Group correlation, release rules and timers
//! - [`sink`] - Batch consumers and the dispatcher that drives them
//! - [`pipeline`] - Composition of the stages
//! - [`state_machine`] - Group lifecycle states
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Tracing initialisation and structured log helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use filebatch::config::ConfigManager;
//! use filebatch::pipeline::IngestPipeline;
//! use filebatch::sink;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let config = manager.config().clone();
//! let sink = sink::from_config(&config.sink)?;
//!
//! let pipeline = IngestPipeline::new(config, sink)?;
//! let report = pipeline.run(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! }).await;
//! println!("delivered {} batches", report.dispatch.delivered);
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod splitter;
pub mod state_machine;

pub use aggregator::{AggregatorStats, BatchAggregator, BatchOutlet, ShutdownSummary};
pub use config::{ConfigManager, FileBatchConfig};
pub use error::{PipelineError, Result};
pub use models::{Batch, Record, ReleaseReason};
pub use pipeline::{IngestPipeline, PipelineReport, PollReport};
pub use sink::BatchSink;
pub use state_machine::GroupState;
