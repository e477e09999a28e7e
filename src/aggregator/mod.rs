//! # Batch Aggregation
//!
//! The core of the pipeline: records are grouped by correlation id and each
//! group is released exactly once, as a complete batch when it reaches the
//! count threshold or as a partial batch when its timer fires or the
//! aggregator shuts down.
//!
//! ## Key Components
//!
//! - [`BatchAggregator`]: group registry, release rules and shutdown flush
//! - [`BatchOutlet`]: bounded queue from the aggregator to the sink dispatcher

mod batch_aggregator;
mod group;
pub mod outlet;
mod timer;

pub use batch_aggregator::{AggregatorStats, BatchAggregator, ShutdownSummary};
pub use outlet::BatchOutlet;
