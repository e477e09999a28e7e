pub mod batch;
pub mod record;

// Re-export core models for easy access
pub use batch::{Batch, ReleaseReason};
pub use record::Record;
