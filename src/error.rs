//! # Pipeline Error Types
//!
//! Structured error handling for the ingestion pipeline using thiserror.
//! Every per-record and per-batch variant carries the correlation id it belongs
//! to so that reports can be traced back to the source file.

use crate::config::ConfigurationError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Source read error for {path}: {reason}")]
    SourceRead { path: String, reason: String },

    #[error("Late record for {correlation_id} (sequence {sequence}): {reason}")]
    LateRecord {
        correlation_id: String,
        sequence: u64,
        reason: String,
    },

    #[error("Sink rejected batch {batch_id} for {correlation_id}: {reason}")]
    SinkRejected {
        correlation_id: String,
        batch_id: Uuid,
        reason: String,
    },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Aggregator is shut down; rejected work for {correlation_id}")]
    ShutDown { correlation_id: String },

    #[error("Invalid group state transition for {correlation_id}: {from} -> {to}")]
    StateTransition {
        correlation_id: String,
        from: String,
        to: String,
    },

    #[error("Runtime error: {message}")]
    Runtime { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn source_read(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceRead {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn late_record(
        correlation_id: impl Into<String>,
        sequence: u64,
        reason: impl Into<String>,
    ) -> Self {
        Self::LateRecord {
            correlation_id: correlation_id.into(),
            sequence,
            reason: reason.into(),
        }
    }

    pub fn sink_rejected(
        correlation_id: impl Into<String>,
        batch_id: Uuid,
        reason: impl Into<String>,
    ) -> Self {
        Self::SinkRejected {
            correlation_id: correlation_id.into(),
            batch_id,
            reason: reason.into(),
        }
    }

    pub fn shut_down(correlation_id: impl Into<String>) -> Self {
        Self::ShutDown {
            correlation_id: correlation_id.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Only configuration problems abort the process; everything else is
    /// reported and the pipeline keeps going.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Correlation id the error is attached to, when there is one.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::LateRecord { correlation_id, .. }
            | Self::SinkRejected { correlation_id, .. }
            | Self::ShutDown { correlation_id }
            | Self::StateTransition { correlation_id, .. } => Some(correlation_id),
            Self::SourceRead { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Short machine-friendly kind used as the `reason` field in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceRead { .. } => "source_read_error",
            Self::LateRecord { .. } => "late_record_error",
            Self::SinkRejected { .. } => "sink_rejected",
            Self::Configuration(_) => "configuration_error",
            Self::ShutDown { .. } => "shut_down",
            Self::StateTransition { .. } => "state_transition_error",
            Self::Runtime { .. } => "runtime_error",
            Self::Io(_) => "io_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
