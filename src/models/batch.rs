//! Released batches.
//!
//! A [`Batch`] is the immutable result of a group's release. Records are
//! always ordered by sequence, never by arrival.

use super::record::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Why a group was released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    /// The group reached the configured record count
    CountThreshold,
    /// The group timer fired while records were pending
    Timeout,
    /// The aggregator flushed the group while shutting down
    Shutdown,
}

impl ReleaseReason {
    /// Partial releases never count as complete batches
    pub fn is_partial(&self) -> bool {
        !matches!(self, Self::CountThreshold)
    }
}

impl fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CountThreshold => write!(f, "count_threshold"),
            Self::Timeout => write!(f, "timeout"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: Uuid,
    pub correlation_id: String,
    /// Sorted by `sequence`
    pub records: Vec<Record>,
    pub complete: bool,
    pub reason: ReleaseReason,
    pub released_at: DateTime<Utc>,
}

impl Batch {
    /// Build a batch from a group's records in arrival order.
    ///
    /// `complete` holds only for count-threshold releases whose sequences run
    /// 0..n without gaps and with no `is_last` marker before the final record.
    pub fn from_release(
        correlation_id: impl Into<String>,
        mut records: Vec<Record>,
        reason: ReleaseReason,
    ) -> Self {
        records.sort_by_key(|r| r.sequence);
        let complete = !reason.is_partial() && is_contiguous(&records);

        Self {
            batch_id: Uuid::new_v4(),
            correlation_id: correlation_id.into(),
            records,
            complete,
            reason,
            released_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Line payloads in sequence order
    pub fn payloads(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.payload.as_str()).collect()
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.records.iter().map(|r| r.sequence).collect()
    }
}

fn is_contiguous(sorted: &[Record]) -> bool {
    let gap_free = sorted
        .iter()
        .enumerate()
        .all(|(index, record)| record.sequence == index as u64);
    let last_marker_at_end = sorted.iter().rev().skip(1).all(|record| !record.is_last);
    gap_free && last_marker_at_end
}
