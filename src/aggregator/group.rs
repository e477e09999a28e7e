//! Mutable per-correlation-id state owned by the aggregator.

use super::timer::GroupTimer;
use crate::error::{PipelineError, Result};
use crate::models::{Batch, Record, ReleaseReason};
use crate::state_machine::GroupState;
use chrono::{DateTime, Utc};

#[derive(Debug)]
pub(crate) struct Group {
    correlation_id: String,
    /// Arrival order; sorted only when released
    records: Vec<Record>,
    created_at: DateTime<Utc>,
    released_at: Option<DateTime<Utc>>,
    state: GroupState,
    timer: Option<GroupTimer>,
}

impl Group {
    pub(crate) fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            records: Vec::new(),
            created_at: Utc::now(),
            released_at: None,
            state: GroupState::Open,
            timer: None,
        }
    }

    pub(crate) fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub(crate) fn state(&self) -> GroupState {
        self.state
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Milliseconds between creation and release, or now while still open
    pub(crate) fn age_ms(&self) -> i64 {
        (self.released_at.unwrap_or_else(Utc::now) - self.created_at).num_milliseconds()
    }

    pub(crate) fn timer_token(&self) -> Option<u64> {
        self.timer.as_ref().map(GroupTimer::token)
    }

    pub(crate) fn push(&mut self, record: Record) -> Result<()> {
        if !self.state.is_open() {
            return Err(PipelineError::late_record(
                &self.correlation_id,
                record.sequence,
                format!("group already {}", self.state),
            ));
        }
        self.records.push(record);
        Ok(())
    }

    /// Install a new timer, cancelling the previous one
    pub(crate) fn arm(&mut self, timer: GroupTimer) {
        if let Some(previous) = self.timer.replace(timer) {
            previous.cancel();
        }
    }

    pub(crate) fn take_timer(&mut self) -> Option<GroupTimer> {
        self.timer.take()
    }

    /// Move to `Released` and hand out the accumulated records as a batch
    pub(crate) fn release(&mut self, reason: ReleaseReason) -> Result<Batch> {
        self.transition(GroupState::Released)?;
        self.released_at = Some(Utc::now());
        let records = std::mem::take(&mut self.records);
        Ok(Batch::from_release(self.correlation_id.clone(), records, reason))
    }

    /// Move to `Expired`, dropping whatever was accumulated. Returns the number of dropped records.
    pub(crate) fn expire(&mut self) -> Result<usize> {
        self.transition(GroupState::Expired)?;
        let dropped = self.records.len();
        self.records.clear();
        Ok(dropped)
    }

    fn transition(&mut self, next: GroupState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::StateTransition {
                correlation_id: self.correlation_id.clone(),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(seq: u64) -> Record {
        Record::new("a.txt", seq, format!("line {seq}"), false)
    }

    async fn wait_until_finished(abort: &tokio::task::AbortHandle) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !abort.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("timer task should be aborted");
    }

    #[test]
    fn test_release_sorts_and_closes_group() {
        let mut group = Group::new("a.txt");
        for seq in [2, 0, 1] {
            group.push(record(seq)).unwrap();
        }
        assert_eq!(group.len(), 3);

        let batch = group.release(ReleaseReason::Timeout).unwrap();
        assert_eq!(batch.sequences(), vec![0, 1, 2]);
        assert!(!batch.complete);
        assert_eq!(group.state(), GroupState::Released);
        assert!(group.is_empty());
        assert!(group.released_at.unwrap() >= group.created_at);
        assert!(group.age_ms() >= 0);
    }

    #[test]
    fn test_closed_group_rejects_records() {
        let mut group = Group::new("a.txt");
        group.push(record(0)).unwrap();
        group.release(ReleaseReason::CountThreshold).unwrap();

        let err = group.push(record(1)).unwrap_err();
        assert!(matches!(err, PipelineError::LateRecord { sequence: 1, .. }));
        assert_eq!(group.correlation_id(), "a.txt");
    }

    #[test]
    fn test_group_leaves_open_exactly_once() {
        let mut group = Group::new("a.txt");
        assert_eq!(group.expire().unwrap(), 0);
        assert_eq!(group.state(), GroupState::Expired);

        assert!(matches!(
            group.release(ReleaseReason::Timeout),
            Err(PipelineError::StateTransition { .. })
        ));
        assert!(group.expire().is_err());
    }

    #[tokio::test]
    async fn test_release_cancels_timer() {
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let abort = handle.abort_handle();

        let mut group = Group::new("a.txt");
        group.arm(GroupTimer::from_handle(7, handle));
        assert_eq!(group.timer_token(), Some(7));
        group.push(record(0)).unwrap();
        group.release(ReleaseReason::CountThreshold).unwrap();

        assert_eq!(group.timer_token(), None);
        wait_until_finished(&abort).await;
    }

    #[tokio::test]
    async fn test_rearm_cancels_previous_timer() {
        let first = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let first_abort = first.abort_handle();
        let second = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        let mut group = Group::new("a.txt");
        group.arm(GroupTimer::from_handle(1, first));
        group.arm(GroupTimer::from_handle(2, second));

        assert_eq!(group.timer_token(), Some(2));
        wait_until_finished(&first_abort).await;
    }
}
