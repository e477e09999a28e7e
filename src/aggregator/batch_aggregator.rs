//! # Batch Aggregator
//!
//! Correlates sequenced records into groups and releases each group exactly
//! once, either when it reaches the count threshold or when its timer fires.
//!
//! ## Architecture
//!
//! ```text
//! submit(record) ──→ groups: DashMap<id, Arc<Mutex<Group>>>
//!                        │
//!                        ├─ count reached ─→ release + cancel timer ─→ Ok(Some(batch))
//!                        └─ still open ───→ re-arm GroupTimer
//!
//! GroupTimer fires ──→ callback gate (read) ──→ evaluate_timeout ──→ BatchOutlet
//!
//! shutdown() ──→ lifecycle (write) ──→ flush open groups ──→ callback gate (write)
//! ```
//!
//! Every release decision happens under the owning group's lock, and timer
//! cancellation is part of the same critical section, so a count release and
//! a timeout can never both emit for one group. Released ids are remembered so
//! that late records are rejected instead of opening a second group.

use super::group::Group;
use super::outlet::BatchOutlet;
use super::timer::GroupTimer;
use crate::config::AggregatorConfig;
use crate::constants::events;
use crate::error::{PipelineError, Result};
use crate::logging::{log_batch_operation, log_error};
use crate::models::{Batch, Record, ReleaseReason};
use crate::state_machine::GroupState;
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Running,
    Closed,
}

/// Point-in-time counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregatorStats {
    pub records_accepted: u64,
    pub records_late: u64,
    pub records_rejected: u64,
    pub batches_released: u64,
    pub partial_batches: u64,
    pub groups_expired: u64,
    pub groups_discarded: u64,
    pub live_groups: usize,
}

/// Outcome of [`BatchAggregator::shutdown`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownSummary {
    pub groups_flushed: usize,
    pub groups_expired: usize,
    pub timers_cancelled: usize,
    pub deliveries_failed: usize,
    /// Set when an earlier call already shut the aggregator down
    pub already_shut_down: bool,
}

#[derive(Default)]
struct AtomicStats {
    records_accepted: AtomicU64,
    records_late: AtomicU64,
    records_rejected: AtomicU64,
    batches_released: AtomicU64,
    partial_batches: AtomicU64,
    groups_expired: AtomicU64,
    groups_discarded: AtomicU64,
}

struct AggregatorInner {
    config: AggregatorConfig,
    groups: DashMap<String, Arc<Mutex<Group>>>,
    /// Ids whose group emitted or discarded records; late records for them are rejected
    retired: DashMap<String, GroupState>,
    /// Held for reading by submit/open, for writing by shutdown
    lifecycle: RwLock<Lifecycle>,
    /// Held for reading by running timer callbacks; `false` once shut down
    callback_gate: tokio::sync::RwLock<bool>,
    shutdown_serial: tokio::sync::Mutex<()>,
    next_timer_token: AtomicU64,
    stats: AtomicStats,
    outlet: BatchOutlet,
    runtime: Handle,
}

/// Cloneable handle to the aggregation engine
#[derive(Clone)]
pub struct BatchAggregator {
    inner: Arc<AggregatorInner>,
}

impl std::fmt::Debug for BatchAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchAggregator")
            .field("config", &self.inner.config)
            .field("live_groups", &self.inner.groups.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl BatchAggregator {
    /// Create an aggregator that delivers timer-driven releases to `outlet`.
    ///
    /// Must be called from within a Tokio runtime; group timers are spawned on it.
    pub fn new(config: AggregatorConfig, outlet: BatchOutlet) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| {
            PipelineError::runtime(format!("batch aggregator requires a Tokio runtime: {e}"))
        })?;

        info!(
            count_threshold = config.count_threshold,
            group_timeout_ms = config.group_timeout_ms,
            send_partial_on_expiry = config.send_partial_on_expiry,
            "Batch aggregator initialized"
        );

        Ok(Self {
            inner: Arc::new(AggregatorInner {
                config,
                groups: DashMap::new(),
                retired: DashMap::new(),
                lifecycle: RwLock::new(Lifecycle::Running),
                callback_gate: tokio::sync::RwLock::new(true),
                shutdown_serial: tokio::sync::Mutex::new(()),
                next_timer_token: AtomicU64::new(1),
                stats: AtomicStats::default(),
                outlet,
                runtime,
            }),
        })
    }

    /// Register one record with its group.
    ///
    /// Returns the batch when this record completes the group. Calls for the
    /// same correlation id are serialised; different ids proceed in parallel.
    pub fn submit(&self, record: Record) -> Result<Option<Batch>> {
        let result = self.inner.submit(record);
        if let Err(e) = &result {
            self.inner.report_rejection(e);
        }
        result
    }

    /// Open an empty group and arm its timer.
    ///
    /// Returns `false` when the group already exists. An empty group that
    /// times out expires without emitting anything.
    pub fn open(&self, correlation_id: &str) -> Result<bool> {
        let result = self.inner.open(correlation_id);
        if let Err(e) = &result {
            self.inner.report_rejection(e);
        }
        result
    }

    /// Evaluate the timeout rule for a group right now.
    ///
    /// Group timers call this path on their own and deliver the result to the
    /// outlet; calling it directly forces the decision and returns the batch
    /// to the caller instead.
    pub fn on_timeout(&self, correlation_id: &str) -> Option<Batch> {
        self.inner.evaluate_timeout(correlation_id, None)
    }

    /// Hand a batch to the sink outlet
    pub async fn deliver(&self, batch: Batch) -> Result<()> {
        self.inner.outlet.deliver(batch).await
    }

    /// Flush all open groups as partial batches and stop accepting records.
    ///
    /// Pending timers are cancelled and in-flight timer callbacks are drained
    /// before this returns. Calling it again is a no-op.
    pub async fn shutdown(&self) -> ShutdownSummary {
        self.inner.shutdown().await
    }

    pub fn is_shut_down(&self) -> bool {
        *self.inner.lifecycle.read() == Lifecycle::Closed
    }

    /// Groups currently open
    pub fn live_groups(&self) -> usize {
        self.inner.groups.len()
    }

    pub fn stats(&self) -> AggregatorStats {
        let stats = &self.inner.stats;
        AggregatorStats {
            records_accepted: stats.records_accepted.load(Ordering::Relaxed),
            records_late: stats.records_late.load(Ordering::Relaxed),
            records_rejected: stats.records_rejected.load(Ordering::Relaxed),
            batches_released: stats.batches_released.load(Ordering::Relaxed),
            partial_batches: stats.partial_batches.load(Ordering::Relaxed),
            groups_expired: stats.groups_expired.load(Ordering::Relaxed),
            groups_discarded: stats.groups_discarded.load(Ordering::Relaxed),
            live_groups: self.inner.groups.len(),
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.inner.config
    }
}

impl AggregatorInner {
    fn submit(self: &Arc<Self>, record: Record) -> Result<Option<Batch>> {
        let lifecycle = self.lifecycle.read();
        if *lifecycle == Lifecycle::Closed {
            return Err(PipelineError::shut_down(record.correlation_id));
        }

        let group_ref = self.live_group(&record.correlation_id, record.sequence)?;
        self.push_into(group_ref, record)
    }

    /// Add the record to `group_ref`, or to a fresh group when that one
    /// expired empty between lookup and lock.
    fn push_into(
        self: &Arc<Self>,
        group_ref: Arc<Mutex<Group>>,
        record: Record,
    ) -> Result<Option<Batch>> {
        let mut group_ref = group_ref;
        let mut group = group_ref.lock();
        if group.state() == GroupState::Expired
            && !self.retired.contains_key(&record.correlation_id)
        {
            drop(group);
            group_ref = self.live_group(&record.correlation_id, record.sequence)?;
            group = group_ref.lock();
        }
        group.push(record)?;
        self.stats.records_accepted.fetch_add(1, Ordering::Relaxed);

        if group.len() >= self.config.count_threshold {
            let batch = group.release(ReleaseReason::CountThreshold)?;
            self.retire(&group_ref, group.correlation_id(), GroupState::Released);
            self.stats.batches_released.fetch_add(1, Ordering::Relaxed);
            self.log_release(&batch, group.age_ms());
            return Ok(Some(batch));
        }

        let timer = self.arm_timer(group.correlation_id());
        group.arm(timer);
        Ok(None)
    }

    fn open(self: &Arc<Self>, correlation_id: &str) -> Result<bool> {
        let lifecycle = self.lifecycle.read();
        if *lifecycle == Lifecycle::Closed {
            return Err(PipelineError::shut_down(correlation_id));
        }

        if self.groups.contains_key(correlation_id) {
            return Ok(false);
        }
        let group_ref = self.live_group(correlation_id, 0)?;
        let mut group = group_ref.lock();
        if group.is_empty() && group.timer_token().is_none() && group.state().is_open() {
            let timer = self.arm_timer(correlation_id);
            group.arm(timer);
        }
        Ok(true)
    }

    /// Fetch the open group for `correlation_id`, creating it unless the id was retired
    fn live_group(&self, correlation_id: &str, sequence: u64) -> Result<Arc<Mutex<Group>>> {
        match self.groups.entry(correlation_id.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                if let Some(state) = self.retired.get(correlation_id) {
                    return Err(PipelineError::late_record(
                        correlation_id,
                        sequence,
                        format!("group already {}", *state),
                    ));
                }
                let group = Arc::new(Mutex::new(Group::new(correlation_id)));
                entry.insert(Arc::clone(&group));
                debug!(
                    correlation_id = %correlation_id,
                    operation = events::GROUP_OPENED,
                    "Group opened"
                );
                Ok(group)
            }
        }
    }

    /// Tombstone the id, then drop the live entry. Caller holds the group lock.
    fn retire(&self, group_ref: &Arc<Mutex<Group>>, correlation_id: &str, state: GroupState) {
        self.retired.insert(correlation_id.to_string(), state);
        self.groups
            .remove_if(correlation_id, |_, live| Arc::ptr_eq(live, group_ref));
    }

    fn forget(&self, group_ref: &Arc<Mutex<Group>>, correlation_id: &str) {
        self.groups
            .remove_if(correlation_id, |_, live| Arc::ptr_eq(live, group_ref));
    }

    fn arm_timer(self: &Arc<Self>, correlation_id: &str) -> GroupTimer {
        let token = self.next_timer_token.fetch_add(1, Ordering::Relaxed);
        let weak = Arc::downgrade(self);
        let correlation_id = correlation_id.to_string();

        GroupTimer::spawn(
            &self.runtime,
            token,
            self.config.group_timeout(),
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.fire_timer(&correlation_id, token).await;
                }
            },
        )
    }

    async fn fire_timer(&self, correlation_id: &str, token: u64) {
        let gate = self.callback_gate.read().await;
        if !*gate {
            return;
        }

        if let Some(batch) = self.evaluate_timeout(correlation_id, Some(token)) {
            if let Err(e) = self.outlet.deliver(batch).await {
                log_error(
                    "aggregator",
                    events::BATCH_REJECTED,
                    Some(correlation_id),
                    &e.to_string(),
                );
            }
        }
        drop(gate);
    }

    /// Apply the timeout rule. `token` is set when called from a timer, which
    /// only acts if it is still the group's current timer.
    fn evaluate_timeout(&self, correlation_id: &str, token: Option<u64>) -> Option<Batch> {
        let group_ref = self
            .groups
            .get(correlation_id)
            .map(|entry| Arc::clone(entry.value()))?;
        let mut group = group_ref.lock();

        if !group.state().is_open() {
            return None;
        }
        if token.is_some() && group.timer_token() != token {
            return None;
        }
        match (group.take_timer(), token) {
            (Some(timer), Some(_)) => timer.detach(),
            (Some(timer), None) => timer.cancel(),
            (None, _) => {}
        }

        if group.is_empty() {
            return match group.expire() {
                Ok(_) => {
                    self.forget(&group_ref, correlation_id);
                    self.stats.groups_expired.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        correlation_id = %correlation_id,
                        operation = events::GROUP_EXPIRED,
                        "Group expired with no records"
                    );
                    None
                }
                Err(e) => {
                    log_error("aggregator", events::GROUP_EXPIRED, Some(correlation_id), &e.to_string());
                    None
                }
            };
        }

        if !self.config.send_partial_on_expiry {
            return match group.expire() {
                Ok(dropped) => {
                    self.retire(&group_ref, correlation_id, GroupState::Expired);
                    self.stats.groups_discarded.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        correlation_id = %correlation_id,
                        operation = events::GROUP_DISCARDED,
                        dropped_records = dropped,
                        "Group timed out; partial release disabled, records discarded"
                    );
                    None
                }
                Err(e) => {
                    log_error("aggregator", events::GROUP_DISCARDED, Some(correlation_id), &e.to_string());
                    None
                }
            };
        }

        match group.release(ReleaseReason::Timeout) {
            Ok(batch) => {
                self.retire(&group_ref, correlation_id, GroupState::Released);
                self.stats.batches_released.fetch_add(1, Ordering::Relaxed);
                self.stats.partial_batches.fetch_add(1, Ordering::Relaxed);
                self.log_release(&batch, group.age_ms());
                Some(batch)
            }
            Err(e) => {
                log_error("aggregator", events::BATCH_RELEASED, Some(correlation_id), &e.to_string());
                None
            }
        }
    }

    async fn shutdown(&self) -> ShutdownSummary {
        let _serial = self.shutdown_serial.lock().await;

        {
            let mut lifecycle = self.lifecycle.write();
            if *lifecycle == Lifecycle::Closed {
                return ShutdownSummary {
                    already_shut_down: true,
                    ..ShutdownSummary::default()
                };
            }
            *lifecycle = Lifecycle::Closed;
        }

        let mut summary = ShutdownSummary::default();
        let live: Vec<(String, Arc<Mutex<Group>>)> = self
            .groups
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut flushed = Vec::new();
        for (correlation_id, group_ref) in live {
            let mut group = group_ref.lock();
            if let Some(timer) = group.take_timer() {
                timer.cancel();
                summary.timers_cancelled += 1;
            }
            if !group.state().is_open() {
                continue;
            }

            if group.is_empty() {
                if group.expire().is_ok() {
                    self.forget(&group_ref, &correlation_id);
                    self.stats.groups_expired.fetch_add(1, Ordering::Relaxed);
                    summary.groups_expired += 1;
                }
                continue;
            }

            match group.release(ReleaseReason::Shutdown) {
                Ok(batch) => {
                    self.retire(&group_ref, &correlation_id, GroupState::Released);
                    self.stats.batches_released.fetch_add(1, Ordering::Relaxed);
                    self.stats.partial_batches.fetch_add(1, Ordering::Relaxed);
                    self.log_release(&batch, group.age_ms());
                    flushed.push(batch);
                }
                Err(e) => log_error(
                    "aggregator",
                    events::AGGREGATOR_SHUTDOWN,
                    Some(correlation_id.as_str()),
                    &e.to_string(),
                ),
            }
        }
        summary.groups_flushed = flushed.len();

        // Waits for every in-flight timer callback; later ones see the closed gate.
        *self.callback_gate.write().await = false;

        for batch in flushed {
            let correlation_id = batch.correlation_id.clone();
            if let Err(e) = self.outlet.deliver(batch).await {
                summary.deliveries_failed += 1;
                log_error(
                    "aggregator",
                    events::AGGREGATOR_SHUTDOWN,
                    Some(correlation_id.as_str()),
                    &e.to_string(),
                );
            }
        }

        info!(
            operation = events::AGGREGATOR_SHUTDOWN,
            groups_flushed = summary.groups_flushed,
            groups_expired = summary.groups_expired,
            timers_cancelled = summary.timers_cancelled,
            deliveries_failed = summary.deliveries_failed,
            "Batch aggregator shut down"
        );
        summary
    }

    fn report_rejection(&self, error: &PipelineError) {
        match error {
            PipelineError::LateRecord {
                correlation_id,
                sequence,
                reason,
            } => {
                self.stats.records_late.fetch_add(1, Ordering::Relaxed);
                warn!(
                    correlation_id = %correlation_id,
                    operation = events::RECORD_LATE,
                    sequence = sequence,
                    reason = %reason,
                    "Late record dropped"
                );
            }
            other => {
                self.stats.records_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    correlation_id = ?other.correlation_id(),
                    operation = events::RECORD_REJECTED,
                    reason = other.kind(),
                    error = %other,
                    "Record rejected"
                );
            }
        }
    }

    fn log_release(&self, batch: &Batch, group_age_ms: i64) {
        log_batch_operation(
            events::BATCH_RELEASED,
            &batch.correlation_id,
            Some(batch.batch_id),
            batch.len(),
            &batch.reason.to_string(),
            Some(format!("complete={} group_age_ms={group_age_ms}", batch.complete).as_str()),
        );
    }
}
