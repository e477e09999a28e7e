//! Release behaviour of the batch aggregator: count threshold, group timeout,
//! late records and shutdown flushing.

mod common;

use common::{aggregator, aggregator_config, aggregator_with_outlet, file_records, record};
use filebatch::config::{DropPolicy, SinkConfig};
use filebatch::error::PipelineError;
use filebatch::models::{Batch, Record, ReleaseReason};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

fn drain(receiver: &mut mpsc::Receiver<Batch>) -> Vec<Batch> {
    let mut batches = Vec::new();
    while let Ok(batch) = receiver.try_recv() {
        batches.push(batch);
    }
    batches
}

#[tokio::test(start_paused = true)]
async fn test_full_group_releases_immediately_and_complete() {
    let (aggregator, mut receiver) = aggregator(aggregator_config(5, 100, true));

    let mut released = None;
    for record in file_records("A", 5) {
        tokio::time::advance(Duration::from_millis(2)).await;
        if let Some(batch) = aggregator.submit(record).unwrap() {
            released = Some(batch);
        }
    }

    let batch = released.expect("fifth record releases the group");
    assert_eq!(batch.correlation_id, "A");
    assert_eq!(batch.sequences(), vec![0, 1, 2, 3, 4]);
    assert!(batch.complete);
    assert_eq!(batch.reason, ReleaseReason::CountThreshold);

    // count releases are returned to the caller, never pushed by a timer
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(drain(&mut receiver).is_empty());
    assert_eq!(aggregator.live_groups(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_partial_group_released_after_timeout() {
    let (aggregator, mut receiver) = aggregator(aggregator_config(5, 100, true));

    for seq in 0..3 {
        assert!(aggregator.submit(record("B", seq)).unwrap().is_none());
    }
    let last_submit = Instant::now();

    let batch = tokio::time::timeout(Duration::from_millis(150), receiver.recv())
        .await
        .expect("partial batch within the timeout window")
        .expect("outlet open");
    let waited = last_submit.elapsed();

    assert!(waited >= Duration::from_millis(100), "released early: {waited:?}");
    assert!(waited <= Duration::from_millis(120), "released late: {waited:?}");
    assert_eq!(batch.correlation_id, "B");
    assert_eq!(batch.sequences(), vec![0, 1, 2]);
    assert!(!batch.complete);
    assert_eq!(batch.reason, ReleaseReason::Timeout);

    let err = aggregator.submit(record("B", 3)).unwrap_err();
    assert!(matches!(err, PipelineError::LateRecord { sequence: 3, .. }));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(drain(&mut receiver).is_empty());
    assert_eq!(aggregator.stats().records_late, 1);
}

#[tokio::test(start_paused = true)]
async fn test_timer_restarts_on_each_record() {
    let (aggregator, mut receiver) = aggregator(aggregator_config(5, 100, true));
    let start = Instant::now();

    aggregator.submit(record("C", 0)).unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    aggregator.submit(record("C", 1)).unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    aggregator.submit(record("C", 2)).unwrap();
    assert!(drain(&mut receiver).is_empty());

    let batch = receiver.recv().await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(220));
    assert_eq!(batch.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_empty_group_expires_without_emission() {
    let (aggregator, mut receiver) = aggregator(aggregator_config(5, 100, true));

    assert!(aggregator.open("empty.txt").unwrap());
    assert_eq!(aggregator.live_groups(), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(drain(&mut receiver).is_empty());
    assert_eq!(aggregator.live_groups(), 0);
    assert_eq!(aggregator.stats().groups_expired, 1);
}

#[tokio::test(start_paused = true)]
async fn test_out_of_order_arrival_is_sorted() {
    let (aggregator, _receiver) = aggregator(aggregator_config(5, 100, true));

    let mut released = None;
    for seq in [4, 2, 0, 3, 1] {
        released = aggregator.submit(record("D", seq)).unwrap();
    }

    let batch = released.unwrap();
    assert_eq!(batch.sequences(), vec![0, 1, 2, 3, 4]);
    assert!(batch.complete);
    let payloads = batch.payloads();
    assert_eq!(payloads.first(), Some(&"D line 0"));
    assert_eq!(payloads.last(), Some(&"D line 4"));
}

#[tokio::test(start_paused = true)]
async fn test_gap_or_early_last_marker_is_not_complete() {
    let (aggregator, _receiver) = aggregator(aggregator_config(3, 100, true));

    aggregator.submit(record("gap", 0)).unwrap();
    aggregator.submit(record("gap", 1)).unwrap();
    let gap = aggregator.submit(record("gap", 3)).unwrap().unwrap();
    assert_eq!(gap.sequences(), vec![0, 1, 3]);
    assert!(!gap.complete);

    let mut early = record("early", 1);
    early.is_last = true;
    aggregator.submit(record("early", 0)).unwrap();
    aggregator.submit(early).unwrap();
    let batch = aggregator.submit(record("early", 2)).unwrap().unwrap();
    assert!(!batch.complete);
}

#[tokio::test(start_paused = true)]
async fn test_manual_timeout_wins_over_pending_timer() {
    let (aggregator, mut receiver) = aggregator(aggregator_config(5, 100, true));
    aggregator.submit(record("E", 0)).unwrap();
    aggregator.submit(record("E", 1)).unwrap();

    let batch = aggregator.on_timeout("E").unwrap();
    assert_eq!(batch.len(), 2);
    assert!(aggregator.on_timeout("E").is_none());
    assert!(aggregator.on_timeout("never-seen").is_none());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(drain(&mut receiver).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_discard_on_expiry_when_partial_release_disabled() {
    let (aggregator, mut receiver) = aggregator(aggregator_config(5, 100, false));

    aggregator.submit(record("F", 0)).unwrap();
    aggregator.submit(record("F", 1)).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(drain(&mut receiver).is_empty());
    assert_eq!(aggregator.stats().groups_discarded, 1);
    assert_eq!(aggregator.live_groups(), 0);

    // a discarded group is closed for good
    assert!(matches!(
        aggregator.submit(record("F", 2)),
        Err(PipelineError::LateRecord { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_open_groups_once() {
    let (aggregator, mut receiver) = aggregator(aggregator_config(5, 100, true));

    aggregator.submit(record("G", 0)).unwrap();
    aggregator.submit(record("G", 1)).unwrap();
    aggregator.submit(record("H", 0)).unwrap();
    aggregator.open("empty").unwrap();

    let summary = aggregator.shutdown().await;
    assert_eq!(summary.groups_flushed, 2);
    assert_eq!(summary.groups_expired, 1);
    assert_eq!(summary.timers_cancelled, 3);
    assert_eq!(summary.deliveries_failed, 0);
    assert!(!summary.already_shut_down);
    assert!(aggregator.is_shut_down());

    let mut flushed = drain(&mut receiver);
    flushed.sort_by(|a, b| a.correlation_id.cmp(&b.correlation_id));
    assert_eq!(flushed.len(), 2);
    assert_eq!(flushed[0].correlation_id, "G");
    assert_eq!(flushed[0].sequences(), vec![0, 1]);
    assert!(flushed.iter().all(|b| b.reason == ReleaseReason::Shutdown && !b.complete));

    // cancelled timers never fire
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(drain(&mut receiver).is_empty());

    let again = aggregator.shutdown().await;
    assert!(again.already_shut_down);
    assert_eq!(again.groups_flushed, 0);
}

fn single_slot_outlet() -> SinkConfig {
    SinkConfig {
        queue_capacity: 1,
        drop_policy: DropPolicy::Block,
        enqueue_timeout_ms: 10_000,
        ..SinkConfig::default()
    }
}

fn filler() -> Batch {
    Batch::from_release(
        "filler",
        vec![Record::new("filler", 0, "filler", true)],
        ReleaseReason::Timeout,
    )
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_timer_callback_blocked_on_full_queue() {
    let (aggregator, mut receiver) =
        aggregator_with_outlet(aggregator_config(5, 100, true), &single_slot_outlet());
    aggregator.deliver(filler()).await.unwrap();

    aggregator.submit(record("I", 0)).unwrap();
    // the timer fires at 100ms and its callback waits for queue space
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(aggregator.live_groups(), 0);

    let shutdown = tokio::spawn({
        let aggregator = aggregator.clone();
        async move { aggregator.shutdown().await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(!shutdown.is_finished(), "shutdown returned while a callback was running");

    // making room lets the callback finish, and only then shutdown completes
    assert_eq!(receiver.recv().await.unwrap().correlation_id, "filler");
    let summary = shutdown.await.unwrap();
    assert_eq!(summary.groups_flushed, 0);
    assert_eq!(summary.deliveries_failed, 0);

    let batch = receiver.try_recv().expect("callback delivered before shutdown returned");
    assert_eq!(batch.correlation_id, "I");
    assert_eq!(batch.reason, ReleaseReason::Timeout);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(drain(&mut receiver).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_outlasts_callback_that_gives_up_on_full_queue() {
    let (aggregator, mut receiver) =
        aggregator_with_outlet(aggregator_config(5, 100, true), &single_slot_outlet());
    aggregator.deliver(filler()).await.unwrap();

    aggregator.submit(record("J", 0)).unwrap();
    aggregator.submit(record("K", 0)).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let started = Instant::now();
    let summary = aggregator.shutdown().await;
    let waited = started.elapsed();

    // both callbacks held shutdown until their enqueue timeout ran out
    assert!(waited >= Duration::from_millis(9_000), "returned after {waited:?}");
    assert_eq!(summary.groups_flushed, 0);
    assert_eq!(aggregator.stats().partial_batches, 2);

    assert_eq!(receiver.recv().await.unwrap().correlation_id, "filler");
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(drain(&mut receiver).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_submit_after_shutdown_never_mutates_state() {
    let (aggregator, _receiver) = aggregator(aggregator_config(5, 100, true));
    aggregator.shutdown().await;
    let before = aggregator.stats();

    let err = aggregator.submit(record("late", 0)).unwrap_err();
    assert!(matches!(err, PipelineError::ShutDown { .. }));
    assert!(aggregator.open("late").is_err());

    let after = aggregator.stats();
    assert_eq!(after.live_groups, 0);
    assert_eq!(after.records_accepted, before.records_accepted);
    assert_eq!(after.records_rejected, before.records_rejected + 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_one_batch_per_id_under_contention() {
    const IDS: usize = 64;
    const RECORDS: u64 = 5;

    // the timeout is short enough to race the count threshold
    let (aggregator, mut receiver) = aggregator(aggregator_config(RECORDS as usize, 1, true));
    let aggregator = Arc::new(aggregator);

    let mut tasks = Vec::new();
    for id in 0..IDS {
        for seq in 0..RECORDS {
            let aggregator = Arc::clone(&aggregator);
            tasks.push(tokio::spawn(async move {
                if seq % 2 == 1 {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                aggregator.submit(record(&format!("id-{id}"), seq))
            }));
        }
    }

    let mut released: Vec<Batch> = Vec::new();
    let mut late = 0u64;
    for task in tasks {
        match task.await.unwrap() {
            Ok(Some(batch)) => released.push(batch),
            Ok(None) => {}
            Err(PipelineError::LateRecord { .. }) => late += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    aggregator.shutdown().await;
    released.extend(drain(&mut receiver));

    let mut per_id: HashMap<String, usize> = HashMap::new();
    for batch in &released {
        *per_id.entry(batch.correlation_id.clone()).or_default() += 1;
    }
    assert_eq!(per_id.len(), IDS);
    assert!(per_id.values().all(|count| *count == 1), "double release: {per_id:?}");

    let emitted: u64 = released.iter().map(|b| b.len() as u64).sum();
    assert_eq!(emitted + late, IDS as u64 * RECORDS);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_released_batch_is_sorted_and_complete(
        order in (1u64..20).prop_flat_map(|n| Just((0..n).collect::<Vec<u64>>()).prop_shuffle())
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();
        let batch = runtime.block_on(async {
            let (aggregator, _receiver) = aggregator(aggregator_config(order.len(), 100, true));
            let mut released = None;
            for seq in &order {
                released = aggregator.submit(record("prop", *seq)).unwrap();
            }
            released
        });

        let batch = batch.expect("threshold reached");
        let expected: Vec<u64> = (0..order.len() as u64).collect();
        prop_assert_eq!(batch.sequences(), expected);
        prop_assert!(batch.complete);
    }

    #[test]
    fn prop_complete_iff_contiguous(
        sequences in proptest::collection::btree_set(0u64..30, 1..10)
            .prop_flat_map(|set| Just(set.into_iter().collect::<Vec<u64>>()).prop_shuffle())
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();
        let batch = runtime.block_on(async {
            let (aggregator, _receiver) = aggregator(aggregator_config(sequences.len(), 100, true));
            let mut released = None;
            for seq in &sequences {
                released = aggregator.submit(record("prop", *seq)).unwrap();
            }
            released
        });

        let batch = batch.expect("threshold reached");
        let max = *sequences.iter().max().unwrap();
        prop_assert_eq!(batch.complete, max + 1 == sequences.len() as u64);
        prop_assert!(batch.sequences().windows(2).all(|w| w[0] < w[1]));
    }
}
