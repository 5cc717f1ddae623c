//! # Aggregation Pool
//!
//! A fixed set of worker threads drains one bounded queue. Each worker
//! validates the item, routes it to its shard and merges it under that
//! shard's lock. Workers exit once the producer has closed the queue and
//! everything already queued has been merged.
//!
//! Workers never look at the cancellation token: merges are short, and
//! cancellation is handled by the producer closing the queue early.

use crate::model::{MergeOutcome, Record};
use crate::partitioned::ShardedStore;
use crate::validator::{self, Rejection};
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::Receiver;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use tracing::{debug, error, instrument};

/// One slot of the work queue. `None` stands for a record the source could
/// not produce; it is rejected like any other invalid record.
pub type QueueItem = Option<Record>;

/// Live counters shared by all workers.
#[derive(Debug, Default)]
pub struct PoolStats {
    received: AtomicU64,
    rejected: AtomicU64,
    missing_records: AtomicU64,
    empty_ids: AtomicU64,
    empty_user_ids: AtomicU64,
    empty_types: AtomicU64,
    events_counted: AtomicU64,
    duplicate_events: AtomicU64,
    attributes_written: AtomicU64,
    attributes_stale: AtomicU64,
    ignored: AtomicU64,
}

impl PoolStats {
    #[inline]
    fn record_rejection(&self, rejection: Rejection) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        let reason = match rejection {
            Rejection::MissingRecord => &self.missing_records,
            Rejection::EmptyId => &self.empty_ids,
            Rejection::EmptyUserId => &self.empty_user_ids,
            Rejection::EmptyType => &self.empty_types,
        };
        reason.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_outcome(&self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::AttributesApplied { written, stale } => {
                self.attributes_written
                    .fetch_add(written as u64, Ordering::Relaxed);
                self.attributes_stale
                    .fetch_add(stale as u64, Ordering::Relaxed);
            }
            MergeOutcome::EventCounted => {
                self.events_counted.fetch_add(1, Ordering::Relaxed);
            }
            MergeOutcome::DuplicateEvent => {
                self.duplicate_events.fetch_add(1, Ordering::Relaxed);
            }
            MergeOutcome::Ignored => {
                self.ignored.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            missing_records: self.missing_records.load(Ordering::Relaxed),
            empty_ids: self.empty_ids.load(Ordering::Relaxed),
            empty_user_ids: self.empty_user_ids.load(Ordering::Relaxed),
            empty_types: self.empty_types.load(Ordering::Relaxed),
            events_counted: self.events_counted.load(Ordering::Relaxed),
            duplicate_events: self.duplicate_events.load(Ordering::Relaxed),
            attributes_written: self.attributes_written.load(Ordering::Relaxed),
            attributes_stale: self.attributes_stale.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PoolStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatsSnapshot {
    /// Queue items taken by workers, valid or not.
    pub received: u64,
    /// Items dropped by the validator, over all reasons below.
    pub rejected: u64,
    /// Undecodable or absent records.
    pub missing_records: u64,
    pub empty_ids: u64,
    pub empty_user_ids: u64,
    pub empty_types: u64,
    pub events_counted: u64,
    pub duplicate_events: u64,
    /// Attribute keys stored (new or newer).
    pub attributes_written: u64,
    /// Attribute keys that lost to an equal or newer timestamp.
    pub attributes_stale: u64,
    /// Valid records with an unrecognized type.
    pub ignored: u64,
}

impl PoolStatsSnapshot {
    /// Items that passed validation and reached a shard.
    pub fn merged(&self) -> u64 {
        self.received - self.rejected
    }
}

/// Fixed-size pool of aggregation workers.
#[derive(Debug)]
pub struct AggregationPool {
    worker_count: usize,
    stats: PoolStats,
}

impl AggregationPool {
    /// A worker count of zero is treated as one.
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
            stats: PoolStats::default(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.stats.snapshot()
    }

    /// Drain `queue` into `store` until every sender is dropped and the
    /// queue is empty. Blocks until all workers have exited.
    #[instrument(skip(self, store, queue), fields(workers = self.worker_count))]
    pub fn run(
        &self,
        store: &ShardedStore,
        queue: Receiver<QueueItem>,
    ) -> Result<PoolStatsSnapshot> {
        thread::scope(|scope| -> Result<()> {
            let mut handles = Vec::with_capacity(self.worker_count);
            for worker_id in 0..self.worker_count {
                let queue = queue.clone();
                let stats = &self.stats;
                let handle = thread::Builder::new()
                    .name(format!("usermerge-worker-{worker_id}"))
                    .spawn_scoped(scope, move || worker_loop(worker_id, store, queue, stats))
                    .with_context(|| format!("failed to spawn aggregation worker {worker_id}"))?;
                handles.push(handle);
            }
            drop(queue);

            join_workers(handles.into_iter().map(|handle| handle.join()))
        })?;

        Ok(self.stats.snapshot())
    }
}

/// Consume every worker's join result, then report the first panic.
///
/// All results are drained before returning so no handle is left unjoined.
fn join_workers(results: impl IntoIterator<Item = thread::Result<u64>>) -> Result<()> {
    let mut first_failure = None;
    for (worker_id, result) in results.into_iter().enumerate() {
        match result {
            Ok(processed) => debug!(worker_id, processed, "worker finished"),
            Err(_) => {
                error!(worker_id, "aggregation worker panicked");
                first_failure.get_or_insert(worker_id);
            }
        }
    }
    match first_failure {
        Some(worker_id) => Err(anyhow!("aggregation worker {worker_id} panicked")),
        None => Ok(()),
    }
}

fn worker_loop(
    worker_id: usize,
    store: &ShardedStore,
    queue: Receiver<QueueItem>,
    stats: &PoolStats,
) -> u64 {
    let mut processed = 0u64;
    for item in queue.iter() {
        processed += 1;
        stats.received.fetch_add(1, Ordering::Relaxed);
        match validator::admit(item) {
            Ok(record) => stats.record_outcome(store.apply(record)),
            Err(rejection) => {
                debug!(worker_id, %rejection, "dropping invalid record");
                stats.record_rejection(rejection);
            }
        }
    }
    processed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn feed(items: Vec<QueueItem>, capacity: usize) -> Receiver<QueueItem> {
        let (tx, rx) = bounded(capacity);
        thread::spawn(move || {
            for item in items {
                if tx.send(item).is_err() {
                    break;
                }
            }
        });
        rx
    }

    #[test]
    fn test_empty_queue_finishes_immediately() {
        let store = ShardedStore::new(4);
        let (tx, rx) = bounded::<QueueItem>(1);
        drop(tx);

        let stats = AggregationPool::new(3).run(&store, rx).unwrap();
        assert_eq!(stats, PoolStatsSnapshot::default());
        assert_eq!(store.user_count(), 0);
    }

    #[test]
    fn test_invalid_items_never_reach_a_shard() {
        let store = ShardedStore::new(4);
        let items = vec![
            None,
            Some(Record::event("", "u1", "login", 1)),
            Some(Record::event("1", "", "login", 1)),
            Some(Record {
                kind: " ".to_string(),
                ..Record::event("2", "u2", "login", 1)
            }),
        ];

        let stats = AggregationPool::new(2).run(&store, feed(items, 2)).unwrap();

        assert_eq!(stats.received, 4);
        assert_eq!(stats.rejected, 4);
        assert_eq!(stats.missing_records, 1);
        assert_eq!(stats.empty_ids, 1);
        assert_eq!(stats.empty_user_ids, 1);
        assert_eq!(stats.empty_types, 1);
        assert_eq!(stats.merged(), 0);
        assert_eq!(store.user_count(), 0);
    }

    #[test]
    fn test_outcomes_are_counted() {
        let store = ShardedStore::new(4);
        let mut unknown = Record::event("9", "u3", "", 0);
        unknown.kind = "pageview".to_string();
        let items = vec![
            Some(Record::event("1", "u1", "login", 10)),
            Some(Record::event("1", "u1", "login", 11)),
            Some(Record::attributes("2", "u1", [("plan", "pro")], 5)),
            Some(Record::attributes("3", "u1", [("plan", "free")], 20)),
            Some(Record::attributes("4", "u1", [("plan", "old")], 1)),
            Some(unknown),
        ];

        // Single worker so the stale/written split is deterministic.
        let stats = AggregationPool::new(1).run(&store, feed(items, 1)).unwrap();

        assert_eq!(stats.received, 6);
        assert_eq!(stats.events_counted, 1);
        assert_eq!(stats.duplicate_events, 1);
        assert_eq!(stats.attributes_written, 2);
        assert_eq!(stats.attributes_stale, 1);
        assert_eq!(stats.ignored, 1);
        assert_eq!(store.user_count(), 2);
        let u1 = store.user("u1").unwrap();
        assert_eq!(u1.attribute("plan").unwrap().value, "free");
    }

    #[test]
    fn test_many_workers_many_shards() {
        let store = ShardedStore::new(16);
        let mut items = Vec::new();
        for i in 0..5_000 {
            let user_id = format!("user-{}", i % 97);
            items.push(Some(Record::event(format!("e{i}"), user_id.clone(), "view", i)));
            // Replays of every event id must not be counted again.
            items.push(Some(Record::event(format!("e{i}"), user_id, "view", i)));
        }

        let stats = AggregationPool::new(8).run(&store, feed(items, 64)).unwrap();

        assert_eq!(stats.received, 10_000);
        assert_eq!(stats.events_counted, 5_000);
        assert_eq!(stats.duplicate_events, 5_000);
        let total: u64 = store.snapshot().values().map(|u| u.event_count("view")).sum();
        assert_eq!(total, 5_000);
    }

    #[test]
    fn test_rejections_are_counted_by_reason() {
        let store = ShardedStore::new(2);
        let items = vec![
            None,
            None,
            Some(Record::event(" ", "u1", "login", 1)),
            Some(Record::event("1", "u1", "login", 1)),
        ];

        let stats = AggregationPool::new(2).run(&store, feed(items, 4)).unwrap();

        assert_eq!(stats.rejected, 3);
        assert_eq!(stats.missing_records, 2);
        assert_eq!(stats.empty_ids, 1);
        assert_eq!(stats.empty_user_ids + stats.empty_types, 0);
        assert_eq!(stats.merged(), 1);
    }

    #[test]
    fn test_every_panicked_worker_is_joined_before_reporting() {
        let err = thread::scope(|scope| {
            let handles: Vec<_> = (0..4u64)
                .map(|i| {
                    scope.spawn(move || {
                        if i % 2 == 1 {
                            panic!("worker {i} failed");
                        }
                        i
                    })
                })
                .collect();
            join_workers(handles.into_iter().map(|handle| handle.join()))
        })
        .unwrap_err();

        assert_eq!(err.to_string(), "aggregation worker 1 panicked");
    }

    #[test]
    fn test_join_workers_ok_when_none_panic() {
        assert!(join_workers(vec![Ok(3), Ok(0)]).is_ok());
    }

    #[test]
    fn test_zero_workers_clamps_to_one() {
        assert_eq!(AggregationPool::new(0).worker_count(), 1);
    }
}
