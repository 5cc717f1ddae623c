//! # Partitioned Aggregate State
//!
//! The user keyspace is split across a fixed set of shards. Each shard owns
//! its users exclusively behind its own mutex, so two records for users on
//! different shards never contend.
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            │   Partitioner (string hash)  │
//!            └──────────────────────────────┘
//!               │            │            │
//!               ▼            ▼            ▼
//!           Shard 0      Shard 1  ...  Shard N-1
//!          (Mutex)       (Mutex)       (Mutex)
//! ```
//!
//! Shards are allocated once and never resized.

use crate::model::{MergeOutcome, Record, UserAggregate};
use crate::sharding::Partitioner;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

/// Users owned by a single shard.
#[derive(Debug, Default)]
pub struct Shard {
    users: FxHashMap<String, UserAggregate>,
}

impl Shard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a validated record, creating the user's aggregate on first sight.
    pub fn apply(&mut self, record: Record) -> MergeOutcome {
        // Avoid cloning the key when the user already exists.
        if let Some(user) = self.users.get_mut(&record.user_id) {
            return user.apply(record);
        }
        let user = self.users.entry(record.user_id.clone()).or_default();
        user.apply(record)
    }

    pub fn user(&self, user_id: &str) -> Option<&UserAggregate> {
        self.users.get(user_id)
    }

    pub fn users(&self) -> impl Iterator<Item = (&str, &UserAggregate)> {
        self.users.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Fixed set of independently locked shards.
pub struct ShardedStore {
    shards: Vec<Mutex<Shard>>,
    partitioner: Partitioner,
}

impl ShardedStore {
    pub fn new(shard_count: usize) -> Self {
        let partitioner = Partitioner::new(shard_count);
        let shards = (0..partitioner.shard_count())
            .map(|_| Mutex::new(Shard::new()))
            .collect();
        debug!(shards = partitioner.shard_count(), "allocated shard store");
        Self {
            shards,
            partitioner,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn partitioner(&self) -> &Partitioner {
        &self.partitioner
    }

    #[inline]
    pub fn shard_for(&self, user_id: &str) -> usize {
        self.partitioner.shard_index(user_id)
    }

    /// Route a validated record to its shard and merge it under that shard's lock.
    ///
    /// The lock is held only for the duration of the merge.
    #[inline]
    pub fn apply(&self, record: Record) -> MergeOutcome {
        let index = self.shard_for(&record.user_id);
        let mut shard = self.shards[index].lock();
        shard.apply(record)
    }

    /// Run `f` against a shard while holding its lock.
    pub fn with_shard<T>(&self, index: usize, f: impl FnOnce(&Shard) -> T) -> Option<T> {
        self.shards.get(index).map(|shard| {
            let guard = shard.lock();
            f(&guard)
        })
    }

    /// Clone of a single user's aggregate.
    pub fn user(&self, user_id: &str) -> Option<UserAggregate> {
        let index = self.shard_for(user_id);
        self.shards[index].lock().user(user_id).cloned()
    }

    /// Total users across all shards. Locks each shard in turn.
    pub fn user_count(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Users per shard, in shard order.
    pub fn shard_sizes(&self) -> Vec<usize> {
        self.shards.iter().map(|shard| shard.lock().len()).collect()
    }

    /// Copy every user out, locking each shard exactly once.
    pub fn snapshot(&self) -> FxHashMap<String, UserAggregate> {
        let mut all = FxHashMap::default();
        for shard in &self.shards {
            let shard = shard.lock();
            all.extend(
                shard
                    .users()
                    .map(|(user_id, user)| (user_id.to_string(), user.clone())),
            );
        }
        all
    }
}
