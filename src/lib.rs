//! # Usermerge
//!
//! A concurrent, sharded aggregation engine for user-scoped record streams.
//!
//! Records carry either attribute updates or events for a user. Every user
//! ends up with the latest value of each attribute (highest timestamp wins)
//! and a count of each event name, with replayed event ids counted once.
//! Work is spread over a fixed worker pool; user state is split across
//! independently locked shards.

pub mod config;
pub mod model;
pub mod partitioned;
pub mod pipeline;
pub mod pool;
pub mod sharding;
pub mod source;
pub mod summary;
pub mod test_support;
pub mod validator;

// Re-export main types for convenience
pub use config::{AggregatorConfig, ConfigError, ConfigOverrides};
pub use model::{AttributeValue, MergeOutcome, Record, RecordKind, UserAggregate};
pub use partitioned::{Shard, ShardedStore};
pub use pipeline::{aggregate, run, RunReport};
pub use pool::{AggregationPool, PoolStatsSnapshot, QueueItem};
pub use sharding::Partitioner;
pub use source::{CancelToken, JsonLinesSource, RecordSource, SourceError};
pub use summary::Summary;
pub use validator::Rejection;
