//! # Aggregation Pipeline
//!
//! ```text
//! record source ─► bounded queue ─► worker pool ─► shards
//!                                                    │ (after drain)
//!                                                    ▼
//!                                     collector ─► summary file
//! ```
//!
//! The source runs on its own producer thread and closes the queue when it
//! is exhausted, fails, or observes cancellation. The pool drains whatever
//! was queued, so a cancelled run still produces a (partial) summary.

use crate::config::AggregatorConfig;
use crate::partitioned::ShardedStore;
use crate::pool::{AggregationPool, PoolStatsSnapshot, QueueItem};
use crate::source::{CancelToken, JsonLinesSource, RecordSource};
use crate::summary::Summary;
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Sender};
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::thread;
use tracing::{debug, info, instrument, warn};

/// Outcome of one aggregation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub stats: PoolStatsSnapshot,
    /// Distinct users in the summary
    pub users: usize,
    /// Records the source could not decode (forwarded as missing records)
    pub decode_errors: u64,
    /// The source stopped because the run was cancelled
    pub cancelled: bool,
    /// The source stopped because the reader failed
    pub source_error: Option<String>,
}

impl RunReport {
    /// True when every input record was read and merged or rejected.
    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.source_error.is_none()
    }
}

#[derive(Debug, Default)]
struct FeedOutcome {
    forwarded: u64,
    decode_errors: u64,
    cancelled: bool,
    source_error: Option<String>,
}

/// Producer side: move items from the source into the queue. Dropping the
/// sender on return closes the queue.
fn feed<S: RecordSource>(
    source: S,
    queue: Sender<QueueItem>,
    cancel: &CancelToken,
) -> FeedOutcome {
    let mut outcome = FeedOutcome::default();
    for item in source {
        if cancel.is_cancelled() {
            break;
        }
        let item = match item {
            Ok(record) => Some(record),
            Err(e) if e.is_recoverable() => {
                debug!(error = %e, "forwarding undecodable record");
                outcome.decode_errors += 1;
                None
            }
            Err(e) => {
                warn!(error = %e, "record source failed");
                outcome.source_error = Some(e.to_string());
                break;
            }
        };
        if queue.send(item).is_err() {
            warn!("work queue closed before the source was exhausted");
            break;
        }
        outcome.forwarded += 1;
    }
    outcome.cancelled = cancel.is_cancelled();
    if outcome.cancelled {
        warn!(forwarded = outcome.forwarded, "record source stopped by cancellation");
    }
    outcome
}

/// Aggregate every record from `source` and return the collected summary.
///
/// No files are touched; see [`run`] for the file-backed variant.
pub fn aggregate<S: RecordSource>(
    source: S,
    config: &AggregatorConfig,
    cancel: &CancelToken,
) -> Result<(Summary, RunReport)> {
    let store = ShardedStore::new(config.shard_count);
    let pool = AggregationPool::new(config.worker_count);
    let (tx, rx) = bounded::<QueueItem>(config.queue_capacity);

    let (fed, stats) = thread::scope(|scope| -> Result<(FeedOutcome, PoolStatsSnapshot)> {
        let producer = thread::Builder::new()
            .name("usermerge-source".to_string())
            .spawn_scoped(scope, move || feed(source, tx, cancel))
            .context("failed to spawn record source thread")?;
        let stats = pool.run(&store, rx);
        let fed = producer
            .join()
            .map_err(|_| anyhow!("record source thread panicked"))?;
        Ok((fed, stats?))
    })?;

    let summary = Summary::collect(&store);
    let report = RunReport {
        stats,
        users: summary.len(),
        decode_errors: fed.decode_errors,
        cancelled: fed.cancelled,
        source_error: fed.source_error,
    };
    info!(
        received = report.stats.received,
        rejected = report.stats.rejected,
        events = report.stats.events_counted,
        duplicates = report.stats.duplicate_events,
        users = report.users,
        "aggregation finished"
    );
    Ok((summary, report))
}

/// Read `config.input_path`, aggregate it, and write the summary to
/// `config.output_path`.
///
/// Failing to open the input or to create/write the output is an error. A
/// cancelled or partially read run still writes its summary and is flagged
/// in the returned report.
#[instrument(skip_all, fields(input = %config.input_path.display()))]
pub fn run(config: &AggregatorConfig, cancel: &CancelToken) -> Result<RunReport> {
    let input = File::open(&config.input_path)
        .with_context(|| format!("failed to open input file {}", config.input_path.display()))?;
    info!(
        shards = config.shard_count,
        workers = config.worker_count,
        queue = config.queue_capacity,
        "starting aggregation"
    );

    let source = JsonLinesSource::new(BufReader::new(input), cancel.clone());
    let (summary, report) = aggregate(source, config, cancel)?;
    summary.write_to_path(&config.output_path)?;
    Ok(report)
}
