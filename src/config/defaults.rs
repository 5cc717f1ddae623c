//! Default constants for usermerge configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// I/O Defaults
// =============================================================================

/// Default input path (newline-delimited JSON records)
pub const DEFAULT_INPUT_PATH: &str = "data/messages.1.data";

/// Default summary output path
pub const DEFAULT_OUTPUT_PATH: &str = "summary_output.csv";

/// Separator between fields of a summary line
pub const FIELD_DELIMITER: char = ',';

// =============================================================================
// Partitioning Defaults
// =============================================================================

/// Default number of shards. Need not be a power of two.
pub const DEFAULT_SHARD_COUNT: usize = 32;

/// Upper bound accepted for `shard_count`
pub const MAX_SHARD_COUNT: usize = 65_536;

/// Default number of aggregation workers.
/// Uses the number of available processing units.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}

// =============================================================================
// Queue Defaults
// =============================================================================

/// Capacity of the bounded queue between the record source and the workers.
/// The producer blocks when the queue is full.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
