//! Routing of user identifiers to shards.
//!
//! The hash is the classic polynomial string hash (`h = 31 * h + byte`)
//! accumulated in a signed 64-bit integer with wrapping overflow. Long
//! identifiers routinely overflow into negative values, so the shard index is
//! always taken with a Euclidean remainder.

/// Polynomial string hash over the UTF-8 bytes of `key`. May be negative.
#[inline]
pub fn string_hash(key: &str) -> i64 {
    key.bytes()
        .fold(0i64, |h, b| h.wrapping_mul(31).wrapping_add(i64::from(b)))
}

/// Deterministic mapping from user id to shard index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partitioner {
    shard_count: usize,
    modulus: i64,
}

impl Partitioner {
    /// A shard count of zero is treated as one.
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shard_count,
            modulus: i64::try_from(shard_count).unwrap_or(i64::MAX),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Index in `[0, shard_count)` for `user_id`.
    #[inline]
    pub fn shard_index(&self, user_id: &str) -> usize {
        // rem_euclid is non-negative for a positive modulus, so the cast is lossless.
        string_hash(user_id).rem_euclid(self.modulus) as usize
    }
}
