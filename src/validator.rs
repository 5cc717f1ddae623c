//! Presence checks applied to every record before it is routed to a shard.

use crate::model::Record;
use std::fmt;

/// Why a record was dropped before merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// The source could not produce a record at this position.
    MissingRecord,
    EmptyId,
    EmptyUserId,
    EmptyType,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MissingRecord => f.write_str("missing record"),
            Rejection::EmptyId => f.write_str("empty id"),
            Rejection::EmptyUserId => f.write_str("empty user_id"),
            Rejection::EmptyType => f.write_str("empty type"),
        }
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Check a possibly-missing record, returning the first failed requirement.
pub fn check(record: Option<&Record>) -> Result<&Record, Rejection> {
    let record = record.ok_or(Rejection::MissingRecord)?;
    if is_blank(&record.id) {
        return Err(Rejection::EmptyId);
    }
    if is_blank(&record.user_id) {
        return Err(Rejection::EmptyUserId);
    }
    if is_blank(&record.kind) {
        return Err(Rejection::EmptyType);
    }
    Ok(record)
}

/// Owned variant of [`check`] used on the worker hot path.
pub fn admit(record: Option<Record>) -> Result<Record, Rejection> {
    check(record.as_ref())?;
    record.ok_or(Rejection::MissingRecord)
}

/// A record is valid when `id`, `user_id` and `type` are non-blank.
#[inline]
pub fn is_valid(record: &Record) -> bool {
    check(Some(record)).is_ok()
}
