//! # Data Model
//!
//! Records as they arrive from the record source, and the per-user aggregate
//! they are merged into.
//!
//! The merge rules live on [`UserAggregate`] so that they can be exercised
//! without any locking. Callers are responsible for serializing access to a
//! given aggregate (see [`crate::partitioned`]).

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Wire value of `type` for event records.
pub const EVENT: &str = "event";

/// Wire value of `type` for attribute updates.
pub const ATTRIBUTES: &str = "attributes";

/// A single record from the input stream.
///
/// Missing or `null` fields decode to their empty defaults; presence of the
/// required fields is checked by [`crate::validator`], not by decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Record {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub user_id: String,
    #[serde(
        deserialize_with = "null_as_default",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub data: HashMap<String, String>,
    #[serde(deserialize_with = "null_as_default")]
    pub timestamp: i64,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl Record {
    /// Build an event record.
    pub fn event(
        id: impl Into<String>,
        user_id: impl Into<String>,
        name: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            kind: EVENT.to_string(),
            name: name.into(),
            user_id: user_id.into(),
            data: HashMap::new(),
            timestamp,
        }
    }

    /// Build an attribute update record.
    pub fn attributes<K, V>(
        id: impl Into<String>,
        user_id: impl Into<String>,
        data: impl IntoIterator<Item = (K, V)>,
        timestamp: i64,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            id: id.into(),
            kind: ATTRIBUTES.to_string(),
            name: String::new(),
            user_id: user_id.into(),
            data: data
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            timestamp,
        }
    }

    /// Classify the raw `type` field.
    pub fn record_kind(&self) -> RecordKind {
        RecordKind::parse(&self.kind)
    }
}

/// Classification of a record's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Event,
    Attributes,
    /// Any other value. Accepted by the validator, ignored by the merge.
    Other,
}

impl RecordKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            EVENT => RecordKind::Event,
            ATTRIBUTES => RecordKind::Attributes,
            _ => RecordKind::Other,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Event => f.write_str(EVENT),
            RecordKind::Attributes => f.write_str(ATTRIBUTES),
            RecordKind::Other => f.write_str("other"),
        }
    }
}

/// An attribute value together with the timestamp of the update that set it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeValue {
    pub value: String,
    pub timestamp: i64,
}

/// What a single merge did to an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Attribute update: `written` keys were stored, `stale` keys lost to an
    /// entry with an equal or newer timestamp.
    AttributesApplied { written: usize, stale: usize },
    /// First sighting of this event id; one counter was incremented.
    EventCounted,
    /// Event id already counted for this user.
    DuplicateEvent,
    /// Unrecognized record type.
    Ignored,
}

/// Merged state for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAggregate {
    attributes: FxHashMap<String, AttributeValue>,
    event_counts: FxHashMap<String, u64>,
    processed_event_ids: FxHashSet<String>,
}

impl UserAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a validated record into this aggregate.
    pub fn apply(&mut self, record: Record) -> MergeOutcome {
        match record.record_kind() {
            RecordKind::Attributes => self.merge_attributes(record.data, record.timestamp),
            RecordKind::Event => self.count_event(record.id, record.name),
            RecordKind::Other => MergeOutcome::Ignored,
        }
    }

    /// Last-write-wins by timestamp. On equal timestamps the entry already
    /// stored is kept, so the first-applied update wins.
    pub fn merge_attributes(
        &mut self,
        data: impl IntoIterator<Item = (String, String)>,
        timestamp: i64,
    ) -> MergeOutcome {
        let mut written = 0;
        let mut stale = 0;
        for (key, value) in data {
            match self.attributes.get_mut(&key) {
                Some(existing) if existing.timestamp >= timestamp => stale += 1,
                Some(existing) => {
                    *existing = AttributeValue { value, timestamp };
                    written += 1;
                }
                None => {
                    self.attributes
                        .insert(key, AttributeValue { value, timestamp });
                    written += 1;
                }
            }
        }
        MergeOutcome::AttributesApplied { written, stale }
    }

    /// Count `event_id` under `name` unless it has been seen before.
    pub fn count_event(&mut self, event_id: String, name: String) -> MergeOutcome {
        if self.processed_event_ids.contains(&event_id) {
            return MergeOutcome::DuplicateEvent;
        }
        self.processed_event_ids.insert(event_id);
        *self.event_counts.entry(name).or_insert(0) += 1;
        MergeOutcome::EventCounted
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn event_count(&self, name: &str) -> u64 {
        self.event_counts.get(name).copied().unwrap_or(0)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn event_counts(&self) -> impl Iterator<Item = (&str, u64)> {
        self.event_counts.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn has_processed(&self, event_id: &str) -> bool {
        self.processed_event_ids.contains(event_id)
    }

    pub fn processed_event_count(&self) -> usize {
        self.processed_event_ids.len()
    }

    /// Sum of all event counters. Always equal to [`Self::processed_event_count`].
    pub fn total_events(&self) -> u64 {
        self.event_counts.values().sum()
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// True when neither attributes nor events have been recorded.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.event_counts.is_empty()
    }
}
