//! # Summary Output
//!
//! Collects every shard into one read-only, sorted view once the pool has
//! drained, and renders it one line per user:
//!
//! ```text
//! <user_id>,<attr>=<value>,...,<event>=<count>,...
//! ```
//!
//! Users are sorted by id, attributes and events by name. Delimiters inside
//! names or values are written as-is; the format has no escaping.

use crate::config::FIELD_DELIMITER;
use crate::model::UserAggregate;
use crate::partitioned::ShardedStore;
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Sorted, merged view of all users.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    users: BTreeMap<String, UserAggregate>,
}

impl Summary {
    /// Copy all shards into a single view. Each shard is locked once.
    pub fn collect(store: &ShardedStore) -> Self {
        Self {
            users: store.snapshot().into_iter().collect(),
        }
    }

    pub fn from_users(users: impl IntoIterator<Item = (String, UserAggregate)>) -> Self {
        Self {
            users: users.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn user(&self, user_id: &str) -> Option<&UserAggregate> {
        self.users.get(user_id)
    }

    /// User ids in output order.
    pub fn user_ids(&self) -> impl Iterator<Item = &str> {
        self.users.keys().map(String::as_str)
    }

    /// Rendered lines in output order, without trailing newlines.
    pub fn lines(&self) -> Vec<String> {
        let entries: Vec<(&String, &UserAggregate)> = self.users.iter().collect();
        entries
            .par_iter()
            .map(|(user_id, user)| render_line(user_id, user))
            .collect()
    }

    /// Write every line, newline-terminated, and flush.
    pub fn write_to<W: Write>(&self, writer: W) -> io::Result<()> {
        let mut writer = BufWriter::new(writer);
        for line in self.lines() {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }

    /// Create (or truncate) `path` and write the summary into it.
    pub fn write_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("failed to create output file {}", path.display()))?;
        self.write_to(file)
            .with_context(|| format!("failed to write output file {}", path.display()))?;
        info!(users = self.len(), path = %path.display(), "summary written");
        Ok(())
    }
}

/// Render one user: id, then sorted attributes, then sorted event counts.
///
/// The id is always followed by a delimiter, so a user with no fields
/// renders as `<user_id>,`.
pub fn render_line(user_id: &str, user: &UserAggregate) -> String {
    let mut attributes: Vec<_> = user.attributes().collect();
    attributes.sort_unstable_by(|a, b| a.0.cmp(b.0));
    let mut events: Vec<_> = user.event_counts().collect();
    events.sort_unstable_by(|a, b| a.0.cmp(b.0));

    let fields = attributes
        .into_iter()
        .map(|(name, attribute)| format!("{name}={}", attribute.value))
        .chain(events.into_iter().map(|(name, count)| format!("{name}={count}")));

    let mut line = String::with_capacity(user_id.len() + 1);
    line.push_str(user_id);
    line.push(FIELD_DELIMITER);
    for (i, field) in fields.enumerate() {
        if i > 0 {
            line.push(FIELD_DELIMITER);
        }
        line.push_str(&field);
    }
    line
}
