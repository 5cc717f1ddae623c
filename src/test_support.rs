//! Synthetic record streams for tests and benchmarks.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::model::{Record, UserAggregate};
use crate::summary::Summary;
use crate::validator;

const EVENT_NAMES: [&str; 5] = ["login", "logout", "purchase", "page_view", "add_to_cart"];
const ATTRIBUTE_KEYS: [&str; 4] = ["plan", "email", "country", "tier"];

/// Knobs for [`generate_records`].
#[derive(Debug, Clone)]
pub struct DatasetSpec {
    pub records: usize,
    pub users: usize,
    /// Probability that a record is an event (otherwise attributes)
    pub event_ratio: f64,
    /// Probability that an event reuses an id already emitted for the same user
    pub replay_ratio: f64,
    /// Probability that a record is made invalid or given an unknown type
    pub noise_ratio: f64,
}

impl Default for DatasetSpec {
    fn default() -> Self {
        Self {
            records: 2_000,
            users: 50,
            event_ratio: 0.6,
            replay_ratio: 0.1,
            noise_ratio: 0.05,
        }
    }
}

/// Generate a reproducible record stream.
///
/// Every record gets a distinct timestamp, so the aggregate is independent of
/// application order.
pub fn generate_records(spec: &DatasetSpec, seed: u64) -> Vec<Record> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut timestamps: Vec<i64> = (0..spec.records as i64).collect();
    timestamps.shuffle(&mut rng);

    let users = spec.users.max(1);
    let mut emitted: Vec<Vec<(String, String)>> = vec![Vec::new(); users];
    let mut records = Vec::with_capacity(spec.records);

    for (i, timestamp) in timestamps.into_iter().enumerate() {
        let user = rng.random_range(0..users);
        let user_id = format!("user-{user:04}");

        let mut record = if rng.random_bool(spec.event_ratio) {
            let previous = &emitted[user];
            if !previous.is_empty() && rng.random_bool(spec.replay_ratio) {
                let (id, name) = previous[rng.random_range(0..previous.len())].clone();
                Record::event(id, user_id, name, timestamp)
            } else {
                let id = format!("evt-{i}");
                let name = EVENT_NAMES[rng.random_range(0..EVENT_NAMES.len())];
                emitted[user].push((id.clone(), name.to_string()));
                Record::event(id, user_id, name, timestamp)
            }
        } else {
            let fields = rng.random_range(1..=ATTRIBUTE_KEYS.len());
            let data: Vec<(String, String)> = ATTRIBUTE_KEYS[..fields]
                .iter()
                .map(|key| (key.to_string(), format!("{key}-{}", rng.random_range(0..20))))
                .collect();
            Record::attributes(format!("attr-{i}"), user_id, data, timestamp)
        };

        if rng.random_bool(spec.noise_ratio) {
            match rng.random_range(0..4) {
                0 => record.id = String::new(),
                1 => record.user_id = "   ".to_string(),
                2 => record.kind = String::new(),
                _ => record.kind = "identify".to_string(),
            }
        }
        records.push(record);
    }

    records
}

/// Same records in a seed-dependent order.
pub fn shuffled(records: &[Record], seed: u64) -> Vec<Record> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = records.to_vec();
    out.shuffle(&mut rng);
    out
}

/// Sequential reference aggregation, without shards or threads.
pub fn reference_summary(records: &[Record]) -> Summary {
    let mut users: std::collections::HashMap<String, UserAggregate> =
        std::collections::HashMap::new();
    for record in records {
        if validator::is_valid(record) {
            users
                .entry(record.user_id.clone())
                .or_default()
                .apply(record.clone());
        }
    }
    Summary::from_users(users)
}

/// Encode records as newline-delimited JSON.
pub fn to_json_lines(records: &[Record]) -> String {
    let mut out = String::new();
    for record in records {
        // Records hold only strings, maps and integers.
        if let Ok(line) = serde_json::to_string(record) {
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}
