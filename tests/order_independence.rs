//! The summary must not depend on arrival order, worker count or shard count.

use usermerge::source::SourceError;
use usermerge::test_support::{generate_records, reference_summary, shuffled, DatasetSpec};
use usermerge::{aggregate, AggregatorConfig, CancelToken, Record, ShardedStore, Summary};

fn aggregate_records(records: &[Record], workers: usize, shards: usize) -> Summary {
    let config = AggregatorConfig {
        shard_count: shards,
        worker_count: workers,
        queue_capacity: 32,
        ..AggregatorConfig::default()
    };
    let source = records.iter().cloned().map(Ok::<_, SourceError>);
    let (summary, report) = aggregate(source, &config, &CancelToken::new()).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.stats.received, records.len() as u64);
    summary
}

#[test]
fn matches_sequential_reference_across_pool_shapes() {
    let records = generate_records(&DatasetSpec::default(), 7);
    let expected = reference_summary(&records).lines();
    assert!(!expected.is_empty());

    for (workers, shards) in [(1, 1), (2, 3), (4, 32), (8, 7), (16, 64)] {
        let actual = aggregate_records(&records, workers, shards).lines();
        assert_eq!(actual, expected, "workers={workers} shards={shards}");
    }
}

#[test]
fn shuffled_inputs_produce_identical_summaries() {
    let spec = DatasetSpec {
        records: 5_000,
        users: 120,
        replay_ratio: 0.25,
        ..DatasetSpec::default()
    };
    let records = generate_records(&spec, 42);
    let baseline = aggregate_records(&records, 4, 32).lines();

    for seed in 1..=5 {
        let permuted = shuffled(&records, seed);
        assert_eq!(aggregate_records(&permuted, 8, 16).lines(), baseline, "seed={seed}");
    }
}

#[test]
fn replays_only_ever_count_once() {
    let spec = DatasetSpec {
        records: 3_000,
        users: 10,
        replay_ratio: 0.9,
        noise_ratio: 0.0,
        ..DatasetSpec::default()
    };
    let records = generate_records(&spec, 3);
    let summary = aggregate_records(&records, 8, 4);

    for user_id in summary.user_ids() {
        let user = summary.user(user_id).unwrap();
        assert_eq!(user.total_events(), user.processed_event_count() as u64);
    }
}

#[test]
fn every_user_lives_in_its_partitioned_shard() {
    let records = generate_records(&DatasetSpec::default(), 11);
    let store = ShardedStore::new(13);
    for record in records.iter().filter(|r| usermerge::validator::is_valid(r)) {
        store.apply(record.clone());
    }

    for index in 0..store.shard_count() {
        let misplaced = store
            .with_shard(index, |shard| {
                shard
                    .users()
                    .filter(|(user_id, _)| store.shard_for(user_id) != index)
                    .count()
            })
            .unwrap();
        assert_eq!(misplaced, 0, "shard {index}");
    }
    assert_eq!(store.user_count(), reference_summary(&records).len());
}
