//! Property tests: the streaming rollup agrees with a plain group-by

mod common;

use common::{naive_leaf_candidates, naive_rollup, record_at};
use proptest::prelude::*;
use s3du::rollup::{EngineConfig, RollupDepth, RollupEngine};
use s3du::sink::{CollectingSink, UsageReport};
use s3du::{Accumulator, LeafRecord, StorageTier};
use std::collections::{BTreeMap, BTreeSet};

fn key_strategy() -> impl Strategy<Value = String> {
    (
        prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "d.txt"]), 1..5),
        any::<bool>(),
    )
        .prop_map(|(segments, folder_marker)| {
            let mut key = segments.join("/");
            if folder_marker {
                key.push('/');
            }
            key
        })
}

fn tier_strategy() -> impl Strategy<Value = StorageTier> {
    prop::sample::select(vec![
        StorageTier::Standard,
        StorageTier::StandardIa,
        StorageTier::Glacier,
    ])
}

/// Sorted, de-duplicated records.
fn records_strategy() -> impl Strategy<Value = Vec<LeafRecord>> {
    prop::collection::btree_map(
        key_strategy(),
        (0u64..1_000_000, 0i64..2_000_000_000, tier_strategy()),
        0..60,
    )
    .prop_map(|objects| {
        objects
            .into_iter()
            .map(|(key, (size, secs, tier))| record_at(&key, size, secs, tier))
            .collect()
    })
}

/// Scan prefix and delimiter. `"a"` does not end in a delimiter, so the first segment
/// of every key continues the prefix.
fn layout_strategy() -> impl Strategy<Value = (&'static str, &'static str)> {
    (
        prop::sample::select(vec!["", "a", "a/", "logs::"]),
        prop::sample::select(vec!["/", "::"]),
    )
}

/// Sorted, de-duplicated records under `prefix`, segments joined by `delimiter`.
fn scoped_records_strategy(prefix: &'static str, delimiter: &'static str) -> impl Strategy<Value = Vec<LeafRecord>> {
    prop::collection::vec(
        (
            prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "d.txt"]), 1..5),
            any::<bool>(),
            0u64..1_000_000,
        ),
        0..60,
    )
    .prop_map(move |objects| {
        let mut by_key = BTreeMap::new();
        for (segments, folder_marker, size) in objects {
            let mut key = format!("{prefix}{}", segments.join(delimiter));
            if folder_marker {
                key.push_str(delimiter);
            }
            by_key.insert(key, size);
        }
        by_key
            .into_iter()
            .map(|(key, size)| record_at(&key, size, 1_700_000_000, StorageTier::Standard))
            .collect()
    })
}

fn scoped_case() -> impl Strategy<Value = (&'static str, &'static str, Vec<LeafRecord>)> {
    layout_strategy().prop_flat_map(|(prefix, delimiter)| {
        (Just(prefix), Just(delimiter), scoped_records_strategy(prefix, delimiter))
    })
}

fn depth_strategy() -> impl Strategy<Value = RollupDepth> {
    prop_oneof![
        (0usize..4).prop_map(RollupDepth::Limited),
        Just(RollupDepth::Unbounded),
    ]
}

fn run(
    records: &[LeafRecord],
    depth: RollupDepth,
    limit: usize,
    page_size: usize,
) -> s3du::RollupSummary<CollectingSink> {
    run_scoped(records, "", "/", depth, limit, page_size)
}

fn run_scoped(
    records: &[LeafRecord],
    prefix: &str,
    delimiter: &str,
    depth: RollupDepth,
    limit: usize,
    page_size: usize,
) -> s3du::RollupSummary<CollectingSink> {
    let config = EngineConfig {
        delimiter: delimiter.to_string(),
        depth,
        display_limit: limit,
        prefix: prefix.to_string(),
    };
    let mut engine = RollupEngine::new(config, CollectingSink::new()).unwrap();
    for page in records.chunks(page_size.max(1)) {
        engine.process_batch(page).unwrap();
    }
    engine.finalize()
}

fn totals(acc: &Accumulator) -> (u64, u64, Option<i64>, Option<i64>, BTreeMap<StorageTier, u64>) {
    (
        acc.count,
        acc.size,
        acc.oldest.map(|t| t.timestamp()),
        acc.newest.map(|t| t.timestamp()),
        acc.tier_breakdown.clone(),
    )
}

proptest! {
    #[test]
    fn prop_batches_match_single_records(
        records in records_strategy(),
        depth in depth_strategy(),
        limit in 0usize..5,
        page_size in 1usize..20,
    ) {
        let paged = run(&records, depth, limit, page_size);
        let single = run(&records, depth, limit, 1);
        prop_assert_eq!(&paged.sink.reports, &single.sink.reports);
        prop_assert_eq!(paged.root, single.root);
    }

    #[test]
    fn prop_scoped_batches_match_single_records(
        (prefix, delimiter, records) in scoped_case(),
        depth in depth_strategy(),
        limit in 0usize..5,
        page_size in 1usize..20,
    ) {
        let paged = run_scoped(&records, prefix, delimiter, depth, limit, page_size);
        let single = run_scoped(&records, prefix, delimiter, depth, limit, 1);
        prop_assert_eq!(&paged.sink.reports, &single.sink.reports);
        prop_assert_eq!(paged.root.path.as_str(), prefix);
        prop_assert_eq!(paged.root, single.root);
    }

    #[test]
    fn prop_scoped_closed_prefixes_match_group_by(
        (prefix, delimiter, records) in scoped_case(),
        depth in depth_strategy(),
        limit in 0usize..4,
        page_size in 1usize..20,
    ) {
        let summary = run_scoped(&records, prefix, delimiter, depth, limit, page_size);

        let mut closed = BTreeMap::new();
        for acc in summary.sink.prefixes() {
            let previous = closed.insert(acc.path.clone(), (acc.count, acc.size));
            prop_assert!(previous.is_none(), "{} closed twice", acc.path);
        }
        prop_assert_eq!(closed, naive_rollup(&records, prefix, delimiter, depth));

        if let RollupDepth::Limited(d) = depth {
            for acc in summary.sink.prefixes() {
                prop_assert!(acc.path.starts_with(prefix));
                prop_assert!(acc.path[prefix.len()..].matches(delimiter).count() <= d);
            }
        }

        let candidates = naive_leaf_candidates(&records, prefix, delimiter, depth);
        let expected_leaves: u64 = candidates.values().map(|n| (*n).min(limit as u64)).sum();
        prop_assert_eq!(summary.sink.leaves().count() as u64, expected_leaves);
    }

    #[test]
    fn prop_closed_prefixes_match_group_by(
        records in records_strategy(),
        depth in depth_strategy(),
        page_size in 1usize..20,
    ) {
        let summary = run(&records, depth, 3, page_size);

        let mut closed = BTreeMap::new();
        for acc in summary.sink.prefixes() {
            let previous = closed.insert(acc.path.clone(), (acc.count, acc.size));
            prop_assert!(previous.is_none(), "{} closed twice", acc.path);
        }
        prop_assert_eq!(closed, naive_rollup(&records, "", "/", depth));

        if let RollupDepth::Limited(d) = depth {
            for acc in summary.sink.prefixes() {
                prop_assert!(acc.path.matches('/').count() <= d);
            }
        }
    }

    #[test]
    fn prop_display_cap(
        records in records_strategy(),
        depth in depth_strategy(),
        limit in 0usize..4,
        page_size in 1usize..20,
    ) {
        let summary = run(&records, depth, limit, page_size);
        let candidates = naive_leaf_candidates(&records, "", "/", depth);

        let expected_leaves: u64 = candidates.values().map(|n| (*n).min(limit as u64)).sum();
        prop_assert_eq!(summary.sink.leaves().count() as u64, expected_leaves);

        let expected_markers: BTreeSet<&str> = candidates
            .iter()
            .filter(|(_, n)| **n > limit as u64)
            .map(|(parent, _)| parent.as_str())
            .collect();
        let markers: Vec<&str> = summary.sink.truncated().collect();
        prop_assert_eq!(markers.len(), expected_markers.len());
        prop_assert_eq!(markers.into_iter().collect::<BTreeSet<_>>(), expected_markers);

        for report in &summary.sink.reports {
            if let UsageReport::Prefix { stats, omitted, .. } = report {
                let n = candidates.get(&stats.path).copied().unwrap_or(0);
                prop_assert_eq!(*omitted, n.saturating_sub(limit as u64));
            }
        }
    }

    #[test]
    fn prop_root_conserves_totals(
        records in records_strategy(),
        depth in depth_strategy(),
        page_size in 1usize..20,
    ) {
        let summary = run(&records, depth, 2, page_size);
        prop_assert_eq!(summary.root.count, records.len() as u64);
        prop_assert_eq!(summary.root.size, records.iter().map(|r| r.size).sum::<u64>());
        prop_assert_eq!(summary.root.tier_total(), summary.root.size);
        prop_assert_eq!(summary.records, records.len() as u64);

        let oldest = records.iter().map(|r| r.last_modified).min();
        prop_assert_eq!(summary.root.oldest, oldest);
    }

    #[test]
    fn prop_merge_is_associative_and_commutative(
        records in records_strategy(),
        cut_a in 0usize..60,
        cut_b in 0usize..60,
    ) {
        let len = records.len();
        let (lo, hi) = (cut_a.min(cut_b).min(len), cut_a.max(cut_b).min(len));
        let part = |slice: &[LeafRecord], path: &str| {
            let mut acc = Accumulator::new(path);
            for r in slice {
                acc.add(r).unwrap();
            }
            acc
        };
        let a = part(&records[..lo], "a");
        let b = part(&records[lo..hi], "b");
        let c = part(&records[hi..], "c");

        let mut left = a.clone();
        left.merge(&b).unwrap();
        left.merge(&c).unwrap();

        let mut bc = b.clone();
        bc.merge(&c).unwrap();
        let mut right = a.clone();
        right.merge(&bc).unwrap();

        let mut shuffled = c.clone();
        shuffled.merge(&a).unwrap();
        shuffled.merge(&b).unwrap();

        prop_assert_eq!(totals(&left), totals(&right));
        prop_assert_eq!(totals(&left), totals(&shuffled));
        prop_assert_eq!(left.path.as_str(), "a");
        prop_assert_eq!(shuffled.path.as_str(), "c");
    }
}
