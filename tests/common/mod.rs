#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use s3du::rollup::RollupDepth;
use s3du::{LeafRecord, StorageTier};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

pub fn record(key: &str, size: u64) -> LeafRecord {
    record_at(key, size, 1_700_000_000, StorageTier::Standard)
}

pub fn record_at(key: &str, size: u64, secs: i64, tier: StorageTier) -> LeafRecord {
    LeafRecord::new(key, size, Utc.timestamp_opt(secs, 0).unwrap(), tier)
}

/// Byte offsets just past each delimiter after the prefix, capped at `depth`.
fn group_ends(key: &str, prefix: &str, delimiter: &str, depth: RollupDepth) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut position = prefix.len();
    while !depth.reached_by(ends.len()) {
        match key[position..].find(delimiter) {
            Some(offset) => {
                position += offset + delimiter.len();
                ends.push(position);
            }
            None => break,
        }
    }
    ends
}

/// Plain group-by: (count, size) for every rollup prefix, the root included.
pub fn naive_rollup(
    records: &[LeafRecord],
    prefix: &str,
    delimiter: &str,
    depth: RollupDepth,
) -> BTreeMap<String, (u64, u64)> {
    let mut groups = BTreeMap::new();
    for record in records {
        let mut paths = vec![prefix.to_string()];
        for end in group_ends(&record.key, prefix, delimiter, depth) {
            paths.push(record.key[..end].to_string());
        }
        for path in paths {
            let entry = groups.entry(path).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += record.size;
        }
    }
    groups
}

/// Number of listable keys directly inside each enclosing prefix.
pub fn naive_leaf_candidates(
    records: &[LeafRecord],
    prefix: &str,
    delimiter: &str,
    depth: RollupDepth,
) -> BTreeMap<String, u64> {
    let mut candidates = BTreeMap::new();
    if !depth.shows_leaves() {
        return candidates;
    }
    for record in records {
        let ends = group_ends(&record.key, prefix, delimiter, depth);
        let parent_end = ends.last().copied().unwrap_or(prefix.len());
        let rest = &record.key[parent_end..];
        if !rest.is_empty() && !rest.contains(delimiter) {
            *candidates
                .entry(record.key[..parent_end].to_string())
                .or_insert(0) += 1;
        }
    }
    candidates
}

/// Write a gzip-compressed export data file.
pub fn write_gz_csv(path: &Path, rows: &[&str]) {
    let file = fs::File::create(path).unwrap();
    let mut encoder = GzEncoder::new(file, Compression::default());
    for row in rows {
        writeln!(encoder, "{row}").unwrap();
    }
    encoder.finish().unwrap();
}

/// Write a manifest listing `files` (keys relative to the export's data directory).
pub fn write_manifest(dir: &Path, files: &[&str]) -> std::path::PathBuf {
    let entries: Vec<serde_json::Value> = files
        .iter()
        .map(|name| {
            serde_json::json!({
                "key": format!("media/daily/data/{name}"),
                "size": 0,
                "MD5checksum": "00000000000000000000000000000000"
            })
        })
        .collect();
    let manifest = serde_json::json!({
        "sourceBucket": "media",
        "destinationBucket": "arn:aws:s3:::media-inventory",
        "version": "2016-11-30",
        "creationTimestamp": "1700000000000",
        "fileFormat": "CSV",
        "fileSchema": "Bucket, Key, Size, LastModifiedDate, StorageClass",
        "files": entries,
    });

    let path = dir.join("manifest.json");
    fs::write(&path, serde_json::to_string_pretty(&manifest).unwrap()).unwrap();
    path
}
