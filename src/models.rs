//! Core Data Models
//!
//! This module defines the values that flow through a scan, from the raw metadata
//! of one stored object to the running totals of a whole prefix.
//!
//! ## Data Flow
//!
//! 1. **Raw Data**: [`LeafRecord`] - one object's key, size, timestamp and storage tier
//! 2. **Aggregation**: [`Accumulator`] - running totals for a prefix (or a single key)
//! 3. **Output**: accumulators are handed to a [`crate::sink::ReportSink`] once closed
//!
//! ## Core Types
//!
//! - [`LeafRecord`] - immutable leaf metadata as produced by a record source
//! - [`StorageTier`] - storage-class label; the common classes are named, the rest kept verbatim
//! - [`Accumulator`] - count, byte total, time range and per-tier byte breakdown
//!
//! ## Merge Semantics
//!
//! [`Accumulator::merge`] is associative and commutative over everything except the
//! path: the left operand always keeps its own path. That lets the rollup engine pop
//! and merge accumulators in any order and split batches anywhere without changing
//! final totals.

use crate::error::RecordError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Storage class of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum StorageTier {
    Standard,
    ReducedRedundancy,
    StandardIa,
    OnezoneIa,
    IntelligentTiering,
    Glacier,
    GlacierIr,
    DeepArchive,
    Outposts,
    Snow,
    ExpressOnezone,
    /// Any other well-formed class name, kept as given.
    Other(String),
}

impl StorageTier {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Standard => "STANDARD",
            Self::ReducedRedundancy => "REDUCED_REDUNDANCY",
            Self::StandardIa => "STANDARD_IA",
            Self::OnezoneIa => "ONEZONE_IA",
            Self::IntelligentTiering => "INTELLIGENT_TIERING",
            Self::Glacier => "GLACIER",
            Self::GlacierIr => "GLACIER_IR",
            Self::DeepArchive => "DEEP_ARCHIVE",
            Self::Outposts => "OUTPOSTS",
            Self::Snow => "SNOW",
            Self::ExpressOnezone => "EXPRESS_ONEZONE",
            Self::Other(name) => name,
        }
    }
}

impl Default for StorageTier {
    fn default() -> Self {
        Self::Standard
    }
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        if name.is_empty() {
            return Err("storage class is empty".to_string());
        }

        let tier = match name.to_ascii_uppercase().as_str() {
            "STANDARD" => Self::Standard,
            "REDUCED_REDUNDANCY" => Self::ReducedRedundancy,
            "STANDARD_IA" => Self::StandardIa,
            "ONEZONE_IA" => Self::OnezoneIa,
            "INTELLIGENT_TIERING" => Self::IntelligentTiering,
            "GLACIER" => Self::Glacier,
            "GLACIER_IR" => Self::GlacierIr,
            "DEEP_ARCHIVE" => Self::DeepArchive,
            "OUTPOSTS" => Self::Outposts,
            "SNOW" => Self::Snow,
            "EXPRESS_ONEZONE" => Self::ExpressOnezone,
            other => {
                if !other
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                {
                    return Err(format!("unrecognised storage class {name:?}"));
                }
                Self::Other(other.to_string())
            }
        };
        Ok(tier)
    }
}

impl TryFrom<String> for StorageTier {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StorageTier> for String {
    fn from(tier: StorageTier) -> Self {
        match tier {
            StorageTier::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

/// Metadata of one stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafRecord {
    pub key: String,
    pub size: u64,
    #[serde(rename = "lastModified")]
    pub last_modified: DateTime<Utc>,
    #[serde(rename = "storageClass")]
    pub tier: StorageTier,
}

impl LeafRecord {
    pub fn new(
        key: impl Into<String>,
        size: u64,
        last_modified: DateTime<Utc>,
        tier: StorageTier,
    ) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified,
            tier,
        }
    }
}

/// Running totals for one prefix, or for a single key when reported as a leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accumulator {
    pub path: String,
    pub count: u64,
    pub size: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    /// Bytes per storage tier; a tier only appears once something of that tier was counted.
    #[serde(rename = "tiers")]
    pub tier_breakdown: BTreeMap<StorageTier, u64>,
}

impl Accumulator {
    /// An empty accumulator for `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            count: 0,
            size: 0,
            oldest: None,
            newest: None,
            tier_breakdown: BTreeMap::new(),
        }
    }

    /// An accumulator holding exactly one record, keyed by the record's own key.
    pub fn from_record(record: &LeafRecord) -> Self {
        let mut tier_breakdown = BTreeMap::new();
        tier_breakdown.insert(record.tier.clone(), record.size);

        Self {
            path: record.key.clone(),
            count: 1,
            size: record.size,
            oldest: Some(record.last_modified),
            newest: Some(record.last_modified),
            tier_breakdown,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Fold one record into the running totals.
    ///
    /// On overflow nothing is modified.
    pub fn add(&mut self, record: &LeafRecord) -> Result<(), RecordError> {
        let size = self.checked_size(record.size)?;
        let tier_bytes = self.tier_breakdown.get(&record.tier).copied().unwrap_or(0);
        let tier_bytes = tier_bytes
            .checked_add(record.size)
            .ok_or_else(|| self.overflow())?;

        self.count += 1;
        self.size = size;
        self.widen(Some(record.last_modified), Some(record.last_modified));
        self.tier_breakdown.insert(record.tier.clone(), tier_bytes);
        Ok(())
    }

    /// `self ⊕ other`. The path of `self` is kept; `other`'s path is discarded.
    ///
    /// On overflow nothing is modified.
    pub fn merge(&mut self, other: &Accumulator) -> Result<(), RecordError> {
        let size = self.checked_size(other.size)?;
        let mut merged_tiers = Vec::with_capacity(other.tier_breakdown.len());
        for (tier, bytes) in &other.tier_breakdown {
            let current = self.tier_breakdown.get(tier).copied().unwrap_or(0);
            let total = current.checked_add(*bytes).ok_or_else(|| self.overflow())?;
            merged_tiers.push((tier.clone(), total));
        }

        self.count += other.count;
        self.size = size;
        self.widen(other.oldest, other.newest);
        self.tier_breakdown.extend(merged_tiers);
        Ok(())
    }

    /// Sum of the per-tier byte totals; equals `size` for any well-formed accumulator.
    pub fn tier_total(&self) -> u64 {
        self.tier_breakdown.values().sum()
    }

    fn checked_size(&self, extra: u64) -> Result<u64, RecordError> {
        self.size.checked_add(extra).ok_or_else(|| self.overflow())
    }

    fn overflow(&self) -> RecordError {
        RecordError::SizeOverflow {
            path: self.path.clone(),
        }
    }

    fn widen(&mut self, oldest: Option<DateTime<Utc>>, newest: Option<DateTime<Utc>>) {
        self.oldest = match (self.oldest, oldest) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.newest = match (self.newest, newest) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(key: &str, size: u64, secs: i64, tier: StorageTier) -> LeafRecord {
        LeafRecord::new(key, size, Utc.timestamp_opt(secs, 0).unwrap(), tier)
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("STANDARD".parse::<StorageTier>(), Ok(StorageTier::Standard));
        assert_eq!("glacier_ir".parse::<StorageTier>(), Ok(StorageTier::GlacierIr));
        assert_eq!(
            "FUTURE_CLASS".parse::<StorageTier>(),
            Ok(StorageTier::Other("FUTURE_CLASS".to_string()))
        );
        assert!("".parse::<StorageTier>().is_err());
        assert!("not a class".parse::<StorageTier>().is_err());
    }

    #[test]
    fn test_tier_serializes_as_class_name() {
        let json = serde_json::to_string(&StorageTier::DeepArchive).unwrap();
        assert_eq!(json, "\"DEEP_ARCHIVE\"");
        let back: StorageTier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StorageTier::DeepArchive);
    }

    #[test]
    fn test_add_tracks_extrema_and_tiers() {
        let mut acc = Accumulator::new("logs/");
        acc.add(&record("logs/a", 10, 200, StorageTier::Standard)).unwrap();
        acc.add(&record("logs/b", 5, 100, StorageTier::Glacier)).unwrap();
        acc.add(&record("logs/c", 1, 300, StorageTier::Standard)).unwrap();

        assert_eq!(acc.count, 3);
        assert_eq!(acc.size, 16);
        assert_eq!(acc.oldest, Some(Utc.timestamp_opt(100, 0).unwrap()));
        assert_eq!(acc.newest, Some(Utc.timestamp_opt(300, 0).unwrap()));
        assert_eq!(acc.tier_breakdown[&StorageTier::Standard], 11);
        assert_eq!(acc.tier_breakdown[&StorageTier::Glacier], 5);
        assert_eq!(acc.tier_total(), acc.size);
    }

    #[test]
    fn test_merge_keeps_left_path() {
        let mut parent = Accumulator::new("a/");
        let child = Accumulator::from_record(&record("a/b/c", 7, 50, StorageTier::StandardIa));
        parent.merge(&child).unwrap();

        assert_eq!(parent.path, "a/");
        assert_eq!(parent.count, 1);
        assert_eq!(parent.size, 7);
        assert_eq!(parent.oldest, parent.newest);
    }

    #[test]
    fn test_merge_with_empty_is_identity() {
        let mut acc = Accumulator::from_record(&record("k", 3, 10, StorageTier::Standard));
        let before = acc.clone();
        acc.merge(&Accumulator::new("elsewhere")).unwrap();
        assert_eq!(acc, before);
    }

    #[test]
    fn test_overflow_leaves_accumulator_untouched() {
        let mut acc = Accumulator::from_record(&record("big", u64::MAX, 10, StorageTier::Standard));
        let before = acc.clone();
        let err = acc.add(&record("more", 1, 20, StorageTier::Standard)).unwrap_err();
        assert!(matches!(err, RecordError::SizeOverflow { .. }));
        assert_eq!(acc, before);
    }
}
