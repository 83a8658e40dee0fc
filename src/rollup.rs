//! Hierarchical Streaming Rollup Engine
//!
//! Turns an ordered stream of flat leaf records into closed per-prefix totals at a
//! configurable depth, in one pass and in memory proportional to the depth, while
//! surfacing a capped number of individual leaves per prefix.
//!
//! ## Prefix Stack
//!
//! The engine keeps the chain of currently open ancestors as a stack of frames.
//! Frame 0 is the scan root (the configured prefix); frame `i` is the accumulator for
//! the first `i` delimiter-terminated segments of the most recently folded key,
//! truncated at the rollup depth `D`. When a key arrives whose ancestry differs, every
//! frame below the divergence point is popped (deepest first), merged into its parent
//! and reported, then fresh frames are pushed for the new segments.
//!
//! ## Batches
//!
//! [`RollupEngine::process_batch`] folds a whole page at once when its last record
//! still belongs to the open context (the fast path). Otherwise the page is bisected
//! and each half retried, bottoming out at [`SMALL_BATCH`] records which are folded
//! one by one. Because keys arrive sorted, pages are almost always homogeneous and the
//! bisection only has to isolate the few prefix transitions.
//!
//! ## Leaf Display
//!
//! A record sitting directly inside its enclosing prefix (its directory depth is at
//! most `D`) is reported individually until that prefix has shown `display_limit`
//! leaves; the next one triggers a single [`UsageReport::Truncated`] marker. Every
//! record is folded whether shown or not.

use crate::error::{ConfigError, RecordError};
use crate::models::{Accumulator, LeafRecord};
use crate::sink::{ReportSink, UsageReport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, trace};

/// Batches at or below this size are folded record by record.
pub const SMALL_BATCH: usize = 8;

/// How many leading path segments group records into one accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DepthSetting", into = "DepthSetting")]
pub enum RollupDepth {
    Limited(usize),
    /// Every directory level gets its own accumulator.
    Unbounded,
}

impl RollupDepth {
    /// True once `levels` segments are as deep as grouping goes.
    pub fn reached_by(&self, levels: usize) -> bool {
        match self {
            Self::Limited(limit) => levels >= *limit,
            Self::Unbounded => false,
        }
    }

    /// Depth 0 collapses everything into the root and shows no leaves.
    pub fn shows_leaves(&self) -> bool {
        !matches!(self, Self::Limited(0))
    }
}

impl Default for RollupDepth {
    fn default() -> Self {
        Self::Unbounded
    }
}

impl fmt::Display for RollupDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limited(limit) => write!(f, "{limit}"),
            Self::Unbounded => f.write_str("all"),
        }
    }
}

impl FromStr for RollupDepth {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        match value.to_ascii_lowercase().as_str() {
            "all" | "inf" | "unbounded" => Ok(Self::Unbounded),
            other => other
                .parse::<usize>()
                .map(Self::Limited)
                .map_err(|_| ConfigError::InvalidDepth(value.to_string())),
        }
    }
}

/// Wire form of [`RollupDepth`] in config files: a number or `"all"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum DepthSetting {
    Number(i64),
    Text(String),
}

impl TryFrom<DepthSetting> for RollupDepth {
    type Error = ConfigError;

    fn try_from(value: DepthSetting) -> Result<Self, Self::Error> {
        match value {
            DepthSetting::Number(n) => usize::try_from(n)
                .map(Self::Limited)
                .map_err(|_| ConfigError::InvalidDepth(n.to_string())),
            DepthSetting::Text(text) => text.parse(),
        }
    }
}

impl From<RollupDepth> for DepthSetting {
    fn from(depth: RollupDepth) -> Self {
        match depth {
            RollupDepth::Limited(n) => DepthSetting::Number(n as i64),
            RollupDepth::Unbounded => DepthSetting::Text("all".to_string()),
        }
    }
}

/// Everything the engine needs to know about a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub delimiter: String,
    pub depth: RollupDepth,
    /// Leaves shown per enclosing prefix before the omission marker.
    pub display_limit: usize,
    /// Scan root; every record key must start with it.
    pub prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            delimiter: "/".to_string(),
            depth: RollupDepth::Unbounded,
            display_limit: 1000,
            prefix: String::new(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delimiter.is_empty() {
            return Err(ConfigError::EmptyDelimiter);
        }
        Ok(())
    }
}

/// Whether a key still belongs to the open prefix chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Matches,
    /// Frames at this index and above must be closed (or, when the index equals the
    /// stack height, new frames pushed) before the key can be folded.
    DivergesAt(usize),
}

#[derive(Debug)]
struct Frame {
    stats: Accumulator,
    shown: usize,
    omitted: u64,
}

impl Frame {
    fn new(path: String) -> Self {
        Self {
            stats: Accumulator::new(path),
            shown: 0,
            omitted: 0,
        }
    }
}

/// Result of draining the engine.
#[derive(Debug)]
pub struct RollupSummary<S> {
    pub root: Accumulator,
    /// Records folded into the stack; equals `root.count` unless `error` is set.
    pub records: u64,
    pub sink: S,
    /// Set when a merge overflowed while draining; the root totals are then incomplete.
    pub error: Option<RecordError>,
}

pub struct RollupEngine<S> {
    config: EngineConfig,
    stack: Vec<Frame>,
    sink: S,
    last_key: Option<String>,
    records: u64,
    ends: Vec<usize>,
}

impl<S: ReportSink> RollupEngine<S> {
    pub fn new(config: EngineConfig, sink: S) -> Result<Self, ConfigError> {
        config.validate()?;
        let root = Frame::new(config.prefix.clone());

        Ok(Self {
            config,
            stack: vec![root],
            sink,
            last_key: None,
            records: 0,
            ends: Vec::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn records_processed(&self) -> u64 {
        self.records
    }

    /// Paths of the currently open frames, root first.
    pub fn open_paths(&self) -> Vec<&str> {
        self.stack.iter().map(|f| f.stats.path.as_str()).collect()
    }

    /// Fold one ordered page.
    ///
    /// The page is checked against the stream order and the scan prefix before
    /// anything is folded; a failure there abandons the whole page. An overflow while
    /// folding leaves the records before it folded and counted.
    pub fn process_batch(&mut self, batch: &[LeafRecord]) -> Result<(), RecordError> {
        let Some(last) = batch.last() else {
            return Ok(());
        };

        self.check_page(batch)?;
        self.dispatch(batch)?;

        match &mut self.last_key {
            Some(key) => {
                key.clear();
                key.push_str(&last.key);
            }
            None => self.last_key = Some(last.key.clone()),
        }
        Ok(())
    }

    /// Close every open frame, deepest first, and report the root last.
    pub fn finalize(mut self) -> RollupSummary<S> {
        let mut error = None;
        while self.stack.len() > 1 {
            if let Err(e) = self.close_top() {
                error.get_or_insert(e);
            }
        }

        let root = self.stack.remove(0);
        debug!(
            records = self.records,
            size = root.stats.size,
            "Rollup drained"
        );
        self.sink.emit(UsageReport::Prefix {
            depth: 0,
            stats: root.stats.clone(),
            omitted: root.omitted,
        });

        RollupSummary {
            root: root.stats,
            records: self.records,
            sink: self.sink,
            error,
        }
    }

    fn check_page(&self, batch: &[LeafRecord]) -> Result<(), RecordError> {
        let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
            return Ok(());
        };

        // Once the page is known to be ascending, both ends in scope means everything
        // between is too.
        for (position, record) in [("first", first), ("last", last)] {
            if record.key.is_empty() {
                return Err(RecordError::EmptyKey {
                    location: format!("{position} record of page"),
                });
            }
            if !record.key.starts_with(&self.config.prefix) {
                return Err(RecordError::OutOfScope {
                    key: record.key.clone(),
                    prefix: self.config.prefix.clone(),
                });
            }
        }

        if let Some(previous) = &self.last_key {
            if first.key <= *previous {
                return Err(RecordError::Unsorted {
                    previous: previous.clone(),
                    key: first.key.clone(),
                });
            }
        }
        if let Some(pair) = batch.windows(2).find(|pair| pair[1].key <= pair[0].key) {
            return Err(RecordError::Unsorted {
                previous: pair[0].key.clone(),
                key: pair[1].key.clone(),
            });
        }
        Ok(())
    }

    fn dispatch(&mut self, batch: &[LeafRecord]) -> Result<(), RecordError> {
        match self.batch_alignment(batch) {
            Alignment::Matches => {
                trace!(records = batch.len(), "Folding homogeneous batch");
                for record in batch {
                    self.fold_into_top(record)?;
                }
                Ok(())
            }
            Alignment::DivergesAt(_) if batch.len() <= SMALL_BATCH => {
                for record in batch {
                    self.realign(&record.key)?;
                    self.fold_into_top(record)?;
                }
                Ok(())
            }
            Alignment::DivergesAt(_) => {
                let (left, right) = batch.split_at(batch.len() / 2);
                self.dispatch(left)?;
                self.dispatch(right)
            }
        }
    }

    /// Whether every record of `batch` belongs to the top frame.
    fn batch_alignment(&mut self, batch: &[LeafRecord]) -> Alignment {
        let Some(last) = batch.last() else {
            return Alignment::Matches;
        };

        let mut ends = std::mem::take(&mut self.ends);
        self.segment_ends(&last.key, &mut ends);
        let alignment = self.align(&last.key, &ends);
        self.ends = ends;

        if alignment != Alignment::Matches {
            return alignment;
        }

        // Sorted keys between the previous key and `last` share the top frame's path
        // as a string prefix. At full depth that settles it; above full depth a record
        // could still open a deeper frame, so each one must sit directly in the top.
        let height = self.stack.len();
        if self.config.depth.reached_by(height - 1) {
            return Alignment::Matches;
        }

        let top = &self.stack[height - 1].stats.path;
        let delimiter = self.config.delimiter.as_str();
        let shallow = batch.iter().all(|record| {
            record.key.starts_with(top.as_str())
                && !record.key[top.len()..].contains(delimiter)
        });
        if shallow {
            Alignment::Matches
        } else {
            Alignment::DivergesAt(height)
        }
    }

    /// Compare a key's truncated ancestry (`ends`) with the open frames.
    fn align(&self, key: &str, ends: &[usize]) -> Alignment {
        let keep = self.matching_frames(key, ends);
        if keep == self.stack.len() && ends.len() + 1 == keep {
            Alignment::Matches
        } else {
            Alignment::DivergesAt(keep)
        }
    }

    /// Number of frames, root included, that are still ancestors of `key`.
    fn matching_frames(&self, key: &str, ends: &[usize]) -> usize {
        let mut keep = 1;
        while keep < self.stack.len() {
            let Some(&end) = ends.get(keep - 1) else {
                break;
            };
            if key.as_bytes()[..end] != *self.stack[keep].stats.path.as_bytes() {
                break;
            }
            keep += 1;
        }
        keep
    }

    /// Byte offsets just past each delimiter of `key` after the scan prefix, at most
    /// `depth` of them. `key[..ends[i]]` is the path of frame `i + 1`.
    fn segment_ends(&self, key: &str, ends: &mut Vec<usize>) {
        ends.clear();
        let delimiter = self.config.delimiter.as_str();
        let mut position = self.config.prefix.len();

        while !self.config.depth.reached_by(ends.len()) {
            let Some(offset) = key.get(position..).and_then(|rest| rest.find(delimiter)) else {
                break;
            };
            position += offset + delimiter.len();
            ends.push(position);
        }
    }

    /// Pop and push frames until the open chain is exactly `key`'s ancestry.
    fn realign(&mut self, key: &str) -> Result<(), RecordError> {
        let mut ends = std::mem::take(&mut self.ends);
        self.segment_ends(key, &mut ends);

        let keep = self.matching_frames(key, &ends);
        let mut result = Ok(());
        while self.stack.len() > keep {
            if let Err(e) = self.close_top() {
                result = Err(e);
                break;
            }
        }

        if result.is_ok() {
            for &end in &ends[keep - 1..] {
                trace!(path = &key[..end], "Opening prefix");
                self.stack.push(Frame::new(key[..end].to_string()));
            }
        }

        self.ends = ends;
        result
    }

    fn close_top(&mut self) -> Result<(), RecordError> {
        let Some(frame) = self.stack.pop() else {
            return Ok(());
        };
        let depth = self.stack.len();
        if let Some(parent) = self.stack.last_mut() {
            parent.stats.merge(&frame.stats)?;
        }

        trace!(
            path = %frame.stats.path,
            count = frame.stats.count,
            size = frame.stats.size,
            "Closing prefix"
        );
        self.sink.emit(UsageReport::Prefix {
            depth,
            stats: frame.stats,
            omitted: frame.omitted,
        });
        Ok(())
    }

    /// Fold `record` into the top frame, reporting it as a leaf if it qualifies.
    fn fold_into_top(&mut self, record: &LeafRecord) -> Result<(), RecordError> {
        let depth = self.stack.len() - 1;
        let frame = &mut self.stack[depth];
        frame.stats.add(record)?;
        self.records += 1;

        if !self.config.depth.shows_leaves() {
            return Ok(());
        }

        // Keys equal to their prefix (folder markers, the scan root itself) are counted
        // but never listed.
        let rest = match record.key.get(frame.stats.path.len()..) {
            Some(rest) if !rest.is_empty() => rest,
            _ => return Ok(()),
        };
        if rest.contains(self.config.delimiter.as_str()) {
            return Ok(());
        }

        if frame.shown < self.config.display_limit {
            frame.shown += 1;
            self.sink.emit(UsageReport::Leaf {
                depth: depth + 1,
                stats: Accumulator::from_record(record),
            });
        } else {
            if frame.omitted == 0 {
                self.sink.emit(UsageReport::Truncated {
                    depth: depth + 1,
                    parent: frame.stats.path.clone(),
                    limit: self.config.display_limit,
                });
            }
            frame.omitted += 1;
        }
        Ok(())
    }
}
