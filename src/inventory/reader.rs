//! Bulk-export data file decoding.
//!
//! Data files are not listed in key order, so [`InventorySource::open`] first probes
//! the first record of every file (in parallel with the `parallel` feature), drops
//! empty files and files that start past the scan prefix, then serves the remaining
//! files one after another in first-key order. Each file is expected to be sorted
//! internally and files must not overlap; a decoded key that does not follow the one
//! before it fails the scan whatever the file error policy.

use super::manifest::{FieldSchema, LoadedManifest};
use crate::error::{RecordError, ScanError, ScanResult, SourceError};
use crate::models::{LeafRecord, StorageTier};
use crate::source::{Page, RecordSource};
use crate::timestamp_parser::TimestampParser;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::read::MultiGzDecoder;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// What to do when a single data file cannot be read or decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileErrorPolicy {
    /// Abort the whole run.
    #[default]
    Fail,
    /// Log the file, count it as skipped and carry on with the next one.
    Skip,
}

impl FromStr for FileErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "skip" => Ok(Self::Skip),
            other => Err(format!("expected \"fail\" or \"skip\", got {other:?}")),
        }
    }
}

impl fmt::Display for FileErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fail => "fail",
            Self::Skip => "skip",
        })
    }
}

/// Streaming decoder for one CSV or gzip-compressed CSV data file.
pub struct InventoryFileReader {
    path: PathBuf,
    schema: FieldSchema,
    reader: csv::Reader<Box<dyn Read + Send>>,
    row: csv::StringRecord,
    rows_read: u64,
}

impl InventoryFileReader {
    pub fn open(path: &Path, schema: FieldSchema) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|e| SourceError::io(path, e))?;
        let mut buffered = BufReader::new(file);
        let is_gzip = buffered
            .fill_buf()
            .map_err(|e| SourceError::io(path, e))?
            .starts_with(&GZIP_MAGIC);

        let input: Box<dyn Read + Send> = if is_gzip {
            Box::new(MultiGzDecoder::new(buffered))
        } else {
            Box::new(buffered)
        };

        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(input);

        Ok(Self {
            path: path.to_path_buf(),
            schema,
            reader,
            row: csv::StringRecord::new(),
            rows_read: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Decode the next row, or `None` at end of file.
    pub fn next_record(&mut self) -> ScanResult<Option<LeafRecord>> {
        let more = self
            .reader
            .read_record(&mut self.row)
            .map_err(|source| SourceError::Decode {
                file: self.path.clone(),
                source,
            })?;
        if !more {
            return Ok(None);
        }

        self.rows_read += 1;
        let location = format!("{}:{}", self.path.display(), self.rows_read);
        let record = decode_row(&self.row, &self.schema, &location)?;
        Ok(Some(record))
    }
}

/// Decode one CSV row into a leaf record.
///
/// Missing optional columns default to size 0, the Unix epoch and `STANDARD`.
pub fn decode_row(
    row: &csv::StringRecord,
    schema: &FieldSchema,
    location: &str,
) -> Result<LeafRecord, RecordError> {
    let raw_key = row
        .get(schema.key)
        .ok_or_else(|| RecordError::malformed(location, "key", "column missing"))?;
    let key = decode_key(raw_key).map_err(|reason| RecordError::malformed(location, "key", reason))?;
    if key.is_empty() {
        return Err(RecordError::EmptyKey {
            location: location.to_string(),
        });
    }

    let field = |index: Option<usize>| {
        index
            .and_then(|i| row.get(i))
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let size = match field(schema.size) {
        Some(value) => value
            .parse::<u64>()
            .map_err(|e| RecordError::malformed(location, "size", format!("{value:?}: {e}")))?,
        None => 0,
    };
    let last_modified = match field(schema.last_modified) {
        Some(value) => TimestampParser::parse(value)
            .map_err(|reason| RecordError::malformed(location, "last_modified", reason))?,
        None => DateTime::<Utc>::UNIX_EPOCH,
    };
    let tier = match field(schema.storage_class) {
        Some(value) => value
            .parse::<StorageTier>()
            .map_err(|reason| RecordError::malformed(location, "storage_class", reason))?,
        None => StorageTier::Standard,
    };

    Ok(LeafRecord::new(key, size, last_modified, tier))
}

/// Export keys are URL-encoded with `+` for spaces.
fn decode_key(raw: &str) -> Result<String, String> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|key| key.into_owned())
        .map_err(|e| format!("{raw:?} is not valid UTF-8 once decoded: {e}"))
}

/// First key of a data file, or `None` when the file holds no rows.
pub fn probe(path: &Path, schema: FieldSchema) -> ScanResult<Option<String>> {
    let mut reader = InventoryFileReader::open(path, schema)?;
    Ok(reader.next_record()?.map(|record| record.key))
}

/// Decoding position across the ordered data files. Moved into a blocking task for
/// each page and handed back afterwards.
struct ReaderState {
    schema: FieldSchema,
    prefix: String,
    page_size: usize,
    policy: FileErrorPolicy,
    files: VecDeque<PathBuf>,
    current: Option<InventoryFileReader>,
    /// Last key decoded from any file, in or out of the scan prefix.
    last_key: Option<String>,
    skipped: Vec<String>,
}

impl ReaderState {
    /// Fill one page; `None` once every file is exhausted.
    fn fill_page(&mut self) -> ScanResult<Option<Vec<LeafRecord>>> {
        let mut records = Vec::with_capacity(self.page_size);

        while records.len() < self.page_size {
            if self.current.is_none() {
                let Some(path) = self.files.pop_front() else {
                    break;
                };
                debug!(file = %path.display(), "Opening data file");
                match InventoryFileReader::open(&path, self.schema) {
                    Ok(reader) => self.current = Some(reader),
                    Err(e) => {
                        self.handle_file_error(&path, e.into())?;
                        continue;
                    }
                }
            }

            let Some(reader) = self.current.as_mut() else {
                continue;
            };
            match reader.next_record() {
                Ok(Some(record)) => {
                    // Files are ordered by first key only; overlapping ranges show up here.
                    if let Some(previous) = self.last_key.as_deref() {
                        if record.key.as_str() <= previous {
                            warn!(
                                file = %reader.path().display(),
                                previous = %previous,
                                key = %record.key,
                                "Data file keys out of order"
                            );
                            return Err(RecordError::Unsorted {
                                previous: previous.to_string(),
                                key: record.key,
                            }
                            .into());
                        }
                    }
                    self.last_key = Some(record.key.clone());
                    if record.key.starts_with(&self.prefix) {
                        records.push(record);
                    }
                }
                Ok(None) => {
                    debug!(file = %reader.path().display(), rows = reader.rows_read(), "Data file done");
                    self.current = None;
                }
                Err(e) => {
                    let path = reader.path().to_path_buf();
                    self.current = None;
                    self.handle_file_error(&path, e)?;
                }
            }
        }

        if records.is_empty() {
            Ok(None)
        } else {
            Ok(Some(records))
        }
    }

    fn handle_file_error(&mut self, path: &Path, error: ScanError) -> ScanResult<()> {
        match self.policy {
            FileErrorPolicy::Fail => Err(error),
            FileErrorPolicy::Skip => {
                warn!(file = %path.display(), error = %error, "Skipping unreadable data file");
                self.skipped.push(path.display().to_string());
                Ok(())
            }
        }
    }
}

/// [`RecordSource`] over a bulk export.
pub struct InventorySource {
    description: String,
    state: Option<ReaderState>,
    skipped: Vec<String>,
    pages: u64,
}

impl InventorySource {
    /// Probe and order the manifest's data files. Blocking; run it off the async
    /// executor.
    pub fn open(
        loaded: &LoadedManifest,
        prefix: &str,
        page_size: usize,
        policy: FileErrorPolicy,
    ) -> ScanResult<Self> {
        let paths: Vec<PathBuf> = loaded
            .manifest
            .files
            .iter()
            .map(|file| loaded.resolve_data_file(file))
            .collect();

        let schema = loaded.schema;
        #[cfg(feature = "parallel")]
        let probes: Vec<ScanResult<Option<String>>> =
            paths.par_iter().map(|path| probe(path, schema)).collect();
        #[cfg(not(feature = "parallel"))]
        let probes: Vec<ScanResult<Option<String>>> =
            paths.iter().map(|path| probe(path, schema)).collect();

        let mut skipped = Vec::new();
        let mut ordered = Vec::with_capacity(paths.len());
        for (path, probe) in paths.into_iter().zip(probes) {
            match probe {
                Ok(Some(first_key)) => {
                    // Sorted files starting past the prefix range hold nothing in scope.
                    if first_key.as_str() > prefix && !first_key.starts_with(prefix) {
                        debug!(file = %path.display(), first_key = %first_key, "Data file outside prefix");
                        continue;
                    }
                    ordered.push((first_key, path));
                }
                Ok(None) => debug!(file = %path.display(), "Dropping empty data file"),
                Err(e) if policy == FileErrorPolicy::Skip => {
                    warn!(file = %path.display(), error = %e, "Skipping unreadable data file");
                    skipped.push(path.display().to_string());
                }
                Err(e) => return Err(e),
            }
        }
        ordered.sort();

        info!(
            bucket = %loaded.manifest.source_bucket,
            files = ordered.len(),
            skipped = skipped.len(),
            "Ordered export data files"
        );

        let state = ReaderState {
            schema,
            prefix: prefix.to_string(),
            page_size: page_size.max(1),
            policy,
            files: ordered.into_iter().map(|(_, path)| path).collect(),
            current: None,
            last_key: None,
            skipped: Vec::new(),
        };

        Ok(Self {
            description: format!(
                "export of {} from {}",
                loaded.manifest.source_bucket,
                loaded.path.display()
            ),
            state: Some(state),
            skipped,
            pages: 0,
        })
    }

    /// Data files still waiting to be read, in read order.
    pub fn pending_files(&self) -> Vec<PathBuf> {
        self.state
            .as_ref()
            .map(|state| state.files.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordSource for InventorySource {
    async fn next_page(&mut self) -> ScanResult<Option<Page>> {
        let Some(mut state) = self.state.take() else {
            return Ok(None);
        };

        let (state, result) = tokio::task::spawn_blocking(move || {
            let result = state.fill_page();
            (state, result)
        })
        .await
        .map_err(SourceError::from)?;

        let mut state = state;
        self.skipped.append(&mut state.skipped);
        match result {
            Ok(Some(records)) => {
                self.state = Some(state);
                let page = Page::new(self.pages, records);
                self.pages += 1;
                Ok(Some(page))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn describe(&self) -> String {
        self.description.clone()
    }

    fn skipped_files(&self) -> Vec<String> {
        self.skipped.clone()
    }
}
