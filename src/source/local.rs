//! Listing backends that need no network.
//!
//! [`MemoryLister`] serves keys from a sorted in-memory map. [`LocalDirLister`] treats a
//! directory tree as a bucket: every regular file becomes an object whose key is its
//! `/`-joined path relative to the root.

use super::listing::{ListPage, ObjectLister};
use crate::error::SourceError;
use crate::models::{LeafRecord, StorageTier};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Sorted in-memory key space.
#[derive(Debug, Clone, Default)]
pub struct MemoryLister {
    name: String,
    objects: BTreeMap<String, LeafRecord>,
}

impl MemoryLister {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: BTreeMap::new(),
        }
    }

    pub fn from_records(name: impl Into<String>, records: impl IntoIterator<Item = LeafRecord>) -> Self {
        let mut lister = Self::new(name);
        for record in records {
            lister.insert(record);
        }
        lister
    }

    /// Insert or replace the object stored under `record.key`.
    pub fn insert(&mut self, record: LeafRecord) {
        self.objects.insert(record.key.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// One page of keys under `prefix`, strictly after `continuation`.
    pub fn page(&self, prefix: &str, continuation: Option<&str>, max_keys: usize) -> ListPage {
        let lower = match continuation {
            Some(token) => Bound::Excluded(token.to_string()),
            None => Bound::Included(prefix.to_string()),
        };

        let mut records: Vec<LeafRecord> = self
            .objects
            .range((lower, Bound::Unbounded))
            .map(|(_, record)| record)
            .take_while(|record| record.key.starts_with(prefix))
            .take(max_keys.saturating_add(1))
            .cloned()
            .collect();

        let next_continuation = if records.len() > max_keys {
            records.truncate(max_keys);
            records.last().map(|r| r.key.clone())
        } else {
            None
        };

        ListPage {
            records,
            next_continuation,
        }
    }
}

#[async_trait]
impl ObjectLister for MemoryLister {
    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> Result<ListPage, SourceError> {
        Ok(self.page(prefix, continuation, max_keys))
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// A local directory listed as if it were a bucket.
#[derive(Debug, Clone)]
pub struct LocalDirLister {
    root: PathBuf,
    objects: MemoryLister,
}

impl LocalDirLister {
    /// Walk `root` and index every regular file below it.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, SourceError> {
        let root = root.as_ref().to_path_buf();
        let mut objects = MemoryLister::new(root.display().to_string());

        for entry in WalkDir::new(&root).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&root).to_path_buf();
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
                SourceError::io(path, source)
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(key) = object_key(&root, entry.path()) else {
                debug!(path = %entry.path().display(), "Skipping non UTF-8 path");
                continue;
            };
            let metadata = entry
                .metadata()
                .map_err(|e| SourceError::io(entry.path(), e.into()))?;
            let last_modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

            objects.insert(LeafRecord::new(
                key,
                metadata.len(),
                last_modified,
                StorageTier::Standard,
            ));
        }

        info!(root = %root.display(), objects = objects.len(), "Indexed local bucket");
        Ok(Self { root, objects })
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectLister for LocalDirLister {
    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> Result<ListPage, SourceError> {
        Ok(self.objects.page(prefix, continuation, max_keys))
    }

    fn name(&self) -> String {
        self.root.display().to_string()
    }
}

fn object_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    Some(segments?.join("/"))
}
