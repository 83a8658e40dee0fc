//! Bulk-export manifest.
//!
//! An export is a `manifest.json` describing the CSV field layout plus the list of
//! (usually gzip-compressed) data files that together cover the key space:
//!
//! ```json
//! {
//!   "sourceBucket": "example-bucket",
//!   "destinationBucket": "arn:aws:s3:::example-inventory",
//!   "version": "2016-11-30",
//!   "creationTimestamp": "1514944800000",
//!   "fileFormat": "CSV",
//!   "fileSchema": "Bucket, Key, Size, LastModifiedDate, StorageClass",
//!   "files": [
//!     { "key": "example-bucket/inv/data/6a4c.csv.gz", "size": 2147, "MD5checksum": "f11166069f1990abeb9c97ace9cdfabc" }
//!   ]
//! }
//! ```

use crate::error::SourceError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Raw manifest document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryManifest {
    pub source_bucket: String,
    #[serde(default)]
    pub destination_bucket: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub creation_timestamp: Option<String>,
    pub file_format: String,
    pub file_schema: String,
    pub files: Vec<ManifestFile>,
}

/// One data file listed by the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub key: String,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "MD5checksum", default)]
    pub md5_checksum: Option<String>,
}

impl ManifestFile {
    /// Last path segment of the file key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Column positions of the fields the decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSchema {
    pub key: usize,
    pub size: Option<usize>,
    pub last_modified: Option<usize>,
    pub storage_class: Option<usize>,
}

impl FieldSchema {
    /// Parse a comma-separated `fileSchema` value. `Key` is mandatory; unknown columns
    /// are carried but ignored.
    pub fn parse(schema: &str) -> Result<Self, String> {
        let columns: Vec<&str> = schema.split(',').map(str::trim).collect();
        let find = |name: &str| columns.iter().position(|c| c.eq_ignore_ascii_case(name));

        let key = find("Key").ok_or_else(|| format!("schema {schema:?} has no Key column"))?;
        Ok(Self {
            key,
            size: find("Size"),
            last_modified: find("LastModifiedDate"),
            storage_class: find("StorageClass"),
        })
    }
}

/// A manifest read from disk, with its schema parsed and its location remembered for
/// resolving data files.
#[derive(Debug, Clone)]
pub struct LoadedManifest {
    pub path: PathBuf,
    pub manifest: InventoryManifest,
    pub schema: FieldSchema,
    /// Directory the file keys are relative to, when known.
    pub data_root: Option<PathBuf>,
}

impl LoadedManifest {
    /// Load `path`, which is either a manifest file or an export directory.
    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let manifest_path = Self::locate(path)?;
        let content =
            fs::read_to_string(&manifest_path).map_err(|e| SourceError::io(&manifest_path, e))?;
        let manifest: InventoryManifest = serde_json::from_str(&content)
            .map_err(|e| SourceError::manifest(&manifest_path, e.to_string()))?;

        if !manifest.file_format.eq_ignore_ascii_case("csv") {
            return Err(SourceError::manifest(
                &manifest_path,
                format!("unsupported file format {:?}", manifest.file_format),
            ));
        }
        let schema = FieldSchema::parse(&manifest.file_schema)
            .map_err(|reason| SourceError::manifest(&manifest_path, reason))?;

        info!(
            manifest = %manifest_path.display(),
            bucket = %manifest.source_bucket,
            files = manifest.files.len(),
            "Loaded export manifest"
        );

        Ok(Self {
            path: manifest_path,
            manifest,
            schema,
            data_root: None,
        })
    }

    pub fn with_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.data_root = Some(root.into());
        self
    }

    /// Find the manifest for `path`: the file itself, `path/manifest.json`, or the newest
    /// `path/*/manifest.json`. Export directories are named by creation time, so the
    /// lexicographically greatest one is the newest.
    pub fn locate(path: &Path) -> Result<PathBuf, SourceError> {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        if !path.is_dir() {
            return Err(SourceError::manifest(path, "no such file or directory"));
        }

        let direct = path.join("manifest.json");
        if direct.is_file() {
            return Ok(direct);
        }

        let pattern = path.join("*").join("manifest.json");
        let pattern = pattern.to_string_lossy();
        let newest = glob::glob(&pattern)
            .map_err(|e| SourceError::manifest(path, e.to_string()))?
            .filter_map(Result::ok)
            .max();

        match newest {
            Some(found) => {
                debug!(manifest = %found.display(), "Using newest manifest");
                Ok(found)
            }
            None => Err(SourceError::manifest(path, "no manifest.json found")),
        }
    }

    /// Local path of a listed data file. Tried in order: `<data_root>/<key>`,
    /// `<manifest dir>/../data/<name>`, `<manifest dir>/<name>`. When none exists the
    /// last candidate is returned so the open error names a sensible path.
    pub fn resolve_data_file(&self, file: &ManifestFile) -> PathBuf {
        let manifest_dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut candidates = Vec::with_capacity(3);
        if let Some(root) = &self.data_root {
            candidates.push(root.join(&file.key));
        }
        candidates.push(manifest_dir.join("..").join("data").join(file.file_name()));
        candidates.push(manifest_dir.join(file.file_name()));

        let fallback = candidates.last().cloned().unwrap_or_default();
        candidates
            .into_iter()
            .find(|candidate| candidate.is_file())
            .unwrap_or(fallback)
    }
}
