//! Error kinds surfaced by a scan.
//!
//! Every failure a run can hit falls into one of three buckets:
//!
//! - [`SourceError`] - the backend, a bulk-export file, or the fetch task itself failed
//! - [`RecordError`] - a leaf record could not be folded (bad field, out of order, out of scope)
//! - [`ConfigError`] - the run was misconfigured and never started
//!
//! [`ScanError`] wraps all three so the pipeline can carry one type end to end while
//! callers can still tell the kinds apart.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used by sources and the pipeline.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Failure reported by a record source or the backend behind it.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Local I/O against an export file or a directory-backed bucket failed.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The listing backend rejected or failed a page request.
    #[error("listing failed at {context}: {message}")]
    Backend {
        /// Which request failed (bucket, prefix, page number).
        context: String,
        message: String,
        /// Whether a retry of the same request may succeed.
        retryable: bool,
    },

    /// A bulk-export data file could not be decoded.
    #[error("failed to decode {}: {source}", .file.display())]
    Decode {
        file: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// The bulk-export manifest is missing, unreadable or unsupported.
    #[error("invalid manifest {}: {reason}", .path.display())]
    Manifest { path: PathBuf, reason: String },

    /// The fetch task panicked or was cancelled.
    #[error("source task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SourceError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn backend(context: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self::Backend {
            context: context.into(),
            message: message.into(),
            retryable,
        }
    }

    pub fn manifest(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether repeating the failed request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend { retryable, .. } => *retryable,
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            Self::Decode { .. } | Self::Manifest { .. } | Self::Task(_) => false,
        }
    }
}

/// A leaf record that cannot be folded without corrupting running totals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("malformed {field} at {location}: {reason}")]
    Malformed {
        location: String,
        field: &'static str,
        reason: String,
    },

    #[error("empty key at {location}")]
    EmptyKey { location: String },

    #[error("key {key:?} is outside the scan prefix {prefix:?}")]
    OutOfScope { key: String, prefix: String },

    /// Keys must arrive in strictly ascending order.
    #[error("keys out of order: {key:?} does not sort after {previous:?}")]
    Unsorted { previous: String, key: String },

    #[error("byte total overflow while accumulating {path:?}")]
    SizeOverflow { path: String },
}

impl RecordError {
    pub fn malformed(location: impl Into<String>, field: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            location: location.into(),
            field,
            reason: reason.into(),
        }
    }
}

/// Configuration rejected before any page is requested.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("delimiter must not be empty")]
    EmptyDelimiter,

    #[error("invalid depth {0:?}: expected a non-negative integer or \"all\"")]
    InvalidDepth(String),

    #[error("page size must be between 1 and {max}, got {got}")]
    InvalidPageSize { got: usize, max: usize },

    #[error("invalid timezone offset {0:?}: expected UTC or +HH:MM")]
    InvalidTimezone(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Any failure that ends a scan.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ScanError {
    pub fn is_source(&self) -> bool {
        matches!(self, Self::Source(_))
    }

    pub fn is_record(&self) -> bool {
        matches!(self, Self::Record(_))
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Short label for logs and JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Source(_) => "source",
            Self::Record(RecordError::Unsorted { .. }) => "sortedness",
            Self::Record(_) => "record",
            Self::Config(_) => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SourceError::backend("page 3", "throttled", true).is_retryable());
        assert!(!SourceError::backend("page 3", "access denied", false).is_retryable());

        let timeout = SourceError::io("bucket", io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(timeout.is_retryable());

        let missing = SourceError::io("bucket", io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(!missing.is_retryable());
    }

    #[test]
    fn test_scan_error_kinds() {
        let unsorted: ScanError = RecordError::Unsorted {
            previous: "b".into(),
            key: "a".into(),
        }
        .into();
        assert!(unsorted.is_record());
        assert_eq!(unsorted.kind(), "sortedness");

        let config: ScanError = ConfigError::EmptyDelimiter.into();
        assert!(config.is_config());
        assert_eq!(config.to_string(), "delimiter must not be empty");
    }
}
