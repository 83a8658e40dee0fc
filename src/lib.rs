//! s3du Library
//!
//! Disk usage for flat object-storage key spaces. Keys such as `photos/2024/cat.jpg`
//! carry no real directories, yet people want `du`-style totals per prefix. This
//! library computes them in a single streaming pass over a sorted listing, with memory
//! proportional to the rollup depth rather than to the number of keys.
//!
//! ## Core Features
//!
//! - **Streaming rollup**: per-prefix count, bytes, time range and storage-tier
//!   breakdown, closed and reported as soon as a prefix's key range is passed
//! - **Configurable depth**: group by the first N path segments, or by every level
//! - **Capped leaf listing**: individual keys are shown up to a per-prefix limit, then
//!   summarised by one marker
//! - **Two record sources**: paged listings (with retry) and bulk-export manifests of
//!   gzip-compressed CSV files
//! - **Overlapped I/O**: the next page is fetched while the current one is folded
//!
//! ## Architecture Overview
//!
//! Data flows one way: source, pages, engine, closed accumulators, sink.
//!
//! - [`models`] - leaf records, storage tiers and accumulators
//! - [`rollup`] - the prefix-stack engine
//! - [`sink`] - report events and the sink trait
//! - [`source`] - the page source trait plus listing backends
//! - [`inventory`] - bulk-export manifests and data files
//! - [`analyzer`] - the fetch/fold pipeline
//! - [`display`] - console and JSON renderers
//! - [`config`] - layered configuration
//! - [`logging`] - structured logging setup
//! - [`error`] - error kinds
//!
//! ## Main Entry Point
//!
//! ```rust
//! use chrono::Utc;
//! use s3du::{EngineConfig, LeafRecord, RollupDepth, RollupEngine, StorageTier};
//! use s3du::sink::CollectingSink;
//!
//! let config = EngineConfig {
//!     depth: RollupDepth::Limited(1),
//!     ..EngineConfig::default()
//! };
//! let mut engine = RollupEngine::new(config, CollectingSink::new()).unwrap();
//!
//! let now = Utc::now();
//! engine
//!     .process_batch(&[
//!         LeafRecord::new("a/1", 10, now, StorageTier::Standard),
//!         LeafRecord::new("a/2", 5, now, StorageTier::Glacier),
//!         LeafRecord::new("b/1", 1, now, StorageTier::Standard),
//!     ])
//!     .unwrap();
//!
//! let summary = engine.finalize();
//! assert_eq!(summary.root.size, 16);
//! assert_eq!(summary.sink.prefix("a/").unwrap().count, 2);
//! ```

pub mod analyzer;
pub mod config;
pub mod display;
pub mod error;
pub mod inventory;
pub mod logging;
pub mod models;
pub mod rollup;
pub mod sink;
pub mod source;
pub mod timestamp_parser;

pub use analyzer::{ScanOutcome, UsageAnalyzer};
pub use error::{ConfigError, RecordError, ScanError, ScanResult, SourceError};
pub use models::*;
pub use rollup::{EngineConfig, RollupDepth, RollupEngine, RollupSummary};
pub use sink::{ReportSink, UsageReport};
