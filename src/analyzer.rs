//! Scan Pipeline
//!
//! This module ties a [`RecordSource`] to a [`RollupEngine`] and runs a complete scan.
//!
//! ## Fetch/Fold Pipeline
//!
//! Fetching is I/O bound and folding is CPU bound, so the two overlap:
//!
//! 1. **Producer**: a spawned task reserves a slot in a capacity-1 channel, then fetches
//!    the next page into it. It cannot start fetching page `i + 2` until the consumer
//!    has taken page `i + 1`, so there is exactly one page of lookahead.
//! 2. **Consumer**: folds pages in arrival order, one at a time, on the calling task.
//!    The engine is never touched concurrently.
//! 3. **Shutdown**: on the first fetch or fold error the consumer stops pulling and
//!    drops the channel. After a fold error the producer is aborted rather than waited
//!    for. The engine is always finalized, so every prefix closed before the failure is
//!    still reported.
//!
//! ## Usage Example
//!
//! ```rust
//! use s3du::analyzer::UsageAnalyzer;
//! use s3du::rollup::EngineConfig;
//! use s3du::sink::CollectingSink;
//! use s3du::source::{ListingSource, MemoryLister};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let lister = MemoryLister::new("empty-bucket");
//! let source = ListingSource::new(lister, "", 1000);
//!
//! let analyzer = UsageAnalyzer::new(EngineConfig::default());
//! let (outcome, sink) = analyzer.run(source, CollectingSink::new()).await?;
//! assert!(outcome.is_success());
//! assert_eq!(sink.reports.len(), 1);
//! # Ok(())
//! # }
//! ```

use crate::error::{ConfigError, ScanError, ScanResult, SourceError};
use crate::models::Accumulator;
use crate::rollup::{EngineConfig, RollupEngine};
use crate::sink::ReportSink;
use crate::source::{Page, RecordSource};
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

/// Result of one scan, successful or not.
#[derive(Debug)]
pub struct ScanOutcome {
    /// Root totals. Incomplete when `error` is set.
    pub root: Accumulator,
    pub records: u64,
    pub pages: u64,
    /// Data files dropped under the skip policy.
    pub skipped_files: Vec<String>,
    /// First failure; everything reported before it is still valid.
    pub error: Option<ScanError>,
}

impl ScanOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub struct UsageAnalyzer {
    config: EngineConfig,
}

impl UsageAnalyzer {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Scan `source` to completion, reporting into `sink`.
    ///
    /// Only a configuration error is returned as `Err`, and then no page has been
    /// requested. Failures during the scan end up in [`ScanOutcome::error`].
    pub async fn run<Src, K>(&self, source: Src, sink: K) -> Result<(ScanOutcome, K), ConfigError>
    where
        Src: RecordSource + 'static,
        K: ReportSink,
    {
        let span = info_span!(
            "scan",
            run_id = %Uuid::new_v4(),
            source = %source.describe(),
            prefix = %self.config.prefix,
            depth = %self.config.depth,
        );
        self.run_pipeline(source, sink).instrument(span).await
    }

    async fn run_pipeline<Src, K>(&self, source: Src, sink: K) -> Result<(ScanOutcome, K), ConfigError>
    where
        Src: RecordSource + 'static,
        K: ReportSink,
    {
        let mut engine = RollupEngine::new(self.config.clone(), sink)?;
        info!("Scan started");

        let (tx, mut rx) = mpsc::channel::<ScanResult<Page>>(1);
        let producer = tokio::spawn(
            async move {
                let mut source = source;
                // Holding a permit before fetching bounds the lookahead to one page.
                while let Ok(permit) = tx.reserve().await {
                    match source.next_page().await {
                        Ok(Some(page)) => permit.send(Ok(page)),
                        Ok(None) => break,
                        Err(e) => {
                            permit.send(Err(e));
                            break;
                        }
                    }
                }
                source
            }
            .in_current_span(),
        );

        let mut pages = 0u64;
        let mut failure: Option<ScanError> = None;
        let mut fold_failed = false;
        while let Some(item) = rx.recv().await {
            let page = match item {
                Ok(page) => page,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };

            debug!(page = page.number, records = page.len(), "Folding page");
            pages += 1;
            if let Err(e) = engine.process_batch(&page.records) {
                failure = Some(e.into());
                fold_failed = true;
                break;
            }
        }
        drop(rx);

        // A fetch still in flight (possibly sleeping between retries) is not waited for.
        if fold_failed {
            producer.abort();
        }
        let skipped_files = match producer.await {
            Ok(source) => source.skipped_files(),
            Err(join_error) if join_error.is_cancelled() => {
                debug!("Abandoned in-flight fetch");
                Vec::new()
            }
            Err(join_error) => {
                failure.get_or_insert(SourceError::from(join_error).into());
                Vec::new()
            }
        };

        let summary = engine.finalize();
        if let Some(e) = summary.error {
            failure.get_or_insert(e.into());
        }

        let outcome = ScanOutcome {
            root: summary.root,
            records: summary.records,
            pages,
            skipped_files,
            error: failure,
        };

        match &outcome.error {
            None => info!(
                records = outcome.records,
                pages = outcome.pages,
                size = outcome.root.size,
                skipped_files = outcome.skipped_files.len(),
                "Scan complete"
            ),
            Some(e) => error!(
                kind = e.kind(),
                records = outcome.records,
                pages = outcome.pages,
                error = %e,
                "Scan failed"
            ),
        }

        Ok((outcome, summary.sink))
    }
}
