//! Record sources.
//!
//! A source hands out pages of [`LeafRecord`]s in ascending key order until it is
//! exhausted. Two families are provided:
//!
//! - [`listing::ListingSource`] pages through an [`listing::ObjectLister`] backend, the
//!   way a live bucket listing would, retrying transient failures itself
//! - [`crate::inventory::InventorySource`] decodes a bulk-export manifest and its data files
//!
//! Sources are consumed by [`crate::analyzer::UsageAnalyzer`], which keeps at most one
//! page of lookahead in flight.

pub mod listing;
pub mod local;

use crate::error::ScanResult;
use crate::models::LeafRecord;
use async_trait::async_trait;
use std::collections::VecDeque;

pub use listing::{ListPage, ListingSource, ObjectLister, RetryPolicy};
pub use local::{LocalDirLister, MemoryLister};

/// One ordered batch of leaf records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    /// Zero-based position of this page in the stream.
    pub number: u64,
    pub records: Vec<LeafRecord>,
}

impl Page {
    pub fn new(number: u64, records: Vec<LeafRecord>) -> Self {
        Self { number, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Producer of ordered pages.
///
/// `Ok(None)` marks the end of the stream; any `Err` is final and the caller stops
/// pulling.
#[async_trait]
pub trait RecordSource: Send {
    async fn next_page(&mut self) -> ScanResult<Option<Page>>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;

    /// Data files dropped under a skip-on-error policy.
    fn skipped_files(&self) -> Vec<String> {
        Vec::new()
    }
}

#[async_trait]
impl<T: RecordSource + ?Sized> RecordSource for Box<T> {
    async fn next_page(&mut self) -> ScanResult<Option<Page>> {
        (**self).next_page().await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn skipped_files(&self) -> Vec<String> {
        (**self).skipped_files()
    }
}

/// Pre-built pages, optionally ending in an error. Useful for tests and benchmarks.
#[derive(Debug, Default)]
pub struct PagedRecords {
    pages: VecDeque<Vec<LeafRecord>>,
    served: u64,
    failure: Option<crate::error::SourceError>,
}

impl PagedRecords {
    pub fn new(pages: impl IntoIterator<Item = Vec<LeafRecord>>) -> Self {
        Self {
            pages: pages.into_iter().collect(),
            served: 0,
            failure: None,
        }
    }

    /// Split already-sorted records into pages of `page_size`.
    pub fn chunked(records: Vec<LeafRecord>, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        let mut pages = Vec::new();
        let mut records = records.into_iter().peekable();
        while records.peek().is_some() {
            pages.push(records.by_ref().take(page_size).collect());
        }
        Self::new(pages)
    }

    /// Fail with `error` once the prepared pages run out.
    pub fn fail_after(mut self, error: crate::error::SourceError) -> Self {
        self.failure = Some(error);
        self
    }
}

#[async_trait]
impl RecordSource for PagedRecords {
    async fn next_page(&mut self) -> ScanResult<Option<Page>> {
        match self.pages.pop_front() {
            Some(records) => {
                let page = Page::new(self.served, records);
                self.served += 1;
                Ok(Some(page))
            }
            None => match self.failure.take() {
                Some(error) => Err(error.into()),
                None => Ok(None),
            },
        }
    }

    fn describe(&self) -> String {
        format!("{} prepared pages", self.pages.len() + self.served as usize)
    }
}
