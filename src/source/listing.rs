//! Paged listing adapter.
//!
//! [`ListingSource`] drives an [`ObjectLister`] backend with continuation tokens, the
//! same primitive a bucket listing API exposes, and retries transient failures with
//! exponential backoff. The engine above never retries anything.

use super::{Page, RecordSource};
use crate::error::{ScanResult, SourceError};
use crate::models::LeafRecord;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// One response from a listing backend.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Records in ascending key order.
    pub records: Vec<LeafRecord>,
    /// Token for the following page; `None` once the listing is complete.
    pub next_continuation: Option<String>,
}

/// Backend that lists keys under a prefix in ascending order, one page at a time.
#[async_trait]
pub trait ObjectLister: Send + Sync {
    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> Result<ListPage, SourceError>;

    /// Name used in logs and error context (a bucket name, a directory).
    fn name(&self) -> String;
}

#[async_trait]
impl<T: ObjectLister + ?Sized> ObjectLister for std::sync::Arc<T> {
    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> Result<ListPage, SourceError> {
        (**self).list_page(prefix, continuation, max_keys).await
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

/// Exponential backoff for retryable listing failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Sleep before retry number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// [`RecordSource`] over a paginated listing.
pub struct ListingSource<L> {
    lister: L,
    prefix: String,
    page_size: usize,
    retry: RetryPolicy,
    continuation: Option<String>,
    pages: u64,
    finished: bool,
}

impl<L: ObjectLister> ListingSource<L> {
    pub fn new(lister: L, prefix: impl Into<String>, page_size: usize) -> Self {
        Self {
            lister,
            prefix: prefix.into(),
            page_size: page_size.max(1),
            retry: RetryPolicy::default(),
            continuation: None,
            pages: 0,
            finished: false,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn pages_fetched(&self) -> u64 {
        self.pages
    }

    async fn fetch_with_retry(&self) -> Result<ListPage, SourceError> {
        let mut attempt = 0;
        loop {
            let result = self
                .lister
                .list_page(&self.prefix, self.continuation.as_deref(), self.page_size)
                .await;

            match result {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        lister = %self.lister.name(),
                        page = self.pages,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Listing page failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<L: ObjectLister> RecordSource for ListingSource<L> {
    async fn next_page(&mut self) -> ScanResult<Option<Page>> {
        if self.finished {
            return Ok(None);
        }

        let listed = self.fetch_with_retry().await?;
        let page = Page::new(self.pages, listed.records);
        self.pages += 1;

        match listed.next_continuation {
            Some(token) => self.continuation = Some(token),
            None => self.finished = true,
        }

        debug!(
            page = page.number,
            records = page.len(),
            last = self.finished,
            "Fetched listing page"
        );

        // A final empty page only signals completion.
        if page.is_empty() && self.finished {
            return Ok(None);
        }
        Ok(Some(page))
    }

    fn describe(&self) -> String {
        format!("listing of {} under {:?}", self.lister.name(), self.prefix)
    }
}
