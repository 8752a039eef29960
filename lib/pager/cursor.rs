use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::batch::{fetch_batch, fetch_slices, Cancelled};
use super::fetcher::{FetchError, ItemFetcher, ListFetcher};
use super::requeue::FailedIdPool;
use super::resolver::{partition_ids, resolve};
use crate::server::monitoring::PAGER_METRICS;
use crate::types::{BatchOutcome, Category, Item, ItemId, PageResult, Slice, SliceQueue};

/// Upstream handles a cursor fetches through.
#[derive(Clone)]
pub struct Upstream {
    pub items: Arc<dyn ItemFetcher>,
    pub lists: Arc<dyn ListFetcher>,
}

impl Upstream {
    pub fn new(items: Arc<dyn ItemFetcher>, lists: Arc<dyn ListFetcher>) -> Self {
        Self { items, lists }
    }
}

/// Where the ordered ID list of a cursor comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSource {
    /// Ranked story list, resolved when page 0 is materialized.
    Category(Category),
    /// Fixed list, typically the child IDs of a story.
    Ids(Vec<ItemId>),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PagerError {
    #[error("failed to resolve {category} story list: {source}")]
    Resolver {
        category: Category,
        #[source]
        source: FetchError,
    },
    #[error("every item of page {page_index} failed to load ({failed} ids)")]
    AllFailed { page_index: usize, failed: usize },
}

/// Result of one [`PaginationCursor::fetch_next_page`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageStep {
    Page(PageResult),
    /// Nothing left to fetch. State is unchanged.
    Exhausted,
    /// Abandoned before commit. State is unchanged.
    Cancelled,
    /// The page was not materialized. `error` holds the same value.
    Failed(PagerError),
}

/// Work for one page, computed before any await so an abandoned fetch leaves no trace.
struct PagePlan {
    slices: Vec<Slice>,
    consumes_fresh_slice: bool,
}

/// Pagination state for one (source, consumer session) pair.
///
/// Page 0 is the preloaded batch or the first slice of the source. Every later page
/// fetches the current failure pool (re-sliced, ahead of everything else) together with
/// the next unfetched slice. State changes only after all fetches of a page settle.
pub struct PaginationCursor {
    upstream: Upstream,
    source: PageSource,
    initial_batch: Option<Vec<Item>>,
    queue: SliceQueue,
    pool: FailedIdPool,
    next_page_index: usize,
    pages: Vec<PageResult>,
    seen: HashSet<ItemId>,
    absent: HashSet<ItemId>,
    error: Option<PagerError>,
}

impl PaginationCursor {
    pub fn new(upstream: Upstream, source: PageSource) -> Self {
        Self {
            upstream,
            source,
            initial_batch: None,
            queue: SliceQueue::new(),
            pool: FailedIdPool::new(),
            next_page_index: 0,
            pages: Vec::new(),
            seen: HashSet::new(),
            absent: HashSet::new(),
            error: None,
        }
    }

    pub fn for_category(upstream: Upstream, category: Category) -> Self {
        Self::new(upstream, PageSource::Category(category))
    }

    pub fn for_ids(upstream: Upstream, ids: Vec<ItemId>) -> Self {
        Self::new(upstream, PageSource::Ids(ids))
    }

    /// Supplies an already-fetched first page and the slices that follow it, so page 0
    /// needs no network call.
    pub fn with_initial_batch(mut self, first_batch: Vec<Item>, remaining: SliceQueue) -> Self {
        if self.next_page_index == 0 {
            self.initial_batch = Some(first_batch);
            self.queue = remaining;
        }
        self
    }

    pub fn source(&self) -> &PageSource {
        &self.source
    }

    pub fn next_page_index(&self) -> usize {
        self.next_page_index
    }

    pub fn pages(&self) -> &[PageResult] {
        &self.pages
    }

    /// All items fetched so far, in page order, without duplicates.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.pages.iter().flat_map(|page| page.items.iter())
    }

    pub fn item_count(&self) -> usize {
        self.pages.iter().map(|page| page.items.len()).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.pool.len()
    }

    pub fn failed_ids(&self) -> Vec<ItemId> {
        self.pool.ids()
    }

    pub fn remaining_slices(&self) -> Vec<Slice> {
        self.queue.iter().cloned().collect()
    }

    pub fn error(&self) -> Option<&PagerError> {
        self.error.as_ref()
    }

    /// Re-evaluated after every page: the queue shrinks as slices are consumed and the
    /// failure pool may bring work back.
    pub fn has_next_page(&self) -> bool {
        self.next_page_index == 0 || !self.queue.is_empty() || !self.pool.is_empty()
    }

    pub async fn fetch_next_page(&mut self, cancel: &CancellationToken) -> PageStep {
        if !self.has_next_page() {
            return PageStep::Exhausted;
        }

        let step = if self.next_page_index == 0 {
            self.fetch_first_page(cancel).await
        } else {
            self.fetch_following_page(cancel).await
        };

        match &step {
            PageStep::Page(page) => {
                if let Some(metrics) = PAGER_METRICS.get() {
                    metrics.pages_fetched_total.inc();
                }
                info!(
                    event = "page_fetched",
                    page_index = page.page_index,
                    items = page.items.len(),
                    failed = page.failed_ids.len(),
                    failed_pool = self.pool.len(),
                    remaining_slices = self.queue.len(),
                    has_next_page = self.has_next_page(),
                    "materialized page"
                );
            }
            PageStep::Cancelled => {
                if let Some(metrics) = PAGER_METRICS.get() {
                    metrics.pages_cancelled_total.inc();
                }
                debug!(
                    event = "page_cancelled",
                    page_index = self.next_page_index,
                    "page fetch abandoned"
                );
            }
            PageStep::Failed(err) => {
                warn!(
                    event = "page_failed",
                    page_index = self.next_page_index,
                    error = %err,
                    "page not materialized"
                );
            }
            PageStep::Exhausted => {}
        }

        step
    }

    async fn fetch_first_page(&mut self, cancel: &CancellationToken) -> PageStep {
        if let Some(first_batch) = self.initial_batch.take() {
            let (removed, kept): (Vec<Item>, Vec<Item>) =
                first_batch.into_iter().partition(|item| item.removed);
            self.absent.extend(removed.iter().map(|item| item.id));
            let items = self.dedupe(kept);
            return PageStep::Page(self.commit_page(items, Vec::new()));
        }

        let (first, remaining) = match &self.source {
            PageSource::Ids(ids) => partition_ids(ids),
            PageSource::Category(category) => {
                let category = *category;
                match resolve(self.upstream.lists.as_ref(), category, cancel).await {
                    Ok(resolved) => resolved,
                    Err(err) if err.is_cancelled() => return PageStep::Cancelled,
                    Err(source) => {
                        if let Some(metrics) = PAGER_METRICS.get() {
                            metrics.list_failures_total.inc();
                        }
                        let err = PagerError::Resolver { category, source };
                        self.error = Some(err.clone());
                        return PageStep::Failed(err);
                    }
                }
            }
        };

        let first = self.unseen_slice(&first);
        let outcome = match fetch_batch(self.upstream.items.as_ref(), &first, cancel).await {
            Ok(outcome) => outcome,
            Err(Cancelled) => return PageStep::Cancelled,
        };

        self.queue = remaining;
        PageStep::Page(self.commit_outcome(outcome))
    }

    async fn fetch_following_page(&mut self, cancel: &CancellationToken) -> PageStep {
        let plan = self.plan_page();
        let outcome = match fetch_slices(self.upstream.items.as_ref(), &plan.slices, cancel).await
        {
            Ok(outcome) => outcome,
            Err(Cancelled) => return PageStep::Cancelled,
        };

        if plan.consumes_fresh_slice {
            self.queue.pop_front();
        }
        PageStep::Page(self.commit_outcome(outcome))
    }

    fn plan_page(&self) -> PagePlan {
        let mut slices = self.pool.retry_slices();
        let fresh = self.queue.front().map(|slice| self.unseen_slice(slice));
        let consumes_fresh_slice = fresh.is_some();
        if let Some(fresh) = fresh.filter(|slice| !slice.is_empty()) {
            slices.push(fresh);
        }
        PagePlan {
            slices,
            consumes_fresh_slice,
        }
    }

    /// Drops IDs already displayed, confirmed absent, already pooled, or repeated within
    /// the slice.
    fn unseen_slice(&self, slice: &Slice) -> Slice {
        let mut kept: Vec<ItemId> = Vec::with_capacity(slice.len());
        for &item_id in slice.ids() {
            if !self.seen.contains(&item_id)
                && !self.absent.contains(&item_id)
                && !self.pool.contains(item_id)
                && !kept.contains(&item_id)
            {
                kept.push(item_id);
            }
        }
        // Filtering only shrinks a valid slice.
        Slice::new(kept).unwrap_or_default()
    }

    fn commit_outcome(&mut self, outcome: BatchOutcome) -> PageResult {
        self.pool.requeue(&outcome);
        self.absent.extend(outcome.absent.iter().copied());
        let page_index = self.next_page_index;
        self.error = outcome.all_failed().then(|| PagerError::AllFailed {
            page_index,
            failed: outcome.failed.len(),
        });
        if let Some(err) = &self.error {
            warn!(
                event = "page_all_failed",
                page_index,
                error = %err,
                "every item of the page failed"
            );
        }

        let BatchOutcome {
            succeeded, failed, ..
        } = outcome;
        let items = self.dedupe(succeeded);
        self.commit_page(items, failed)
    }

    fn commit_page(&mut self, items: Vec<Item>, failed_ids: Vec<ItemId>) -> PageResult {
        if failed_ids.is_empty() {
            self.error = None;
        }
        let page = PageResult {
            items,
            page_index: self.next_page_index,
            failed_ids,
        };
        self.next_page_index += 1;
        self.pages.push(page.clone());
        page
    }

    fn dedupe(&mut self, items: impl IntoIterator<Item = Item>) -> Vec<Item> {
        items
            .into_iter()
            .filter(|item| self.seen.insert(item.id))
            .collect()
    }
}
