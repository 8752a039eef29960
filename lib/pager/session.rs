use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::cursor::{PageSource, PageStep, PagerError, PaginationCursor, Upstream};
use crate::types::{Category, Item, ItemId, PageResult, SliceQueue};

/// A first page fetched ahead of time, plus the slices that follow it.
#[derive(Debug, Clone, Default)]
pub struct InitialPage {
    pub items: Vec<Item>,
    pub remaining: SliceQueue,
}

/// Outcome of [`PaginatedItems::fetch_next_page`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchNextPage {
    Fetched(PageResult),
    /// Another fetch is in flight for this session; the call was ignored.
    AlreadyFetching,
    Exhausted,
    Cancelled,
    Failed(PagerError),
}

/// Consumer-facing state of one session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PageView {
    pub items: Vec<Item>,
    pub has_next_page: bool,
    pub is_fetching_next_page: bool,
    pub error: Option<String>,
    pub failed_count: usize,
    pub next_page_index: usize,
}

/// Paginated, de-duplicated item sequence for one consumer session.
///
/// Shared behind an `Arc`; readers never wait on an in-flight page. Only one page fetch
/// runs at a time, extra calls return [`FetchNextPage::AlreadyFetching`].
pub struct PaginatedItems {
    cursor: tokio::sync::Mutex<PaginationCursor>,
    state: Mutex<SessionState>,
    fetching: AtomicBool,
}

/// Reader-side copy of the cursor, extended page by page.
#[derive(Debug, Clone)]
struct SessionState {
    items: Vec<Item>,
    has_next_page: bool,
    error: Option<PagerError>,
    failed_count: usize,
    next_page_index: usize,
}

impl SessionState {
    fn of(cursor: &PaginationCursor) -> Self {
        Self {
            items: cursor.items().cloned().collect(),
            has_next_page: cursor.has_next_page(),
            error: cursor.error().cloned(),
            failed_count: cursor.failed_count(),
            next_page_index: cursor.next_page_index(),
        }
    }

    /// Syncs the counters and appends the items of a newly committed page.
    fn advance(&mut self, cursor: &PaginationCursor, page: Option<&PageResult>) {
        if let Some(page) = page {
            self.items.extend(page.items.iter().cloned());
        }
        self.has_next_page = cursor.has_next_page();
        self.error = cursor.error().cloned();
        self.failed_count = cursor.failed_count();
        self.next_page_index = cursor.next_page_index();
    }
}

/// Clears the in-flight flag even when the fetch future is dropped mid-way.
struct FetchingGuard<'a>(&'a AtomicBool);

impl Drop for FetchingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PaginatedItems {
    pub fn new(cursor: PaginationCursor) -> Self {
        let state = SessionState::of(&cursor);
        Self {
            cursor: tokio::sync::Mutex::new(cursor),
            state: Mutex::new(state),
            fetching: AtomicBool::new(false),
        }
    }

    pub fn for_category(
        upstream: Upstream,
        category: Category,
        initial: Option<InitialPage>,
    ) -> Self {
        Self::with_source(upstream, PageSource::Category(category), initial)
    }

    /// Session over a story's direct replies.
    pub fn for_comments(
        upstream: Upstream,
        child_ids: Vec<ItemId>,
        initial: Option<InitialPage>,
    ) -> Self {
        Self::with_source(upstream, PageSource::Ids(child_ids), initial)
    }

    fn with_source(upstream: Upstream, source: PageSource, initial: Option<InitialPage>) -> Self {
        let cursor = PaginationCursor::new(upstream, source);
        let cursor = match initial {
            Some(initial) => cursor.with_initial_batch(initial.items, initial.remaining),
            None => cursor,
        };
        Self::new(cursor)
    }

    pub async fn fetch_next_page(&self, cancel: &CancellationToken) -> FetchNextPage {
        if self.fetching.swap(true, Ordering::AcqRel) {
            return FetchNextPage::AlreadyFetching;
        }
        let _guard = FetchingGuard(&self.fetching);

        let mut cursor = self.cursor.lock().await;
        let step = cursor.fetch_next_page(cancel).await;
        let page = match &step {
            PageStep::Page(page) => Some(page),
            _ => None,
        };
        lock(&self.state).advance(&cursor, page);

        match step {
            PageStep::Page(page) => FetchNextPage::Fetched(page),
            PageStep::Exhausted => FetchNextPage::Exhausted,
            PageStep::Cancelled => FetchNextPage::Cancelled,
            PageStep::Failed(err) => FetchNextPage::Failed(err),
        }
    }

    pub fn items(&self) -> Vec<Item> {
        lock(&self.state).items.clone()
    }

    pub fn item_count(&self) -> usize {
        lock(&self.state).items.len()
    }

    pub fn has_next_page(&self) -> bool {
        lock(&self.state).has_next_page
    }

    pub fn is_fetching_next_page(&self) -> bool {
        self.fetching.load(Ordering::Acquire)
    }

    pub fn error(&self) -> Option<PagerError> {
        lock(&self.state).error.clone()
    }

    /// Number of IDs waiting to be retried.
    pub fn failed_count(&self) -> usize {
        lock(&self.state).failed_count
    }

    pub fn snapshot(&self) -> PageView {
        let state = lock(&self.state);
        PageView {
            items: state.items.clone(),
            has_next_page: state.has_next_page,
            is_fetching_next_page: self.is_fetching_next_page(),
            error: state.error.as_ref().map(ToString::to_string),
            failed_count: state.failed_count,
            next_page_index: state.next_page_index,
        }
    }
}
