//! Paginated batch fetching over per-item upstream endpoints.
//!
//! IDs are fetched in slices of [`crate::types::SLICE_SIZE`]. Each slice is classified into
//! found, absent and transiently failed IDs; failures are pooled per session and retried
//! ahead of unfetched slices on the next page.

pub mod batch;
pub mod cache;
pub mod cursor;
pub mod fetcher;
pub mod requeue;
pub mod resolver;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use batch::{fetch_batch, fetch_slices, Cancelled};
pub use cache::{CachedItemFetcher, ItemCache};
pub use cursor::{PageSource, PageStep, PagerError, PaginationCursor, Upstream};
pub use fetcher::{
    build_rate_limiter, FetchError, FetchErrorKind, FetchItemResponse, GlobalRateLimiter,
    HnFetcher, ItemFetcher, ListFetcher,
};
pub use requeue::FailedIdPool;
pub use resolver::{partition_ids, resolve};
pub use session::{FetchNextPage, InitialPage, PageView, PaginatedItems};
