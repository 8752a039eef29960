use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::fetcher::{FetchError, FetchItemResponse, ItemFetcher};
use crate::server::monitoring::PAGER_METRICS;
use crate::types::{Item, ItemId};

pub const DEFAULT_ITEM_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct CachedItem {
    item: Item,
    stored_at: Instant,
}

/// Time-boxed item cache keyed by ID. Cloning shares the underlying map; writes are
/// last-write-wins.
#[derive(Debug, Clone)]
pub struct ItemCache {
    entries: Arc<DashMap<ItemId, CachedItem>>,
    ttl: Duration,
}

impl Default for ItemCache {
    fn default() -> Self {
        Self::new(DEFAULT_ITEM_TTL)
    }
}

impl ItemCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn get(&self, item_id: ItemId) -> Option<Item> {
        let expired = match self.entries.get(&item_id) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => return Some(entry.item.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries
                .remove_if(&item_id, |_, entry| entry.stored_at.elapsed() >= self.ttl);
        }
        None
    }

    pub fn insert(&self, item: Item) {
        self.entries.insert(
            item.id,
            CachedItem {
                item,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| entry.stored_at.elapsed() < ttl);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Serves cached items without a network call. Only found items are stored, so absent
/// and failed IDs always reach the inner fetcher.
pub struct CachedItemFetcher<F> {
    inner: F,
    cache: ItemCache,
}

impl<F> CachedItemFetcher<F>
where
    F: ItemFetcher,
{
    pub fn new(inner: F, cache: ItemCache) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &ItemCache {
        &self.cache
    }
}

impl<F> ItemFetcher for CachedItemFetcher<F>
where
    F: ItemFetcher,
{
    fn fetch_item<'a>(
        &'a self,
        item_id: ItemId,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<FetchItemResponse, FetchError>> {
        Box::pin(async move {
            if let Some(item) = self.cache.get(item_id) {
                if let Some(metrics) = PAGER_METRICS.get() {
                    metrics.cache_hits_total.inc();
                }
                return Ok(FetchItemResponse::Found(item));
            }
            if let Some(metrics) = PAGER_METRICS.get() {
                metrics.cache_misses_total.inc();
            }

            let response = self.inner.fetch_item(item_id, cancel).await?;
            if let FetchItemResponse::Found(item) = &response {
                self.cache.insert(item.clone());
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::test_support::{sample_item, MockFetcher};

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = ItemCache::new(Duration::from_secs(300));
        cache.insert(sample_item(1));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.get(1).is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(1).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired_entries() {
        let cache = ItemCache::new(Duration::from_secs(10));
        cache.insert(sample_item(1));
        tokio::time::advance(Duration::from_secs(6)).await;
        cache.insert(sample_item(2));
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(2).is_some());
    }

    #[tokio::test]
    async fn hits_skip_inner_fetcher_and_absent_is_not_cached() {
        let inner = Arc::new(MockFetcher::with_plan(vec![
            (1, vec![Ok(FetchItemResponse::Found(sample_item(1)))]),
            (
                2,
                vec![Ok(FetchItemResponse::Absent), Ok(FetchItemResponse::Absent)],
            ),
        ]));
        let fetcher = CachedItemFetcher::new(inner.clone(), ItemCache::default());
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            let response = fetcher.fetch_item(1, &cancel).await.expect("cached fetch");
            assert_eq!(response, FetchItemResponse::Found(sample_item(1)));
        }
        assert_eq!(inner.calls_for(1), 1);

        fetcher.fetch_item(2, &cancel).await.expect("absent fetch");
        fetcher.fetch_item(2, &cancel).await.expect("absent fetch");
        assert_eq!(inner.calls_for(2), 2);
        assert_eq!(fetcher.cache().len(), 1);
    }

    #[tokio::test]
    async fn shared_clones_see_latest_write() {
        let cache = ItemCache::default();
        let other = cache.clone();
        let mut updated = sample_item(5);
        cache.insert(updated.clone());
        updated.score = Some(99);
        other.insert(updated);

        assert_eq!(cache.get(5).and_then(|item| item.score), Some(99));
    }
}
