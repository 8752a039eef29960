use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::hn_client::retry::RetryPolicy;
use crate::hn_client::{HnClient, HnClientErr, RetryingClient};
use crate::pager::{
    build_rate_limiter, CachedItemFetcher, FetchError, FetchItemResponse, HnFetcher, ItemCache,
    PaginatedItems, Upstream,
};
use crate::search::SearchClient;
use crate::server::monitoring::PAGER_METRICS;
use crate::types::{Item, ItemId};

pub type SessionId = u64;

pub const DEFAULT_SESSION_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

pub struct SessionEntry {
    pub session: Arc<PaginatedItems>,
    last_touched: Instant,
}

pub struct AppState {
    pub upstream: Upstream,
    pub search: SearchClient,
    pub cache: ItemCache,
    pub sessions: DashMap<SessionId, SessionEntry>,
    session_idle_ttl: Duration,
    next_session_id: AtomicU64,
    pub shutdown_token: CancellationToken,
    pub registry: RwLock<Registry>,
}

impl AppState {
    pub fn new(
        upstream: Upstream,
        search: SearchClient,
        cache: ItemCache,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            upstream,
            search,
            cache,
            sessions: DashMap::new(),
            session_idle_ttl: DEFAULT_SESSION_IDLE_TTL,
            next_session_id: AtomicU64::new(1),
            shutdown_token,
            registry: RwLock::new(<Registry>::default()),
        }
    }

    /// Wires the rate-limited, cached Firebase fetcher and the search client.
    pub fn from_config(
        config: &Config,
        shutdown_token: CancellationToken,
    ) -> Result<Self, HnClientErr> {
        let http = RetryingClient::new(config.request_timeout, RetryPolicy::default())?;
        let client = HnClient::new(config.hn_api_url.clone(), http.clone())?;
        let fetcher = Arc::new(HnFetcher::new(
            client,
            build_rate_limiter(config.rate_limit_rps),
        ));
        let cache = ItemCache::new(config.item_cache_ttl);
        let cached = Arc::new(CachedItemFetcher::new(fetcher.clone(), cache.clone()));
        let upstream = Upstream::new(cached, fetcher);
        let search = SearchClient::new(config.search_api_url.clone(), http);
        Ok(Self::new(upstream, search, cache, shutdown_token)
            .with_session_idle_ttl(config.session_idle_ttl))
    }

    /// Sessions untouched for longer than `ttl` are dropped by [`Self::evict_idle_sessions`].
    pub fn with_session_idle_ttl(mut self, ttl: Duration) -> Self {
        self.session_idle_ttl = ttl;
        self
    }

    pub fn insert_session(&self, session: PaginatedItems) -> (SessionId, Arc<PaginatedItems>) {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(session);
        self.sessions.insert(
            session_id,
            SessionEntry {
                session: session.clone(),
                last_touched: Instant::now(),
            },
        );
        if let Some(metrics) = PAGER_METRICS.get() {
            metrics.live_sessions.inc();
        }
        (session_id, session)
    }

    /// Looks up a session and marks it as used.
    pub fn session(&self, session_id: SessionId) -> Option<Arc<PaginatedItems>> {
        self.sessions.get_mut(&session_id).map(|mut entry| {
            entry.last_touched = Instant::now();
            entry.session.clone()
        })
    }

    pub fn remove_session(&self, session_id: SessionId) -> bool {
        let removed = self.sessions.remove(&session_id).is_some();
        if removed {
            if let Some(metrics) = PAGER_METRICS.get() {
                metrics.live_sessions.dec();
            }
        }
        removed
    }

    /// Drops sessions idle for longer than the configured TTL. Sessions with a page fetch
    /// in flight are kept. Returns how many were evicted.
    pub fn evict_idle_sessions(&self) -> usize {
        let ttl = self.session_idle_ttl;
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| {
            entry.session.is_fetching_next_page() || entry.last_touched.elapsed() <= ttl
        });
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            if let Some(metrics) = PAGER_METRICS.get() {
                metrics.live_sessions.dec_by(evicted as i64);
            }
            tracing::debug!(event = "sessions_evicted", evicted, "evicted idle sessions");
        }
        evicted
    }

    /// Looks up a story through the item cache. `Ok(None)` when it is absent.
    pub async fn story(
        &self,
        story_id: ItemId,
        cancel: &CancellationToken,
    ) -> Result<Option<Item>, FetchError> {
        match self.upstream.items.fetch_item(story_id, cancel).await? {
            FetchItemResponse::Found(item) if !item.removed => Ok(Some(item)),
            FetchItemResponse::Found(_) | FetchItemResponse::Absent => Ok(None),
        }
    }
}
