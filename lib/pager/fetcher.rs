use std::sync::Arc;

use futures::future::BoxFuture;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::hn_client::retry::is_retryable_status;
use crate::hn_client::{HnClient, HnClientErr};
use crate::types::{Category, Item, ItemId};

/// Process-wide request budget shared by every session talking to the same upstream.
pub type GlobalRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

pub fn build_rate_limiter(requests_per_second: u32) -> GlobalRateLimiter {
    let rps = std::num::NonZeroU32::new(requests_per_second).unwrap_or(nonzero_ext::nonzero!(1u32));
    Arc::new(RateLimiter::direct(Quota::per_second(rps)))
}

/// Outcome of fetching one ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItemResponse {
    Found(Item),
    /// Upstream answered `null`, or the item is deleted/dead.
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Network,
    RateLimited,
    UpstreamUnavailable,
    Rejected,
    MalformedResponse,
    Cancelled,
}

/// Normalized fetch failure. Everything except `Cancelled` counts as a transient
/// failure for pagination purposes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FetchErrorKind::Cancelled, "request cancelled")
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == FetchErrorKind::Cancelled
    }

    /// Whether the upstream client would have retried this on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            FetchErrorKind::Network
                | FetchErrorKind::RateLimited
                | FetchErrorKind::UpstreamUnavailable
        )
    }
}

pub fn map_client_error(error: HnClientErr, resource: &str) -> FetchError {
    match error {
        HnClientErr::Cancelled => FetchError::cancelled(),
        HnClientErr::UnexpectedStatus { status, .. } => map_status(status, resource),
        HnClientErr::RequestError(err) => {
            if let Some(status) = err.status() {
                return map_status(status.as_u16(), resource);
            }
            if err.is_decode() {
                return FetchError::new(
                    FetchErrorKind::MalformedResponse,
                    format!("response decode error while fetching {resource}: {err}"),
                );
            }
            FetchError::new(
                FetchErrorKind::Network,
                format!("network/transport error while fetching {resource}: {err}"),
            )
        }
        HnClientErr::JsonParseError(err) => FetchError::new(
            FetchErrorKind::MalformedResponse,
            format!("invalid JSON payload for {resource}: {err}"),
        ),
        HnClientErr::InvalidUrl(url) => FetchError::new(
            FetchErrorKind::Rejected,
            format!("invalid upstream url {url} for {resource}"),
        ),
    }
}

/// Statuses the client retries stay retryable here; everything else is a rejection.
fn map_status(status: u16, resource: &str) -> FetchError {
    match status {
        429 => FetchError::new(
            FetchErrorKind::RateLimited,
            format!("rate limited while fetching {resource}"),
        ),
        status if is_retryable_status(status) => FetchError::new(
            FetchErrorKind::UpstreamUnavailable,
            format!("upstream error {status} while fetching {resource}"),
        ),
        _ => FetchError::new(
            FetchErrorKind::Rejected,
            format!("upstream rejected request for {resource} with status {status}"),
        ),
    }
}

/// Fetches one item by ID.
///
/// Object-safe so sessions can hold `Arc<dyn ItemFetcher>` and tests can script responses.
pub trait ItemFetcher: Send + Sync {
    fn fetch_item<'a>(
        &'a self,
        item_id: ItemId,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<FetchItemResponse, FetchError>>;
}

impl<T> ItemFetcher for Arc<T>
where
    T: ItemFetcher + ?Sized,
{
    fn fetch_item<'a>(
        &'a self,
        item_id: ItemId,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<FetchItemResponse, FetchError>> {
        (**self).fetch_item(item_id, cancel)
    }
}

/// Fetches the ranked ID list of a category.
pub trait ListFetcher: Send + Sync {
    fn story_ids<'a>(
        &'a self,
        category: Category,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Vec<ItemId>, FetchError>>;
}

impl<T> ListFetcher for Arc<T>
where
    T: ListFetcher + ?Sized,
{
    fn story_ids<'a>(
        &'a self,
        category: Category,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Vec<ItemId>, FetchError>> {
        (**self).story_ids(category, cancel)
    }
}

/// Firebase-backed fetcher used at runtime.
pub struct HnFetcher {
    client: HnClient,
    rate_limiter: GlobalRateLimiter,
}

impl HnFetcher {
    /// The limiter wraps every call, so upstream retries spend the same budget.
    pub fn new(client: HnClient, rate_limiter: GlobalRateLimiter) -> Self {
        Self {
            client,
            rate_limiter,
        }
    }

    async fn wait_for_budget(&self, cancel: &CancellationToken) -> Result<(), FetchError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::cancelled()),
            _ = self.rate_limiter.until_ready() => Ok(()),
        }
    }
}

impl ItemFetcher for HnFetcher {
    fn fetch_item<'a>(
        &'a self,
        item_id: ItemId,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<FetchItemResponse, FetchError>> {
        Box::pin(async move {
            self.wait_for_budget(cancel).await?;
            match self.client.get_item(item_id, cancel).await {
                Ok(Some(raw)) if raw.is_removed() => Ok(FetchItemResponse::Absent),
                Ok(Some(raw)) => Ok(FetchItemResponse::Found(raw.into_item())),
                Ok(None) => Ok(FetchItemResponse::Absent),
                Err(err) => Err(map_client_error(err, &format!("item {item_id}"))),
            }
        })
    }
}

impl ListFetcher for HnFetcher {
    fn story_ids<'a>(
        &'a self,
        category: Category,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Vec<ItemId>, FetchError>> {
        Box::pin(async move {
            self.wait_for_budget(cancel).await?;
            self.client
                .get_story_ids(category, cancel)
                .await
                .map_err(|err| map_client_error(err, &format!("{category} story list")))
        })
    }
}
