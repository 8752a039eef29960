use futures::future::join_all;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::fetcher::{FetchItemResponse, ItemFetcher};
use crate::server::monitoring::PAGER_METRICS;
use crate::types::{BatchOutcome, Slice};

/// The batch was abandoned before every fetch settled. Its results are void.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("batch fetch cancelled")]
pub struct Cancelled;

/// Fetches every ID of `slice` concurrently and classifies each result.
///
/// Waits for all fetches to settle; one failing ID never fails the batch. Outcome vectors
/// follow slice order regardless of completion order.
pub async fn fetch_batch<F>(
    fetcher: &F,
    slice: &Slice,
    cancel: &CancellationToken,
) -> Result<BatchOutcome, Cancelled>
where
    F: ItemFetcher + ?Sized,
{
    let attempts = slice
        .ids()
        .iter()
        .map(|&item_id| async move { (item_id, fetcher.fetch_item(item_id, cancel).await) });

    let settled = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Cancelled),
        settled = join_all(attempts) => settled,
    };

    let mut outcome = BatchOutcome::default();
    for (item_id, result) in settled {
        match result {
            Ok(FetchItemResponse::Found(item)) if item.removed => outcome.absent.push(item_id),
            Ok(FetchItemResponse::Found(item)) => outcome.succeeded.push(item),
            Ok(FetchItemResponse::Absent) => outcome.absent.push(item_id),
            Err(err) if err.is_cancelled() => return Err(Cancelled),
            Err(err) => {
                debug!(
                    event = "item_fetch_failed",
                    item_id,
                    kind = ?err.kind,
                    error = %err,
                    "item fetch failed transiently"
                );
                outcome.failed.push(item_id);
            }
        }
    }

    if cancel.is_cancelled() {
        return Err(Cancelled);
    }

    if let Some(metrics) = PAGER_METRICS.get() {
        metrics.items_fetched_total.inc_by(outcome.succeeded.len() as u64);
        metrics.items_absent_total.inc_by(outcome.absent.len() as u64);
        metrics.items_failed_total.inc_by(outcome.failed.len() as u64);
    }

    Ok(outcome)
}

/// Fetches several slices concurrently and merges their outcomes in slice order.
pub async fn fetch_slices<F>(
    fetcher: &F,
    slices: &[Slice],
    cancel: &CancellationToken,
) -> Result<BatchOutcome, Cancelled>
where
    F: ItemFetcher + ?Sized,
{
    let batches = join_all(
        slices
            .iter()
            .map(|slice| fetch_batch(fetcher, slice, cancel)),
    )
    .await;

    let mut merged = BatchOutcome::default();
    for batch in batches {
        merged.merge(batch?);
    }
    Ok(merged)
}
