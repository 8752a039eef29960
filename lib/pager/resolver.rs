use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::fetcher::{FetchError, ListFetcher};
use crate::types::{Category, ItemId, Slice, SliceQueue};

/// Splits an ordered ID list into the first slice and the queue of remaining slices.
///
/// An empty list yields an empty first slice and an empty queue.
pub fn partition_ids(ids: &[ItemId]) -> (Slice, SliceQueue) {
    let mut queue: SliceQueue = Slice::partition(ids).into();
    let first = queue.pop_front().unwrap_or_default();
    (first, queue)
}

/// Resolves a category to its ranked ID list and partitions it.
pub async fn resolve<L>(
    lists: &L,
    category: Category,
    cancel: &CancellationToken,
) -> Result<(Slice, SliceQueue), FetchError>
where
    L: ListFetcher + ?Sized,
{
    let ids = lists.story_ids(category, cancel).await?;
    let (first, remaining) = partition_ids(&ids);
    debug!(
        event = "category_resolved",
        category = %category,
        total_ids = ids.len(),
        remaining_slices = remaining.len(),
        "resolved category list"
    );
    Ok((first, remaining))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::fetcher::FetchErrorKind;
    use crate::pager::test_support::MockLists;

    #[test]
    fn partition_splits_first_slice_from_queue() {
        let ids: Vec<ItemId> = (1..=25).collect();
        let (first, remaining) = partition_ids(&ids);

        assert_eq!(first.ids(), &(1..=10).collect::<Vec<_>>()[..]);
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].ids(), &(11..=20).collect::<Vec<_>>()[..]);
        assert_eq!(remaining[1].ids(), &[21, 22, 23, 24, 25]);
    }

    #[test]
    fn partition_of_empty_list_is_empty() {
        let (first, remaining) = partition_ids(&[]);
        assert!(first.is_empty());
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn resolve_preserves_upstream_rank() {
        let lists = MockLists::with_plan(vec![(Category::Best, vec![Ok(vec![9, 3, 7, 1])])]);
        let (first, remaining) = resolve(&lists, Category::Best, &CancellationToken::new())
            .await
            .expect("list should resolve");

        assert_eq!(first.ids(), &[9, 3, 7, 1]);
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn resolve_propagates_list_failure() {
        let lists = MockLists::with_plan(vec![(
            Category::Top,
            vec![Err(FetchError::new(FetchErrorKind::Network, "offline"))],
        )]);
        let err = resolve(&lists, Category::Top, &CancellationToken::new())
            .await
            .expect_err("list failure should surface");
        assert_eq!(err.kind, FetchErrorKind::Network);
    }
}
