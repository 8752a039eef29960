use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::fetcher::{
    FetchError, FetchErrorKind, FetchItemResponse, ItemFetcher, ListFetcher,
};
use crate::types::{Category, Item, ItemId, ItemKind};

pub(crate) fn sample_item(id: ItemId) -> Item {
    Item {
        id,
        author: Some("alice".to_string()),
        created_at: 1_700_000_000,
        kind: ItemKind::Story,
        score: Some(42),
        title: Some(format!("item-{id}")),
        url: Some("https://example.com".to_string()),
        text: None,
        descendants: Some(0),
        parent: None,
        child_ids: Vec::new(),
        removed: false,
    }
}

pub(crate) fn found(id: ItemId) -> Result<FetchItemResponse, FetchError> {
    Ok(FetchItemResponse::Found(sample_item(id)))
}

pub(crate) fn absent() -> Result<FetchItemResponse, FetchError> {
    Ok(FetchItemResponse::Absent)
}

pub(crate) fn transient() -> Result<FetchItemResponse, FetchError> {
    Err(FetchError::new(
        FetchErrorKind::UpstreamUnavailable,
        "scripted upstream outage",
    ))
}

/// Scripted fetcher. IDs without a plan resolve to a sample item; an ID with a plan pops
/// one scripted response per call and falls back to a sample item when the plan runs dry.
#[derive(Default)]
pub(crate) struct MockFetcher {
    plans: Mutex<HashMap<ItemId, VecDeque<Result<FetchItemResponse, FetchError>>>>,
    call_counts: Mutex<HashMap<ItemId, u32>>,
    delay: Option<Duration>,
}

impl MockFetcher {
    pub(crate) fn with_plan(
        plan: Vec<(ItemId, Vec<Result<FetchItemResponse, FetchError>>)>,
    ) -> Self {
        let mut plans = HashMap::new();
        for (item_id, entries) in plan {
            plans.insert(item_id, entries.into_iter().collect());
        }
        Self {
            plans: Mutex::new(plans),
            call_counts: Mutex::new(HashMap::new()),
            delay: None,
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls_for(&self, item_id: ItemId) -> u32 {
        *self
            .call_counts
            .lock()
            .expect("call_count mutex poisoned")
            .get(&item_id)
            .unwrap_or(&0)
    }

    pub(crate) fn total_calls(&self) -> u32 {
        self.call_counts
            .lock()
            .expect("call_count mutex poisoned")
            .values()
            .sum()
    }
}

impl ItemFetcher for MockFetcher {
    fn fetch_item<'a>(
        &'a self,
        item_id: ItemId,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<FetchItemResponse, FetchError>> {
        Box::pin(async move {
            {
                let mut counts = self.call_counts.lock().expect("call_count mutex poisoned");
                *counts.entry(item_id).or_insert(0) += 1;
            }

            if let Some(delay) = self.delay {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(FetchError::cancelled()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let scripted = self
                .plans
                .lock()
                .expect("plans mutex poisoned")
                .get_mut(&item_id)
                .and_then(|responses| responses.pop_front());
            scripted.unwrap_or_else(|| found(item_id))
        })
    }
}

/// Scripted category lists. Each call pops the next response for the category; the last
/// response is repeated once the script runs dry.
#[derive(Default)]
pub(crate) struct MockLists {
    plans: Mutex<HashMap<Category, VecDeque<Result<Vec<ItemId>, FetchError>>>>,
    calls: Mutex<u32>,
}

impl MockLists {
    pub(crate) fn with_plan(plan: Vec<(Category, Vec<Result<Vec<ItemId>, FetchError>>)>) -> Self {
        let mut plans = HashMap::new();
        for (category, entries) in plan {
            plans.insert(category, entries.into_iter().collect());
        }
        Self {
            plans: Mutex::new(plans),
            calls: Mutex::new(0),
        }
    }

    pub(crate) fn calls(&self) -> u32 {
        *self.calls.lock().expect("calls mutex poisoned")
    }
}

impl ListFetcher for MockLists {
    fn story_ids<'a>(
        &'a self,
        category: Category,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Vec<ItemId>, FetchError>> {
        Box::pin(async move {
            *self.calls.lock().expect("calls mutex poisoned") += 1;
            let mut plans = self.plans.lock().expect("plans mutex poisoned");
            let responses = plans.get_mut(&category).ok_or_else(|| {
                FetchError::new(
                    FetchErrorKind::Rejected,
                    format!("no scripted list for {category}"),
                )
            })?;
            if responses.len() > 1 {
                responses.pop_front().unwrap_or_else(|| Ok(Vec::new()))
            } else {
                responses.front().cloned().unwrap_or_else(|| Ok(Vec::new()))
            }
        })
    }
}
