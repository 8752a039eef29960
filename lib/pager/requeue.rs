use indexmap::IndexSet;

use crate::types::{BatchOutcome, ItemId, Slice};

/// IDs that failed transiently and have not resolved since.
///
/// Keeps first-failure order so retry slices are stable across pages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailedIdPool {
    ids: IndexSet<ItemId>,
}

impl FailedIdPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears every ID that resolved (found or absent), then records fresh failures.
    pub fn requeue(&mut self, outcome: &BatchOutcome) {
        for item in &outcome.succeeded {
            self.ids.shift_remove(&item.id);
        }
        for item_id in &outcome.absent {
            self.ids.shift_remove(item_id);
        }
        self.ids.extend(outcome.failed.iter().copied());
    }

    /// Re-partitions the pool into slices without draining it.
    pub fn retry_slices(&self) -> Vec<Slice> {
        let ids: Vec<ItemId> = self.ids.iter().copied().collect();
        Slice::partition(&ids)
    }

    pub fn contains(&self, item_id: ItemId) -> bool {
        self.ids.contains(&item_id)
    }

    pub fn ids(&self) -> Vec<ItemId> {
        self.ids.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
