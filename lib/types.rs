use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Upstream item identifier. Assigned once by HN and never reused.
pub type ItemId = u64;

/// Number of IDs fetched together in one batch.
pub const SLICE_SIZE: usize = 10;

/// Story list categories exposed by the Firebase API.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Top,
    New,
    Best,
    Ask,
    Show,
    Job,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Top,
        Category::New,
        Category::Best,
        Category::Ask,
        Category::Show,
        Category::Job,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Top => "top",
            Category::New => "new",
            Category::Best => "best",
            Category::Ask => "ask",
            Category::Show => "show",
            Category::Job => "job",
        }
    }

    /// Path of the flat ID list endpoint, relative to the API root.
    pub fn list_path(self) -> String {
        format!("{}stories.json", self.as_str())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| {
                format!("unknown category {raw:?}, expected one of top, new, best, ask, show, job")
            })
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Story,
    Comment,
    Job,
    Poll,
    PollOpt,
    #[serde(other)]
    Unknown,
}

impl ItemKind {
    pub fn from_upstream(raw: Option<&str>) -> Self {
        match raw {
            Some("story") => ItemKind::Story,
            Some("comment") => ItemKind::Comment,
            Some("job") => ItemKind::Job,
            Some("poll") => ItemKind::Poll,
            Some("pollopt") => ItemKind::PollOpt,
            _ => ItemKind::Unknown,
        }
    }
}

/// Normalized item as seen by pagination consumers.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: ItemId,
    pub author: Option<String>,
    pub created_at: i64,
    pub kind: ItemKind,
    pub score: Option<i64>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub text: Option<String>,
    pub descendants: Option<i64>,
    pub parent: Option<ItemId>,
    /// Child IDs in upstream display order.
    pub child_ids: Vec<ItemId>,
    /// Upstream `deleted` or `dead`. Removed items are treated as absent.
    pub removed: bool,
}

/// Ordered group of at most [`SLICE_SIZE`] IDs fetched together.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct Slice(Vec<ItemId>);

impl Slice {
    pub fn new(ids: Vec<ItemId>) -> Result<Self, String> {
        if ids.len() > SLICE_SIZE {
            return Err(format!(
                "slice holds at most {SLICE_SIZE} ids, got {}",
                ids.len()
            ));
        }
        Ok(Self(ids))
    }

    /// Splits `ids` into consecutive slices without reordering.
    pub fn partition(ids: &[ItemId]) -> Vec<Slice> {
        ids.chunks(SLICE_SIZE)
            .map(|chunk| Slice(chunk.to_vec()))
            .collect()
    }

    pub fn ids(&self) -> &[ItemId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.0.contains(&id)
    }
}

impl<'de> Deserialize<'de> for Slice {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let ids = Vec::<ItemId>::deserialize(deserializer)?;
        Slice::new(ids).map_err(serde::de::Error::custom)
    }
}

/// Slices not fetched yet, consumed front to back.
pub type SliceQueue = VecDeque<Slice>;

/// Classified result of fetching every ID in one slice.
///
/// Every input ID lands in exactly one of the three vectors.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchOutcome {
    pub succeeded: Vec<Item>,
    /// Transient failures, eligible for requeue.
    pub failed: Vec<ItemId>,
    /// Confirmed missing or removed. Never retried, never surfaced.
    pub absent: Vec<ItemId>,
}

impl BatchOutcome {
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.absent.len()
    }

    pub fn merge(&mut self, other: BatchOutcome) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
        self.absent.extend(other.absent);
    }

    /// True when at least one ID was attempted and none resolved.
    pub fn all_failed(&self) -> bool {
        !self.failed.is_empty() && self.succeeded.is_empty() && self.absent.is_empty()
    }
}

/// Items materialized by one pagination step.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PageResult {
    pub items: Vec<Item>,
    pub page_index: usize,
    pub failed_ids: Vec<ItemId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_keeps_order_and_short_tail() {
        let ids: Vec<ItemId> = (1..=25).collect();
        let slices = Slice::partition(&ids);

        assert_eq!(slices.len(), 3);
        assert_eq!(slices[0].ids(), &(1..=10).collect::<Vec<_>>()[..]);
        assert_eq!(slices[2].ids(), &[21, 22, 23, 24, 25]);
        let flattened: Vec<ItemId> = slices.iter().flat_map(|s| s.ids().to_vec()).collect();
        assert_eq!(flattened, ids);
    }

    #[test]
    fn partition_of_empty_list_is_empty() {
        assert!(Slice::partition(&[]).is_empty());
    }

    #[test]
    fn oversized_slice_is_rejected() {
        let err = Slice::new((0..11).collect()).expect_err("11 ids should not fit");
        assert!(err.contains("at most 10"));
        assert!(serde_json::from_str::<Slice>("[1,2,3,4,5,6,7,8,9,10,11]").is_err());
    }

    #[test]
    fn category_parses_case_insensitively() {
        assert_eq!("Show".parse::<Category>(), Ok(Category::Show));
        assert_eq!(Category::Ask.list_path(), "askstories.json");
        assert!("jobs".parse::<Category>().is_err());
    }

    #[test]
    fn unknown_item_kind_is_tolerated() {
        let kind: ItemKind = serde_json::from_str("\"launch\"").expect("should decode");
        assert_eq!(kind, ItemKind::Unknown);
        assert_eq!(ItemKind::from_upstream(Some("pollopt")), ItemKind::PollOpt);
    }

    #[test]
    fn all_failed_requires_no_resolution() {
        let mut outcome = BatchOutcome {
            failed: vec![1, 2],
            ..Default::default()
        };
        assert!(outcome.all_failed());
        outcome.absent.push(3);
        assert!(!outcome.all_failed());
        assert_eq!(outcome.attempted(), 3);
        assert!(!BatchOutcome::default().all_failed());
    }
}
