//! Client for the Algolia-backed HN search API.
//!
//! Used for keyword search and recent-activity listings. Hits convert into [`Item`] so
//! results can link into the paginated views.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::hn_client::{HnClientErr, RetryingClient};
use crate::types::{Item, ItemId, ItemKind};

#[derive(Error, Debug)]
pub enum SearchError {
    #[error(transparent)]
    Client(#[from] HnClientErr),
    #[error("search hit has a non-numeric objectID {0:?}")]
    InvalidObjectId(String),
}

/// One page of `search_by_date` results.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    #[serde(default)]
    pub nb_hits: u64,
    #[serde(default)]
    pub nb_pages: u32,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub hits_per_page: u32,
}

impl SearchPage {
    pub fn has_next_page(&self) -> bool {
        self.page + 1 < self.nb_pages
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    #[serde(rename = "objectID")]
    pub object_id: String,
    pub author: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub points: Option<i64>,
    pub num_comments: Option<i64>,
    pub story_id: Option<ItemId>,
    pub parent_id: Option<ItemId>,
    pub story_title: Option<String>,
    pub story_text: Option<String>,
    pub comment_text: Option<String>,
    #[serde(default)]
    pub created_at_i: i64,
    #[serde(default)]
    pub children: Vec<ItemId>,
    #[serde(rename = "_tags", default)]
    pub tags: Vec<String>,
}

impl SearchHit {
    fn kind(&self) -> ItemKind {
        let has_tag = |tag: &str| self.tags.iter().any(|candidate| candidate == tag);
        if has_tag("comment") {
            ItemKind::Comment
        } else if has_tag("job") {
            ItemKind::Job
        } else if has_tag("poll") {
            ItemKind::Poll
        } else if has_tag("story") {
            ItemKind::Story
        } else {
            ItemKind::Unknown
        }
    }
}

impl TryFrom<SearchHit> for Item {
    type Error = SearchError;

    fn try_from(hit: SearchHit) -> Result<Self, Self::Error> {
        let id = hit
            .object_id
            .parse::<ItemId>()
            .map_err(|_| SearchError::InvalidObjectId(hit.object_id.clone()))?;
        let kind = hit.kind();
        Ok(Item {
            id,
            author: hit.author,
            created_at: hit.created_at_i,
            title: hit.title.or(hit.story_title),
            url: hit.url,
            text: hit.comment_text.or(hit.story_text),
            score: hit.points,
            descendants: hit.num_comments,
            parent: hit.parent_id,
            child_ids: hit.children,
            kind,
            removed: false,
        })
    }
}

/// Nested thread returned by `GET /items/{id}`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ItemTree {
    pub id: ItemId,
    pub author: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub text: Option<String>,
    pub points: Option<i64>,
    #[serde(rename = "type")]
    pub type_: Option<String>,
    #[serde(default)]
    pub created_at_i: i64,
    pub parent_id: Option<ItemId>,
    pub story_id: Option<ItemId>,
    #[serde(default)]
    pub children: Vec<ItemTree>,
}

impl ItemTree {
    pub fn child_ids(&self) -> Vec<ItemId> {
        self.children.iter().map(|child| child.id).collect()
    }

    /// Depth-first, parents before replies.
    pub fn flatten(&self) -> Vec<Item> {
        let mut items = Vec::new();
        self.collect_into(&mut items);
        items
    }

    fn collect_into(&self, items: &mut Vec<Item>) {
        items.push(Item {
            id: self.id,
            author: self.author.clone(),
            created_at: self.created_at_i,
            kind: ItemKind::from_upstream(self.type_.as_deref()),
            score: self.points,
            title: self.title.clone(),
            url: self.url.clone(),
            text: self.text.clone(),
            descendants: None,
            parent: self.parent_id,
            child_ids: self.child_ids(),
            // The search index keeps deleted comments as author-less, text-less stubs.
            removed: self.author.is_none() && self.text.is_none() && self.title.is_none(),
        });
        for child in &self.children {
            child.collect_into(items);
        }
    }
}

/// Window used for "active discussions": comments posted in the last hour.
pub const ACTIVE_DISCUSSION_WINDOW: Duration = Duration::from_secs(3600);

/// Newest stories and recently active comment threads.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RecentActivity {
    pub stories: Vec<Item>,
    pub discussions: Vec<Item>,
}

/// Converts every hit, failing on the first one that cannot be linked to an item.
pub fn hits_into_items(hits: Vec<SearchHit>) -> Result<Vec<Item>, SearchError> {
    hits.into_iter().map(Item::try_from).collect()
}

/// Unix seconds `window` before now.
pub fn unix_seconds_ago(window: Duration) -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    now.saturating_sub(window.as_secs()) as i64
}

#[derive(Clone, Debug)]
pub struct SearchClient {
    http: RetryingClient,
    base_url: String,
}

impl SearchClient {
    pub fn new(base_url: impl Into<String>, http: RetryingClient) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Newest-first search. `tags` follows the Algolia syntax (`story`, `comment`,
    /// `front_page`, `author_pg`, ...); `numeric_filters` likewise (`created_at_i>1700000000`).
    pub async fn search_by_date(
        &self,
        tags: &str,
        query: &str,
        page: u32,
        numeric_filters: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SearchPage, SearchError> {
        let url = format!("{}/search_by_date", self.base_url);
        let mut params = vec![("tags", tags.to_string()), ("page", page.to_string())];
        if !query.is_empty() {
            params.push(("query", query.to_string()));
        }
        if let Some(filters) = numeric_filters {
            params.push(("numericFilters", filters.to_string()));
        }
        Ok(self.http.get_json(&url, &params, cancel).await?)
    }

    pub async fn front_page(&self, cancel: &CancellationToken) -> Result<Vec<Item>, SearchError> {
        let page = self.search_by_date("front_page", "", 0, None, cancel).await?;
        hits_into_items(page.hits)
    }

    pub async fn recent_stories(&self, cancel: &CancellationToken) -> Result<Vec<Item>, SearchError> {
        let page = self.search_by_date("story", "", 0, None, cancel).await?;
        hits_into_items(page.hits)
    }

    /// Comments created after `since` (unix seconds), newest first.
    pub async fn recent_comments(
        &self,
        since: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<Item>, SearchError> {
        let filter = format!("created_at_i>{since}");
        let page = self
            .search_by_date("comment", "", 0, Some(&filter), cancel)
            .await?;
        hits_into_items(page.hits)
    }

    /// Newest stories plus comments from the last [`ACTIVE_DISCUSSION_WINDOW`], fetched
    /// concurrently.
    pub async fn recent_activity(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RecentActivity, SearchError> {
        let since = unix_seconds_ago(ACTIVE_DISCUSSION_WINDOW);
        let (stories, discussions) = tokio::try_join!(
            self.recent_stories(cancel),
            self.recent_comments(since, cancel)
        )?;
        Ok(RecentActivity {
            stories,
            discussions,
        })
    }

    pub async fn item_tree(
        &self,
        item_id: ItemId,
        cancel: &CancellationToken,
    ) -> Result<ItemTree, SearchError> {
        let url = format!("{}/items/{}", self.base_url, item_id);
        Ok(self.http.get_json(&url, &[], cancel).await?)
    }
}
