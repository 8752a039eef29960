pub mod error;
pub mod retry;

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::types::{Category, Item, ItemId, ItemKind};
pub use error::HnClientErr;
use retry::{run_with_retry, RetryPolicy};

/// Raw item payload returned by `GET /item/{id}.json`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RawItem {
    pub id: ItemId,
    #[serde(default, deserialize_with = "deserialize_option_bool_tolerant")]
    pub deleted: Option<bool>,
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub by: Option<String>,
    pub time: Option<i64>,
    pub text: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_bool_tolerant")]
    pub dead: Option<bool>,
    pub parent: Option<ItemId>,
    pub url: Option<String>,
    pub score: Option<i64>,
    pub title: Option<String>,
    pub descendants: Option<i64>,
    pub kids: Option<Vec<ItemId>>,
}

impl RawItem {
    pub fn is_removed(&self) -> bool {
        self.deleted.unwrap_or(false) || self.dead.unwrap_or(false)
    }

    pub fn into_item(self) -> Item {
        let removed = self.is_removed();
        Item {
            id: self.id,
            author: self.by,
            created_at: self.time.unwrap_or_default(),
            kind: ItemKind::from_upstream(self.type_.as_deref()),
            score: self.score,
            title: self.title,
            url: self.url,
            text: self.text,
            descendants: self.descendants,
            parent: self.parent,
            child_ids: self.kids.unwrap_or_default(),
            removed,
        }
    }
}

/// Deserializes an optional bool, coercing the odd shapes the mirror has emitted
/// (numbers, strings, single-element arrays) and giving up with `None` otherwise.
fn deserialize_option_bool_tolerant<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(value_to_bool_tolerant))
}

fn value_to_bool_tolerant(value: Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(flag),
        Value::Number(number) => number.as_f64().map(|n| n != 0.0),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        Value::Array(values) => values.into_iter().next().and_then(value_to_bool_tolerant),
        Value::Null | Value::Object(_) => None,
    }
}

/// JSON-over-HTTP client that applies the shared retry policy and honors cancellation.
#[derive(Clone, Debug)]
pub struct RetryingClient {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(timeout: Duration, policy: RetryPolicy) -> Result<Self, HnClientErr> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, policy })
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn get_json<T>(
        &self,
        url: &str,
        query: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<T, HnClientErr>
    where
        T: DeserializeOwned,
    {
        let body = self.get_body(url, query, cancel).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Raw body of a successful response, retried per the policy.
    pub async fn get_body(
        &self,
        url: &str,
        query: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, HnClientErr> {
        let request = run_with_retry(
            &self.policy,
            |_| self.get_once(url, query),
            |err| err.is_retryable(),
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HnClientErr::Cancelled),
            result = request => result.map(|(body, _attempts)| body).map_err(|terminal| {
                tracing::debug!(
                    event = "upstream_request_failed",
                    url,
                    attempts = terminal.attempts,
                    exhausted_retryable = terminal.exhausted_retryable,
                    error = %terminal.error,
                    "upstream request gave up"
                );
                terminal.error
            }),
        }
    }

    async fn get_once(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<u8>, HnClientErr> {
        let response = self.client.get(url).query(query).send().await?;
        if !response.status().is_success() {
            return Err(HnClientErr::UnexpectedStatus {
                resource: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Decodes an item payload. A blank body, `null`, or an object without an `id` means the
/// item does not exist; anything else must be a well-formed item.
pub fn decode_item_payload(body: &[u8]) -> Result<Option<RawItem>, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    match serde_json::from_slice::<Value>(body)? {
        Value::Null => Ok(None),
        Value::Object(fields) if !fields.contains_key("id") => Ok(None),
        value => serde_json::from_value(value).map(Some),
    }
}

/// Client for the Firebase item and story-list endpoints.
#[derive(Clone, Debug)]
pub struct HnClient {
    http: RetryingClient,
    base_url: String,
}

impl HnClient {
    pub fn new(base_url: impl Into<String>, http: RetryingClient) -> Result<Self, HnClientErr> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(HnClientErr::InvalidUrl(base_url));
        }
        Ok(Self { http, base_url })
    }

    /// Returns `None` when upstream has no item for the ID. See [`decode_item_payload`].
    pub async fn get_item(
        &self,
        item_id: ItemId,
        cancel: &CancellationToken,
    ) -> Result<Option<RawItem>, HnClientErr> {
        let url = format!("{}/item/{}.json", self.base_url, item_id);
        let body = self.http.get_body(&url, &[], cancel).await?;
        Ok(decode_item_payload(&body)?)
    }

    /// Returns the ranked ID list for `category`. A `null` body is an empty list.
    pub async fn get_story_ids(
        &self,
        category: Category,
        cancel: &CancellationToken,
    ) -> Result<Vec<ItemId>, HnClientErr> {
        let url = format!("{}/{}", self.base_url, category.list_path());
        let ids = self
            .http
            .get_json::<Option<Vec<ItemId>>>(&url, &[], cancel)
            .await?;
        Ok(ids.unwrap_or_default())
    }
}
