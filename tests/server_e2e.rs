//! End-to-end pagination through the HTTP API against a mock Firebase upstream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hn_pager_lib::hn_client::retry::RetryPolicy;
use hn_pager_lib::hn_client::{HnClient, RetryingClient};
use hn_pager_lib::pager::{build_rate_limiter, CachedItemFetcher, HnFetcher, ItemCache, Upstream};
use hn_pager_lib::search::SearchClient;
use hn_pager_lib::server::{setup_server_with_addr, SessionResponse};
use hn_pager_lib::state::AppState;
use hn_pager_lib::types::ItemId;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Serves `/item/{id}.json` as a story with that id.
struct EchoItem;

impl Respond for EchoItem {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let id: ItemId = request
            .url
            .path()
            .trim_start_matches("/item/")
            .trim_end_matches(".json")
            .parse()
            .expect("mock only matches numeric item paths");
        ResponseTemplate::new(200).set_body_json(json!({
            "id": id,
            "type": "story",
            "by": "alice",
            "time": 1700000000,
            "title": format!("story {id}"),
            "score": 1,
            "kids": []
        }))
    }
}

fn filters_on_creation_time(request: &Request) -> bool {
    request
        .url
        .query_pairs()
        .any(|(key, value)| key == "numericFilters" && value.starts_with("created_at_i>"))
}

struct TestApp {
    base: String,
    http: reqwest::Client,
    shutdown: CancellationToken,
    _upstream: MockServer,
}

impl TestApp {
    async fn start(upstream: MockServer) -> Self {
        let retrying = RetryingClient::new(Duration::from_secs(5), RetryPolicy::immediate(3))
            .expect("failed to build http client");
        let client = HnClient::new(upstream.uri(), retrying.clone()).expect("valid base url");
        let fetcher = Arc::new(HnFetcher::new(client, build_rate_limiter(1000)));
        let cache = ItemCache::default();
        let items = Arc::new(CachedItemFetcher::new(fetcher.clone(), cache.clone()));
        let search = SearchClient::new(upstream.uri(), retrying);

        let shutdown = CancellationToken::new();
        let state = Arc::new(AppState::new(
            Upstream::new(items, fetcher),
            search,
            cache,
            shutdown.clone(),
        ));
        let (addr, _handle) = setup_server_with_addr(state, SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .expect("failed to bind test server");

        Self {
            base: format!("http://{addr}"),
            http: reqwest::Client::new(),
            shutdown,
            _upstream: upstream,
        }
    }

    async fn post(&self, route: &str) -> reqwest::Response {
        self.http
            .post(format!("{}{route}", self.base))
            .send()
            .await
            .expect("request to test server failed")
    }

    async fn next(&self, session_id: u64) -> SessionResponse {
        let response = self.post(&format!("/api/sessions/{session_id}/next")).await;
        assert_eq!(response.status(), StatusCode::OK);
        response.json().await.expect("session body")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn ids(response: &SessionResponse) -> Vec<ItemId> {
    response.view.items.iter().map(|item| item.id).collect()
}

async fn mount_items(upstream: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/item/\d+\.json$"))
        .respond_with(EchoItem)
        .mount(upstream)
        .await;
}

#[tokio::test]
async fn feed_recovers_item_that_failed_once() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/topstories.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json((1..=25).collect::<Vec<u64>>()))
        .expect(1)
        .mount(&upstream)
        .await;
    // Every attempt of the first page load of item 15 fails.
    Mock::given(method("GET"))
        .and(path("/item/15.json"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(3)
        .with_priority(1)
        .mount(&upstream)
        .await;
    mount_items(&upstream).await;

    let app = TestApp::start(upstream).await;

    let response = app.post("/api/feeds/top").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let page0: SessionResponse = response.json().await.expect("session body");
    assert_eq!(ids(&page0), (1..=10).collect::<Vec<_>>());
    assert!(page0.view.has_next_page);

    let page1 = app.next(page0.session_id).await;
    assert_eq!(page1.view.items.len(), 19);
    assert_eq!(page1.view.failed_count, 1);
    assert!(!ids(&page1).contains(&15));
    assert!(page1.view.error.is_none());

    let page2 = app.next(page0.session_id).await;
    let mut expected: Vec<ItemId> = (1..=14).chain(16..=20).collect();
    expected.push(15);
    expected.extend(21..=25);
    assert_eq!(ids(&page2), expected);
    assert_eq!(page2.view.failed_count, 0);
    assert!(!page2.view.has_next_page);

    let page3 = app.next(page0.session_id).await;
    assert_eq!(page3.view, page2.view);
}

#[tokio::test]
async fn comments_skip_absent_reply() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/item/100.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 100,
            "type": "story",
            "by": "pg",
            "title": "parent",
            "kids": (1..=12).collect::<Vec<u64>>()
        })))
        .with_priority(1)
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/item/7.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .with_priority(1)
        .expect(1)
        .mount(&upstream)
        .await;
    mount_items(&upstream).await;

    let app = TestApp::start(upstream).await;

    let response = app.post("/api/items/100/comments").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let page0: SessionResponse = response.json().await.expect("session body");
    assert_eq!(page0.view.items.len(), 9);
    assert_eq!(page0.view.failed_count, 0);

    let page1 = app.next(page0.session_id).await;
    assert_eq!(ids(&page1), vec![1, 2, 3, 4, 5, 6, 8, 9, 10, 11, 12]);
    assert!(!page1.view.has_next_page);
}

#[tokio::test]
async fn missing_story_and_bad_category_are_client_errors() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/item/5.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .mount(&upstream)
        .await;

    let app = TestApp::start(upstream).await;

    let missing = app.post("/api/items/5/comments").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    let body: Value = missing.json().await.expect("error body");
    assert!(body["error"].as_str().is_some());

    let bad = app.post("/api/feeds/hot").await;
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_failure_is_reported_and_retried() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/newstories.json"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(3)
        .with_priority(1)
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/newstories.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([3, 2, 1])))
        .mount(&upstream)
        .await;
    mount_items(&upstream).await;

    let app = TestApp::start(upstream).await;

    let first: SessionResponse = app
        .post("/api/feeds/new")
        .await
        .json()
        .await
        .expect("session body");
    assert!(first.view.error.is_some());
    assert!(first.view.items.is_empty());
    assert!(first.view.has_next_page);

    let retried = app.next(first.session_id).await;
    assert!(retried.view.error.is_none());
    assert_eq!(ids(&retried), vec![3, 2, 1]);
    assert!(!retried.view.has_next_page);
}

#[tokio::test]
async fn session_lifecycle() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/showstories.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2])))
        .mount(&upstream)
        .await;
    mount_items(&upstream).await;

    let app = TestApp::start(upstream).await;

    let created: SessionResponse = app
        .post("/api/feeds/show")
        .await
        .json()
        .await
        .expect("session body");
    let url = format!("{}/api/sessions/{}", app.base, created.session_id);

    let fetched: SessionResponse = app
        .http
        .get(&url)
        .send()
        .await
        .expect("get session")
        .json()
        .await
        .expect("session body");
    assert_eq!(fetched, created);

    let deleted = app.http.delete(&url).send().await.expect("delete session");
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let gone = app.http.get(&url).send().await.expect("get session");
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    let next = app
        .post(&format!("/api/sessions/{}/next", created.session_id))
        .await;
    assert_eq!(next.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_metrics_and_search_proxy() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search_by_date"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": [],
            "nbHits": 0,
            "nbPages": 0,
            "page": 0,
            "hitsPerPage": 20
        })))
        .mount(&upstream)
        .await;

    let app = TestApp::start(upstream).await;

    let health = app
        .http
        .get(format!("{}/health", app.base))
        .send()
        .await
        .expect("health");
    assert_eq!(health.text().await.expect("body"), "Healthy");

    let metrics = app
        .http
        .get(format!("{}/metrics", app.base))
        .send()
        .await
        .expect("metrics")
        .text()
        .await
        .expect("body");
    assert!(metrics.contains("hn_pager_build_info"));

    let search: Value = app
        .http
        .get(format!("{}/api/search?query=rust&tags=comment", app.base))
        .send()
        .await
        .expect("search")
        .json()
        .await
        .expect("search body");
    assert_eq!(search["nbHits"], 0);
}

#[tokio::test]
async fn recent_activity_and_thread_routes() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search_by_date"))
        .and(query_param("tags", "story"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": [{"objectID": "10", "_tags": ["story"], "title": "fresh"}]
        })))
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/search_by_date"))
        .and(query_param("tags", "comment"))
        .and(filters_on_creation_time)
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": [{"objectID": "11", "_tags": ["comment"], "comment_text": "hot take"}]
        })))
        .expect(1)
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/items/10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 10, "type": "story", "author": "pg", "title": "fresh",
            "children": [{"id": 11, "type": "comment", "author": "sama", "text": "hot take", "children": []}]
        })))
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/items/99"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&upstream)
        .await;

    let app = TestApp::start(upstream).await;

    let recent: Value = app
        .http
        .get(format!("{}/api/recent", app.base))
        .send()
        .await
        .expect("recent")
        .json()
        .await
        .expect("recent body");
    assert_eq!(recent["stories"][0]["id"], 10);
    assert_eq!(recent["discussions"][0]["id"], 11);

    let tree: Value = app
        .http
        .get(format!("{}/api/items/10/tree", app.base))
        .send()
        .await
        .expect("tree")
        .json()
        .await
        .expect("tree body");
    assert_eq!(tree["children"][0]["id"], 11);

    let missing = app
        .http
        .get(format!("{}/api/items/99/tree", app.base))
        .send()
        .await
        .expect("tree");
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}
