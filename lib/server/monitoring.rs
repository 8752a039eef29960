use crate::build_info;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use prometheus_client::registry::Registry;
use tokio::sync::OnceCell;

/// Registers build metadata as a labeled gauge with value `1`.
pub fn register_build_info_metric(registry: &mut Registry, prefix: &str) {
    let build_info_metric = Family::<BuildInfoLabels, Gauge>::default();
    build_info_metric
        .get_or_create(&BuildInfoLabels {
            service: "hn_pager",
            version: build_info::VERSION,
            commit: build_info::short_commit_hash(),
        })
        .set(1);
    let sub_registry = registry.sub_registry_with_prefix(prefix);
    sub_registry.register(
        "build_info",
        "Build identity labels for this process",
        build_info_metric,
    );
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BuildInfoLabels {
    service: &'static str,
    version: &'static str,
    commit: &'static str,
}

#[derive(Clone, Default)]
pub struct PagerMetrics {
    /// Items resolved to a payload, cache hits included.
    pub items_fetched_total: Counter,
    /// IDs confirmed missing, deleted or dead.
    pub items_absent_total: Counter,
    /// IDs that failed transiently and went back to a failure pool.
    pub items_failed_total: Counter,
    pub pages_fetched_total: Counter,
    /// Page fetches abandoned through cancellation.
    pub pages_cancelled_total: Counter,
    pub list_failures_total: Counter,
    pub cache_hits_total: Counter,
    pub cache_misses_total: Counter,
    /// Sessions currently held by the HTTP server.
    pub live_sessions: Gauge,
}

impl PagerMetrics {
    pub fn register(registry: &mut Registry, prefix: &str) -> Self {
        let metrics = Self::default();
        let sub_registry = registry.sub_registry_with_prefix(prefix);
        sub_registry.register(
            "items_fetched",
            "Total number of items resolved to a payload",
            metrics.items_fetched_total.clone(),
        );
        sub_registry.register(
            "items_absent",
            "Total number of item IDs confirmed absent",
            metrics.items_absent_total.clone(),
        );
        sub_registry.register(
            "items_failed",
            "Total number of transient item fetch failures",
            metrics.items_failed_total.clone(),
        );
        sub_registry.register(
            "pages_fetched",
            "Total number of pages materialized",
            metrics.pages_fetched_total.clone(),
        );
        sub_registry.register(
            "pages_cancelled",
            "Total number of page fetches abandoned by cancellation",
            metrics.pages_cancelled_total.clone(),
        );
        sub_registry.register(
            "list_failures",
            "Total number of category list fetch failures",
            metrics.list_failures_total.clone(),
        );
        sub_registry.register(
            "cache_hits",
            "Item cache hits",
            metrics.cache_hits_total.clone(),
        );
        sub_registry.register(
            "cache_misses",
            "Item cache misses",
            metrics.cache_misses_total.clone(),
        );
        sub_registry.register(
            "live_sessions",
            "Pagination sessions currently held by the server",
            metrics.live_sessions.clone(),
        );
        metrics
    }
}

pub static PAGER_METRICS: OnceCell<PagerMetrics> = OnceCell::const_new();

/// Registers the pager metrics once per process and returns them.
pub async fn init_metrics(registry: &mut Registry) -> &'static PagerMetrics {
    PAGER_METRICS
        .get_or_init(|| async { PagerMetrics::register(registry, "pager") })
        .await
}
