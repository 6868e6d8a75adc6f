use std::sync::LazyLock;

use prometheus::*;

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "mm_search_duration",
        "duration of the search in seconds",
        &["kind", "cached"]
    )
    .unwrap()
});

static METRIC_CACHE_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("mm_search_cache_count", "count of the cache lookups", &["result"])
        .unwrap()
});

static METRIC_SCANNED_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "mm_scanned_asset_count",
        "count of the scanned assets by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// 记录一次搜索的耗时
pub fn observe_search_duration(kind: &str, cached: bool, duration: f64) {
    METRIC_SEARCH_DURATION
        .with_label_values(&[kind, if cached { "true" } else { "false" }])
        .observe(duration);
}

/// 记录一次缓存查询
pub fn inc_cache(hit: bool) {
    METRIC_CACHE_COUNT.with_label_values(&[if hit { "hit" } else { "miss" }]).inc();
}

pub fn inc_scanned(outcome: &str, count: u64) {
    METRIC_SCANNED_COUNT.with_label_values(&[outcome]).inc_by(count);
}

/// 以文本格式导出所有指标
pub fn gather_text() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    Ok(encoder.encode_to_string(&prometheus::gather())?)
}
