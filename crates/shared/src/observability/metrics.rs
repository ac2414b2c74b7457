//! 分析指标模块
//!
//! 基于 metrics crate 记录缓存命中、重算耗时与记录剔除等指标。
//! 未安装 recorder 时记录操作为空操作；关闭指标开关后记录函数直接返回。

use std::sync::atomic::{AtomicBool, Ordering};

static METRICS_ENABLED: AtomicBool = AtomicBool::new(true);

/// 缓存请求结果标签
pub const OUTCOME_HIT: &str = "hit";
pub const OUTCOME_MISS: &str = "miss";
pub const OUTCOME_DEGRADED: &str = "degraded";
pub const OUTCOME_UNAVAILABLE: &str = "unavailable";

/// 打开或关闭指标记录
pub fn set_enabled(enabled: bool) {
    METRICS_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn is_enabled() -> bool {
    METRICS_ENABLED.load(Ordering::Relaxed)
}

/// 注册指标描述
///
/// 这些描述会出现在导出端的 HELP 注释中
pub fn describe_metrics() {
    metrics::describe_counter!(
        "analytics_cache_requests_total",
        "Total number of derived-metric requests by cache outcome"
    );
    metrics::describe_histogram!(
        "analytics_recompute_duration_seconds",
        "Derived-metric recomputation duration in seconds"
    );
    metrics::describe_counter!(
        "analytics_records_excluded_total",
        "Records excluded from aggregation because of missing or malformed fields"
    );
}

/// 记录一次缓存请求
#[inline]
pub fn record_cache_request(kind: &str, outcome: &'static str) {
    if !is_enabled() {
        return;
    }
    metrics::counter!(
        "analytics_cache_requests_total",
        "kind" => kind.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// 记录一次重算耗时
#[inline]
pub fn record_recompute(kind: &str, duration_secs: f64) {
    if !is_enabled() {
        return;
    }
    metrics::histogram!(
        "analytics_recompute_duration_seconds",
        "kind" => kind.to_string()
    )
    .record(duration_secs);
}

/// 记录被剔除的记录数
#[inline]
pub fn record_excluded(collection: &str, count: usize) {
    if count == 0 || !is_enabled() {
        return;
    }
    metrics::counter!(
        "analytics_records_excluded_total",
        "collection" => collection.to_string()
    )
    .increment(count as u64);
}
