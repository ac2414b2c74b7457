//! 统一可观测性模块
//!
//! 提供 logging（tracing）与指标记录的统一入口。
//! 指标只通过 metrics 门面记录，导出器（recorder）由宿主进程安装。

pub mod metrics;
pub mod tracing;

use ::tracing::info;

use crate::config::ObservabilityConfig;
use crate::error::Result;

/// 可观测性资源守卫
///
/// 持有日志订阅器的生命周期，drop 时输出关闭日志。
pub struct ObservabilityGuard {
    tracing_guard: Option<tracing::TracingGuard>,
}

impl ObservabilityGuard {
    /// 创建一个空的 Guard（用于测试或禁用可观测性时）
    pub fn empty() -> Self {
        Self {
            tracing_guard: None,
        }
    }
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        if self.tracing_guard.is_some() {
            info!("Shutting down observability...");
        }
    }
}

/// 统一初始化可观测性
///
/// # Example
///
/// ```ignore
/// use engage_shared::config::AppConfig;
/// use engage_shared::observability;
///
/// let config = AppConfig::load("engagement-analytics")?;
/// let _guard = observability::init(&config.service_name, &config.observability)?;
/// ```
pub fn init(service_name: &str, config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    metrics::set_enabled(config.metrics_enabled);
    let tracing_guard = tracing::init(config)?;

    if config.metrics_enabled {
        metrics::describe_metrics();
    }

    info!(
        service = %service_name,
        log_format = %config.log_format,
        metrics_enabled = config.metrics_enabled,
        "Observability initialized"
    );

    Ok(ObservabilityGuard {
        tracing_guard: Some(tracing_guard),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_guard_drop_is_silent() {
        let guard = ObservabilityGuard::empty();
        drop(guard);
    }
}
