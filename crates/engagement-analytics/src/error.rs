//! 分析引擎错误类型
//!
//! 指标计算本身是全函数，不会因数据形态报错；
//! 只有与实体存储交互的缓存层会产生可上报的错误。

use thiserror::Error;

/// 实体存储读取错误
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("实体存储不可用: collection={collection}, {message}")]
    Unavailable { collection: String, message: String },

    #[error("实体存储读取超时: collection={collection}, timeout={timeout_ms}ms")]
    Timeout { collection: String, timeout_ms: u64 },

    #[error("实体存储拒绝请求: collection={collection}, {message}")]
    Rejected { collection: String, message: String },
}

impl StoreError {
    pub fn collection(&self) -> &str {
        match self {
            Self::Unavailable { collection, .. }
            | Self::Timeout { collection, .. }
            | Self::Rejected { collection, .. } => collection,
        }
    }

    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

/// 分析引擎错误类型
#[derive(Debug, Clone, Error)]
pub enum AnalyticsError {
    /// 重算失败且没有可回退的缓存值
    #[error("指标不可用: key={key}, 原因: {source}")]
    MetricUnavailable {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("无效的参数: {field} - {message}")]
    InvalidArgument { field: String, message: String },

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, AnalyticsError>;

impl AnalyticsError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::MetricUnavailable { .. } => "METRIC_UNAVAILABLE",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::MetricUnavailable { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<engage_shared::error::SharedError> for AnalyticsError {
    fn from(err: engage_shared::error::SharedError) -> Self {
        match err {
            engage_shared::error::SharedError::InvalidConfig { field, message } => {
                Self::InvalidArgument { field, message }
            }
            other => Self::Internal(other.to_string()),
        }
    }
}
