//! 统一错误处理模块
//!
//! 定义基础设施层（配置、可观测性）共享的错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum SharedError {
    // ==================== 配置错误 ====================
    #[error("配置加载失败: {0}")]
    Config(#[from] config::ConfigError),

    #[error("无效的配置项: {field} - {message}")]
    InvalidConfig { field: String, message: String },

    // ==================== 可观测性错误 ====================
    #[error("日志初始化失败: {0}")]
    TracingInit(String),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, SharedError>;

impl SharedError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::TracingInit(_) => "TRACING_INIT_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 配置和初始化错误重试也不会恢复
    pub fn is_retryable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = SharedError::InvalidConfig {
            field: "analytics.fetch_timeout_ms".to_string(),
            message: "must be positive".to_string(),
        };
        assert_eq!(err.code(), "INVALID_CONFIG");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("analytics.fetch_timeout_ms"));
    }
}
