//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::SharedError;

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
        }
    }
}

impl ObservabilityConfig {
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// 指标过期窗口配置（秒）
///
/// 每类派生指标独立配置，超过窗口的缓存结果视为过期，下次请求时重新计算。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StalenessConfig {
    pub correlation_seconds: u64,
    pub leaderboard_seconds: u64,
    pub trend_seconds: u64,
    pub distribution_seconds: u64,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            correlation_seconds: 600,
            leaderboard_seconds: 60,
            trend_seconds: 300,
            distribution_seconds: 300,
        }
    }
}

/// 分析引擎配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub staleness: StalenessConfig,
    /// 单次实体存储读取超时
    pub fetch_timeout_ms: u64,
    /// 分页读取的每页大小，None 表示一次读取整个集合
    pub fetch_page_size: Option<usize>,
    pub default_trend_days: u32,
    /// 趋势窗口允许的最大天数
    pub max_trend_days: u32,
    pub default_nearby_window: usize,
    pub default_podium_size: usize,
    /// 每个用户 points_history 保留的最近条目数
    pub history_retention: usize,
    /// 超过该时长未重算的缓存槽位可被清理
    pub cache_retention_seconds: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            staleness: StalenessConfig::default(),
            fetch_timeout_ms: 5_000,
            fetch_page_size: None,
            default_trend_days: 30,
            max_trend_days: 366,
            default_nearby_window: 3,
            default_podium_size: 3,
            history_retention: 500,
            cache_retention_seconds: 86_400,
        }
    }
}

impl AnalyticsConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn cache_retention(&self) -> Duration {
        Duration::from_secs(self.cache_retention_seconds)
    }

    /// 校验配置取值
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.fetch_timeout_ms == 0 {
            return Err(SharedError::InvalidConfig {
                field: "analytics.fetch_timeout_ms".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if self.history_retention == 0 {
            return Err(SharedError::InvalidConfig {
                field: "analytics.history_retention".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if self.fetch_page_size == Some(0) {
            return Err(SharedError::InvalidConfig {
                field: "analytics.fetch_page_size".to_string(),
                message: "must be greater than 0 when set".to_string(),
            });
        }
        if self.max_trend_days == 0 || self.default_trend_days > self.max_trend_days {
            return Err(SharedError::InvalidConfig {
                field: "analytics.max_trend_days".to_string(),
                message: format!(
                    "must be at least default_trend_days ({})",
                    self.default_trend_days
                ),
            });
        }
        Ok(())
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（ENGAGE_ 前缀，层级用双下划线分隔，
    ///    如 ENGAGE_ANALYTICS__FETCH_TIMEOUT_MS -> analytics.fetch_timeout_ms）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("ENGAGE_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        Self::load_from(Path::new(&config_dir), service_name, &env)
    }

    /// 从指定目录加载配置
    pub fn load_from(config_dir: &Path, service_name: &str, env: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            // 字段名本身含下划线，层级分隔必须用双下划线
            .add_source(
                Environment::with_prefix("ENGAGE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
