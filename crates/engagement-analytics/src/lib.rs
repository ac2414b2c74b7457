//! 参与度分析聚合引擎
//!
//! 从实体存储读取用户、活动参与、认可、积分流水与生命周期状态等集合，
//! 计算仪表盘使用的派生指标：
//!
//! - **相关性**：Pearson 相关系数及强弱分类
//! - **排行榜**：确定性排序、O(1) 名次查询、附近窗口与领奖台
//! - **趋势**：按 UTC 自然日补零分桶，多序列共享日期轴
//! - **分布**：分类计数与数值区间计数
//!
//! 所有指标经过 [`MetricCache`] 返回：过期窗口内命中缓存，同一键的并发重算合并为一次，
//! 重算失败时回退到上一次成功的结果。
//!
//! ```ignore
//! use std::sync::Arc;
//! use engagement_analytics::{AnalyticsEngine, InMemoryEntityStore, LeaderboardCategory, LeaderboardPeriod};
//!
//! let store = Arc::new(InMemoryEntityStore::new());
//! let engine = AnalyticsEngine::new(store, Default::default())?;
//! let outcome = engine
//!     .get_leaderboard(LeaderboardCategory::Points, LeaderboardPeriod::AllTime)
//!     .await?;
//! println!("{}", outcome.status_label());
//! ```

pub mod cache;
pub mod clock;
pub mod compute;
pub mod engine;
pub mod error;
pub mod join;
pub mod metric;
pub mod models;
pub mod repository;

pub use cache::{CacheStats, Freshness, Invalidator, MetricCache, MetricOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{AnalyticsEngine, DashboardEntry, UserStanding};
pub use error::{AnalyticsError, Result, StoreError};
pub use metric::{
    CategoricalField, CorrelationPair, DistributionQuery, LeaderboardCategory, LeaderboardPeriod,
    LeaderboardResult, MetricKey, MetricKind, MetricResult, MetricValue, NumericField, TrendSource,
};
pub use repository::{Collection, EntityStore, InMemoryEntityStore, ListQuery, Predicate};
