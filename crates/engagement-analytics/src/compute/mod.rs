//! 指标计算模块
//!
//! 全部是作用于内存集合的纯函数，不持有跨调用的可变状态。

pub mod correlation;
pub mod distribution;
pub mod leaderboard;
pub mod trend;

pub use correlation::{CorrelationClass, CorrelationDirection, CorrelationResult, pearson};
pub use distribution::{BucketSpec, DistributionMode, DistributionResult, bucketed, categorical};
pub use leaderboard::{
    ActivitySegments, Leaderboard, LeaderboardDynamics, Mover, NearbyWindow, PercentileTiers,
    PointsSummary, RankStatus, RankedEntry, ScoredEntry, Velocity, VelocityCounts,
    activity_segments, dynamics,
};
pub use trend::{DayAxis, TrendBucket, TrendPanel, TrendSeries, bucketize, count_by_day};
