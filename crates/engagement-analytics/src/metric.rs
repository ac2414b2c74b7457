//! 派生指标的键与结果
//!
//! 每个 (指标类型, 参数) 组合对应一个独立的缓存键。

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::compute::{
    ActivitySegments, BucketSpec, CorrelationResult, DistributionResult, Leaderboard,
    LeaderboardDynamics, NearbyWindow, PercentileTiers, RankedEntry, TrendPanel,
};
use crate::repository::Collection;

/// 指标类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Correlation,
    Leaderboard,
    Trend,
    Distribution,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Correlation => "correlation",
            Self::Leaderboard => "leaderboard",
            Self::Trend => "trend",
            Self::Distribution => "distribution",
        }
    }
}

/// 预定义的相关性配对
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationPair {
    /// 参与度分数 vs 流失风险
    EngagementVsChurn,
    /// 获得的积分 vs 收发的认可数
    PointsVsRecognitions,
    /// 出席活动数 vs 参与度分数
    AttendanceVsEngagement,
}

impl CorrelationPair {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EngagementVsChurn => "engagement_vs_churn",
            Self::PointsVsRecognitions => "points_vs_recognitions",
            Self::AttendanceVsEngagement => "attendance_vs_engagement",
        }
    }

    pub fn dependencies(&self) -> &'static [Collection] {
        match self {
            Self::EngagementVsChurn => &[Collection::EngagementStates],
            Self::PointsVsRecognitions => &[Collection::PointsLedger, Collection::Recognitions],
            Self::AttendanceVsEngagement => {
                &[Collection::Participations, Collection::EngagementStates]
            }
        }
    }
}

/// 排行榜类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardCategory {
    Points,
    EngagementScore,
    RecognitionsReceived,
    EventsAttended,
}

impl LeaderboardCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Points => "points",
            Self::EngagementScore => "engagement_score",
            Self::RecognitionsReceived => "recognitions_received",
            Self::EventsAttended => "events_attended",
        }
    }

    pub fn dependencies(&self) -> &'static [Collection] {
        match self {
            Self::Points => &[
                Collection::UserPoints,
                Collection::EngagementStates,
                Collection::Users,
            ],
            Self::EngagementScore => &[Collection::EngagementStates, Collection::Users],
            Self::RecognitionsReceived => &[Collection::Recognitions, Collection::Users],
            Self::EventsAttended => &[Collection::Participations, Collection::Users],
        }
    }
}

/// 排行榜统计周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardPeriod {
    AllTime,
    Weekly,
    Monthly,
}

impl LeaderboardPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllTime => "all_time",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// 回看天数，全部时间返回 None
    pub fn lookback_days(&self) -> Option<i64> {
        match self {
            Self::AllTime => None,
            Self::Weekly => Some(7),
            Self::Monthly => Some(30),
        }
    }
}

/// 趋势数据源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendSource {
    /// 已出席的活动参与
    Participations,
    Recognitions,
    /// 正向积分流水，sum 为积分数
    PointsLedger,
    /// 用户积分历史，sum 为积分数
    PointsHistory,
    BadgeAwards,
}

impl TrendSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Participations => "participations",
            Self::Recognitions => "recognitions",
            Self::PointsLedger => "points_ledger",
            Self::PointsHistory => "points_history",
            Self::BadgeAwards => "badge_awards",
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            Self::Participations => Collection::Participations,
            Self::Recognitions => Collection::Recognitions,
            Self::PointsLedger => Collection::PointsLedger,
            Self::PointsHistory => Collection::UserPoints,
            Self::BadgeAwards => Collection::BadgeAwards,
        }
    }
}

/// 分类分布字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoricalField {
    LifecycleState,
    Tier,
    /// 按授予记录统计徽章稀有度
    BadgeRarity,
    LedgerAction,
    /// 已出席活动的活动类型
    AttendedEventType,
}

impl CategoricalField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LifecycleState => "lifecycle_state",
            Self::Tier => "tier",
            Self::BadgeRarity => "badge_rarity",
            Self::LedgerAction => "ledger_action",
            Self::AttendedEventType => "attended_event_type",
        }
    }

    pub fn dependencies(&self) -> &'static [Collection] {
        match self {
            Self::LifecycleState => &[Collection::EngagementStates],
            Self::Tier => &[Collection::UserPoints],
            Self::BadgeRarity => &[Collection::BadgeAwards, Collection::Badges],
            Self::LedgerAction => &[Collection::PointsLedger],
            Self::AttendedEventType => &[Collection::Participations, Collection::Events],
        }
    }
}

/// 数值分布字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericField {
    TotalPoints,
    EngagementScore,
    ChurnRisk,
}

impl NumericField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TotalPoints => "total_points",
            Self::EngagementScore => "engagement_score",
            Self::ChurnRisk => "churn_risk",
        }
    }

    pub fn dependencies(&self) -> &'static [Collection] {
        match self {
            Self::TotalPoints => &[Collection::UserPoints],
            Self::EngagementScore | Self::ChurnRisk => &[Collection::EngagementStates],
        }
    }

    /// 字段对应的默认分桶
    pub fn default_buckets(&self) -> BucketSpec {
        match self {
            Self::TotalPoints => BucketSpec::points_ranges(),
            Self::EngagementScore => BucketSpec::engagement_segments(),
            Self::ChurnRisk => BucketSpec::churn_risk_bands(),
        }
    }
}

/// 分布查询
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DistributionQuery {
    Categorical(CategoricalField),
    Buckets(NumericField, BucketSpec),
}

impl DistributionQuery {
    /// 使用字段默认分桶的数值分布
    pub fn numeric(field: NumericField) -> Self {
        Self::Buckets(field, field.default_buckets())
    }
}

/// 缓存键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetricKey {
    Correlation(CorrelationPair),
    Leaderboard {
        category: LeaderboardCategory,
        period: LeaderboardPeriod,
    },
    /// 多个数据源共享同一日期轴
    Trend { sources: Vec<TrendSource>, days: u32 },
    Distribution(DistributionQuery),
}

impl MetricKey {
    /// 趋势键，重复的数据源只保留第一次出现
    pub fn trend(sources: Vec<TrendSource>, days: u32) -> Self {
        Self::Trend { sources, days }.normalized()
    }

    /// 规范化键，使等价请求落到同一个缓存槽位
    pub fn normalized(self) -> Self {
        match self {
            Self::Trend { sources, days } => {
                let mut unique = Vec::with_capacity(sources.len());
                for source in sources {
                    if !unique.contains(&source) {
                        unique.push(source);
                    }
                }
                Self::Trend {
                    sources: unique,
                    days,
                }
            }
            other => other,
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Correlation(_) => MetricKind::Correlation,
            Self::Leaderboard { .. } => MetricKind::Leaderboard,
            Self::Trend { .. } => MetricKind::Trend,
            Self::Distribution(_) => MetricKind::Distribution,
        }
    }

    /// 计算该指标需要读取的集合
    pub fn dependencies(&self) -> Vec<Collection> {
        let mut deps: Vec<Collection> = match self {
            Self::Correlation(pair) => pair.dependencies().to_vec(),
            Self::Leaderboard { category, .. } => category.dependencies().to_vec(),
            Self::Trend { sources, .. } => sources.iter().map(|s| s.collection()).collect(),
            Self::Distribution(DistributionQuery::Categorical(field)) => {
                field.dependencies().to_vec()
            }
            Self::Distribution(DistributionQuery::Buckets(field, _)) => {
                field.dependencies().to_vec()
            }
        };
        deps.sort();
        deps.dedup();
        deps
    }

    pub fn depends_on(&self, collection: Collection) -> bool {
        self.dependencies().contains(&collection)
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Correlation(pair) => write!(f, "correlation:{}", pair.as_str()),
            Self::Leaderboard { category, period } => {
                write!(f, "leaderboard:{}:{}", category.as_str(), period.as_str())
            }
            Self::Trend { sources, days } => {
                let names: Vec<&str> = sources.iter().map(|s| s.as_str()).collect();
                write!(f, "trend:{}:{}d", names.join("+"), days)
            }
            Self::Distribution(DistributionQuery::Categorical(field)) => {
                write!(f, "distribution:{}", field.as_str())
            }
            Self::Distribution(DistributionQuery::Buckets(field, spec)) => {
                let bounds: Vec<String> = spec.ranges().iter().map(|r| r.lower.to_string()).collect();
                write!(f, "distribution:{}:{}", field.as_str(), bounds.join("|"))
            }
        }
    }
}

/// 排行榜结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardResult {
    pub category: LeaderboardCategory,
    pub period: LeaderboardPeriod,
    pub board: Leaderboard,
    pub tiers: PercentileTiers,
    /// 仅积分榜提供
    pub activity: Option<ActivitySegments>,
    /// 仅积分榜提供
    pub dynamics: Option<LeaderboardDynamics>,
    /// 连接阶段剔除的记录数
    pub excluded: usize,
}

impl LeaderboardResult {
    pub fn entries(&self) -> &[RankedEntry] {
        self.board.entries()
    }

    pub fn rank_of(&self, user_id: &str) -> Option<usize> {
        self.board.rank_of(user_id)
    }

    pub fn nearby(&self, user_id: &str, window: usize) -> NearbyWindow<'_> {
        self.board.nearby(user_id, window)
    }

    pub fn top(&self, k: usize) -> &[RankedEntry] {
        self.board.top(k)
    }
}

/// 指标取值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricValue {
    Correlation(CorrelationResult),
    Leaderboard(LeaderboardResult),
    Trend(TrendPanel),
    Distribution(DistributionResult),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Correlation(_) => MetricKind::Correlation,
            Self::Leaderboard(_) => MetricKind::Leaderboard,
            Self::Trend(_) => MetricKind::Trend,
            Self::Distribution(_) => MetricKind::Distribution,
        }
    }
}

/// 派生指标结果
///
/// 每次重算都重新生成，只存在于缓存中。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub computed_at: DateTime<Utc>,
    pub staleness_window: Duration,
    pub value: MetricValue,
}

impl MetricResult {
    pub fn new(value: MetricValue, computed_at: DateTime<Utc>, staleness_window: Duration) -> Self {
        Self {
            computed_at,
            staleness_window,
            value,
        }
    }

    /// `now - computed_at < staleness_window` 时视为新鲜
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.computed_at);
        match chrono::Duration::from_std(self.staleness_window) {
            Ok(window) => age < window,
            Err(_) => true,
        }
    }

    pub fn as_correlation(&self) -> Option<&CorrelationResult> {
        match &self.value {
            MetricValue::Correlation(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_leaderboard(&self) -> Option<&LeaderboardResult> {
        match &self.value {
            MetricValue::Leaderboard(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_trend(&self) -> Option<&TrendPanel> {
        match &self.value {
            MetricValue::Trend(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_distribution(&self) -> Option<&DistributionResult> {
        match &self.value {
            MetricValue::Distribution(v) => Some(v),
            _ => None,
        }
    }
}
