//! 分析引擎
//!
//! 对外暴露按指标取数的接口：读取集合、连接、计算，并经由缓存返回。
//! 实体存储通过构造参数注入，缓存是引擎自己持有的实例。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, join_all, try_join_all};
use serde::Serialize;
use tracing::{debug, instrument};

use engage_shared::config::AnalyticsConfig;

use crate::cache::{Invalidator, MetricCache, MetricOutcome, UNAVAILABLE_LABEL};
use crate::clock::{Clock, SystemClock};
use crate::compute::{
    DayAxis, Leaderboard, RankStatus, RankedEntry, TrendSeries, activity_segments, bucketed,
    bucketize, categorical, count_by_day, dynamics,
};
use crate::error::{AnalyticsError, Result, StoreError};
use crate::join;
use crate::metric::{
    CategoricalField, CorrelationPair, DistributionQuery, LeaderboardCategory, LeaderboardPeriod,
    LeaderboardResult, MetricKey, MetricKind, MetricValue, NumericField, TrendSource,
};
use crate::models::{
    BadgeAwardRecord, BadgeRecord, EngagementState, EventRecord, ParticipationRecord,
    PointsLedgerEntry, PointsRecord, RecognitionRecord, UserRecord,
};
use crate::repository::{EntityStore, Fetched, ListQuery, Predicate, Repository, SortField};

type LoadResult<T> = std::result::Result<T, StoreError>;

/// 仪表盘中单个指标的结果
#[derive(Debug)]
pub struct DashboardEntry {
    pub key: MetricKey,
    pub outcome: Result<MetricOutcome>,
}

impl DashboardEntry {
    /// "fresh"、"using cached data from <time>" 或 "unavailable"
    pub fn status_label(&self) -> String {
        match &self.outcome {
            Ok(outcome) => outcome.status_label(),
            Err(_) => UNAVAILABLE_LABEL.to_string(),
        }
    }
}

/// 用户在排行榜上的位置
#[derive(Debug, Clone, Serialize)]
pub struct UserStanding {
    pub status: RankStatus,
    pub nearby: Vec<RankedEntry>,
    pub podium: Vec<RankedEntry>,
    pub total: usize,
    pub computed_at: DateTime<Utc>,
    pub status_label: String,
}

/// 分析引擎
pub struct AnalyticsEngine {
    loader: MetricLoader,
    cache: MetricCache,
    config: AnalyticsConfig,
}

impl AnalyticsEngine {
    /// 使用系统时钟创建引擎
    pub fn new(store: Arc<dyn EntityStore>, config: AnalyticsConfig) -> Result<Self> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn EntityStore>,
        config: AnalyticsConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let repo =
            Repository::new(store, config.fetch_timeout()).with_page_size(config.fetch_page_size);
        let loader = MetricLoader {
            repo,
            clock: Arc::clone(&clock),
            history_retention: config.history_retention,
            max_trend_days: config.max_trend_days,
        };

        Ok(Self {
            loader,
            cache: MetricCache::new(clock),
            config,
        })
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn cache(&self) -> &MetricCache {
        &self.cache
    }

    pub fn invalidator(&self) -> Invalidator {
        self.cache.invalidator()
    }

    fn staleness(&self, kind: MetricKind) -> Duration {
        let staleness = &self.config.staleness;
        let seconds = match kind {
            MetricKind::Correlation => staleness.correlation_seconds,
            MetricKind::Leaderboard => staleness.leaderboard_seconds,
            MetricKind::Trend => staleness.trend_seconds,
            MetricKind::Distribution => staleness.distribution_seconds,
        };
        Duration::from_secs(seconds)
    }

    /// 按键取指标
    ///
    /// 参数在进入缓存前校验，非法请求不会占用缓存槽位。
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn get(&self, key: MetricKey) -> Result<MetricOutcome> {
        let key = key.normalized();
        let task = self.loader.clone().prepare(key.clone())?;
        let staleness = self.staleness(key.kind());
        self.cache
            .get_or_recompute(&key, staleness, move || task)
            .await
    }

    /// 清理超过保留期的空闲缓存槽位
    pub fn purge_cache(&self) -> usize {
        self.cache.purge_older_than(self.config.cache_retention())
    }

    pub async fn get_correlation(&self, pair: CorrelationPair) -> Result<MetricOutcome> {
        self.get(MetricKey::Correlation(pair)).await
    }

    pub async fn get_leaderboard(
        &self,
        category: LeaderboardCategory,
        period: LeaderboardPeriod,
    ) -> Result<MetricOutcome> {
        self.get(MetricKey::Leaderboard { category, period }).await
    }

    /// 单一数据源的按日趋势，`days` 缺省时使用配置的默认天数
    pub async fn get_trend(&self, source: TrendSource, days: Option<u32>) -> Result<MetricOutcome> {
        self.get_trend_panel(vec![source], days).await
    }

    /// 多个数据源对齐到同一日期轴
    pub async fn get_trend_panel(
        &self,
        sources: Vec<TrendSource>,
        days: Option<u32>,
    ) -> Result<MetricOutcome> {
        let days = days.unwrap_or(self.config.default_trend_days);
        self.get(MetricKey::trend(sources, days)).await
    }

    pub async fn get_distribution(&self, query: DistributionQuery) -> Result<MetricOutcome> {
        self.get(MetricKey::Distribution(query)).await
    }

    /// 用户名次、附近窗口和领奖台
    #[instrument(skip(self))]
    pub async fn get_user_standing(
        &self,
        category: LeaderboardCategory,
        period: LeaderboardPeriod,
        user_id: &str,
    ) -> Result<UserStanding> {
        let outcome = self.get_leaderboard(category, period).await?;
        let result = outcome
            .result
            .as_leaderboard()
            .ok_or_else(|| {
                AnalyticsError::Internal("leaderboard key produced another metric".to_string())
            })?;

        let window = result.nearby(user_id, self.config.default_nearby_window);
        Ok(UserStanding {
            status: window.status,
            nearby: window.entries.to_vec(),
            podium: result.top(self.config.default_podium_size).to_vec(),
            total: result.board.len(),
            computed_at: outcome.computed_at(),
            status_label: outcome.status_label(),
        })
    }

    /// 并发获取多个指标
    ///
    /// 每个指标的结果相互独立，某个指标失败不影响其他指标。
    #[instrument(skip(self, keys), fields(count = keys.len()))]
    pub async fn get_dashboard(&self, keys: Vec<MetricKey>) -> Vec<DashboardEntry> {
        let mut pending = Vec::with_capacity(keys.len());
        for key in &keys {
            pending.push(self.get(key.clone()));
        }
        let outcomes = join_all(pending).await;
        keys.into_iter()
            .zip(outcomes)
            .map(|(key, outcome)| DashboardEntry { key, outcome })
            .collect()
    }
}

/// 重算入口
///
/// 持有计算所需的全部上下文，可以移入独立任务执行。
#[derive(Clone)]
struct MetricLoader {
    repo: Repository,
    clock: Arc<dyn Clock>,
    history_retention: usize,
    max_trend_days: u32,
}

fn recent_first() -> ListQuery {
    ListQuery::new().sorted(SortField::desc("created_at"))
}

fn attended_only() -> Predicate {
    Predicate::new().eq("attended", true)
}

impl MetricLoader {
    /// 校验参数并构造重算任务
    fn prepare(self, key: MetricKey) -> Result<BoxFuture<'static, LoadResult<MetricValue>>> {
        let task = match key {
            MetricKey::Correlation(pair) => {
                async move { self.correlation(pair).await.map(MetricValue::Correlation) }.boxed()
            }
            MetricKey::Leaderboard { category, period } => async move {
                self.leaderboard(category, period)
                    .await
                    .map(MetricValue::Leaderboard)
            }
            .boxed(),
            MetricKey::Trend { sources, days } => {
                if sources.is_empty() {
                    return Err(AnalyticsError::invalid_argument(
                        "sources",
                        "at least one trend source is required",
                    ));
                }
                if days > self.max_trend_days {
                    return Err(AnalyticsError::invalid_argument(
                        "days",
                        format!("at most {} days are supported", self.max_trend_days),
                    ));
                }
                let axis = DayAxis::ending(self.clock.now().date_naive(), days)?;
                async move {
                    let mut pending = Vec::with_capacity(sources.len());
                    for source in &sources {
                        pending.push(self.trend_series(*source, axis));
                    }
                    let series = try_join_all(pending).await?;
                    Ok(MetricValue::Trend(crate::compute::trend::panel(axis, series)))
                }
                .boxed()
            }
            MetricKey::Distribution(query) => {
                async move { self.distribution(query).await.map(MetricValue::Distribution) }
                    .boxed()
            }
        };
        Ok(task)
    }

    async fn correlation(
        &self,
        pair: CorrelationPair,
    ) -> LoadResult<crate::compute::CorrelationResult> {
        let (series, fetch_excluded) = match pair {
            CorrelationPair::EngagementVsChurn => {
                let states = self.repo.all::<EngagementState>().await?;
                (join::engagement_vs_churn(&states.records), states.excluded)
            }
            CorrelationPair::PointsVsRecognitions => {
                let (ledger, recognitions) = tokio::try_join!(
                    self.repo.all::<PointsLedgerEntry>(),
                    self.repo.all::<RecognitionRecord>(),
                )?;
                (
                    join::points_vs_recognitions(&ledger.records, &recognitions.records),
                    ledger.excluded + recognitions.excluded,
                )
            }
            CorrelationPair::AttendanceVsEngagement => {
                let (participations, states) = tokio::try_join!(
                    self.repo.all::<ParticipationRecord>(),
                    self.repo.all::<EngagementState>(),
                )?;
                (
                    join::attendance_vs_engagement(&participations.records, &states.records),
                    participations.excluded + states.excluded,
                )
            }
        };

        let result = series.correlate();
        let excluded = result.excluded + fetch_excluded;
        debug!(
            pair = pair.as_str(),
            samples = result.sample_size,
            excluded,
            "Correlation computed"
        );
        Ok(result.with_excluded(excluded))
    }

    async fn leaderboard(
        &self,
        category: LeaderboardCategory,
        period: LeaderboardPeriod,
    ) -> LoadResult<LeaderboardResult> {
        let now = self.clock.now();
        let users = self.repo.all::<UserRecord>();

        let (population, points_context, fetch_excluded) = match category {
            LeaderboardCategory::Points => {
                let (users, points, states) = tokio::try_join!(
                    users,
                    self.repo.all::<PointsRecord>(),
                    self.repo.all::<EngagementState>(),
                )?;
                let names = join::display_names(&users.records);
                let activity = activity_segments(
                    points.records.iter().map(|p| p.last_activity_date),
                    now,
                );
                let movers = join::points_movers(&points.records, &names);
                let engaged = join::engaged_users(&points.records, &states.records);
                (
                    join::points_population(&points.records, period, &names),
                    Some((activity, movers, engaged)),
                    users.excluded + points.excluded,
                )
            }
            LeaderboardCategory::EngagementScore => {
                let (users, states) = tokio::try_join!(users, self.repo.all::<EngagementState>())?;
                let names = join::display_names(&users.records);
                (
                    join::engagement_population(&states.records, &names),
                    None,
                    users.excluded + states.excluded,
                )
            }
            LeaderboardCategory::RecognitionsReceived => {
                let (users, recognitions) =
                    tokio::try_join!(users, self.repo.all::<RecognitionRecord>())?;
                let names = join::display_names(&users.records);
                (
                    join::recognitions_received_population(
                        &recognitions.records,
                        period,
                        now,
                        &names,
                    ),
                    None,
                    users.excluded + recognitions.excluded,
                )
            }
            LeaderboardCategory::EventsAttended => {
                let (users, participations) = tokio::try_join!(
                    users,
                    self.repo
                        .filter::<ParticipationRecord>(attended_only(), ListQuery::new()),
                )?;
                let names = join::display_names(&users.records);
                (
                    join::events_attended_population(
                        &participations.records,
                        period,
                        now,
                        &names,
                    ),
                    None,
                    users.excluded + participations.excluded,
                )
            }
        };

        let board = Leaderboard::build(population.entries);
        let tiers = board.percentile_tiers();
        let (activity, dynamics) = match points_context {
            Some((activity, movers, engaged)) => {
                let dynamics = dynamics(&board, movers, activity, engaged);
                (Some(activity), Some(dynamics))
            }
            None => (None, None),
        };
        debug!(
            category = category.as_str(),
            period = period.as_str(),
            ranked = board.len(),
            "Leaderboard computed"
        );

        Ok(LeaderboardResult {
            category,
            period,
            tiers,
            activity,
            dynamics,
            excluded: population.excluded + fetch_excluded + board.excluded(),
            board,
        })
    }

    async fn trend_series(&self, source: TrendSource, axis: DayAxis) -> LoadResult<TrendSeries> {
        let name = source.as_str();
        let series = match source {
            TrendSource::Participations => {
                let fetched = self
                    .repo
                    .filter::<ParticipationRecord>(attended_only(), recent_first())
                    .await?;
                with_fetch_excluded(
                    count_by_day(name, fetched.records.iter().map(|p| p.created_at), axis),
                    &fetched,
                )
            }
            TrendSource::Recognitions => {
                let fetched = self.repo.list::<RecognitionRecord>(recent_first()).await?;
                with_fetch_excluded(
                    count_by_day(name, fetched.records.iter().map(|r| r.created_at), axis),
                    &fetched,
                )
            }
            TrendSource::PointsLedger => {
                let fetched = self.repo.list::<PointsLedgerEntry>(recent_first()).await?;
                let mut missing = 0usize;
                let events = fetched.records.iter().filter_map(|entry| match entry.points {
                    Some(points) if points > 0 => Some((entry.created_at, points as f64)),
                    Some(_) => None,
                    None => {
                        missing += 1;
                        None
                    }
                });
                let mut series = bucketize(name, events, axis);
                series.excluded += missing;
                with_fetch_excluded(series, &fetched)
            }
            TrendSource::PointsHistory => {
                let mut fetched = self.repo.all::<PointsRecord>().await?;
                let mut truncated = 0usize;
                for record in &mut fetched.records {
                    truncated += join::retain_recent_history(record, self.history_retention);
                }
                if truncated > 0 {
                    debug!(truncated, "Points history truncated to retention limit");
                }

                let mut missing = 0usize;
                let events = fetched
                    .records
                    .iter()
                    .flat_map(|record| record.points_history.iter())
                    .filter_map(|entry| match entry.amount {
                        Some(amount) => Some((entry.timestamp, amount)),
                        None => {
                            missing += 1;
                            None
                        }
                    });
                let mut series = bucketize(name, events, axis);
                series.excluded += missing;
                with_fetch_excluded(series, &fetched)
            }
            TrendSource::BadgeAwards => {
                let fetched = self
                    .repo
                    .list::<BadgeAwardRecord>(ListQuery::new().sorted(SortField::desc("awarded_at")))
                    .await?;
                with_fetch_excluded(
                    count_by_day(name, fetched.records.iter().map(|a| a.awarded_at), axis),
                    &fetched,
                )
            }
        };
        Ok(series)
    }

    async fn distribution(
        &self,
        query: DistributionQuery,
    ) -> LoadResult<crate::compute::DistributionResult> {
        let result = match query {
            DistributionQuery::Categorical(field) => self.categorical(field).await?,
            DistributionQuery::Buckets(field, spec) => match field {
                NumericField::TotalPoints => {
                    let fetched = self.repo.all::<PointsRecord>().await?;
                    let result = bucketed(
                        fetched.records.iter().map(|p| p.total_points.map(|v| v as f64)),
                        &spec,
                    );
                    with_distribution_excluded(result, fetched.excluded)
                }
                NumericField::EngagementScore => {
                    let fetched = self.repo.all::<EngagementState>().await?;
                    let result = bucketed(fetched.records.iter().map(|s| s.engagement_score), &spec);
                    with_distribution_excluded(result, fetched.excluded)
                }
                NumericField::ChurnRisk => {
                    let fetched = self.repo.all::<EngagementState>().await?;
                    let result = bucketed(fetched.records.iter().map(|s| s.churn_risk), &spec);
                    with_distribution_excluded(result, fetched.excluded)
                }
            },
        };
        debug!(total = result.total, excluded = result.excluded, "Distribution computed");
        Ok(result)
    }

    async fn categorical(
        &self,
        field: CategoricalField,
    ) -> LoadResult<crate::compute::DistributionResult> {
        let result = match field {
            CategoricalField::LifecycleState => {
                let fetched = self.repo.all::<EngagementState>().await?;
                let mut result = categorical(
                    fetched
                        .records
                        .iter()
                        .map(|s| s.lifecycle_state.map(|state| state.as_str())),
                );
                result.excluded += fetched.excluded;
                result
            }
            CategoricalField::Tier => {
                let fetched = self.repo.all::<PointsRecord>().await?;
                let mut result =
                    categorical(fetched.records.iter().map(|p| p.tier.map(|tier| tier.as_str())));
                result.excluded += fetched.excluded;
                result
            }
            CategoricalField::BadgeRarity => {
                let (awards, badges) = tokio::try_join!(
                    self.repo.all::<BadgeAwardRecord>(),
                    self.repo.all::<BadgeRecord>(),
                )?;
                let joined = join::award_rarities(&awards.records, &badges.records);
                let mut result =
                    categorical(joined.rows.iter().map(|r| r.map(|rarity| rarity.as_str())));
                result.excluded += joined.orphans + awards.excluded + badges.excluded;
                result
            }
            CategoricalField::LedgerAction => {
                let fetched = self.repo.all::<PointsLedgerEntry>().await?;
                let mut result =
                    categorical(fetched.records.iter().map(|e| e.action.as_deref()));
                result.excluded += fetched.excluded;
                result
            }
            CategoricalField::AttendedEventType => {
                let (participations, events) = tokio::try_join!(
                    self.repo
                        .filter::<ParticipationRecord>(attended_only(), ListQuery::new()),
                    self.repo.all::<EventRecord>(),
                )?;
                let joined = join::join_participations(&participations.records, &events.records);
                let mut result = categorical(
                    joined
                        .rows
                        .iter()
                        .map(|(_, event)| event.event_type.as_deref()),
                );
                result.excluded += joined.orphans + participations.excluded + events.excluded;
                result
            }
        };
        Ok(result)
    }
}

fn with_distribution_excluded(
    mut result: crate::compute::DistributionResult,
    excluded: usize,
) -> crate::compute::DistributionResult {
    result.excluded += excluded;
    result
}

fn with_fetch_excluded<T>(mut series: TrendSeries, fetched: &Fetched<T>) -> TrendSeries {
    series.excluded += fetched.excluded;
    series
}
