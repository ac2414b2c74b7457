//! AnalyticsEngine 集成测试
//!
//! 使用内存实体存储与手动时钟，覆盖四类指标的端到端计算。

use std::sync::Arc;

use chrono::NaiveDate;
use engage_shared::config::AnalyticsConfig;
use engage_shared::test_utils::*;
use engagement_analytics::compute::{CorrelationClass, CorrelationDirection, RankStatus};
use serde_json::json;
use engagement_analytics::{
    AnalyticsEngine, CategoricalField, Collection, CorrelationPair, DistributionQuery,
    InMemoryEntityStore, LeaderboardCategory, LeaderboardPeriod, ManualClock, NumericField,
    TrendSource,
};

// ==================== 辅助函数 ====================

fn setup() -> (InMemoryEntityStore, Arc<ManualClock>, AnalyticsEngine) {
    init_test_tracing();
    let store = InMemoryEntityStore::new();
    let clock = Arc::new(ManualClock::new(noon(2025, 1, 10)));
    let engine = AnalyticsEngine::with_clock(
        Arc::new(store.clone()),
        AnalyticsConfig::default(),
        clock.clone(),
    )
    .unwrap();
    (store, clock, engine)
}

fn setup_with(config: AnalyticsConfig) -> (InMemoryEntityStore, Arc<ManualClock>, AnalyticsEngine) {
    init_test_tracing();
    let store = InMemoryEntityStore::new();
    let clock = Arc::new(ManualClock::new(noon(2025, 1, 10)));
    let engine =
        AnalyticsEngine::with_clock(Arc::new(store.clone()), config, clock.clone()).unwrap();
    (store, clock, engine)
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// ==================== 相关性 ====================

#[tokio::test]
async fn test_engagement_vs_churn_correlation() {
    let (store, _clock, engine) = setup();
    store.extend(
        Collection::EngagementStates,
        vec![
            engagement_state_doc("a@example.com", Some(90.0), Some(0.1), Some("power_user")),
            engagement_state_doc("b@example.com", Some(50.0), Some(0.5), Some("engaged")),
            engagement_state_doc("c@example.com", Some(10.0), Some(0.9), Some("at_risk")),
            engagement_state_doc("d@example.com", None, Some(0.3), None),
        ],
    );

    let outcome = engine
        .get_correlation(CorrelationPair::EngagementVsChurn)
        .await
        .unwrap();
    let result = outcome.result.as_correlation().unwrap();

    assert_eq!(result.coefficient, -1.0);
    assert_eq!(result.classification, CorrelationClass::Strong);
    assert_eq!(result.direction, CorrelationDirection::Negative);
    assert_eq!(result.sample_size, 3);
    assert_eq!(result.excluded, 1);
}

#[tokio::test]
async fn test_correlation_on_empty_store_is_insufficient() {
    let (_store, _clock, engine) = setup();

    let outcome = engine
        .get_correlation(CorrelationPair::AttendanceVsEngagement)
        .await
        .unwrap();
    let result = outcome.result.as_correlation().unwrap();

    assert_eq!(result.coefficient, 0.0);
    assert_eq!(result.classification, CorrelationClass::InsufficientData);
}

#[tokio::test]
async fn test_points_vs_recognitions_correlation() {
    let (store, _clock, engine) = setup();
    let ts = noon(2025, 1, 8);
    store.extend(
        Collection::PointsLedger,
        vec![
            ledger_doc("a@example.com", 10, "event_attendance", ts),
            ledger_doc("b@example.com", 20, "event_attendance", ts),
            ledger_doc("c@example.com", 30, "recognition_received", ts),
        ],
    );
    store.extend(
        Collection::Recognitions,
        vec![
            recognition_doc("a@example.com", "b@example.com", ts),
            recognition_doc("c@example.com", "b@example.com", ts),
            recognition_doc("c@example.com", "a@example.com", ts),
        ],
    );

    let outcome = engine
        .get_correlation(CorrelationPair::PointsVsRecognitions)
        .await
        .unwrap();
    let result = outcome.result.as_correlation().unwrap();

    // a: (10, 2), b: (20, 2), c: (30, 2)，认可数没有方差
    assert_eq!(result.classification, CorrelationClass::Undefined);
    assert_eq!(result.sample_size, 3);
}

// ==================== 排行榜 ====================

#[tokio::test]
async fn test_leaderboard_ties_break_by_identity() {
    let (store, _clock, engine) = setup();
    store.extend(
        Collection::UserPoints,
        vec![
            points_doc("c@example.com", Some(50), Some("bronze")),
            points_doc("b@example.com", Some(100), Some("silver")),
            points_doc("a@example.com", Some(100), Some("silver")),
            points_doc("d@example.com", None, None),
        ],
    );
    store.insert(Collection::Users, user_doc("a@example.com", "Alice"));

    let outcome = engine
        .get_leaderboard(LeaderboardCategory::Points, LeaderboardPeriod::AllTime)
        .await
        .unwrap();
    let result = outcome.result.as_leaderboard().unwrap();

    let order: Vec<&str> = result.entries().iter().map(|e| e.user_id.as_str()).collect();
    assert_eq!(order, vec!["a@example.com", "b@example.com", "c@example.com"]);
    assert_eq!(result.rank_of("b@example.com"), Some(2));
    assert_eq!(result.entries()[0].display_name.as_deref(), Some("Alice"));
    assert_eq!(result.excluded, 1);

    let window = result.nearby("b@example.com", 1);
    assert_eq!(window.entries.len(), 3);
    assert_eq!(window.status, RankStatus::Ranked { rank: 2 });

    let missing = result.nearby("nobody@example.com", 1);
    assert_eq!(missing.status, RankStatus::NotRanked);
    assert!(missing.entries.is_empty());

    assert_eq!(result.top(10).len(), 3);
    // 没有 last_activity_date 的用户都算作沉睡
    assert_eq!(result.activity.unwrap().dormant, 4);
}

#[tokio::test]
async fn test_user_standing_uses_configured_windows() {
    let (store, _clock, engine) = setup();
    store.extend(
        Collection::UserPoints,
        (1..=10).map(|i| points_doc(&test_user_email(i), Some(i as i64 * 10), None)),
    );

    let standing = engine
        .get_user_standing(
            LeaderboardCategory::Points,
            LeaderboardPeriod::AllTime,
            &test_user_email(5),
        )
        .await
        .unwrap();

    // 分数 50 排第 6，窗口 [3, 9]
    assert_eq!(standing.status, RankStatus::Ranked { rank: 6 });
    assert_eq!(standing.nearby.len(), 7);
    assert_eq!(standing.podium.len(), 3);
    assert_eq!(standing.podium[0].user_id, test_user_email(10));
    assert_eq!(standing.total, 10);
    assert_eq!(standing.status_label, "fresh");
}

#[tokio::test]
async fn test_recognitions_leaderboard_weekly() {
    let (store, _clock, engine) = setup();
    store.extend(
        Collection::Recognitions,
        vec![
            recognition_doc("x@example.com", "a@example.com", noon(2025, 1, 9)),
            recognition_doc("y@example.com", "a@example.com", noon(2025, 1, 8)),
            recognition_doc("x@example.com", "b@example.com", noon(2024, 12, 1)),
        ],
    );

    let outcome = engine
        .get_leaderboard(
            LeaderboardCategory::RecognitionsReceived,
            LeaderboardPeriod::Weekly,
        )
        .await
        .unwrap();
    let result = outcome.result.as_leaderboard().unwrap();

    assert_eq!(result.entries().len(), 1);
    assert_eq!(result.entries()[0].score, 2.0);
    assert!(result.activity.is_none());
}

#[tokio::test]
async fn test_events_attended_leaderboard() {
    let (store, _clock, engine) = setup();
    let ts = noon(2025, 1, 6);
    store.extend(
        Collection::Participations,
        vec![
            participation_doc("a@example.com", "e1", true, ts),
            participation_doc("a@example.com", "e2", true, ts),
            participation_doc("b@example.com", "e1", true, ts),
            participation_doc("c@example.com", "e1", false, ts),
        ],
    );

    let outcome = engine
        .get_leaderboard(LeaderboardCategory::EventsAttended, LeaderboardPeriod::Monthly)
        .await
        .unwrap();
    let result = outcome.result.as_leaderboard().unwrap();

    assert_eq!(result.rank_of("a@example.com"), Some(1));
    assert_eq!(result.rank_of("b@example.com"), Some(2));
    assert_eq!(result.rank_of("c@example.com"), None);
}

#[tokio::test]
async fn test_points_leaderboard_dynamics() {
    let (store, _clock, engine) = setup();
    store.extend(
        Collection::UserPoints,
        vec![
            json!({
                "user_email": "a@example.com",
                "total_points": 500,
                "weekly_points": 40,
                "last_activity_date": noon(2025, 1, 9).to_rfc3339(),
            }),
            json!({
                "user_email": "b@example.com",
                "total_points": 300,
                "weekly_points": -20,
                "last_activity_date": noon(2024, 12, 25).to_rfc3339(),
            }),
            json!({"user_email": "c@example.com", "total_points": 100}),
        ],
    );
    store.extend(
        Collection::EngagementStates,
        vec![
            engagement_state_doc("a@example.com", Some(80.0), None, None),
            engagement_state_doc("b@example.com", Some(40.0), None, None),
            engagement_state_doc("c@example.com", Some(60.0), None, None),
        ],
    );
    store.insert(Collection::Users, user_doc("a@example.com", "Alice"));

    let outcome = engine
        .get_leaderboard(LeaderboardCategory::Points, LeaderboardPeriod::AllTime)
        .await
        .unwrap();
    let result = outcome.result.as_leaderboard().unwrap();
    let dynamics = result.dynamics.as_ref().unwrap();

    assert_eq!(
        (dynamics.velocity.rising, dynamics.velocity.falling, dynamics.velocity.stable),
        (1, 1, 1)
    );
    assert_eq!(dynamics.top_risers.len(), 1);
    assert_eq!(dynamics.top_risers[0].display_name.as_deref(), Some("Alice"));
    assert_eq!(dynamics.top_risers[0].rank, Some(1));
    let fallers: Vec<&str> = dynamics
        .biggest_fallers
        .iter()
        .map(|m| m.user_id.as_str())
        .collect();
    assert_eq!(fallers, vec!["b@example.com", "c@example.com"]);
    assert_eq!(dynamics.points.average, 300);
    assert_eq!(dynamics.points.median, 300);
    assert_eq!(dynamics.points.top, 500);
    // 1/3*40 + (1-1/3)*30 + 2/3*30 = 53.3
    assert_eq!(dynamics.health_score, 53);

    let engagement = engine
        .get_leaderboard(LeaderboardCategory::EngagementScore, LeaderboardPeriod::AllTime)
        .await
        .unwrap();
    assert!(engagement.result.as_leaderboard().unwrap().dynamics.is_none());
}

#[tokio::test]
async fn test_paged_fetch_ranks_whole_population() {
    let (store, _clock, engine) = setup_with(AnalyticsConfig {
        fetch_page_size: Some(2),
        ..Default::default()
    });
    for i in 0..5 {
        store.insert(
            Collection::UserPoints,
            points_doc(&test_user_email(i), Some(10 * i as i64), None),
        );
    }

    let outcome = engine
        .get_leaderboard(LeaderboardCategory::Points, LeaderboardPeriod::AllTime)
        .await
        .unwrap();
    let result = outcome.result.as_leaderboard().unwrap();

    assert_eq!(result.board.len(), 5);
    assert_eq!(result.excluded, 0);
    assert_eq!(result.rank_of(&test_user_email(0)), Some(5));
    assert_eq!(result.rank_of(&test_user_email(4)), Some(1));
}

// ==================== 趋势 ====================

#[tokio::test]
async fn test_trend_zero_fill_on_empty_input() {
    let (_store, _clock, engine) = setup();

    let outcome = engine
        .get_trend(TrendSource::Recognitions, Some(30))
        .await
        .unwrap();
    let panel = outcome.result.as_trend().unwrap();
    let series = panel.series("recognitions").unwrap();

    assert_eq!(series.buckets.len(), 30);
    assert!(series.buckets.iter().all(|b| b.count == 0));
    assert_eq!(series.buckets.last().unwrap().date, date(2025, 1, 10));
    assert!(series.buckets.windows(2).all(|w| w[0].date < w[1].date));
}

#[tokio::test]
async fn test_trend_counts_same_day_events() {
    let (store, _clock, engine) = setup();
    store.extend(
        Collection::Recognitions,
        vec![
            recognition_doc("a@example.com", "b@example.com", noon(2025, 1, 5)),
            recognition_doc("b@example.com", "a@example.com", noon(2025, 1, 5)),
        ],
    );

    let outcome = engine
        .get_trend(TrendSource::Recognitions, Some(30))
        .await
        .unwrap();
    let series = outcome.result.as_trend().unwrap().series("recognitions").unwrap();

    assert_eq!(series.bucket(date(2025, 1, 5)).unwrap().count, 2);
    assert_eq!(series.total_count(), 2);
}

#[tokio::test]
async fn test_trend_panel_aligns_sources() {
    let (store, _clock, engine) = setup();
    store.extend(
        Collection::Participations,
        vec![
            participation_doc("a@example.com", "e1", true, noon(2025, 1, 9)),
            participation_doc("b@example.com", "e1", false, noon(2025, 1, 9)),
        ],
    );
    store.extend(
        Collection::PointsLedger,
        vec![
            ledger_doc("a@example.com", 25, "event_attendance", noon(2025, 1, 9)),
            ledger_doc("a@example.com", 15, "recognition_sent", noon(2025, 1, 10)),
            ledger_doc("a@example.com", -5, "adjustment", noon(2025, 1, 10)),
        ],
    );

    let outcome = engine
        .get_trend_panel(
            vec![TrendSource::Participations, TrendSource::PointsLedger],
            Some(7),
        )
        .await
        .unwrap();
    let panel = outcome.result.as_trend().unwrap();

    assert_eq!(panel.axis.len(), 7);
    let participations = panel.series("participations").unwrap();
    let ledger = panel.series("points_ledger").unwrap();
    assert_eq!(participations.buckets.len(), ledger.buckets.len());
    assert_eq!(participations.bucket(date(2025, 1, 9)).unwrap().count, 1);
    assert_eq!(ledger.bucket(date(2025, 1, 9)).unwrap().sum, 25.0);
    assert_eq!(ledger.bucket(date(2025, 1, 10)).unwrap().count, 1);
}

#[tokio::test]
async fn test_trend_uses_default_days() {
    let (_store, _clock, engine) = setup();
    let outcome = engine.get_trend(TrendSource::BadgeAwards, None).await.unwrap();
    assert_eq!(outcome.result.as_trend().unwrap().axis.len(), 30);
}

#[tokio::test]
async fn test_trend_without_sources_is_rejected() {
    let (_store, _clock, engine) = setup();
    let err = engine.get_trend_panel(vec![], Some(7)).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_ARGUMENT");
}

#[tokio::test]
async fn test_trend_days_above_cap_are_rejected() {
    let (_store, _clock, engine) = setup();
    let cap = engine.config().max_trend_days;

    let err = engine
        .get_trend(TrendSource::Recognitions, Some(cap + 1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_ARGUMENT");
    let err = engine
        .get_trend(TrendSource::Recognitions, Some(u32::MAX))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_ARGUMENT");
    assert!(engine.cache().is_empty());

    let outcome = engine
        .get_trend(TrendSource::Recognitions, Some(cap))
        .await
        .unwrap();
    assert_eq!(outcome.result.as_trend().unwrap().axis.len(), cap as usize);
}

#[tokio::test]
async fn test_duplicate_trend_sources_share_one_series() {
    let (store, _clock, engine) = setup();
    store.insert(
        Collection::Recognitions,
        recognition_doc("a@example.com", "b@example.com", noon(2025, 1, 9)),
    );

    let outcome = engine
        .get_trend_panel(
            vec![
                TrendSource::Recognitions,
                TrendSource::BadgeAwards,
                TrendSource::Recognitions,
            ],
            Some(7),
        )
        .await
        .unwrap();
    let panel = outcome.result.as_trend().unwrap();
    assert_eq!(panel.series.len(), 2);
    assert_eq!(
        panel.series("recognitions").unwrap().bucket(date(2025, 1, 9)).unwrap().count,
        1
    );

    engine
        .get_trend_panel(vec![TrendSource::Recognitions, TrendSource::BadgeAwards], Some(7))
        .await
        .unwrap();
    assert_eq!(engine.cache().len(), 1);
    assert_eq!(engine.cache().stats().recomputes, 1);
}

// ==================== 分布 ====================

#[tokio::test]
async fn test_tier_distribution() -> anyhow::Result<()> {
    let (store, _clock, engine) = setup();
    store.extend(
        Collection::UserPoints,
        vec![
            points_doc("a@example.com", Some(10), Some("gold")),
            points_doc("b@example.com", Some(20), Some("gold")),
            points_doc("c@example.com", Some(30), Some("silver")),
            points_doc("d@example.com", Some(40), None),
        ],
    );

    let outcome = engine
        .get_distribution(DistributionQuery::Categorical(CategoricalField::Tier))
        .await?;
    let result = outcome
        .result
        .as_distribution()
        .ok_or_else(|| anyhow::anyhow!("expected a distribution"))?;

    assert_eq!(result.get("gold"), Some(2));
    assert_eq!(result.get("silver"), Some(1));
    assert_eq!(result.get("bronze"), None);
    assert_eq!(result.counts.len(), 2);
    assert_eq!(result.total, 3);
    assert_eq!(result.excluded, 1);
    Ok(())
}

#[tokio::test]
async fn test_points_range_distribution() {
    let (store, _clock, engine) = setup();
    store.extend(
        Collection::UserPoints,
        vec![
            points_doc("a@example.com", Some(0), None),
            points_doc("b@example.com", Some(99), None),
            points_doc("c@example.com", Some(100), None),
            points_doc("d@example.com", Some(2500), None),
            points_doc("e@example.com", None, None),
        ],
    );

    let outcome = engine
        .get_distribution(DistributionQuery::numeric(NumericField::TotalPoints))
        .await
        .unwrap();
    let result = outcome.result.as_distribution().unwrap();

    assert_eq!(result.get("0-100"), Some(2));
    assert_eq!(result.get("100-500"), Some(1));
    assert_eq!(result.get("500-1000"), Some(0));
    assert_eq!(result.get("2000+"), Some(1));
    let sum: u64 = result.counts.iter().map(|c| c.count).sum();
    assert_eq!(sum, 4);
    assert_eq!(result.excluded, 1);
}

#[tokio::test]
async fn test_badge_rarity_distribution_skips_unknown_badges() {
    let (store, _clock, engine) = setup();
    let ts = noon(2025, 1, 3);
    store.extend(
        Collection::Badges,
        vec![badge_doc("b1", "rare"), badge_doc("b2", "legendary")],
    );
    store.extend(
        Collection::BadgeAwards,
        vec![
            badge_award_doc("a@example.com", "b1", ts),
            badge_award_doc("b@example.com", "b1", ts),
            badge_award_doc("c@example.com", "b2", ts),
            badge_award_doc("d@example.com", "deleted", ts),
        ],
    );

    let outcome = engine
        .get_distribution(DistributionQuery::Categorical(CategoricalField::BadgeRarity))
        .await
        .unwrap();
    let result = outcome.result.as_distribution().unwrap();

    assert_eq!(result.get("rare"), Some(2));
    assert_eq!(result.get("legendary"), Some(1));
    assert_eq!(result.total, 3);
    assert_eq!(result.excluded, 1);
}

#[tokio::test]
async fn test_attended_event_type_distribution() {
    let (store, _clock, engine) = setup();
    let ts = noon(2025, 1, 3);
    store.extend(
        Collection::Events,
        vec![event_doc("e1", "workshop"), event_doc("e2", "social")],
    );
    store.extend(
        Collection::Participations,
        vec![
            participation_doc("a@example.com", "e1", true, ts),
            participation_doc("b@example.com", "e1", true, ts),
            participation_doc("c@example.com", "e2", false, ts),
            participation_doc("d@example.com", "gone", true, ts),
        ],
    );

    let outcome = engine
        .get_distribution(DistributionQuery::Categorical(
            CategoricalField::AttendedEventType,
        ))
        .await
        .unwrap();
    let result = outcome.result.as_distribution().unwrap();

    assert_eq!(result.get("workshop"), Some(2));
    assert_eq!(result.get("social"), None);
    assert_eq!(result.excluded, 1);
}

#[tokio::test]
async fn test_engine_rejects_invalid_config() {
    let config = AnalyticsConfig {
        history_retention: 0,
        ..Default::default()
    };
    let err = match AnalyticsEngine::new(Arc::new(InMemoryEntityStore::new()), config) {
        Ok(_) => panic!("expected invalid config"),
        Err(err) => err,
    };
    assert_eq!(err.code(), "INVALID_ARGUMENT");
}

#[tokio::test]
async fn test_purge_cache_drops_slots_past_retention() {
    let (_store, clock, engine) = setup();
    engine
        .get_correlation(CorrelationPair::EngagementVsChurn)
        .await
        .unwrap();
    assert_eq!(engine.purge_cache(), 0);

    clock.advance(chrono::Duration::seconds(
        engine.config().cache_retention_seconds as i64 + 1,
    ));
    assert_eq!(engine.purge_cache(), 1);
    assert!(engine.cache().is_empty());
}
