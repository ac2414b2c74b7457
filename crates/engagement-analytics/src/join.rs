//! 规范化与连接
//!
//! 把独立读取的集合按外键连接成适合指标计算的行。
//! 各集合不保证来自同一时间点的快照，连接不上的记录按孤儿计数而不是报错。

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::compute::leaderboard::ENGAGED_SCORE_THRESHOLD;
use crate::compute::{CorrelationResult, Mover, ScoredEntry, Velocity, pearson};
use crate::metric::LeaderboardPeriod;
use crate::models::{
    BadgeAwardRecord, BadgeRarity, EngagementState, EventRecord, ParticipationRecord,
    PointsLedgerEntry, PointsRecord, RecognitionRecord, UserRecord,
};

/// 按用户配对的两列数值
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairedSeries {
    pub keys: Vec<String>,
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    /// 缺少任一数值而未参与配对的记录数
    pub excluded: usize,
}

impl PairedSeries {
    fn push(&mut self, key: &str, x: f64, y: f64) {
        self.keys.push(key.to_string());
        self.xs.push(x);
        self.ys.push(y);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn correlate(&self) -> CorrelationResult {
        pearson(&self.xs, &self.ys).with_excluded(self.excluded)
    }
}

/// 连接结果
#[derive(Debug, Clone, PartialEq)]
pub struct Joined<T> {
    pub rows: Vec<T>,
    /// 外键指向不存在的记录
    pub orphans: usize,
}

/// 已排名人口及被剔除的记录数
#[derive(Debug, Clone, Default)]
pub struct Population {
    pub entries: Vec<ScoredEntry>,
    pub excluded: usize,
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

// ==================== 相关性配对 ====================

/// 参与度分数 vs 流失风险
///
/// 同一用户出现多条状态时只取第一条，其余计入 excluded。
pub fn engagement_vs_churn(states: &[EngagementState]) -> PairedSeries {
    let mut series = PairedSeries::default();
    let mut rows: BTreeMap<&str, (f64, f64)> = BTreeMap::new();

    for state in states {
        match (finite(state.engagement_score), finite(state.churn_risk)) {
            (Some(score), Some(risk)) if !rows.contains_key(state.user_email.as_str()) => {
                rows.insert(state.user_email.as_str(), (score, risk));
            }
            _ => series.excluded += 1,
        }
    }

    for (key, (x, y)) in rows {
        series.push(key, x, y);
    }
    series
}

/// 获得的积分 vs 收发认可数
///
/// 积分只累计正向流水；认可无论作为发送方还是接收方都计一次。
/// 两项都为 0 的用户不出现在结果中。
pub fn points_vs_recognitions(
    ledger: &[PointsLedgerEntry],
    recognitions: &[RecognitionRecord],
) -> PairedSeries {
    let mut series = PairedSeries::default();
    let mut rows: BTreeMap<&str, (f64, f64)> = BTreeMap::new();

    for entry in ledger {
        match entry.points {
            Some(points) if points > 0 => {
                rows.entry(entry.user_email.as_str()).or_default().0 += points as f64;
            }
            Some(_) => {}
            None => series.excluded += 1,
        }
    }

    for recognition in recognitions {
        rows.entry(recognition.sender_email.as_str()).or_default().1 += 1.0;
        if recognition.recipient_email != recognition.sender_email {
            rows.entry(recognition.recipient_email.as_str())
                .or_default()
                .1 += 1.0;
        }
    }

    for (key, (x, y)) in rows {
        if x > 0.0 || y > 0.0 {
            series.push(key, x, y);
        }
    }
    series
}

/// 出席活动数 vs 参与度分数
///
/// 以有参与度分数的用户为准，没有出席记录的用户出席数为 0。
pub fn attendance_vs_engagement(
    participations: &[ParticipationRecord],
    states: &[EngagementState],
) -> PairedSeries {
    let mut series = PairedSeries::default();
    let mut attended: HashMap<&str, u32> = HashMap::new();

    for participation in participations {
        match participation.attended {
            Some(true) => *attended.entry(participation.user_email.as_str()).or_default() += 1,
            Some(false) => {}
            None => series.excluded += 1,
        }
    }

    let mut scores: BTreeMap<&str, f64> = BTreeMap::new();
    for state in states {
        match finite(state.engagement_score) {
            Some(score) if !scores.contains_key(state.user_email.as_str()) => {
                scores.insert(state.user_email.as_str(), score);
            }
            _ => series.excluded += 1,
        }
    }

    for (key, score) in scores {
        let count = attended.get(key).copied().unwrap_or(0);
        series.push(key, f64::from(count), score);
    }
    series
}

// ==================== 外键连接 ====================

/// 参与记录连接活动
pub fn join_participations<'a>(
    participations: &'a [ParticipationRecord],
    events: &'a [EventRecord],
) -> Joined<(&'a ParticipationRecord, &'a EventRecord)> {
    let by_id: HashMap<&str, &EventRecord> =
        events.iter().map(|e| (e.id.as_str(), e)).collect();

    let mut rows = Vec::with_capacity(participations.len());
    let mut orphans = 0usize;
    for participation in participations {
        match by_id.get(participation.event_id.as_str()) {
            Some(event) => rows.push((participation, *event)),
            None => orphans += 1,
        }
    }
    Joined { rows, orphans }
}

/// 每条徽章授予记录对应的稀有度
pub fn award_rarities(
    awards: &[BadgeAwardRecord],
    badges: &[crate::models::BadgeRecord],
) -> Joined<Option<BadgeRarity>> {
    let by_id: HashMap<&str, Option<BadgeRarity>> =
        badges.iter().map(|b| (b.id.as_str(), b.rarity)).collect();

    let mut rows = Vec::with_capacity(awards.len());
    let mut orphans = 0usize;
    for award in awards {
        match by_id.get(award.badge_id.as_str()) {
            Some(rarity) => rows.push(*rarity),
            None => orphans += 1,
        }
    }
    Joined { rows, orphans }
}

/// 用户展示名称索引
pub fn display_names(users: &[UserRecord]) -> HashMap<String, String> {
    users
        .iter()
        .map(|u| (u.email.clone(), u.display_name()))
        .collect()
}

/// 截断积分历史，只保留最近 `retention` 条
///
/// 无时间戳的条目最先被丢弃，保留的条目按时间升序排列。返回丢弃的条数。
pub fn retain_recent_history(record: &mut PointsRecord, retention: usize) -> usize {
    let history = &mut record.points_history;
    if history.len() <= retention {
        return 0;
    }
    let excess = history.len() - retention;
    // None 排在最前
    history.sort_by_key(|entry| entry.timestamp);
    history.drain(..excess);
    excess
}

// ==================== 排行榜人口 ====================

fn named(user_id: &str, score: f64, names: &HashMap<String, String>) -> ScoredEntry {
    let entry = ScoredEntry::new(user_id, score);
    match names.get(user_id) {
        Some(name) => entry.with_display_name(name.clone()),
        None => entry,
    }
}

/// 时间戳是否落在统计周期内；全部时间恒为 true，周期内缺时间戳返回 None
fn in_period(
    period: LeaderboardPeriod,
    timestamp: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<bool> {
    match period.lookback_days() {
        None => Some(true),
        Some(days) => {
            let since = now - chrono::Duration::days(days);
            timestamp.map(|ts| ts > since && ts <= now)
        }
    }
}

/// 积分榜：全部时间取 total_points，周/月榜取对应的周期积分
pub fn points_population(
    points: &[PointsRecord],
    period: LeaderboardPeriod,
    names: &HashMap<String, String>,
) -> Population {
    let mut population = Population::default();
    for record in points {
        let value = match period {
            LeaderboardPeriod::AllTime => record.total_points,
            LeaderboardPeriod::Weekly => record.weekly_points,
            LeaderboardPeriod::Monthly => record.monthly_points,
        };
        match value {
            Some(value) => population
                .entries
                .push(named(&record.user_email, value as f64, names)),
            None => population.excluded += 1,
        }
    }
    population
}

/// 参与度榜，分数是当前快照，不受周期影响
pub fn engagement_population(
    states: &[EngagementState],
    names: &HashMap<String, String>,
) -> Population {
    let mut population = Population::default();
    for state in states {
        match finite(state.engagement_score) {
            Some(score) => population
                .entries
                .push(named(&state.user_email, score, names)),
            None => population.excluded += 1,
        }
    }
    population
}

/// 收到认可数榜
pub fn recognitions_received_population(
    recognitions: &[RecognitionRecord],
    period: LeaderboardPeriod,
    now: DateTime<Utc>,
    names: &HashMap<String, String>,
) -> Population {
    let mut counts: BTreeMap<&str, u32> = BTreeMap::new();
    let mut excluded = 0usize;

    for recognition in recognitions {
        match in_period(period, recognition.created_at, now) {
            Some(true) => *counts.entry(recognition.recipient_email.as_str()).or_default() += 1,
            Some(false) => {}
            None => excluded += 1,
        }
    }

    Population {
        entries: counts
            .into_iter()
            .map(|(user, count)| named(user, f64::from(count), names))
            .collect(),
        excluded,
    }
}

/// 出席活动数榜
pub fn events_attended_population(
    participations: &[ParticipationRecord],
    period: LeaderboardPeriod,
    now: DateTime<Utc>,
    names: &HashMap<String, String>,
) -> Population {
    let mut counts: BTreeMap<&str, u32> = BTreeMap::new();
    let mut excluded = 0usize;

    for participation in participations {
        match participation.attended {
            Some(true) => match in_period(period, participation.created_at, now) {
                Some(true) => {
                    *counts.entry(participation.user_email.as_str()).or_default() += 1
                }
                Some(false) => {}
                None => excluded += 1,
            },
            Some(false) => {}
            None => excluded += 1,
        }
    }

    Population {
        entries: counts
            .into_iter()
            .map(|(user, count)| named(user, f64::from(count), names))
            .collect(),
        excluded,
    }
}

// ==================== 积分动态 ====================

/// 积分记录转为变动条目
///
/// 缺少 total_points 的记录不参与；同一用户多条记录时保留总积分最高的一条。
pub fn points_movers(points: &[PointsRecord], names: &HashMap<String, String>) -> Vec<Mover> {
    let mut best: BTreeMap<&str, &PointsRecord> = BTreeMap::new();
    for record in points {
        let Some(total) = record.total_points else {
            continue;
        };
        match best.get(record.user_email.as_str()) {
            Some(existing) if existing.total_points.unwrap_or(i64::MIN) >= total => {}
            _ => {
                best.insert(record.user_email.as_str(), record);
            }
        }
    }

    best.into_iter()
        .map(|(user, record)| {
            let weekly = record.weekly_points.unwrap_or(0);
            Mover {
                user_id: user.to_string(),
                display_name: names.get(user).cloned(),
                rank: None,
                total_points: record.total_points.unwrap_or(0),
                weekly_points: weekly,
                monthly_points: record.monthly_points.unwrap_or(0),
                velocity: Velocity::of(weekly),
                streak_days: record.streak_days.unwrap_or(0),
            }
        })
        .collect()
}

/// 持有积分记录且参与度分数达到阈值的用户数
pub fn engaged_users(points: &[PointsRecord], states: &[EngagementState]) -> usize {
    let engaged: HashSet<&str> = states
        .iter()
        .filter(|s| finite(s.engagement_score).is_some_and(|v| v >= ENGAGED_SCORE_THRESHOLD))
        .map(|s| s.user_email.as_str())
        .collect();
    points
        .iter()
        .map(|p| p.user_email.as_str())
        .collect::<HashSet<_>>()
        .into_iter()
        .filter(|user| engaged.contains(user))
        .count()
}
