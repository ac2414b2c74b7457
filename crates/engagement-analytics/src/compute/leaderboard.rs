//! 排行榜排序
//!
//! 按分数降序、身份标识升序构建全序，同时生成身份到名次的索引，
//! 支持 O(1) 名次查询、附近名次窗口与领奖台查询。
//! 积分榜另外提供百分位分层、活跃度分段和积分动态。

use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 附近窗口默认半径
pub const DEFAULT_NEARBY_WINDOW: usize = 3;
/// 领奖台默认人数
pub const DEFAULT_PODIUM_SIZE: usize = 3;

/// 待排序的计分条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEntry {
    pub user_id: String,
    pub display_name: Option<String>,
    pub score: f64,
}

impl ScoredEntry {
    pub fn new(user_id: impl Into<String>, score: f64) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
            score,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// 已排序的条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    /// 从 1 开始的名次
    pub rank: usize,
    pub user_id: String,
    pub display_name: Option<String>,
    pub score: f64,
}

/// 名次状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RankStatus {
    Ranked { rank: usize },
    NotRanked,
}

/// 附近名次窗口
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyWindow<'a> {
    pub status: RankStatus,
    pub entries: &'a [RankedEntry],
}

/// 百分位分层统计（向上取整切分）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PercentileTiers {
    pub top10: usize,
    pub top25: usize,
    pub middle50: usize,
    pub bottom25: usize,
}

/// 排行榜
///
/// 反序列化时按条目顺序重建名次与索引。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredLeaderboard")]
pub struct Leaderboard {
    entries: Vec<RankedEntry>,
    #[serde(skip_serializing)]
    rank_index: HashMap<String, usize>,
    /// 分数非有限值或身份重复而被剔除的条目数
    excluded: usize,
}

#[derive(Deserialize)]
struct StoredLeaderboard {
    entries: Vec<RankedEntry>,
    #[serde(default)]
    excluded: usize,
}

impl From<StoredLeaderboard> for Leaderboard {
    fn from(stored: StoredLeaderboard) -> Self {
        let mut rank_index = HashMap::with_capacity(stored.entries.len());
        let mut excluded = stored.excluded;
        let mut entries = Vec::with_capacity(stored.entries.len());
        for mut entry in stored.entries {
            if rank_index.contains_key(&entry.user_id) {
                excluded += 1;
                continue;
            }
            entry.rank = entries.len() + 1;
            rank_index.insert(entry.user_id.clone(), entry.rank);
            entries.push(entry);
        }
        Self {
            entries,
            rank_index,
            excluded,
        }
    }
}

impl Leaderboard {
    /// 构建排行榜
    ///
    /// - 分数降序，分数相同按 user_id 升序，保证重复计算得到相同顺序
    /// - 同一身份出现多次时只保留分数最高的一条
    /// - NaN/无穷分数不参与排名
    pub fn build<I>(population: I) -> Self
    where
        I: IntoIterator<Item = ScoredEntry>,
    {
        let mut excluded = 0usize;
        let mut best: HashMap<String, ScoredEntry> = HashMap::new();

        for entry in population {
            if !entry.score.is_finite() {
                excluded += 1;
                continue;
            }
            match best.entry(entry.user_id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(entry);
                }
                Entry::Occupied(mut slot) => {
                    excluded += 1;
                    if entry.score > slot.get().score {
                        slot.insert(entry);
                    }
                }
            }
        }

        let mut sorted: Vec<ScoredEntry> = best.into_values().collect();
        sorted.sort_by(compare_entries);

        let mut rank_index = HashMap::with_capacity(sorted.len());
        let entries = sorted
            .into_iter()
            .enumerate()
            .map(|(idx, e)| {
                let rank = idx + 1;
                rank_index.insert(e.user_id.clone(), rank);
                RankedEntry {
                    rank,
                    user_id: e.user_id,
                    display_name: e.display_name,
                    score: e.score,
                }
            })
            .collect();

        Self {
            entries,
            rank_index,
            excluded,
        }
    }

    /// 完整排序结果
    pub fn entries(&self) -> &[RankedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn excluded(&self) -> usize {
        self.excluded
    }

    /// 查询名次（1 起始），未上榜返回 None
    pub fn rank_of(&self, user_id: &str) -> Option<usize> {
        self.rank_index.get(user_id).copied()
    }

    /// 查询用户附近的名次窗口 [max(1, R-W), min(N, R+W)]
    ///
    /// 用户未上榜时返回空窗口和 `NotRanked`。
    pub fn nearby(&self, user_id: &str, window: usize) -> NearbyWindow<'_> {
        match self.rank_of(user_id) {
            Some(rank) => {
                let start = rank.saturating_sub(window).max(1);
                let end = rank.saturating_add(window).min(self.entries.len());
                NearbyWindow {
                    status: RankStatus::Ranked { rank },
                    entries: &self.entries[start - 1..end],
                }
            }
            None => NearbyWindow {
                status: RankStatus::NotRanked,
                entries: &[],
            },
        }
    }

    /// 前 K 名，不足 K 名时返回全部
    pub fn top(&self, k: usize) -> &[RankedEntry] {
        &self.entries[..k.min(self.entries.len())]
    }

    /// 领奖台（默认前 3 名）
    pub fn podium(&self) -> &[RankedEntry] {
        self.top(DEFAULT_PODIUM_SIZE)
    }

    /// 百分位分层
    pub fn percentile_tiers(&self) -> PercentileTiers {
        let n = self.entries.len();
        let cut = |fraction: f64| ((n as f64) * fraction).ceil() as usize;
        let top10 = cut(0.10).min(n);
        let top25 = cut(0.25).min(n);
        let top75 = cut(0.75).min(n);
        PercentileTiers {
            top10,
            top25,
            middle50: top75 - top25,
            bottom25: n - top75,
        }
    }
}

/// 活跃度分段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActivitySegments {
    /// 最近 7 天内有活动
    pub active: usize,
    /// 最近活动在 8-30 天前
    pub at_risk: usize,
    /// 超过 30 天无活动或从未活动
    pub dormant: usize,
}

/// 按最近活动时间分段
pub fn activity_segments<I>(last_activity: I, now: DateTime<Utc>) -> ActivitySegments
where
    I: IntoIterator<Item = Option<DateTime<Utc>>>,
{
    let mut segments = ActivitySegments::default();
    for ts in last_activity {
        match ts.map(|t| (now - t).num_days()) {
            Some(days) if days <= 7 => segments.active += 1,
            Some(days) if days <= 30 => segments.at_risk += 1,
            _ => segments.dormant += 1,
        }
    }
    segments
}

// ==================== 积分动态 ====================

/// 涨幅榜与跌幅榜的人数上限
pub const MOVERS_LIMIT: usize = 5;
/// 计入健康度"投入用户"的参与度分数下限
pub const ENGAGED_SCORE_THRESHOLD: f64 = 50.0;

/// 按本周积分判定的变化方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Velocity {
    Rising,
    Falling,
    Stable,
}

impl Velocity {
    pub fn of(weekly_points: i64) -> Self {
        match weekly_points.cmp(&0) {
            Ordering::Greater => Self::Rising,
            Ordering::Less => Self::Falling,
            Ordering::Equal => Self::Stable,
        }
    }
}

/// 单个用户的积分变动
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mover {
    pub user_id: String,
    pub display_name: Option<String>,
    /// 当前榜单名次，未上榜为 None
    pub rank: Option<usize>,
    pub total_points: i64,
    /// 缺失按 0 计
    pub weekly_points: i64,
    pub monthly_points: i64,
    pub velocity: Velocity,
    pub streak_days: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VelocityCounts {
    pub rising: usize,
    pub falling: usize,
    pub stable: usize,
}

/// 总积分概况，空人口全部为 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PointsSummary {
    /// 四舍五入到整数
    pub average: i64,
    /// 按总积分降序排列后第 n/2 位
    pub median: i64,
    pub top: i64,
}

/// 积分榜动态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardDynamics {
    pub velocity: VelocityCounts,
    /// 本周积分增长最多的用户
    pub top_risers: Vec<Mover>,
    /// 本周积分下降或停滞的用户，下降最多的在前
    pub biggest_fallers: Vec<Mover>,
    pub points: PointsSummary,
    /// 0-100
    pub health_score: u32,
}

/// 计算积分榜动态
///
/// `movers` 每个用户一条，名次从 `board` 回填；`engaged` 是参与度分数达到
/// [`ENGAGED_SCORE_THRESHOLD`] 的用户数。
pub fn dynamics(
    board: &Leaderboard,
    mut movers: Vec<Mover>,
    activity: ActivitySegments,
    engaged: usize,
) -> LeaderboardDynamics {
    for mover in &mut movers {
        mover.rank = board.rank_of(&mover.user_id);
    }
    movers.sort_by(|a, b| {
        b.total_points
            .cmp(&a.total_points)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    let mut velocity = VelocityCounts::default();
    for mover in &movers {
        match mover.velocity {
            Velocity::Rising => velocity.rising += 1,
            Velocity::Falling => velocity.falling += 1,
            Velocity::Stable => velocity.stable += 1,
        }
    }

    let points = match movers.first() {
        Some(top) => {
            let sum: i64 = movers.iter().map(|m| m.total_points).sum();
            PointsSummary {
                average: (sum as f64 / movers.len() as f64).round() as i64,
                median: movers[movers.len() / 2].total_points,
                top: top.total_points,
            }
        }
        None => PointsSummary::default(),
    };

    // 稳定排序，同分时保持总积分顺序
    let mut top_risers: Vec<Mover> = movers
        .iter()
        .filter(|m| m.velocity == Velocity::Rising)
        .cloned()
        .collect();
    top_risers.sort_by(|a, b| b.weekly_points.cmp(&a.weekly_points));
    top_risers.truncate(MOVERS_LIMIT);

    let mut biggest_fallers: Vec<Mover> = movers
        .iter()
        .filter(|m| {
            m.velocity == Velocity::Falling || (m.velocity == Velocity::Stable && m.total_points > 0)
        })
        .cloned()
        .collect();
    biggest_fallers.sort_by_key(|m| m.weekly_points);
    biggest_fallers.truncate(MOVERS_LIMIT);

    LeaderboardDynamics {
        velocity,
        top_risers,
        biggest_fallers,
        points,
        health_score: health_score(activity, engaged),
    }
}

/// 社区健康度（0-100）
///
/// 活跃占比权重 40，非流失风险占比权重 30，投入用户占比权重 30。
/// 人口为空时返回 0。
pub fn health_score(activity: ActivitySegments, engaged: usize) -> u32 {
    let total = activity.active + activity.at_risk + activity.dormant;
    if total == 0 {
        return 0;
    }
    let total = total as f64;
    let active = activity.active as f64 / total;
    let at_risk = activity.at_risk as f64 / total;
    let engaged = (engaged as f64 / total).min(1.0);
    (active * 40.0 + (1.0 - at_risk) * 30.0 + engaged * 30.0).round() as u32
}

fn compare_entries(a: &ScoredEntry, b: &ScoredEntry) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.user_id.cmp(&b.user_id))
}
