//! 实体记录
//!
//! 从实体存储读取的只读快照。所有可能缺失的字段都是显式的 `Option`，
//! 聚合模块把"缺失"当作独立状态处理，而不是默认成 0。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{BadgeRarity, LifecycleState, Tier};

/// 用户
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub email: String,
    pub full_name: Option<String>,
    pub department: Option<String>,
}

impl UserRecord {
    /// 展示名称，缺失时取邮箱 @ 之前的部分
    pub fn display_name(&self) -> String {
        match &self.full_name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => self
                .email
                .split('@')
                .next()
                .unwrap_or(&self.email)
                .to_string(),
        }
    }
}

/// 用户参与度状态（每个用户至多一条）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementState {
    pub user_email: String,
    /// 0-100
    pub engagement_score: Option<f64>,
    /// 0-1
    pub churn_risk: Option<f64>,
    #[serde(alias = "current_state")]
    pub lifecycle_state: Option<LifecycleState>,
    pub days_in_state: Option<u32>,
}

/// 活动
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub title: Option<String>,
    pub event_type: Option<String>,
    #[serde(default, deserialize_with = "timestamp::deserialize")]
    pub scheduled_date: Option<DateTime<Utc>>,
}

/// 活动参与记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipationRecord {
    #[serde(alias = "participant_email")]
    pub user_email: String,
    pub event_id: String,
    pub attended: Option<bool>,
    /// 0-10
    pub engagement_score: Option<f64>,
    #[serde(
        default,
        alias = "created_date",
        deserialize_with = "timestamp::deserialize"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

/// 认可记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionRecord {
    pub sender_email: String,
    pub recipient_email: String,
    #[serde(
        default,
        alias = "created_date",
        deserialize_with = "timestamp::deserialize"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

/// 积分历史条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsHistoryEntry {
    pub amount: Option<f64>,
    pub reason: Option<String>,
    #[serde(default, deserialize_with = "timestamp::deserialize")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// 用户积分（每个用户一条）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsRecord {
    pub user_email: String,
    pub total_points: Option<i64>,
    pub weekly_points: Option<i64>,
    pub monthly_points: Option<i64>,
    pub tier: Option<Tier>,
    pub streak_days: Option<u32>,
    #[serde(default, deserialize_with = "timestamp::deserialize")]
    pub last_activity_date: Option<DateTime<Utc>>,
    /// 随用户生命周期无界增长，归一化时按保留策略截断
    #[serde(default)]
    pub points_history: Vec<PointsHistoryEntry>,
}

/// 积分流水
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsLedgerEntry {
    pub user_email: String,
    pub points: Option<i64>,
    pub action: Option<String>,
    #[serde(
        default,
        alias = "created_date",
        deserialize_with = "timestamp::deserialize"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

/// 徽章定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgeRecord {
    pub id: String,
    pub badge_name: Option<String>,
    pub rarity: Option<BadgeRarity>,
    pub category: Option<String>,
}

/// 徽章授予记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgeAwardRecord {
    pub user_email: String,
    pub badge_id: String,
    #[serde(
        default,
        alias = "created_date",
        deserialize_with = "timestamp::deserialize"
    )]
    pub awarded_at: Option<DateTime<Utc>>,
}

/// 宽松的时间戳解析
///
/// 支持 RFC 3339、无时区的日期时间（按 UTC 处理）和纯日期（当天 00:00 UTC）。
/// 无法解析的取值视为缺失，不使整条记录失效。
mod timestamp {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(raw.as_ref().and_then(|v| v.as_str()).and_then(parse))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
                return Some(naive.and_utc());
            }
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }
}
