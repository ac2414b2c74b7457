//! 测试工具模块
//!
//! 提供测试所需的日志初始化与实体文档生成器。
//! 文档以 JSON 形式构造，与实体存储返回的原始记录保持一致的字段命名。

use std::sync::Once;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value, json};

// ==================== 日志 ====================

static TRACING_INIT: Once = Once::new();

/// 初始化测试日志（进程内只执行一次）
///
/// 默认只输出 warn 以上级别，可通过 RUST_LOG 调整
pub fn init_test_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

// ==================== 标识与时间 ====================

/// 生成测试用户邮箱
pub fn test_user_email(n: usize) -> String {
    format!("user{:03}@example.com", n)
}

/// 指定日期中午 12 点（UTC）
///
/// 日期非法时 panic，仅用于测试
pub fn noon(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(12, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|| panic!("invalid test date {year}-{month}-{day}"))
}

// ==================== 实体文档生成器 ====================

/// 用户文档
pub fn user_doc(email: &str, full_name: &str) -> Value {
    json!({
        "email": email,
        "full_name": full_name,
    })
}

/// 生命周期状态文档
pub fn engagement_state_doc(
    email: &str,
    engagement_score: Option<f64>,
    churn_risk: Option<f64>,
    lifecycle_state: Option<&str>,
) -> Value {
    let mut doc = Map::new();
    doc.insert("user_email".to_string(), json!(email));
    insert_opt(&mut doc, "engagement_score", engagement_score.map(Value::from));
    insert_opt(&mut doc, "churn_risk", churn_risk.map(Value::from));
    insert_opt(&mut doc, "lifecycle_state", lifecycle_state.map(Value::from));
    Value::Object(doc)
}

/// 积分文档
pub fn points_doc(email: &str, total_points: Option<i64>, tier: Option<&str>) -> Value {
    let mut doc = Map::new();
    doc.insert("user_email".to_string(), json!(email));
    insert_opt(&mut doc, "total_points", total_points.map(Value::from));
    insert_opt(&mut doc, "tier", tier.map(Value::from));
    Value::Object(doc)
}

/// 认可记录文档
pub fn recognition_doc(sender: &str, recipient: &str, created_at: DateTime<Utc>) -> Value {
    json!({
        "sender_email": sender,
        "recipient_email": recipient,
        "created_at": created_at.to_rfc3339(),
    })
}

/// 活动参与文档
pub fn participation_doc(
    email: &str,
    event_id: &str,
    attended: bool,
    created_at: DateTime<Utc>,
) -> Value {
    json!({
        "user_email": email,
        "event_id": event_id,
        "attended": attended,
        "created_at": created_at.to_rfc3339(),
    })
}

/// 活动文档
pub fn event_doc(id: &str, event_type: &str) -> Value {
    json!({
        "id": id,
        "title": format!("Event {id}"),
        "event_type": event_type,
    })
}

/// 积分流水文档
pub fn ledger_doc(email: &str, points: i64, action: &str, created_at: DateTime<Utc>) -> Value {
    json!({
        "user_email": email,
        "points": points,
        "action": action,
        "created_at": created_at.to_rfc3339(),
    })
}

/// 徽章定义文档
pub fn badge_doc(id: &str, rarity: &str) -> Value {
    json!({
        "id": id,
        "badge_name": format!("Badge {id}"),
        "rarity": rarity,
    })
}

/// 徽章授予文档
pub fn badge_award_doc(email: &str, badge_id: &str, awarded_at: DateTime<Utc>) -> Value {
    json!({
        "user_email": email,
        "badge_id": badge_id,
        "awarded_at": awarded_at.to_rfc3339(),
    })
}

fn insert_opt(doc: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(v) = value {
        doc.insert(key.to_string(), v);
    }
}
