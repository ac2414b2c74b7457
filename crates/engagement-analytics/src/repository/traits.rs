//! 实体存储接口定义
//!
//! 实体存储是外部托管后端的只读视图。接口按集合名返回原始 JSON 文档，
//! 类型化与字段校验由 [`super::Repository`] 负责。

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// 集合名称
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Users,
    EngagementStates,
    Events,
    Participations,
    Recognitions,
    UserPoints,
    PointsLedger,
    Badges,
    BadgeAwards,
}

impl Collection {
    pub const ALL: [Collection; 9] = [
        Collection::Users,
        Collection::EngagementStates,
        Collection::Events,
        Collection::Participations,
        Collection::Recognitions,
        Collection::UserPoints,
        Collection::PointsLedger,
        Collection::Badges,
        Collection::BadgeAwards,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::EngagementStates => "engagement_states",
            Self::Events => "events",
            Self::Participations => "participations",
            Self::Recognitions => "recognitions",
            Self::UserPoints => "user_points",
            Self::PointsLedger => "points_ledger",
            Self::Badges => "badges",
            Self::BadgeAwards => "badge_awards",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 排序字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub field: String,
    pub descending: bool,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    /// 解析后端排序表达式，前缀 `-` 表示降序，如 `-created_date`
    pub fn parse(expr: &str) -> Option<Self> {
        let expr = expr.trim();
        match expr.strip_prefix('-') {
            Some("") => None,
            Some(field) => Some(Self::desc(field)),
            None if expr.is_empty() => None,
            None => Some(Self::asc(expr)),
        }
    }
}

/// 列表查询参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub sort: Option<SortField>,
    pub limit: Option<usize>,
    /// 跳过的记录数，在排序之后、截取之前生效
    pub offset: Option<usize>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sorted(mut self, sort: SortField) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// 过滤条件：若干字段相等条件的合取
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    conditions: Vec<(String, Value)>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加字段相等条件
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// 判断文档是否满足全部条件；缺失字段视为不匹配
    pub fn matches(&self, doc: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected))
    }
}

/// 实体存储接口
///
/// 两个方法都可能返回空序列；两次调用之间不保证观察到一致的时间点。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn list(&self, collection: Collection, query: &ListQuery)
    -> Result<Vec<Value>, StoreError>;

    async fn filter(
        &self,
        collection: Collection,
        predicate: &Predicate,
        query: &ListQuery,
    ) -> Result<Vec<Value>, StoreError>;
}
