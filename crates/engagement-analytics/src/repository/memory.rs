//! 内存实体存储
//!
//! 使用 DashMap 实现的实体存储，适用于测试和本地开发环境。
//! 支持按集合注入故障和模拟延迟，用于验证缓存的回退与单飞行为。

use std::cmp::Ordering;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::traits::{Collection, EntityStore, ListQuery, Predicate, SortField};
use crate::error::StoreError;

/// 内存实体存储
#[derive(Debug, Clone, Default)]
pub struct InMemoryEntityStore {
    data: Arc<DashMap<Collection, Vec<Value>>>,
    faults: Arc<DashMap<Collection, StoreError>>,
    latency: Arc<parking_lot::RwLock<Option<Duration>>>,
    reads: Arc<DashMap<Collection, AtomicU64>>,
}

impl InMemoryEntityStore {
    /// 创建新的内存存储实例
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条文档
    pub fn insert(&self, collection: Collection, doc: Value) {
        self.data.entry(collection).or_default().push(doc);
    }

    /// 批量追加文档
    pub fn extend<I>(&self, collection: Collection, docs: I)
    where
        I: IntoIterator<Item = Value>,
    {
        self.data.entry(collection).or_default().extend(docs);
    }

    /// 替换整个集合
    pub fn replace(&self, collection: Collection, docs: Vec<Value>) {
        self.data.insert(collection, docs);
    }

    /// 清空集合
    pub fn clear(&self, collection: Collection) {
        self.data.remove(&collection);
    }

    /// 集合中的文档数量
    pub fn count(&self, collection: Collection) -> usize {
        self.data.get(&collection).map(|docs| docs.len()).unwrap_or(0)
    }

    /// 注入故障：之后对该集合的读取都返回给定错误
    pub fn fail(&self, collection: Collection, error: StoreError) {
        self.faults.insert(collection, error);
    }

    /// 注入"不可用"故障
    pub fn fail_unavailable(&self, collection: Collection) {
        self.fail(
            collection,
            StoreError::Unavailable {
                collection: collection.to_string(),
                message: "injected fault".to_string(),
            },
        );
    }

    /// 解除故障
    pub fn heal(&self, collection: Collection) {
        self.faults.remove(&collection);
    }

    /// 设置每次读取的模拟延迟
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    /// 某集合被读取的次数
    pub fn read_count(&self, collection: Collection) -> u64 {
        self.reads
            .get(&collection)
            .map(|c| c.load(AtomicOrdering::SeqCst))
            .unwrap_or(0)
    }

    async fn read(
        &self,
        collection: Collection,
        predicate: Option<&Predicate>,
        query: &ListQuery,
    ) -> Result<Vec<Value>, StoreError> {
        self.reads
            .entry(collection)
            .or_default()
            .fetch_add(1, AtomicOrdering::SeqCst);

        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(err) = self.faults.get(&collection) {
            return Err(err.value().clone());
        }

        let mut docs: Vec<Value> = match self.data.get(&collection) {
            Some(entry) => entry
                .iter()
                .filter(|doc| predicate.is_none_or(|p| p.matches(doc)))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        if let Some(sort) = &query.sort {
            docs.sort_by(|a, b| compare_by(sort, a, b));
        }
        if let Some(offset) = query.offset {
            docs.drain(..offset.min(docs.len()));
        }
        if let Some(limit) = query.limit {
            docs.truncate(limit);
        }

        Ok(docs)
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn list(
        &self,
        collection: Collection,
        query: &ListQuery,
    ) -> Result<Vec<Value>, StoreError> {
        self.read(collection, None, query).await
    }

    async fn filter(
        &self,
        collection: Collection,
        predicate: &Predicate,
        query: &ListQuery,
    ) -> Result<Vec<Value>, StoreError> {
        self.read(collection, Some(predicate), query).await
    }
}

/// 按字段比较两个文档，缺失字段始终排在最后
fn compare_by(sort: &SortField, a: &Value, b: &Value) -> Ordering {
    match (a.get(&sort.field), b.get(&sort.field)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => {
            let ord = compare_values(x, y);
            if sort.descending { ord.reverse() } else { ord }
        }
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        // 类型不一致时按字符串表示比较，保证全序
        _ => a.to_string().cmp(&b.to_string()),
    }
}
