//! 类型化读取
//!
//! 把实体存储返回的原始文档解析为类型化记录。解析失败的文档被剔除并计数，
//! 不会让整次读取失败；存储调用统一加超时。

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

use super::traits::{Collection, EntityStore, ListQuery, Predicate};
use crate::error::StoreError;
use crate::models::{
    BadgeAwardRecord, BadgeRecord, EngagementState, EventRecord, ParticipationRecord,
    PointsLedgerEntry, PointsRecord, RecognitionRecord, UserRecord,
};

/// 与某个集合绑定的记录类型
pub trait Entity: DeserializeOwned + Send + 'static {
    const COLLECTION: Collection;
}

macro_rules! impl_entity {
    ($($ty:ty => $collection:expr),* $(,)?) => {
        $(
            impl Entity for $ty {
                const COLLECTION: Collection = $collection;
            }
        )*
    };
}

impl_entity! {
    UserRecord => Collection::Users,
    EngagementState => Collection::EngagementStates,
    EventRecord => Collection::Events,
    ParticipationRecord => Collection::Participations,
    RecognitionRecord => Collection::Recognitions,
    PointsRecord => Collection::UserPoints,
    PointsLedgerEntry => Collection::PointsLedger,
    BadgeRecord => Collection::Badges,
    BadgeAwardRecord => Collection::BadgeAwards,
}

/// 一次类型化读取的结果
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub records: Vec<T>,
    /// 因缺少必填字段或类型不符而被剔除的文档数
    pub excluded: usize,
}

impl<T> Fetched<T> {
    pub fn new(records: Vec<T>) -> Self {
        Self {
            records,
            excluded: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<T> Default for Fetched<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// 类型化仓储
///
/// 包装注入的 [`EntityStore`]，负责超时控制、分页读取与文档解析。
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn EntityStore>,
    timeout: Duration,
    page_size: Option<usize>,
}

impl Repository {
    pub fn new(store: Arc<dyn EntityStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            page_size: None,
        }
    }

    /// 设置分页大小
    ///
    /// 调用方未指定 limit 时按页读取直到集合读尽，结果不会被截断。
    pub fn with_page_size(mut self, page_size: Option<usize>) -> Self {
        self.page_size = page_size.filter(|size| *size > 0);
        self
    }

    /// 读取整个集合
    #[instrument(skip(self), fields(collection = %T::COLLECTION))]
    pub async fn list<T: Entity>(&self, query: ListQuery) -> Result<Fetched<T>, StoreError> {
        let docs = self.read_pages(T::COLLECTION, None, query).await?;
        Ok(parse_documents(T::COLLECTION, docs))
    }

    /// 按条件读取
    #[instrument(skip(self, predicate), fields(collection = %T::COLLECTION))]
    pub async fn filter<T: Entity>(
        &self,
        predicate: Predicate,
        query: ListQuery,
    ) -> Result<Fetched<T>, StoreError> {
        let docs = self
            .read_pages(T::COLLECTION, Some(&predicate), query)
            .await?;
        Ok(parse_documents(T::COLLECTION, docs))
    }

    /// 读取全部记录，使用默认查询参数
    pub async fn all<T: Entity>(&self) -> Result<Fetched<T>, StoreError> {
        self.list(ListQuery::new()).await
    }

    async fn read_page(
        &self,
        collection: Collection,
        predicate: Option<&Predicate>,
        query: &ListQuery,
    ) -> Result<Vec<Value>, StoreError> {
        match predicate {
            Some(predicate) => {
                self.with_timeout(collection, self.store.filter(collection, predicate, query))
                    .await
            }
            None => {
                self.with_timeout(collection, self.store.list(collection, query))
                    .await
            }
        }
    }

    async fn read_pages(
        &self,
        collection: Collection,
        predicate: Option<&Predicate>,
        query: ListQuery,
    ) -> Result<Vec<Value>, StoreError> {
        let page_size = match (query.limit, self.page_size) {
            (None, Some(size)) => size,
            _ => return self.read_page(collection, predicate, &query).await,
        };

        let start = query.offset.unwrap_or(0);
        let mut docs = Vec::new();
        let mut pages = 0usize;
        loop {
            let page_query = query.clone().skip(start + docs.len()).limit(page_size);
            let page = self.read_page(collection, predicate, &page_query).await?;
            let last = page.len() < page_size;
            docs.extend(page);
            pages += 1;
            if last {
                break;
            }
        }

        if pages > 1 {
            debug!(collection = %collection, pages, total = docs.len(), "分页读取完成");
        }
        Ok(docs)
    }

    async fn with_timeout<F>(&self, collection: Collection, fut: F) -> Result<Vec<Value>, StoreError>
    where
        F: std::future::Future<Output = Result<Vec<Value>, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                collection: collection.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

/// 逐条解析文档，失败的计入 excluded
pub fn parse_documents<T: DeserializeOwned>(collection: Collection, docs: Vec<Value>) -> Fetched<T> {
    let mut records = Vec::with_capacity(docs.len());
    let mut excluded = 0usize;

    for doc in docs {
        match serde_json::from_value::<T>(doc) {
            Ok(record) => records.push(record),
            Err(e) => {
                excluded += 1;
                debug!(collection = %collection, error = %e, "文档解析失败，已剔除");
            }
        }
    }

    engage_shared::observability::metrics::record_excluded(collection.as_str(), excluded);

    Fetched { records, excluded }
}
