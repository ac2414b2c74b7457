//! 派生指标缓存
//!
//! 每个缓存键（指标类型 + 参数）独立维护一个槽位：
//! - 过期窗口内直接返回缓存结果
//! - 过期或缺失时重算，同一键同时只有一次重算在进行（single-flight），
//!   并发请求等待同一次重算的结果
//! - 重算失败时回退到上一次成功的结果并标记为降级，没有可回退的值才返回错误
//!
//! 重算在独立任务中执行，发起请求的调用方放弃等待后重算仍会完成并写入缓存。

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use engage_shared::observability::metrics::{
    OUTCOME_DEGRADED, OUTCOME_HIT, OUTCOME_MISS, OUTCOME_UNAVAILABLE, record_cache_request,
    record_recompute,
};

use crate::clock::Clock;
use crate::error::{AnalyticsError, Result, StoreError};
use crate::metric::{MetricKey, MetricResult, MetricValue};
use crate::repository::Collection;

/// 指标不可用时的展示文案
pub const UNAVAILABLE_LABEL: &str = "unavailable";

type FlightOutput = std::result::Result<Arc<MetricResult>, AnalyticsError>;
type Flight = Shared<BoxFuture<'static, FlightOutput>>;

/// 结果来源
#[derive(Debug, Clone)]
pub enum Freshness {
    /// 本次请求触发（或等待）的重算结果
    Fresh,
    /// 过期窗口内的缓存结果
    Cached,
    /// 重算失败，返回上一次成功的结果
    Degraded { error: AnalyticsError },
}

/// 一次指标请求的结果
#[derive(Debug, Clone)]
pub struct MetricOutcome {
    pub result: Arc<MetricResult>,
    pub freshness: Freshness,
}

impl MetricOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self.freshness, Freshness::Degraded { .. })
    }

    pub fn computed_at(&self) -> DateTime<Utc> {
        self.result.computed_at
    }

    pub fn value(&self) -> &MetricValue {
        &self.result.value
    }

    /// 展示层使用的状态文案
    pub fn status_label(&self) -> String {
        match self.freshness {
            Freshness::Fresh | Freshness::Cached => "fresh".to_string(),
            Freshness::Degraded { .. } => format!(
                "using cached data from {}",
                self.result.computed_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
        }
    }
}

/// 缓存统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub recomputes: u64,
    pub degraded: u64,
    pub unavailable: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    recomputes: AtomicU64,
    degraded: AtomicU64,
    unavailable: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            recomputes: self.recomputes.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            unavailable: self.unavailable.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
struct SlotState {
    current: Option<Arc<MetricResult>>,
    /// 被显式失效后，current 只作为降级回退值
    invalidated: bool,
    /// 每次失效递增，旧代次的重算结果不再写入
    generation: u64,
}

#[derive(Default)]
struct Slot {
    state: RwLock<SlotState>,
    inflight: Mutex<Option<Flight>>,
}

impl Slot {
    fn fresh(&self, now: DateTime<Utc>) -> Option<Arc<MetricResult>> {
        let state = self.state.read();
        if state.invalidated {
            return None;
        }
        state.current.as_ref().filter(|r| r.is_fresh(now)).cloned()
    }

    fn fallback(&self) -> Option<Arc<MetricResult>> {
        self.state.read().current.clone()
    }

    fn store(&self, generation: u64, result: Arc<MetricResult>) {
        let mut state = self.state.write();
        if state.generation == generation {
            state.current = Some(result);
            state.invalidated = false;
        }
    }

    fn finish(&self, generation: u64) {
        let mut inflight = self.inflight.lock();
        if self.state.read().generation == generation {
            *inflight = None;
        }
    }

    fn invalidate(&self) {
        let mut inflight = self.inflight.lock();
        let mut state = self.state.write();
        state.generation += 1;
        state.invalidated = true;
        *inflight = None;
    }
}

struct CacheInner {
    slots: DashMap<MetricKey, Arc<Slot>>,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl CacheInner {
    fn invalidate(&self, key: &MetricKey) -> bool {
        match self.slots.get(key) {
            Some(slot) => {
                slot.invalidate();
                debug!(key = %key, "Metric invalidated");
                true
            }
            None => false,
        }
    }

    fn invalidate_collection(&self, collection: Collection) -> usize {
        let mut count = 0;
        for entry in self.slots.iter() {
            if entry.key().depends_on(collection) {
                entry.value().invalidate();
                count += 1;
            }
        }
        info!(collection = %collection, invalidated = count, "Metrics invalidated by collection change");
        count
    }

    fn invalidate_all(&self) -> usize {
        let mut count = 0;
        for entry in self.slots.iter() {
            entry.value().invalidate();
            count += 1;
        }
        info!(invalidated = count, "All metrics invalidated");
        count
    }
}

/// 派生指标缓存
///
/// 可显式构造，多个实例互不影响。克隆共享同一份缓存。
#[derive(Clone)]
pub struct MetricCache {
    inner: Arc<CacheInner>,
}

impl MetricCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                slots: DashMap::new(),
                clock,
                counters: Counters::default(),
            }),
        }
    }

    /// 获取指标，必要时调用 `loader` 重算
    ///
    /// `loader` 只在本次请求需要发起新的重算时调用；
    /// 已有重算在进行时直接等待其结果。
    pub async fn get_or_recompute<F, Fut>(
        &self,
        key: &MetricKey,
        staleness: Duration,
        loader: F,
    ) -> Result<MetricOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<MetricValue, StoreError>> + Send + 'static,
    {
        let kind = key.kind().as_str();
        let slot = self.slot(key);

        let flight = {
            let mut inflight = slot.inflight.lock();
            // 持有 inflight 锁再判断新鲜度，避免与刚结束的重算竞争
            if let Some(result) = slot.fresh(self.inner.clock.now()) {
                drop(inflight);
                self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                record_cache_request(kind, OUTCOME_HIT);
                debug!(key = %key, "Metric cache hit");
                return Ok(MetricOutcome {
                    result,
                    freshness: Freshness::Cached,
                });
            }

            self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
            record_cache_request(kind, OUTCOME_MISS);
            match inflight.as_ref() {
                Some(flight) => {
                    debug!(key = %key, "Joining in-flight recompute");
                    flight.clone()
                }
                None => {
                    let flight = self.start_flight(key, staleness, Arc::clone(&slot), loader());
                    *inflight = Some(flight.clone());
                    flight
                }
            }
        };

        match flight.await {
            Ok(result) => Ok(MetricOutcome {
                result,
                freshness: Freshness::Fresh,
            }),
            Err(error) => match slot.fallback() {
                Some(previous) => {
                    self.inner.counters.degraded.fetch_add(1, Ordering::Relaxed);
                    record_cache_request(kind, OUTCOME_DEGRADED);
                    warn!(
                        key = %key,
                        error = %error,
                        computed_at = %previous.computed_at,
                        "Recompute failed, serving previous result"
                    );
                    Ok(MetricOutcome {
                        result: previous,
                        freshness: Freshness::Degraded { error },
                    })
                }
                None => {
                    self.inner.counters.unavailable.fetch_add(1, Ordering::Relaxed);
                    record_cache_request(kind, OUTCOME_UNAVAILABLE);
                    error!(key = %key, error = %error, "Recompute failed with no cached fallback");
                    Err(error)
                }
            },
        }
    }

    fn slot(&self, key: &MetricKey) -> Arc<Slot> {
        if let Some(slot) = self.inner.slots.get(key) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.inner.slots.entry(key.clone()).or_default().value())
    }

    fn start_flight<Fut>(
        &self,
        key: &MetricKey,
        staleness: Duration,
        slot: Arc<Slot>,
        recompute: Fut,
    ) -> Flight
    where
        Fut: Future<Output = std::result::Result<MetricValue, StoreError>> + Send + 'static,
    {
        let generation = slot.state.read().generation;
        let inner = Arc::clone(&self.inner);
        let task_slot = Arc::clone(&slot);
        let key_label = key.to_string();
        let kind = key.kind().as_str();

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let outcome = recompute.await;
            let elapsed = started.elapsed();
            record_recompute(kind, elapsed.as_secs_f64());
            inner.counters.recomputes.fetch_add(1, Ordering::Relaxed);

            let result = match outcome {
                Ok(value) => {
                    let result = Arc::new(MetricResult::new(value, inner.clock.now(), staleness));
                    task_slot.store(generation, Arc::clone(&result));
                    info!(
                        key = %key_label,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Metric recomputed"
                    );
                    Ok(result)
                }
                Err(source) => Err(AnalyticsError::MetricUnavailable {
                    key: key_label,
                    source,
                }),
            };
            task_slot.finish(generation);
            result
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    slot.finish(generation);
                    Err(AnalyticsError::Internal(format!("recompute task failed: {e}")))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// 失效单个键，下次请求重算；旧结果保留作为降级回退值
    pub fn invalidate(&self, key: &MetricKey) -> bool {
        self.inner.invalidate(key)
    }

    /// 失效依赖某集合的所有键
    pub fn invalidate_collection(&self, collection: Collection) -> usize {
        self.inner.invalidate_collection(collection)
    }

    pub fn invalidate_all(&self) -> usize {
        self.inner.invalidate_all()
    }

    /// 清空所有槽位，包括降级回退值
    pub fn clear(&self) {
        self.inner.slots.clear();
    }

    /// 清理长时间未重算的槽位
    ///
    /// 没有进行中的重算、且结果缺失或计算时间早于 `now - max_age` 的槽位被移除，
    /// 移除后不再有降级回退值。返回移除的槽位数。
    pub fn purge_older_than(&self, max_age: Duration) -> usize {
        let now = self.inner.clock.now();
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age));
        let before = self.inner.slots.len();

        self.inner.slots.retain(|_, slot| {
            let busy = slot.inflight.try_lock().is_none_or(|inflight| inflight.is_some());
            if busy {
                return true;
            }
            match (slot.fallback(), cutoff) {
                (Some(result), Some(cutoff)) => result.computed_at >= cutoff,
                (Some(_), None) => true,
                (None, _) => false,
            }
        });

        let purged = before.saturating_sub(self.inner.slots.len());
        if purged > 0 {
            info!(purged, "Idle metric slots purged");
        }
        purged
    }

    /// 当前缓存的结果（不论是否过期）
    pub fn peek(&self, key: &MetricKey) -> Option<Arc<MetricResult>> {
        self.inner.slots.get(key).and_then(|slot| slot.fallback())
    }

    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.counters.snapshot()
    }

    /// 获取失效句柄，供写入方在数据变更后通知缓存
    pub fn invalidator(&self) -> Invalidator {
        Invalidator {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// 缓存失效句柄
#[derive(Clone)]
pub struct Invalidator {
    inner: Arc<CacheInner>,
}

impl Invalidator {
    pub fn invalidate(&self, key: &MetricKey) -> bool {
        self.inner.invalidate(key)
    }

    pub fn invalidate_collection(&self, collection: Collection) -> usize {
        self.inner.invalidate_collection(collection)
    }

    pub fn invalidate_all(&self) -> usize {
        self.inner.invalidate_all()
    }
}
