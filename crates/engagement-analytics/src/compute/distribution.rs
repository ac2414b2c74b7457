//! 分布聚合
//!
//! 两种模式：
//! - 分类模式：统计每个出现过的标签的数量，未出现的标签不输出
//! - 数值分桶模式：按升序、左闭右开且首尾相接的区间计数，末区间无上界
//!
//! 两种模式下计数总和都等于字段有定义的记录数；字段缺失的记录计入 excluded。

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{AnalyticsError, Result};

/// 分布模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionMode {
    Categorical,
    Buckets,
}

/// 单个类别或区间的计数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionCount {
    pub label: String,
    pub count: u64,
}

/// 分布结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionResult {
    pub mode: DistributionMode,
    /// 分类模式按标签升序；分桶模式按区间升序（包括计数为 0 的区间）
    pub counts: Vec<DistributionCount>,
    /// 参与统计的记录数（等于 counts 之和）
    pub total: u64,
    /// 字段缺失而被剔除的记录数
    pub excluded: usize,
}

impl DistributionResult {
    pub fn get(&self, label: &str) -> Option<u64> {
        self.counts
            .iter()
            .find(|c| c.label == label)
            .map(|c| c.count)
    }

    pub fn as_map(&self) -> HashMap<&str, u64> {
        self.counts
            .iter()
            .map(|c| (c.label.as_str(), c.count))
            .collect()
    }

    /// 各类别占比（百分比），total 为 0 时全部为 0
    pub fn percentages(&self) -> Vec<(String, f64)> {
        self.counts
            .iter()
            .map(|c| {
                let pct = if self.total > 0 {
                    c.count as f64 / self.total as f64 * 100.0
                } else {
                    0.0
                };
                (c.label.clone(), pct)
            })
            .collect()
    }
}

/// 分桶区间描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketRange {
    pub label: String,
    pub lower: f64,
    /// None 表示无上界
    pub upper: Option<f64>,
}

/// 数值分桶规格
///
/// 由严格递增的下界序列定义：[b0, b1), [b1, b2), ..., [bn, +∞)。
/// 低于 b0 的取值归入第一个区间，保证任意有限值恰好落入一个区间。
/// 反序列化经过与 [`BucketSpec::from_boundaries`] 相同的校验。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawBucketSpec")]
pub struct BucketSpec {
    boundaries: Vec<f64>,
    labels: Vec<String>,
}

/// 未校验的分桶规格
#[derive(Deserialize)]
struct RawBucketSpec {
    boundaries: Vec<f64>,
    #[serde(default)]
    labels: Option<Vec<String>>,
}

impl TryFrom<RawBucketSpec> for BucketSpec {
    type Error = AnalyticsError;

    fn try_from(raw: RawBucketSpec) -> Result<Self> {
        let spec = Self::from_boundaries(&raw.boundaries)?;
        match raw.labels {
            Some(labels) => spec.with_labels(labels),
            None => Ok(spec),
        }
    }
}

impl BucketSpec {
    /// 根据下界构建规格，标签自动生成（如 "100-500"、"2000+"）
    pub fn from_boundaries(boundaries: &[f64]) -> Result<Self> {
        if boundaries.is_empty() {
            return Err(AnalyticsError::invalid_argument(
                "boundaries",
                "at least one boundary is required",
            ));
        }
        if boundaries.iter().any(|b| !b.is_finite()) {
            return Err(AnalyticsError::invalid_argument(
                "boundaries",
                "boundaries must be finite",
            ));
        }
        if boundaries.windows(2).any(|w| w[0] >= w[1]) {
            return Err(AnalyticsError::invalid_argument(
                "boundaries",
                "boundaries must be strictly ascending",
            ));
        }

        Ok(Self {
            boundaries: boundaries.to_vec(),
            labels: default_labels(boundaries),
        })
    }

    /// 替换区间标签，数量必须与区间数一致
    pub fn with_labels<S: Into<String>>(mut self, labels: Vec<S>) -> Result<Self> {
        if labels.len() != self.boundaries.len() {
            return Err(AnalyticsError::invalid_argument(
                "labels",
                format!(
                    "expected {} labels, got {}",
                    self.boundaries.len(),
                    labels.len()
                ),
            ));
        }
        self.labels = labels.into_iter().map(Into::into).collect();
        Ok(self)
    }

    /// 积分区间 [0,100), [100,500), [500,1000), [1000,2000), [2000,∞)
    pub fn points_ranges() -> Self {
        Self::fixed(&[0.0, 100.0, 500.0, 1000.0, 2000.0], None)
    }

    /// 参与度分层：inactive <20, casual 20-50, engaged 50-80, champions ≥80
    pub fn engagement_segments() -> Self {
        Self::fixed(
            &[0.0, 20.0, 50.0, 80.0],
            Some(&["inactive", "casual", "engaged", "champions"]),
        )
    }

    /// 流失风险分层：low <0.4, medium 0.4-0.7, high ≥0.7
    pub fn churn_risk_bands() -> Self {
        Self::fixed(&[0.0, 0.4, 0.7], Some(&["low", "medium", "high"]))
    }

    fn fixed(boundaries: &[f64], labels: Option<&[&str]>) -> Self {
        let labels = match labels {
            Some(labels) => labels.iter().map(|l| l.to_string()).collect(),
            None => default_labels(boundaries),
        };
        Self {
            boundaries: boundaries.to_vec(),
            labels,
        }
    }

    pub fn len(&self) -> usize {
        self.boundaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boundaries.is_empty()
    }

    pub fn ranges(&self) -> Vec<BucketRange> {
        self.boundaries
            .iter()
            .enumerate()
            .map(|(i, lower)| BucketRange {
                label: self.labels[i].clone(),
                lower: *lower,
                upper: self.boundaries.get(i + 1).copied(),
            })
            .collect()
    }

    /// 取值所属区间下标
    pub fn index_of(&self, value: f64) -> usize {
        self.boundaries
            .partition_point(|b| *b <= value)
            .saturating_sub(1)
    }
}

fn default_labels(boundaries: &[f64]) -> Vec<String> {
    boundaries
        .iter()
        .enumerate()
        .map(|(i, lower)| match boundaries.get(i + 1) {
            Some(upper) => format!("{}-{}", lower, upper),
            None => format!("{}+", lower),
        })
        .collect()
}

impl PartialEq for BucketSpec {
    fn eq(&self, other: &Self) -> bool {
        self.labels == other.labels
            && self.boundaries.len() == other.boundaries.len()
            && self
                .boundaries
                .iter()
                .zip(&other.boundaries)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Eq for BucketSpec {}

impl Hash for BucketSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in &self.boundaries {
            b.to_bits().hash(state);
        }
        self.labels.hash(state);
    }
}

/// 分类计数
pub fn categorical<I, K>(values: I) -> DistributionResult
where
    I: IntoIterator<Item = Option<K>>,
    K: AsRef<str>,
{
    let mut counts: HashMap<String, u64> = HashMap::new();
    let mut excluded = 0usize;
    let mut total = 0u64;

    for value in values {
        match value {
            Some(tag) => {
                total += 1;
                // 命中已有标签时不分配新字符串
                match counts.get_mut(tag.as_ref()) {
                    Some(count) => *count += 1,
                    None => {
                        counts.insert(tag.as_ref().to_string(), 1);
                    }
                }
            }
            None => excluded += 1,
        }
    }

    let mut counts: Vec<DistributionCount> = counts
        .into_iter()
        .map(|(label, count)| DistributionCount { label, count })
        .collect();
    counts.sort_by(|a, b| a.label.cmp(&b.label));

    DistributionResult {
        mode: DistributionMode::Categorical,
        counts,
        total,
        excluded,
    }
}

/// 数值分桶计数
///
/// NaN 视为缺失值。
pub fn bucketed<I>(values: I, spec: &BucketSpec) -> DistributionResult
where
    I: IntoIterator<Item = Option<f64>>,
{
    let mut tallies = vec![0u64; spec.len()];
    let mut excluded = 0usize;
    let mut total = 0u64;

    for value in values {
        match value {
            Some(v) if !v.is_nan() => {
                tallies[spec.index_of(v)] += 1;
                total += 1;
            }
            _ => excluded += 1,
        }
    }

    let counts = spec
        .labels
        .iter()
        .zip(tallies)
        .map(|(label, count)| DistributionCount {
            label: label.clone(),
            count,
        })
        .collect();

    DistributionResult {
        mode: DistributionMode::Buckets,
        counts,
        total,
        excluded,
    }
}
