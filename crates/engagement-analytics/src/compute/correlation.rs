//! 相关性计算
//!
//! 两个按同一连接键配对的数值序列的 Pearson 相关系数。
//! 样本不足或方差为零时返回带哨兵分类的中性结果，而不是报错。

use serde::{Deserialize, Serialize};

/// 强相关阈值（|r| 大于该值）
pub const STRONG_THRESHOLD: f64 = 0.7;
/// 中等相关阈值（|r| 大于该值）
pub const MODERATE_THRESHOLD: f64 = 0.4;
/// 计算相关系数所需的最少样本数
pub const MIN_SAMPLES: usize = 2;

/// 相关强度分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationClass {
    Strong,
    Moderate,
    Weak,
    /// 样本数少于 2
    InsufficientData,
    /// 任一序列方差为零
    Undefined,
}

impl CorrelationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strong => "strong",
            Self::Moderate => "moderate",
            Self::Weak => "weak",
            Self::InsufficientData => "insufficient_data",
            Self::Undefined => "undefined",
        }
    }

    /// 是否为哨兵分类（不代表真实的相关强度）
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Self::InsufficientData | Self::Undefined)
    }

    fn classify(coefficient: f64) -> Self {
        let magnitude = coefficient.abs();
        if magnitude > STRONG_THRESHOLD {
            Self::Strong
        } else if magnitude > MODERATE_THRESHOLD {
            Self::Moderate
        } else {
            Self::Weak
        }
    }
}

/// 相关方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationDirection {
    Positive,
    Negative,
    None,
}

impl CorrelationDirection {
    fn of(coefficient: f64) -> Self {
        if coefficient > 0.0 {
            Self::Positive
        } else if coefficient < 0.0 {
            Self::Negative
        } else {
            Self::None
        }
    }
}

/// 相关性结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    /// 保留 3 位小数，范围 [-1, 1]；分类与方向按舍入前的值判定
    pub coefficient: f64,
    pub classification: CorrelationClass,
    pub direction: CorrelationDirection,
    /// 参与计算的样本对数
    pub sample_size: usize,
    /// 连接阶段因缺少字段而剔除的记录数
    pub excluded: usize,
}

impl CorrelationResult {
    fn neutral(classification: CorrelationClass, sample_size: usize) -> Self {
        Self {
            coefficient: 0.0,
            classification,
            direction: CorrelationDirection::None,
            sample_size,
            excluded: 0,
        }
    }

    pub fn with_excluded(mut self, excluded: usize) -> Self {
        self.excluded = excluded;
        self
    }
}

/// 计算 Pearson 相关系数
///
/// 两个序列按下标配对；长度不一致时只使用可配对的前缀。
/// 结果关于参数对称：`pearson(x, y) == pearson(y, x)`。
pub fn pearson(xs: &[f64], ys: &[f64]) -> CorrelationResult {
    let n = xs.len().min(ys.len());
    let (xs, ys) = (&xs[..n], &ys[..n]);

    if n < MIN_SAMPLES {
        return CorrelationResult::neutral(CorrelationClass::InsufficientData, n);
    }

    let mean_x = mean(xs);
    let mean_y = mean(ys);

    let mut numerator = 0.0;
    let mut ss_x = 0.0;
    let mut ss_y = 0.0;
    for (&x, &y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        numerator += dx * dy;
        ss_x += dx * dx;
        ss_y += dy * dy;
    }

    if ss_x == 0.0 || ss_y == 0.0 || !(ss_x.is_finite() && ss_y.is_finite()) {
        return CorrelationResult::neutral(CorrelationClass::Undefined, n);
    }

    let raw = numerator / (ss_x.sqrt() * ss_y.sqrt());
    if !raw.is_finite() {
        return CorrelationResult::neutral(CorrelationClass::Undefined, n);
    }

    // 浮点误差可能略超出 [-1, 1]
    let raw = raw.clamp(-1.0, 1.0);

    // 分类基于未舍入的系数，舍入只影响输出值
    CorrelationResult {
        coefficient: round3(raw),
        classification: CorrelationClass::classify(raw),
        direction: CorrelationDirection::of(raw),
        sample_size: n,
        excluded: 0,
    }
}

/// 对配对样本计算相关系数
pub fn pearson_pairs<I>(pairs: I) -> CorrelationResult
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let (xs, ys): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
    pearson(&xs, &ys)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn round3(value: f64) -> f64 {
    let rounded = (value * 1000.0).round() / 1000.0;
    // 避免输出 -0.0
    if rounded == 0.0 { 0.0 } else { rounded }
}
