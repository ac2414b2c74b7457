//! 趋势分桶
//!
//! 以 UTC 自然日为粒度，把带时间戳的事件归入截止到"今天"的 N 个日桶。
//! 没有事件的日期同样输出（计数为 0），输出始终按日期升序。

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AnalyticsError, Result};

/// 单日桶
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendBucket {
    pub date: NaiveDate,
    pub count: u64,
    pub sum: f64,
}

/// 单条趋势序列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSeries {
    pub name: String,
    pub buckets: Vec<TrendBucket>,
    /// 缺少时间戳而无法归桶的记录数
    pub excluded: usize,
}

impl TrendSeries {
    pub fn total_count(&self) -> u64 {
        self.buckets.iter().map(|b| b.count).sum()
    }

    pub fn total_sum(&self) -> f64 {
        self.buckets.iter().map(|b| b.sum).sum()
    }

    /// 指定日期的桶
    pub fn bucket(&self, date: NaiveDate) -> Option<&TrendBucket> {
        self.buckets
            .binary_search_by_key(&date, |b| b.date)
            .ok()
            .map(|idx| &self.buckets[idx])
    }
}

/// 共享同一日期轴的多条序列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPanel {
    pub axis: Vec<NaiveDate>,
    pub series: Vec<TrendSeries>,
}

impl TrendPanel {
    pub fn series(&self, name: &str) -> Option<&TrendSeries> {
        self.series.iter().find(|s| s.name == name)
    }
}

/// 日期轴：以 today 结尾的连续 days 天
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayAxis {
    start: NaiveDate,
    days: u32,
}

impl DayAxis {
    /// 窗口起点早于可表示的最早日期时返回 `InvalidArgument`
    pub fn ending(today: NaiveDate, days: u32) -> Result<Self> {
        let start = today
            .checked_sub_days(Days::new(u64::from(days.saturating_sub(1))))
            .ok_or_else(|| {
                AnalyticsError::invalid_argument(
                    "days",
                    format!("a {days}-day window ending {today} is out of range"),
                )
            })?;
        Ok(Self { start, days })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn len(&self) -> usize {
        self.days as usize
    }

    pub fn is_empty(&self) -> bool {
        self.days == 0
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.start.iter_days().take(self.len()).collect()
    }

    /// 日期在轴上的下标，超出窗口返回 None
    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        let offset = date.signed_duration_since(self.start).num_days();
        if offset < 0 || offset >= i64::from(self.days) {
            None
        } else {
            Some(offset as usize)
        }
    }
}

/// 对事件流分桶
///
/// `events` 中每一项是 (可选时间戳, 数值)；计数按条累加，sum 累加数值。
/// 时间戳缺失的记录计入 excluded，窗口外的记录直接忽略。
/// 输入以迭代器形式逐条消费，不会复制整个集合。
pub fn bucketize<I>(name: impl Into<String>, events: I, axis: DayAxis) -> TrendSeries
where
    I: IntoIterator<Item = (Option<DateTime<Utc>>, f64)>,
{
    let mut buckets: Vec<TrendBucket> = axis
        .dates()
        .into_iter()
        .map(|date| TrendBucket {
            date,
            count: 0,
            sum: 0.0,
        })
        .collect();
    let mut excluded = 0usize;

    for (timestamp, value) in events {
        let Some(timestamp) = timestamp else {
            excluded += 1;
            continue;
        };
        if let Some(idx) = axis.index_of(timestamp.date_naive()) {
            let bucket = &mut buckets[idx];
            bucket.count += 1;
            if value.is_finite() {
                bucket.sum += value;
            }
        }
    }

    TrendSeries {
        name: name.into(),
        buckets,
        excluded,
    }
}

/// 只计数的便捷入口
pub fn count_by_day<I>(name: impl Into<String>, timestamps: I, axis: DayAxis) -> TrendSeries
where
    I: IntoIterator<Item = Option<DateTime<Utc>>>,
{
    bucketize(name, timestamps.into_iter().map(|ts| (ts, 1.0)), axis)
}

/// 把独立分桶的序列组装到同一日期轴
pub fn panel(axis: DayAxis, series: Vec<TrendSeries>) -> TrendPanel {
    TrendPanel {
        axis: axis.dates(),
        series,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap())
    }

    #[test]
    fn test_empty_input_zero_filled() {
        let axis = DayAxis::ending(date(2025, 1, 10), 30).unwrap();
        let series = count_by_day(
            "activities",
            std::iter::empty::<Option<DateTime<Utc>>>(),
            axis,
        );
        assert_eq!(series.buckets.len(), 30);
        assert!(series.buckets.iter().all(|b| b.count == 0));
        assert_eq!(series.buckets.last().unwrap().date, date(2025, 1, 10));
        assert_eq!(series.buckets.first().unwrap().date, date(2024, 12, 12));
        assert!(series.buckets.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn test_events_land_on_their_day() {
        let axis = DayAxis::ending(date(2025, 1, 10), 30).unwrap();
        let series = count_by_day(
            "recognitions",
            vec![at(2025, 1, 5, 0), at(2025, 1, 5, 23)],
            axis,
        );
        assert_eq!(series.bucket(date(2025, 1, 5)).unwrap().count, 2);
        assert_eq!(series.total_count(), 2);
    }

    #[test]
    fn test_out_of_window_and_missing_timestamps() {
        let axis = DayAxis::ending(date(2025, 1, 10), 7).unwrap();
        let series = count_by_day(
            "x",
            vec![at(2025, 1, 3, 12), at(2025, 1, 11, 0), None, at(2025, 1, 4, 0)],
            axis,
        );
        assert_eq!(series.total_count(), 1);
        assert_eq!(series.bucket(date(2025, 1, 4)).unwrap().count, 1);
        assert_eq!(series.excluded, 1);
    }

    #[test]
    fn test_sum_accumulates_values() {
        let axis = DayAxis::ending(date(2025, 3, 2), 3).unwrap();
        let series = bucketize(
            "points",
            vec![(at(2025, 3, 1, 8), 25.0), (at(2025, 3, 1, 9), 15.0), (at(2025, 3, 2, 1), 5.0)],
            axis,
        );
        let sums: Vec<f64> = series.buckets.iter().map(|b| b.sum).collect();
        assert_eq!(sums, vec![0.0, 40.0, 5.0]);
        assert_eq!(series.total_sum(), 45.0);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let axis = DayAxis::ending(date(2025, 1, 10), 10).unwrap();
        let events = vec![at(2025, 1, 9, 1), at(2025, 1, 2, 1), at(2025, 1, 9, 5)];
        let mut reversed = events.clone();
        reversed.reverse();
        assert_eq!(
            count_by_day("a", events, axis),
            count_by_day("a", reversed, axis)
        );
    }

    #[test]
    fn test_zero_days_and_single_day() {
        let empty = count_by_day("a", vec![at(2025, 1, 1, 0)], DayAxis::ending(date(2025, 1, 1), 0).unwrap());
        assert!(empty.buckets.is_empty());

        let one = count_by_day("a", vec![at(2025, 1, 1, 0)], DayAxis::ending(date(2025, 1, 1), 1).unwrap());
        assert_eq!(one.buckets.len(), 1);
        assert_eq!(one.buckets[0].count, 1);
    }

    #[test]
    fn test_panel_shares_axis() {
        let axis = DayAxis::ending(date(2025, 2, 28), 5).unwrap();
        let a = count_by_day("activities", vec![at(2025, 2, 27, 0)], axis);
        let b = count_by_day("recognitions", Vec::<Option<DateTime<Utc>>>::new(), axis);
        let panel = panel(axis, vec![a, b]);
        assert_eq!(panel.axis.len(), 5);
        for series in &panel.series {
            let dates: Vec<_> = series.buckets.iter().map(|b| b.date).collect();
            assert_eq!(dates, panel.axis);
        }
        assert_eq!(
            panel.series("activities").unwrap().bucket(date(2025, 2, 27)).unwrap().count,
            1
        );
    }

    #[test]
    fn test_window_before_earliest_date_is_rejected() {
        let err = DayAxis::ending(date(2025, 1, 10), u32::MAX).unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");

        let edge = DayAxis::ending(NaiveDate::MIN, 1).unwrap();
        assert_eq!(edge.dates(), vec![NaiveDate::MIN]);
        assert!(DayAxis::ending(NaiveDate::MIN, 2).is_err());
    }
}
