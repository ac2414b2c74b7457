//! 聚合计算性能基准测试
//!
//! 测试覆盖：
//! - Pearson 相关系数在不同样本量下的性能
//! - 排行榜构建与名次查询
//! - 趋势分桶与分布计数

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use engagement_analytics::compute::{
    BucketSpec, DayAxis, Leaderboard, ScoredEntry, bucketed, bucketize, categorical, pearson,
};
use std::hint::black_box;

const SIZES: [usize; 4] = [100, 1_000, 10_000, 100_000];

/// 生成确定性的伪随机序列（线性同余）
fn pseudo_random(n: usize, seed: u64) -> Vec<f64> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as f64 / (1u64 << 31) as f64
        })
        .collect()
}

/// 创建排行榜人口，每 10 人一组同分以覆盖并列排序
fn create_population(n: usize) -> Vec<ScoredEntry> {
    (0..n)
        .map(|i| ScoredEntry::new(format!("user{:06}@example.com", i), ((i / 10) * 7 % 1000) as f64))
        .collect()
}

// ============================================================================
// 基准测试函数
// ============================================================================

/// 相关系数基准
fn bench_pearson(c: &mut Criterion) {
    let mut group = c.benchmark_group("pearson");

    for size in SIZES.iter() {
        let xs = pseudo_random(*size, 1);
        let ys = pseudo_random(*size, 2);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(pearson(black_box(&xs), black_box(&ys))))
        });
    }

    group.finish();
}

/// 排行榜构建与查询基准
fn bench_leaderboard(c: &mut Criterion) {
    let mut group = c.benchmark_group("leaderboard");

    for size in SIZES.iter() {
        let population = create_population(*size);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("build", size), size, |b, _| {
            b.iter(|| black_box(Leaderboard::build(black_box(population.clone()))))
        });
    }

    let board = Leaderboard::build(create_population(10_000));
    group.bench_function("rank_of", |b| {
        let mut i = 0;
        b.iter(|| {
            let user_id = format!("user{:06}@example.com", i % 10_000);
            let rank = board.rank_of(black_box(&user_id));
            i += 1;
            black_box(rank)
        })
    });
    group.bench_function("nearby", |b| {
        b.iter(|| black_box(board.nearby(black_box("user005000@example.com"), 3).entries.len()))
    });

    group.finish();
}

/// 趋势分桶基准
fn bench_trend(c: &mut Criterion) {
    let mut group = c.benchmark_group("trend_bucketize");
    let today = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
    let start = Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap();

    for size in SIZES.iter() {
        let offsets = pseudo_random(*size, 3);
        let events: Vec<_> = offsets
            .iter()
            .map(|o| (Some(start + Duration::minutes((o * 60.0 * 24.0 * 60.0) as i64)), 1.0))
            .collect();

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let axis = DayAxis::ending(today, 30).unwrap();
                black_box(bucketize("events", events.iter().copied(), axis))
            })
        });
    }

    group.finish();
}

/// 分布计数基准
fn bench_distribution(c: &mut Criterion) {
    let mut group = c.benchmark_group("distribution");
    let spec = BucketSpec::points_ranges();
    let tiers = ["bronze", "silver", "gold", "platinum", "diamond"];

    for size in SIZES.iter() {
        let values: Vec<Option<f64>> = pseudo_random(*size, 4)
            .into_iter()
            .map(|v| Some(v * 3000.0))
            .collect();
        let tags: Vec<Option<&str>> = (0..*size).map(|i| Some(tiers[i % tiers.len()])).collect();

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("buckets", size), size, |b, _| {
            b.iter(|| black_box(bucketed(values.iter().copied(), &spec)))
        });
        group.bench_with_input(BenchmarkId::new("categorical", size), size, |b, _| {
            b.iter(|| black_box(categorical(tags.iter().copied())))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_pearson,
    bench_leaderboard,
    bench_trend,
    bench_distribution,
);
criterion_main!(benches);
