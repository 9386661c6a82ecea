//! Benchmarks for the hot set-algebra paths.
//!
//! The history differ and follower comparisons must stay O(n) at the
//! scale of real exports (thousands of usernames per side).

use chrono::{TimeZone, Utc};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::collections::HashSet;
use tka::history::{ExportSnapshot, analyze};

const SIDE_SIZE: usize = 3_500;

fn username_set(offset: usize, count: usize) -> HashSet<String> {
    (offset..offset + count).map(|i| format!("user_{i:05}")).collect()
}

fn snapshot(source: &str, day: u32, followers: HashSet<String>) -> ExportSnapshot {
    ExportSnapshot {
        source: source.to_string(),
        date: Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).single().unwrap(),
        following: followers.iter().take(SIDE_SIZE / 2).cloned().collect(),
        followers,
    }
}

fn bench_history_analyze(c: &mut Criterion) {
    // ~10% churn between consecutive exports.
    let exports = vec![
        snapshot("export1.json", 1, username_set(0, SIDE_SIZE)),
        snapshot("export2.json", 8, username_set(350, SIDE_SIZE)),
        snapshot("export3.json", 15, username_set(700, SIDE_SIZE)),
        snapshot("export4.json", 22, username_set(1050, SIDE_SIZE)),
    ];

    c.bench_function("history_analyze_4x3500", |b| {
        b.iter(|| analyze(black_box(&exports)));
    });
}

fn bench_set_algebra(c: &mut Criterion) {
    let followers = username_set(0, SIDE_SIZE);
    let following = username_set(SIDE_SIZE / 2, SIDE_SIZE);

    c.bench_function("mutuals_3500_per_side", |b| {
        b.iter(|| {
            let mutuals: HashSet<&String> =
                black_box(&followers).intersection(black_box(&following)).collect();
            black_box(mutuals.len())
        });
    });
}

criterion_group!(benches, bench_history_analyze, bench_set_algebra);
criterion_main!(benches);
