//! Benchmark tests for vidora-core operations
//!
//! Run with: cargo bench -p vidora-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use vidora_core::quality::label_for;
use vidora_core::resume_url;
use vidora_core::types::*;

// ============================================================================
// Helpers
// ============================================================================

fn create_record(n: i64) -> ProgressRecord {
    ProgressRecord {
        video_id: format!("video-{}", n),
        current_time_seconds: n as f64 * 3.5,
        duration_seconds: 1800.0,
        title: format!("Episode {}", n),
        thumbnail_url: format!("https://cdn.example.com/thumbs/{}.jpg", n),
        source_url: format!("https://cdn.example.com/hls/{}/index.m3u8", n),
        last_watched_at_epoch_ms: 1_760_000_000_000 + n,
        ended: false,
    }
}

// ============================================================================
// Resume URL
// ============================================================================

fn bench_resume_url(c: &mut Criterion) {
    let mut group = c.benchmark_group("Resume URL");

    group.bench_function("encode", |b| {
        b.iter(|| {
            black_box(resume_url::encode(
                black_box("https://cdn.example.com/hls/42/index.m3u8?token=abc"),
                black_box(1234.5),
            ))
        });
    });

    group.bench_function("decode_parsed", |b| {
        b.iter(|| {
            black_box(resume_url::decode(black_box(
                "https://cdn.example.com/v.m3u8?startTime=10&x=1&startTime=42.5",
            )))
        });
    });

    group.bench_function("decode_regex_fallback", |b| {
        b.iter(|| {
            black_box(resume_url::decode(black_box(
                "/relative/v.m3u8?startTime=10&startTime=42.5",
            )))
        });
    });

    group.bench_function("strip_query", |b| {
        b.iter(|| {
            black_box(resume_url::strip_query(black_box(
                "https://cdn.example.com/v.m3u8?startTime=42&token=abc",
            )))
        });
    });

    group.finish();
}

// ============================================================================
// Continue Watching
// ============================================================================

fn bench_continue_watching(c: &mut Criterion) {
    let mut group = c.benchmark_group("Continue Watching");

    for count in [10i64, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("upsert", count), &count, |b, &count| {
            b.iter(|| {
                let mut list = ContinueWatchingList::new();
                for n in 0..count {
                    list.upsert(create_record(n % 15), 10);
                }
                black_box(list.len())
            });
        });

        group.bench_with_input(BenchmarkId::new("from_records", count), &count, |b, &count| {
            let records: Vec<_> = (0..count).rev().map(create_record).collect();
            b.iter(|| black_box(ContinueWatchingList::from_records(records.clone()).len()));
        });
    }

    group.bench_function("serialize_full_list", |b| {
        let list = ContinueWatchingList::from_records((0..10).map(create_record).collect());
        b.iter(|| black_box(serde_json::to_string(&list).unwrap_or_default()));
    });

    group.finish();
}

// ============================================================================
// Types
// ============================================================================

fn bench_types(c: &mut Criterion) {
    let mut group = c.benchmark_group("Types");

    group.bench_function("ControllerState::can_transition_to", |b| {
        let states = [
            ControllerState::Uninitialized,
            ControllerState::AwaitingDom,
            ControllerState::Ready,
            ControllerState::Disposed,
        ];
        b.iter(|| {
            let mut valid_count = 0u32;
            for from in &states {
                for to in &states {
                    if from.can_transition_to(*to) {
                        valid_count += 1;
                    }
                }
            }
            black_box(valid_count)
        });
    });

    group.bench_function("label_for", |b| {
        let tiers: Vec<QualityTier> = [None, Some(240), Some(480), Some(720), Some(1080), Some(2160)]
            .into_iter()
            .enumerate()
            .map(|(index, height)| QualityTier {
                index,
                height,
                bandwidth_bps: None,
                enabled: false,
            })
            .collect();
        b.iter(|| {
            for tier in &tiers {
                black_box(label_for(tier));
            }
        });
    });

    group.bench_function("format_timestamp", |b| {
        b.iter(|| black_box(format_timestamp(black_box(3725.4))));
    });

    group.finish();
}

criterion_group!(resume_benches, bench_resume_url);

criterion_group!(store_benches, bench_continue_watching);

criterion_group!(type_benches, bench_types);

criterion_main!(resume_benches, store_benches, type_benches);
