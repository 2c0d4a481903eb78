//! 🏎️ How fast can we replay a history? Fast enough to rebuild before the coffee's done, hopefully.

use std::hint::black_box;

use chrono::{Duration, TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use dgx::aggregator::DecrementDay;
use dgx::bucket_key::DayClock;
use dgx::common::{Diagnostic, Report};
use dgx::rebuild::replay;

criterion_group!(benches, entrypoint);
criterion_main!(benches);

// 🎲 a cheap deterministic shuffle so the history looks lived-in without pulling in rand
fn synthetic_history(reports: usize, sessions: usize) -> Vec<Report> {
    let start = Utc.with_ymd_and_hms(2020, 3, 1, 0, 0, 0).single().unwrap_or_default();
    (0..reports)
        .map(|n| {
            let session = (n * 7919) % sessions;
            Report {
                locator: format!("{}", 1000 + (n * 31 + session) % 50),
                session_id: format!("s{session}"),
                diagnostic: Diagnostic(((n / sessions + session) % 5) as u8),
                symptoms: serde_json::Value::Null,
                timestamp: start + Duration::minutes(n as i64),
                trust_score: 0.9,
            }
        })
        .collect()
}

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");

    for reports in [10_000usize, 100_000] {
        let history = synthetic_history(reports, reports / 10);
        group.throughput(Throughput::Elements(reports as u64));
        for keying in [DecrementDay::Report, DecrementDay::Prior] {
            group.bench_with_input(BenchmarkId::new(format!("{keying:?}"), reports), &history, |b, history| {
                b.iter(|| black_box(replay(DayClock::utc(), keying, history)));
            });
        }
    }

    group.finish();
}
