use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use jarlens::BatchClaim;

const ITEMS: usize = 100_000;

fn drain_with_claims(workers: usize, batch: usize) -> usize {
    let claim = Arc::new(BatchClaim::new(ITEMS, batch));
    let seen = Arc::new(AtomicUsize::new(0));
    thread::scope(|s| {
        for _ in 0..workers {
            let claim = Arc::clone(&claim);
            let seen = Arc::clone(&seen);
            s.spawn(move || {
                while let Some(range) = claim.claim() {
                    seen.fetch_add(black_box(range.len()), Ordering::Relaxed);
                }
            });
        }
    });
    seen.load(Ordering::Relaxed)
}

/// The lock-guarded queue alternative, for comparison.
fn drain_with_mutex(workers: usize, batch: usize) -> usize {
    let next = Arc::new(Mutex::new(0usize));
    let seen = Arc::new(AtomicUsize::new(0));
    thread::scope(|s| {
        for _ in 0..workers {
            let next = Arc::clone(&next);
            let seen = Arc::clone(&seen);
            s.spawn(move || loop {
                let range = {
                    let mut n = next.lock().unwrap();
                    if *n >= ITEMS {
                        break;
                    }
                    let start = *n;
                    *n = (start + batch).min(ITEMS);
                    start..*n
                };
                seen.fetch_add(black_box(range.len()), Ordering::Relaxed);
            });
        }
    });
    seen.load(Ordering::Relaxed)
}

fn bench_batch_claim(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_claim");
    group.throughput(Throughput::Elements(ITEMS as u64));
    for &(workers, batch) in &[(4, 1), (4, 25), (8, 25), (8, 100)] {
        let id = format!("{workers}w_{batch}b");
        group.bench_with_input(BenchmarkId::new("atomic", &id), &(workers, batch), |b, &(w, n)| {
            b.iter(|| assert_eq!(drain_with_claims(w, n), ITEMS))
        });
        group.bench_with_input(BenchmarkId::new("mutex", &id), &(workers, batch), |b, &(w, n)| {
            b.iter(|| assert_eq!(drain_with_mutex(w, n), ITEMS))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_batch_claim);
criterion_main!(benches);
