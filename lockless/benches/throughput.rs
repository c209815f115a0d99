use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use criterion::{Criterion, criterion_group, criterion_main};
use lockless::Queue;

// (producers, consumers)
const MIXES: &[(usize, usize)] = &[(1, 1), (1, 4), (4, 1), (4, 4)];
const BATCH: usize = 256;

/// Runs `producers` threads appending `iters` items in total while
/// `consumers` threads drain them, and returns the elapsed time.
fn bench_mpmc(iters: usize, producers: usize, consumers: usize, blocking: bool) -> Duration {
    let queue = &Queue::new();
    let consumed = &AtomicUsize::new(0);
    let per_producer = iters.div_ceil(producers);
    let total = per_producer * producers;

    let now = Instant::now();
    std::thread::scope(|cx| {
        for _ in 0..producers {
            cx.spawn(move || {
                for i in 0..per_producer {
                    queue.produce(i);
                }
            });
        }
        for _ in 0..consumers {
            cx.spawn(move || {
                while consumed.load(Ordering::Relaxed) < total {
                    match queue.consume(blocking) {
                        Some(i) => {
                            std::hint::black_box(i);
                            consumed.fetch_add(1, Ordering::Relaxed);
                        },
                        None if blocking => break,
                        None => std::thread::yield_now(),
                    }
                }
            });
        }
        while consumed.load(Ordering::Relaxed) < total {
            std::thread::yield_now();
        }
        // Release consumers still blocked on an empty queue.
        queue.close();
    });
    now.elapsed()
}

fn groups(c: &mut Criterion) {
    let mut g = c.benchmark_group("throughput");
    for (producers, consumers) in MIXES.iter().copied() {
        for blocking in [false, true] {
            let mode = if blocking { "blocking" } else { "polling" };
            let id = format!("mpmc_{producers}p{consumers}c_{mode}");
            g.bench_function(&id, |b| {
                b.iter_custom(|iters| {
                    // Appends scan from the front, keep the queue short.
                    let mut elapsed = Duration::ZERO;
                    let mut left = iters as usize;
                    while left > 0 {
                        let n = left.min(BATCH);
                        elapsed += bench_mpmc(n, producers, consumers, blocking);
                        left -= n;
                    }
                    elapsed
                })
            });
        }
    }
}

criterion_group!(
    name = throughput;
    config = Criterion::default().sample_size(20).measurement_time(Duration::from_secs(10));
    targets = groups
);
criterion_main!(throughput);
