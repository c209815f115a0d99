use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use anyhow::{Result, ensure};
use argh::FromArgs;
use lockless::Queue;

#[derive(Debug, FromArgs)]
/// Measure producers and consumers of a lock-free queue
#[argh(help_triggers("--help"))]
struct Args {
    /// minimum number of producer threads
    #[argh(option, default = "1")]
    min_threads: usize,
    /// maximum number of producer threads
    #[argh(option, default = "4")]
    max_threads: usize,
    /// minimum number of items per producer
    #[argh(option, default = "1000")]
    min_items: usize,
    /// maximum number of items per producer
    #[argh(option, default = "4000")]
    max_items: usize,
    /// increment of items per producer
    #[argh(option, default = "1000")]
    step: usize,
    /// number of consumer threads
    #[argh(option, default = "2")]
    consumers: usize,
    /// let consumers block on an empty queue
    #[argh(switch)]
    blocking: bool,
    /// the item sent by producers
    #[argh(option, default = "String::from(\"This is a test string:)\")")]
    payload: String,
}

impl Args {
    fn validate(&self) -> Result<()> {
        ensure!(self.min_threads > 0, "min-threads must not be zero");
        ensure!(self.consumers > 0, "consumers must not be zero");
        ensure!(self.step > 0, "step must not be zero");
        ensure!(
            self.min_threads <= self.max_threads,
            "min-threads must not exceed max-threads"
        );
        ensure!(
            self.min_items <= self.max_items,
            "min-items must not exceed max-items"
        );
        Ok(())
    }

    fn threads(&self) -> RangeInclusive<usize> {
        self.min_threads..=self.max_threads
    }

    fn items(&self) -> impl Iterator<Item = usize> {
        (self.min_items..=self.max_items).step_by(self.step)
    }
}

pub fn main() -> Result<()> {
    let args = argh::from_env::<Args>();
    tracing_subscriber::fmt()
        .with_thread_names(true)
        .without_time()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    args.validate()?;

    for items in args.items() {
        for threads in args.threads() {
            let now = Instant::now();
            let consumed = run(&args, threads, items);
            let elapsed = now.elapsed().as_millis();
            tracing::info!(
                "finished {threads} threads with {items} items, consumed={consumed}, elapsed={elapsed}ms"
            );
            ensure!(
                consumed == threads * items,
                "lost {} items",
                threads * items - consumed
            );
        }
    }

    Ok(())
}

/// Fills a new queue from `threads` producers, then drains it with the
/// configured consumers. Returns the number of consumed items.
fn run(args: &Args, threads: usize, items: usize) -> usize {
    let queue = &Queue::new();
    let consumed = &AtomicUsize::new(0);
    let total = threads * items;

    std::thread::scope(|cx| {
        for _ in 0..threads {
            cx.spawn(move || {
                for _ in 0..items {
                    queue.produce(args.payload.clone());
                }
            });
        }
    });
    tracing::debug!("produced {total} items");

    std::thread::scope(|cx| {
        for _ in 0..args.consumers {
            cx.spawn(move || {
                while let Some(item) = queue.consume(args.blocking) {
                    debug_assert_eq!(item, args.payload);
                    if consumed.fetch_add(1, Ordering::AcqRel) + 1 == total {
                        break;
                    }
                }
            });
        }
        if args.blocking {
            while consumed.load(Ordering::Acquire) < total {
                std::thread::yield_now();
            }
            // Release the consumers left waiting on the empty queue.
            queue.close();
        }
    });

    consumed.load(Ordering::Acquire)
}
