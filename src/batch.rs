//! Batch work distribution for whole-archive jobs.
//!
//! Workers share one counter and claim contiguous ranges with a single
//! fetch-and-add, so ranges are disjoint without a lock. Cancellation pushes
//! the counter to the end: batches already claimed finish, no new ones start.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::archive::ArchiveView;
use crate::error::Result;
use crate::pool::WorkerPool;
use crate::progress::{ClassCallback, ProgressCallback, ProgressTracker};

/// Default batch size of a whole-archive job.
pub const DEFAULT_SPLITS: usize = 100;

/// Shared claim counter over `total` items.
#[derive(Debug)]
pub struct BatchClaim {
    next: AtomicUsize,
    total: usize,
    batch_size: usize,
}

impl BatchClaim {
    pub fn new(total: usize, batch_size: usize) -> Self {
        BatchClaim { next: AtomicUsize::new(0), total, batch_size: batch_size.max(1) }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Claim the next range, or `None` once the counter reached the end.
    pub fn claim(&self) -> Option<Range<usize>> {
        let start = self.next.fetch_add(self.batch_size, Ordering::SeqCst);
        if start >= self.total {
            return None;
        }
        Some(start..(start + self.batch_size).min(self.total))
    }

    /// Stop handing out ranges.
    pub fn stop(&self) {
        self.next.fetch_max(self.total, Ordering::SeqCst);
    }

    pub fn is_exhausted(&self) -> bool {
        self.next.load(Ordering::SeqCst) >= self.total
    }

    /// Items handed out so far.
    pub fn claimed(&self) -> usize {
        self.next.load(Ordering::SeqCst).min(self.total)
    }
}

/// Cancels a running [`WholeArchiveJob`] from another thread.
#[derive(Clone)]
pub struct StopHandle {
    claim: Arc<BatchClaim>,
}

impl StopHandle {
    pub fn stop(&self) {
        tracing::info!(claimed = self.claim.claimed(), total = self.claim.total(), "whole-archive job stop requested");
        self.claim.stop();
    }
}

#[derive(Clone)]
pub struct JobOptions {
    /// Classes per claimed batch.
    pub splits: usize,
    /// Workers to drive; `None` uses the pool's ceiling.
    pub workers: Option<usize>,
    /// Tear the pool down when the job ends.
    pub teardown_after: bool,
    pub on_class: Option<Arc<ClassCallback>>,
    pub on_progress: Option<Arc<ProgressCallback>>,
}

impl Default for JobOptions {
    fn default() -> Self {
        JobOptions { splits: DEFAULT_SPLITS, workers: None, teardown_after: true, on_class: None, on_progress: None }
    }
}

/// Decompile every top-level class of an archive into the cache.
pub struct WholeArchiveJob {
    pool: Arc<WorkerPool>,
    archive: Arc<dyn ArchiveView>,
    names: Vec<String>,
    claim: Arc<BatchClaim>,
    tracker: Arc<ProgressTracker>,
    workers: usize,
    teardown_after: bool,
}

impl WholeArchiveJob {
    pub fn new(pool: Arc<WorkerPool>, archive: Arc<dyn ArchiveView>, options: JobOptions) -> Self {
        let names = archive.top_level_names();
        let workers = options.workers.unwrap_or(pool.ceiling()).clamp(1, pool.ceiling());
        let claim = Arc::new(BatchClaim::new(names.len(), options.splits));

        let mut tracker = ProgressTracker::new(workers, Duration::from_millis(100));
        if let Some(cb) = options.on_class {
            tracker = tracker.with_class_callback(cb);
        }
        if let Some(cb) = options.on_progress {
            tracker = tracker.with_callback(cb);
        }
        tracker.set_total(names.len() as u64);

        WholeArchiveJob {
            pool,
            archive,
            names,
            claim,
            tracker: Arc::new(tracker),
            workers,
            teardown_after: options.teardown_after,
        }
    }

    pub fn total(&self) -> usize {
        self.names.len()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle { claim: Arc::clone(&self.claim) }
    }

    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Run to completion (or until stopped). Returns the number of classes
    /// newly decompiled; cache hits are not counted. Cancellation is not an
    /// error.
    pub fn start(&self) -> Result<usize> {
        let started = Instant::now();
        let pool = Arc::clone(&self.pool);
        let teardown_after = self.teardown_after;
        let _teardown = scopeguard::guard((), move |_| {
            if teardown_after {
                pool.teardown();
            }
        });

        self.pool.ensure(self.workers)?;
        let workers: Vec<_> = self.pool.workers().into_iter().take(self.workers).collect();
        tracing::info!(classes = self.names.len(), workers = workers.len(), splits = self.claim.batch_size(), "whole-archive job started");

        let decompiled = thread::scope(|s| {
            let handles: Vec<_> = workers
                .iter()
                .map(|worker| {
                    s.spawn(move || {
                        let mut count = 0;
                        while let Some(range) = self.claim.claim() {
                            match worker.decompile_batch(&self.archive, &self.names[range.clone()], &self.tracker) {
                                Ok(n) => count += n,
                                Err(e) => {
                                    tracing::error!(worker = worker.id(), ?range, "batch failed: {e}");
                                }
                            }
                        }
                        count
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(n) => n,
                    Err(payload) => {
                        tracing::error!("job thread panicked: {}", crate::scheduler::panic_message(payload.as_ref()));
                        0
                    }
                })
                .sum::<usize>()
        });

        self.tracker.finish();
        let state = self.tracker.state();
        tracing::info!(
            decompiled,
            processed = state.processed_classes,
            total = self.names.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "whole-archive job finished"
        );
        Ok(decompiled)
    }
}
