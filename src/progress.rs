//! Progress reporting for whole-archive decompilation and indexing.
//!
//! Counters are per worker to avoid contention; snapshots aggregate them.
//! Every user callback is fire-and-forget: a panicking callback is logged and
//! dropped, never propagated into the job that reported progress.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Per-worker counters.
#[derive(Default)]
pub struct WorkerMetrics {
    classes_processed: AtomicU64,
    classes_decompiled: AtomicU64,
}

impl WorkerMetrics {
    pub fn record(&self, decompiled: bool) {
        self.classes_processed.fetch_add(1, Ordering::Relaxed);
        if decompiled {
            self.classes_decompiled.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn processed(&self) -> u64 {
        self.classes_processed.load(Ordering::Relaxed)
    }

    pub fn decompiled(&self) -> u64 {
        self.classes_decompiled.load(Ordering::Relaxed)
    }
}

/// Aggregated progress of one whole-archive job.
#[derive(Debug, Clone)]
pub struct ProgressState {
    pub total_classes: u64,
    pub processed_classes: u64,
    /// Processed classes that needed the engine (the rest were cache hits).
    pub decompiled_classes: u64,
    pub elapsed_time: Duration,
    pub classes_per_sec: f32,
    pub progress_percent: f32,
}

impl ProgressState {
    pub fn estimated_time_remaining(&self) -> Duration {
        if self.classes_per_sec <= 0.0 {
            return Duration::from_secs(0);
        }
        let remaining = self.total_classes.saturating_sub(self.processed_classes) as f32;
        Duration::from_secs_f32((remaining / self.classes_per_sec).max(0.0))
    }
}

pub type ProgressCallback = dyn Fn(ProgressState) + Send + Sync;
pub type ClassCallback = dyn Fn(&str) + Send + Sync;
pub type PercentCallback = dyn Fn(u8) + Send + Sync;

/// Run a user callback, swallowing (and logging) a panic.
pub fn fire(what: &str, callback: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        tracing::warn!("{what} callback panicked; update dropped");
    }
}

/// Progress tracker for one whole-archive job.
pub struct ProgressTracker {
    metrics: Vec<Arc<WorkerMetrics>>,
    total_classes: AtomicU64,
    start_time: Instant,
    last_emit_time: Mutex<Instant>,
    emit_interval: Duration,
    callback: Option<Arc<ProgressCallback>>,
    class_callback: Option<Arc<ClassCallback>>,
}

impl ProgressTracker {
    pub fn new(workers: usize, emit_interval: Duration) -> Self {
        ProgressTracker {
            metrics: (0..workers.max(1)).map(|_| Arc::new(WorkerMetrics::default())).collect(),
            total_classes: AtomicU64::new(0),
            start_time: Instant::now(),
            last_emit_time: Mutex::new(Instant::now()),
            emit_interval,
            callback: None,
            class_callback: None,
        }
    }

    pub fn with_callback(mut self, callback: Arc<ProgressCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_class_callback(mut self, callback: Arc<ClassCallback>) -> Self {
        self.class_callback = Some(callback);
        self
    }

    pub fn set_total(&self, classes: u64) {
        self.total_classes.store(classes, Ordering::Relaxed);
    }

    /// Record one processed class for `worker` and report its name.
    pub fn record_class(&self, worker: usize, name: &str, decompiled: bool) {
        if let Some(m) = self.metrics.get(worker % self.metrics.len()) {
            m.record(decompiled);
        }
        if let Some(cb) = &self.class_callback {
            fire("class progress", || cb(name));
        }
        self.maybe_emit();
    }

    fn maybe_emit(&self) {
        if self.callback.is_none() {
            return;
        }
        let now = Instant::now();
        let due = {
            let mut last = self.last_emit_time.lock().unwrap_or_else(PoisonError::into_inner);
            if now.duration_since(*last) >= self.emit_interval {
                *last = now;
                true
            } else {
                false
            }
        };
        if due {
            self.emit();
        }
    }

    pub fn emit(&self) {
        if let Some(cb) = &self.callback {
            let state = self.state();
            fire("progress", || cb(state));
        }
    }

    /// Emit a final update. Cancelled jobs report what they actually did.
    pub fn finish(&self) {
        self.emit();
    }

    pub fn state(&self) -> ProgressState {
        let (processed_classes, decompiled_classes) =
            self.metrics.iter().fold((0, 0), |(p, d), m| (p + m.processed(), d + m.decompiled()));
        let total_classes = self.total_classes.load(Ordering::Relaxed);
        let elapsed_time = self.start_time.elapsed();
        let classes_per_sec = if elapsed_time.as_secs_f32() > 0.0 {
            processed_classes as f32 / elapsed_time.as_secs_f32()
        } else {
            0.0
        };
        let progress_percent = if total_classes > 0 {
            (processed_classes as f32 / total_classes as f32 * 100.0).min(100.0)
        } else {
            100.0
        };
        ProgressState {
            total_classes,
            processed_classes,
            decompiled_classes,
            elapsed_time,
            classes_per_sec,
            progress_percent,
        }
    }
}

/// 0-100 percentage stream; each value is emitted at most once.
pub struct PercentReporter {
    total: usize,
    done: AtomicUsize,
    /// highest percentage emitted so far, plus one (0 = nothing yet)
    emitted: AtomicUsize,
    callback: Option<Arc<PercentCallback>>,
}

impl PercentReporter {
    pub fn new(total: usize, callback: Option<Arc<PercentCallback>>) -> Self {
        PercentReporter { total, done: AtomicUsize::new(0), emitted: AtomicUsize::new(0), callback }
    }

    pub fn advance(&self, n: usize) {
        let done = self.done.fetch_add(n, Ordering::AcqRel) + n;
        let percent = if self.total == 0 { 100 } else { (done.min(self.total) * 100 / self.total) as u8 };
        self.report(percent);
    }

    pub fn finish(&self) {
        self.report(100);
    }

    fn report(&self, percent: u8) {
        let previous = self.emitted.fetch_max(percent as usize + 1, Ordering::AcqRel);
        if previous > percent as usize {
            return;
        }
        if let Some(cb) = &self.callback {
            fire("indexing progress", || cb(percent));
        }
    }
}
