//! Worker pool manager.
//!
//! Workers are created lazily up to a thread ceiling and never shrink except
//! through an explicit teardown. Single-class requests go to the least busy
//! worker; option changes are propagated to every worker through a one-shot
//! gate so the store is written once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::cache::ResultCache;
use crate::common::DecompilerOptions;
use crate::engine::EngineFactory;
use crate::error::Result;
use crate::worker::{DecompileWorker, OptionGate};

pub struct WorkerPool {
    factory: Arc<dyn EngineFactory>,
    cache: Arc<ResultCache>,
    ceiling: usize,
    prefer_native: AtomicBool,
    workers: RwLock<Vec<Arc<DecompileWorker>>>,
}

impl WorkerPool {
    pub fn new(factory: Arc<dyn EngineFactory>, cache: Arc<ResultCache>, ceiling: usize, prefer_native: bool) -> Self {
        WorkerPool {
            factory,
            cache,
            ceiling: ceiling.max(1),
            prefer_native: AtomicBool::new(prefer_native),
            workers: RwLock::new(Vec::new()),
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn len(&self) -> usize {
        self.workers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn prefer_native(&self) -> bool {
        self.prefer_native.load(Ordering::SeqCst)
    }

    /// Current workers, in creation order.
    pub fn workers(&self) -> Vec<Arc<DecompileWorker>> {
        self.workers.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn spawn_worker(&self, id: usize) -> Result<Arc<DecompileWorker>> {
        let worker = DecompileWorker::spawn(id, self.factory.as_ref(), self.prefer_native(), Arc::clone(&self.cache))?;
        Ok(Arc::new(worker))
    }

    /// Grow the pool to `min(n, ceiling)` workers. Returns the pool size.
    pub fn ensure(&self, n: usize) -> Result<usize> {
        let target = n.min(self.ceiling);
        let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);
        while workers.len() < target {
            let worker = self.spawn_worker(workers.len())?;
            workers.push(worker);
            tracing::info!(workers = workers.len(), ceiling = self.ceiling, "decompile pool grew");
        }
        Ok(workers.len())
    }

    /// The worker with the fewest outstanding requests, earliest on ties.
    /// When every worker is busy and the ceiling allows, a new worker is
    /// created and returned instead.
    pub fn pick_worker(&self) -> Result<Arc<DecompileWorker>> {
        {
            let workers = self.workers.read().unwrap_or_else(PoisonError::into_inner);
            // min_by_key keeps the last minimum; scan by hand to keep the first.
            let mut best: Option<(&Arc<DecompileWorker>, usize)> = None;
            for w in workers.iter() {
                let pending = w.pending_count();
                if best.map_or(true, |(_, p)| pending < p) {
                    best = Some((w, pending));
                }
            }
            match best {
                Some((w, 0)) => return Ok(Arc::clone(w)),
                Some((w, _)) if workers.len() >= self.ceiling => return Ok(Arc::clone(w)),
                _ => {}
            }
        }

        let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);
        if workers.len() < self.ceiling {
            let worker = self.spawn_worker(workers.len())?;
            workers.push(Arc::clone(&worker));
            tracing::info!(workers = workers.len(), ceiling = self.ceiling, "decompile pool grew");
            return Ok(worker);
        }
        // Another caller filled the pool meanwhile.
        let mut best = Arc::clone(&workers[0]);
        for w in workers.iter().skip(1) {
            if w.pending_count() < best.pending_count() {
                best = Arc::clone(w);
            }
        }
        Ok(best)
    }

    /// Propagate an option set to every worker. With no workers yet the
    /// cache is updated directly. Returns whether the cache was invalidated.
    pub fn set_options(&self, options: &DecompilerOptions) -> Result<bool> {
        let workers = self.workers();
        if workers.is_empty() {
            return self.cache.set_options(options);
        }
        let gate = OptionGate::new();
        let pending: Vec<_> = workers.iter().map(|w| w.apply_options(options.clone(), Arc::clone(&gate))).collect();
        let mut invalidated = false;
        let mut first_error = None;
        for p in pending {
            match p.wait() {
                Ok(changed) => invalidated |= changed,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(invalidated),
        }
    }

    /// Switch engine variant preference. Engines cannot be swapped in place,
    /// so the whole pool is torn down and recreated at its previous size.
    pub fn set_runtime_preference(&self, prefer_native: bool) -> Result<()> {
        if self.prefer_native.swap(prefer_native, Ordering::SeqCst) == prefer_native {
            return Ok(());
        }
        let size = self.teardown();
        tracing::info!(prefer_native, workers = size, "engine preference changed; recreating pool");
        self.ensure(size)?;
        Ok(())
    }

    /// Purge the result cache through one worker. Returns the purged count.
    pub fn delete_cache(&self) -> Result<usize> {
        self.pick_worker()?.clear_cache().wait()
    }

    /// Drop every worker; threads exit once their queues drain. Returns how
    /// many workers there were.
    pub fn teardown(&self) -> usize {
        let old = std::mem::take(&mut *self.workers.write().unwrap_or_else(PoisonError::into_inner));
        let n = old.len();
        if n > 0 {
            tracing::debug!(workers = n, "decompile pool torn down");
        }
        n
    }
}
