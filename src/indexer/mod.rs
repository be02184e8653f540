//! Class and reference index over one archive version.
//!
//! Indexing runs the same claim-a-batch loop as whole-archive decompilation
//! on a dedicated set of workers, each owning a [`PartialIndex`]. Queries
//! only see a fully built index: the first query triggers indexing and every
//! concurrent caller blocks until it finishes. A failed run resets the index
//! so the next query retries.

pub mod hierarchy;
pub mod reference;
pub mod visitor;

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use crate::archive::ArchiveView;
use crate::batch::BatchClaim;
use crate::error::{JarlensError, Result};
use crate::progress::{PercentCallback, PercentReporter};
use crate::scheduler::SequentialScheduler;

pub use hierarchy::{ClassDataEntry, ClassHierarchy, ClassKind};
pub use reference::{format_reference, format_reference_query, query_type, QueryType, ReferenceKey, ReferenceSite};
pub use visitor::PartialIndex;

pub const DEFAULT_INDEX_BATCH: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Idle,
    Indexing,
    Ready,
    Destroyed,
}

#[derive(Clone)]
pub struct IndexOptions {
    pub workers: usize,
    pub batch_size: usize,
    pub on_progress: Option<Arc<PercentCallback>>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        IndexOptions { workers: num_cpus::get(), batch_size: DEFAULT_INDEX_BATCH, on_progress: None }
    }
}

type IndexWorker = Arc<SequentialScheduler<PartialIndex>>;

pub struct JarIndex {
    archive: Arc<dyn ArchiveView>,
    options: IndexOptions,
    workers: Mutex<Vec<IndexWorker>>,
    state: Mutex<IndexState>,
    state_changed: Condvar,
    running: Mutex<Option<Arc<BatchClaim>>>,
    class_data: Mutex<Option<Arc<Vec<ClassDataEntry>>>>,
}

impl JarIndex {
    pub fn new(archive: Arc<dyn ArchiveView>, options: IndexOptions) -> Result<Self> {
        let count = options.workers.max(1);
        let mut workers = Vec::with_capacity(count);
        for i in 0..count {
            workers.push(Arc::new(SequentialScheduler::spawn(format!("index-{i}"), PartialIndex::default())?));
        }
        tracing::debug!(archive = archive.identity(), workers = count, "indexer created");
        Ok(JarIndex {
            archive,
            options,
            workers: Mutex::new(workers),
            state: Mutex::new(IndexState::Idle),
            state_changed: Condvar::new(),
            running: Mutex::new(None),
            class_data: Mutex::new(None),
        })
    }

    pub fn archive(&self) -> &Arc<dyn ArchiveView> {
        &self.archive
    }

    pub fn state(&self) -> IndexState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn workers(&self) -> Vec<IndexWorker> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Build the index unless it is already built. Blocks while another
    /// caller is building it.
    pub fn index(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            loop {
                match *state {
                    IndexState::Ready => return Ok(()),
                    IndexState::Destroyed => return Err(JarlensError::IndexDestroyed),
                    IndexState::Indexing => {
                        state = self.state_changed.wait(state).unwrap_or_else(PoisonError::into_inner);
                    }
                    IndexState::Idle => {
                        *state = IndexState::Indexing;
                        break;
                    }
                }
            }
        }

        let outcome = self.run();

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = match (*state, outcome) {
            (IndexState::Destroyed, _) => Err(JarlensError::IndexDestroyed),
            (_, Ok(())) => {
                *state = IndexState::Ready;
                Ok(())
            }
            (_, Err(e)) => {
                tracing::error!(archive = self.archive.identity(), "indexing failed: {e}");
                *state = IndexState::Idle;
                Err(e)
            }
        };
        self.state_changed.notify_all();
        outcome
    }

    fn run(&self) -> Result<()> {
        let started = Instant::now();
        let workers = self.workers();
        if workers.is_empty() {
            return Err(JarlensError::IndexDestroyed);
        }
        // A previous failed run may have left partial results behind.
        let resets: Vec<_> = workers
            .iter()
            .map(|w| {
                w.schedule(|part: &mut PartialIndex| {
                    *part = PartialIndex::default();
                    Ok(())
                })
            })
            .collect();
        for reset in resets {
            reset.wait()?;
        }

        let names = self.archive.class_names();
        let claim = Arc::new(BatchClaim::new(names.len(), self.options.batch_size));
        *self.running.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&claim));
        let _running = scopeguard::guard(&self.running, |running| {
            running.lock().unwrap_or_else(PoisonError::into_inner).take();
        });
        let progress = PercentReporter::new(names.len(), self.options.on_progress.clone());
        progress.advance(0);
        tracing::info!(archive = self.archive.identity(), classes = names.len(), workers = workers.len(), "indexing started");

        let results: Vec<Result<()>> = thread::scope(|s| {
            let handles: Vec<_> = workers
                .iter()
                .map(|worker| {
                    let claim = &claim;
                    let progress = &progress;
                    s.spawn(move || -> Result<()> {
                        while let Some(range) = claim.claim() {
                            let batch = names[range].to_vec();
                            let archive = Arc::clone(&self.archive);
                            let n = batch.len();
                            let done = worker.schedule(move |part: &mut PartialIndex| {
                                index_batch(part, archive.as_ref(), &batch)
                            });
                            if let Err(e) = done.wait() {
                                // One failed batch fails the run; siblings stop claiming.
                                claim.stop();
                                return Err(e);
                            }
                            progress.advance(n);
                        }
                        Ok(())
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|payload| {
                        Err(JarlensError::Engine(format!(
                            "indexing thread panicked: {}",
                            crate::scheduler::panic_message(payload.as_ref())
                        )))
                    })
                })
                .collect()
        });

        if let Some(err) = results.into_iter().find_map(|r| r.err()) {
            return Err(err);
        }
        if self.state() == IndexState::Destroyed {
            return Err(JarlensError::IndexDestroyed);
        }
        progress.finish();

        let references = self.reference_count_unchecked(&workers)?;
        tracing::info!(
            archive = self.archive.identity(),
            classes = names.len(),
            references,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "indexing finished"
        );
        Ok(())
    }

    fn reference_count_unchecked(&self, workers: &[IndexWorker]) -> Result<usize> {
        let pending: Vec<_> = workers.iter().map(|w| w.schedule(|part: &mut PartialIndex| Ok(part.reference_count()))).collect();
        pending.into_iter().map(|p| p.wait()).sum()
    }

    /// Every site referencing `key`, sorted.
    pub fn get_reference(&self, key: &str) -> Result<Vec<String>> {
        self.index()?;
        let pending: Vec<_> = self
            .workers()
            .iter()
            .map(|w| {
                let key = key.to_string();
                w.schedule(move |part: &mut PartialIndex| Ok(part.reference(&key).to_vec()))
            })
            .collect();
        let mut sites = Vec::new();
        for p in pending {
            sites.extend(p.wait()?);
        }
        sites.sort();
        sites.dedup();
        Ok(sites)
    }

    /// Total (key, site) pairs in the built index.
    pub fn reference_count(&self) -> Result<usize> {
        self.index()?;
        self.reference_count_unchecked(&self.workers())
    }

    /// Class data of every top-level class, sorted by name. Computed once
    /// per index.
    pub fn get_class_data(&self) -> Result<Arc<Vec<ClassDataEntry>>> {
        if let Some(cached) = self.class_data.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return Ok(Arc::clone(cached));
        }
        self.index()?;
        let pending: Vec<_> =
            self.workers().iter().map(|w| w.schedule(|part: &mut PartialIndex| Ok(part.class_data().to_vec()))).collect();
        let mut entries = Vec::new();
        for p in pending {
            entries.extend(p.wait()?);
        }
        entries.sort_by(|a, b| a.class_name.cmp(&b.class_name));
        let entries = Arc::new(entries);

        let mut cached = self.class_data.lock().unwrap_or_else(PoisonError::into_inner);
        if self.state() == IndexState::Destroyed {
            return Err(JarlensError::IndexDestroyed);
        }
        *cached = Some(Arc::clone(&entries));
        Ok(entries)
    }

    pub fn hierarchy(&self) -> Result<ClassHierarchy> {
        Ok(ClassHierarchy::new(&self.get_class_data()?))
    }

    /// Stop any running indexing, release the workers and drop cached class
    /// data. Every later query fails with [`JarlensError::IndexDestroyed`].
    pub fn destroy(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == IndexState::Destroyed {
                return;
            }
            *state = IndexState::Destroyed;
        }
        if let Some(claim) = self.running.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            claim.stop();
        }
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        self.class_data.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.state_changed.notify_all();
        tracing::debug!(archive = self.archive.identity(), workers = workers.len(), "indexer destroyed");
    }
}

impl Drop for JarIndex {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Index one claimed batch. Unparseable classes are skipped; a failed archive
/// read fails the batch.
fn index_batch(part: &mut PartialIndex, archive: &dyn ArchiveView, names: &[String]) -> Result<()> {
    for name in names {
        let Some(bytes) = archive.read(name)? else { continue };
        if let Err(e) = part.index_class(&bytes) {
            tracing::warn!(class = %name, "skipping class during indexing: {e}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryArchive;
    use crate::classfile::testing::ClassBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn archive(classes: usize) -> Arc<dyn ArchiveView> {
        let mut a = MemoryArchive::new("idx");
        for i in 0..classes {
            let name = format!("p/C{i:03}");
            let mut b = ClassBuilder::new(&name, Some("p/Base"));
            if i % 2 == 0 {
                b.interface("p/Marker");
            }
            a.insert(&name, b.build());
        }
        a.insert("p/Base", ClassBuilder::new("p/Base", Some("java/lang/Object")).build());
        a.insert("p/Base$1", ClassBuilder::new("p/Base$1", Some("java/lang/Object")).build());
        a.insert("p/Broken", b"not a class".to_vec());
        Arc::new(a)
    }

    #[test]
    fn builds_and_answers_queries() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let index = JarIndex::new(
            archive(60),
            IndexOptions { workers: 3, batch_size: 25, on_progress: Some(Arc::new(move |p: u8| sink.lock().unwrap().push(p))) },
        )
        .unwrap();

        let refs = index.get_reference("p/Base").unwrap();
        assert_eq!(refs.len(), 60);
        assert_eq!(refs[0], "c:p/C000");
        assert_eq!(index.get_reference("p/Marker").unwrap().len(), 30);
        assert!(index.get_reference("p/Nothing").unwrap().is_empty());
        assert_eq!(index.state(), IndexState::Ready);

        let data = index.get_class_data().unwrap();
        // 60 + Base; the inner class and the broken entry are left out
        assert_eq!(data.len(), 61);
        assert!(data.windows(2).all(|w| w[0].class_name < w[1].class_name));
        assert!(Arc::ptr_eq(&data, &index.get_class_data().unwrap()));

        // Callbacks fire from several threads, so arrival order may vary.
        let mut seen = seen.lock().unwrap().clone();
        let emitted = seen.len();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), emitted);
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&100));
    }

    #[test]
    fn concurrent_queries_share_one_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let index = JarIndex::new(
            archive(40),
            IndexOptions {
                workers: 2,
                batch_size: 5,
                on_progress: Some(Arc::new(move |p: u8| {
                    if p == 0 {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                })),
            },
        )
        .unwrap();
        thread::scope(|s| {
            for _ in 0..6 {
                s.spawn(|| assert_eq!(index.get_reference("p/Base").unwrap().len(), 40));
            }
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn destroyed_index_rejects_queries() {
        let index = JarIndex::new(archive(5), IndexOptions { workers: 1, ..Default::default() }).unwrap();
        index.index().unwrap();
        index.destroy();
        assert_eq!(index.state(), IndexState::Destroyed);
        assert!(matches!(index.get_reference("p/Base"), Err(JarlensError::IndexDestroyed)));
        assert!(matches!(index.get_class_data(), Err(JarlensError::IndexDestroyed)));
    }
}
