//! Workspace and per-archive sessions.
//!
//! A [`Workspace`] owns the process-wide pieces: the worker pool and the
//! result cache, which serves every archive version at once. Each opened
//! archive gets an [`ArchiveSession`] in a registry keyed by archive
//! identity. Only the active session keeps an index; switching archives
//! destroys the previous one first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::archive::ArchiveView;
use crate::batch::{JobOptions, WholeArchiveJob};
use crate::cache::ResultCache;
use crate::common::{DecompileResult, DecompilerOptions};
use crate::config::Config;
use crate::engine::EngineFactory;
use crate::error::Result;
use crate::indexer::{ClassDataEntry, ClassHierarchy, IndexOptions, JarIndex};
use crate::pool::WorkerPool;
use crate::progress::PercentCallback;

pub struct ArchiveSession {
    archive: Arc<dyn ArchiveView>,
    pool: Arc<WorkerPool>,
    index_options: IndexOptions,
    splits: usize,
    index: Mutex<Option<Arc<JarIndex>>>,
}

impl ArchiveSession {
    fn new(archive: Arc<dyn ArchiveView>, pool: Arc<WorkerPool>, index_options: IndexOptions, splits: usize) -> Self {
        ArchiveSession { archive, pool, index_options, splits, index: Mutex::new(None) }
    }

    pub fn identity(&self) -> &str {
        self.archive.identity()
    }

    pub fn archive(&self) -> &Arc<dyn ArchiveView> {
        &self.archive
    }

    pub fn decompile_one(&self, name: &str) -> Result<DecompileResult> {
        self.pool.pick_worker()?.decompile(&self.archive, name)
    }

    pub fn disassemble_one(&self, name: &str) -> Result<DecompileResult> {
        self.pool.pick_worker()?.disassemble(&self.archive, name)
    }

    /// Job options with this session's configured batch size.
    pub fn job_options(&self) -> JobOptions {
        JobOptions { splits: self.splits, ..JobOptions::default() }
    }

    /// A whole-archive job over this archive; nothing runs until
    /// [`WholeArchiveJob::start`].
    pub fn decompile_whole_archive(&self, options: JobOptions) -> WholeArchiveJob {
        WholeArchiveJob::new(Arc::clone(&self.pool), Arc::clone(&self.archive), options)
    }

    /// Purge the shared result cache. Returns the number of removed results.
    pub fn clear_cache(&self) -> Result<usize> {
        self.pool.delete_cache()
    }

    /// The index for this archive, created on first use.
    pub fn index(&self) -> Result<Arc<JarIndex>> {
        let mut slot = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = slot.as_ref() {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(JarIndex::new(Arc::clone(&self.archive), self.index_options.clone())?);
        *slot = Some(Arc::clone(&index));
        Ok(index)
    }

    pub fn get_reference(&self, key: &str) -> Result<Vec<String>> {
        self.index()?.get_reference(key)
    }

    pub fn get_class_data(&self) -> Result<Arc<Vec<ClassDataEntry>>> {
        self.index()?.get_class_data()
    }

    pub fn hierarchy(&self) -> Result<ClassHierarchy> {
        self.index()?.hierarchy()
    }

    /// Destroy the current index, if any. A later query builds a new one.
    pub fn release_index(&self) {
        if let Some(index) = self.index.lock().unwrap_or_else(PoisonError::into_inner).take() {
            index.destroy();
        }
    }
}

pub struct Workspace {
    pool: Arc<WorkerPool>,
    config: Config,
    on_index_progress: Option<Arc<PercentCallback>>,
    sessions: Mutex<HashMap<String, Arc<ArchiveSession>>>,
    active: Mutex<Option<Arc<ArchiveSession>>>,
}

impl Workspace {
    /// Open the configured cache (in memory when unavailable), apply the
    /// configured option set and build an empty pool.
    pub fn new(factory: Arc<dyn EngineFactory>, config: Config) -> Result<Self> {
        let cache = Arc::new(ResultCache::open_or_memory(config.cache_dir.as_deref()));
        Self::with_cache(factory, cache, config)
    }

    pub fn with_cache(factory: Arc<dyn EngineFactory>, cache: Arc<ResultCache>, config: Config) -> Result<Self> {
        cache.set_options(&config.options)?;
        let pool = Arc::new(WorkerPool::new(factory, cache, config.threads, config.prefer_native));
        Ok(Workspace {
            pool,
            config,
            on_index_progress: None,
            sessions: Mutex::new(HashMap::new()),
            active: Mutex::new(None),
        })
    }

    /// Indexing progress callback for sessions opened from now on.
    pub fn with_index_progress(mut self, callback: Arc<PercentCallback>) -> Self {
        self.on_index_progress = Some(callback);
        self
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        self.pool.cache()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The registered session for `archive`, created if needed. Does not
    /// change the active session.
    pub fn open(&self, archive: Arc<dyn ArchiveView>) -> Arc<ArchiveSession> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let session = sessions.entry(archive.identity().to_string()).or_insert_with(|| {
            let index_options = IndexOptions {
                workers: self.config.index_threads,
                batch_size: self.config.index_batch_size,
                on_progress: self.on_index_progress.clone(),
            };
            tracing::debug!(archive = archive.identity(), "session opened");
            Arc::new(ArchiveSession::new(archive, Arc::clone(&self.pool), index_options, self.config.batch_size))
        });
        Arc::clone(session)
    }

    /// Make `archive` the active one. The previous active session loses its
    /// index before the new session is returned; its decompilation keeps
    /// working.
    pub fn switch_archive(&self, archive: Arc<dyn ArchiveView>) -> Arc<ArchiveSession> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = active.as_ref() {
            if previous.identity() == archive.identity() {
                return Arc::clone(previous);
            }
            tracing::info!(from = previous.identity(), to = archive.identity(), "switching active archive");
            previous.release_index();
        }
        let session = self.open(archive);
        *active = Some(Arc::clone(&session));
        session
    }

    pub fn active(&self) -> Option<Arc<ArchiveSession>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn session(&self, identity: &str) -> Option<Arc<ArchiveSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).get(identity).cloned()
    }

    /// Drop a session from the registry, destroying its index. Cached
    /// results stay.
    pub fn close(&self, identity: &str) -> bool {
        let removed = self.sessions.lock().unwrap_or_else(PoisonError::into_inner).remove(identity);
        let Some(session) = removed else { return false };
        session.release_index();
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|a| a.identity() == identity) {
            *active = None;
        }
        true
    }

    pub fn set_options(&self, options: &DecompilerOptions) -> Result<bool> {
        self.pool.set_options(options)
    }

    pub fn set_runtime_preference(&self, prefer_native: bool) -> Result<()> {
        self.pool.set_runtime_preference(prefer_native)
    }

    pub fn clear_cache(&self) -> Result<usize> {
        self.pool.delete_cache()
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let sessions = std::mem::take(&mut *self.sessions.lock().unwrap_or_else(PoisonError::into_inner));
        for session in sessions.values() {
            session.release_index();
        }
        self.pool.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryArchive;
    use crate::classfile::testing::ClassBuilder;
    use crate::engine::OutlineEngineFactory;
    use crate::indexer::IndexState;

    fn workspace() -> Workspace {
        let config = Config { threads: 2, index_threads: 2, cache_dir: None, ..Config::default() };
        Workspace::with_cache(Arc::new(OutlineEngineFactory), Arc::new(ResultCache::in_memory()), config).unwrap()
    }

    fn archive(label: &str) -> Arc<dyn ArchiveView> {
        let a = MemoryArchive::new(label)
            .with_class("p/Base", ClassBuilder::new("p/Base", Some("java/lang/Object")).build())
            .with_class("p/Impl", ClassBuilder::new("p/Impl", Some("p/Base")).build());
        Arc::new(a)
    }

    #[test]
    fn switching_destroys_previous_index() {
        let ws = workspace();
        let first = ws.switch_archive(archive("v1"));
        let index = first.index().unwrap();
        assert_eq!(first.get_reference("p/Base").unwrap(), vec!["c:p/Impl"]);

        let second = ws.switch_archive(archive("v2"));
        assert_eq!(index.state(), IndexState::Destroyed);
        assert_eq!(ws.active().unwrap().identity(), second.identity());

        // The old session can still decompile and builds a fresh index on demand.
        assert!(first.decompile_one("p/Impl").unwrap().source.contains("Impl"));
        assert_eq!(first.get_reference("p/Base").unwrap(), vec!["c:p/Impl"]);
    }

    #[test]
    fn reopening_returns_the_same_session() {
        let ws = workspace();
        let a = ws.open(archive("same"));
        let b = ws.open(archive("same"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(ws.close(a.identity()));
        assert!(ws.session(a.identity()).is_none());
        assert!(!ws.close(a.identity()));
    }

    #[test]
    fn hierarchy_from_session() {
        let ws = workspace();
        let s = ws.switch_archive(archive("h"));
        let h = s.hierarchy().unwrap();
        assert_eq!(h.children("p/Base"), vec!["p/Impl"]);
        assert_eq!(s.get_class_data().unwrap().len(), 2);
    }
}
