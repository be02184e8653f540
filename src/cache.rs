//! Content-addressed result cache.
//!
//! Results are keyed by `(class name, checksum, output kind)`, so one store
//! serves every version of an archive at once. Changing the decompiler option
//! set wipes every result.
//!
//! Writes are tagged with the invalidation generation observed when the engine
//! call started; a write from an older generation is dropped. Writers hold the
//! state lock shared and invalidation holds it exclusively, so nothing computed
//! under a previous option set lands after a wipe.

use std::path::Path;
use std::sync::{PoisonError, RwLock};

use crate::common::{DecompileResult, DecompilerOptions, OutputKind};
use crate::error::Result;
use crate::store::{Store, OPTIONS_TABLE, RESULTS_TABLE};

const OPTIONS_KEY: &str = "decompiler";

/// Options and invalidation generation captured before an engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSnapshot {
    pub generation: u64,
    pub options: DecompilerOptions,
}

struct State {
    generation: u64,
    options: DecompilerOptions,
}

pub struct ResultCache {
    store: Store,
    state: RwLock<State>,
}

fn result_key(name: &str, checksum: u32, kind: OutputKind) -> Vec<String> {
    vec![name.to_string(), format!("{checksum:08x}"), kind.as_str().to_string()]
}

impl ResultCache {
    pub fn new(store: Store) -> Result<Self> {
        let options = store.get::<DecompilerOptions>(OPTIONS_TABLE, &[OPTIONS_KEY.to_string()])?.unwrap_or_default();
        Ok(ResultCache { store, state: RwLock::new(State { generation: 0, options }) })
    }

    /// Open the persistent cache at `dir`; without a directory, or when the
    /// store cannot be opened, run on a process-lifetime store instead.
    pub fn open_or_memory(dir: Option<&Path>) -> Self {
        let opened = dir.map(|d| Store::open(d).and_then(ResultCache::new));
        match opened {
            Some(Ok(cache)) => {
                tracing::debug!(dir = ?dir, "result cache opened");
                cache
            }
            Some(Err(e)) => {
                tracing::warn!(dir = ?dir, "result cache unavailable, falling back to memory: {e}");
                Self::in_memory()
            }
            None => Self::in_memory(),
        }
    }

    pub fn in_memory() -> Self {
        ResultCache {
            store: Store::in_memory(),
            state: RwLock::new(State { generation: 0, options: DecompilerOptions::new() }),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_persistent()
    }

    pub fn get(&self, name: &str, checksum: u32, kind: OutputKind) -> Result<Option<DecompileResult>> {
        self.store.get(RESULTS_TABLE, &result_key(name, checksum, kind))
    }

    /// Bulk lookup; the output is aligned with `keys`.
    pub fn get_many(&self, keys: &[(&str, u32, OutputKind)]) -> Result<Vec<Option<DecompileResult>>> {
        let keys: Vec<_> = keys.iter().map(|&(n, c, k)| result_key(n, c, k)).collect();
        self.store.get_many(RESULTS_TABLE, &keys)
    }

    /// Unconditional upsert under the current generation.
    pub fn put(&self, result: &DecompileResult) -> Result<()> {
        let _state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        self.store.put(RESULTS_TABLE, &result_key(&result.class_name, result.checksum, result.kind), result)
    }

    /// Upsert unless the cache was invalidated since `snapshot` was taken.
    /// Returns whether the write happened.
    pub fn put_if_current(&self, result: &DecompileResult, snapshot: &CacheSnapshot) -> Result<bool> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.generation != snapshot.generation {
            tracing::debug!(class = %result.class_name, "dropping result computed before invalidation");
            return Ok(false);
        }
        self.store.put(RESULTS_TABLE, &result_key(&result.class_name, result.checksum, result.kind), result)?;
        Ok(true)
    }

    pub fn put_many_if_current(&self, results: &[DecompileResult], snapshot: &CacheSnapshot) -> Result<bool> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.generation != snapshot.generation {
            return Ok(false);
        }
        let entries: Vec<_> =
            results.iter().map(|r| (result_key(&r.class_name, r.checksum, r.kind), r.clone())).collect();
        self.store.put_many(RESULTS_TABLE, &entries)?;
        Ok(true)
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        CacheSnapshot { generation: state.generation, options: state.options.clone() }
    }

    pub fn options(&self) -> DecompilerOptions {
        self.state.read().unwrap_or_else(PoisonError::into_inner).options.clone()
    }

    /// Replace the option set. Any difference (changed, added or removed key)
    /// wipes every cached result; setting the same options again is a no-op.
    /// Returns whether an invalidation happened.
    pub fn set_options(&self, options: &DecompilerOptions) -> Result<bool> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.options == *options {
            return Ok(false);
        }
        let purged = self.store.clear(RESULTS_TABLE)?;
        self.store.put(OPTIONS_TABLE, &[OPTIONS_KEY.to_string()], options)?;
        state.options = options.clone();
        state.generation += 1;
        tracing::info!(purged, generation = state.generation, "decompiler options changed; cache invalidated");
        Ok(true)
    }

    /// Drop every cached result; returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let purged = self.store.clear(RESULTS_TABLE)?;
        state.generation += 1;
        tracing::info!(purged, "result cache cleared");
        Ok(purged)
    }

    /// Drop every result (all checksums and kinds) for one class.
    pub fn evict_symbol(&self, name: &str) -> Result<usize> {
        let _state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        self.store.delete_prefix(RESULTS_TABLE, &[name.to_string()])
    }

    pub fn len(&self) -> Result<usize> {
        self.store.count(RESULTS_TABLE)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, checksum: u32, kind: OutputKind) -> DecompileResult {
        DecompileResult {
            class_name: name.to_string(),
            checksum,
            source: format!("class {name} // {checksum}"),
            tokens: Vec::new(),
            kind,
        }
    }

    #[test]
    fn keys_are_exact() {
        let cache = ResultCache::in_memory();
        cache.put(&result("a/B", 1, OutputKind::Source)).unwrap();
        assert!(cache.get("a/B", 1, OutputKind::Source).unwrap().is_some());
        assert!(cache.get("a/B", 2, OutputKind::Source).unwrap().is_none());
        assert!(cache.get("a/B", 1, OutputKind::Disassembly).unwrap().is_none());
    }

    #[test]
    fn set_options_is_idempotent_and_invalidates_on_change() {
        let cache = ResultCache::in_memory();
        cache.put(&result("a/B", 1, OutputKind::Source)).unwrap();

        assert!(!cache.set_options(&DecompilerOptions::new()).unwrap());
        assert_eq!(cache.len().unwrap(), 1);

        let mut opts = DecompilerOptions::new();
        opts.insert("indent".into(), "2".into());
        assert!(cache.set_options(&opts).unwrap());
        assert!(!cache.set_options(&opts).unwrap());
        assert!(cache.is_empty().unwrap());

        // Removing a key is a change too.
        cache.put(&result("a/B", 1, OutputKind::Source)).unwrap();
        assert!(cache.set_options(&DecompilerOptions::new()).unwrap());
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn stale_writes_are_dropped() {
        let cache = ResultCache::in_memory();
        let before = cache.snapshot();
        let mut opts = DecompilerOptions::new();
        opts.insert("k".into(), "v".into());
        cache.set_options(&opts).unwrap();

        assert!(!cache.put_if_current(&result("a/B", 1, OutputKind::Source), &before).unwrap());
        assert!(cache.is_empty().unwrap());

        let now = cache.snapshot();
        assert_eq!(now.options, opts);
        assert!(cache.put_if_current(&result("a/B", 1, OutputKind::Source), &now).unwrap());
        assert_eq!(cache.clear().unwrap(), 1);
        assert!(!cache.put_if_current(&result("a/B", 1, OutputKind::Source), &now).unwrap());
    }

    #[test]
    fn evict_symbol_spares_other_classes() {
        let cache = ResultCache::in_memory();
        cache.put(&result("a/B", 1, OutputKind::Source)).unwrap();
        cache.put(&result("a/B", 2, OutputKind::Disassembly)).unwrap();
        cache.put(&result("a/Bc", 1, OutputKind::Source)).unwrap();
        assert_eq!(cache.evict_symbol("a/B").unwrap(), 2);
        assert!(cache.get("a/Bc", 1, OutputKind::Source).unwrap().is_some());
    }

    #[test]
    fn options_and_results_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = DecompilerOptions::new();
        opts.insert("hide-synthetic".into(), "true".into());
        {
            let cache = ResultCache::open_or_memory(Some(dir.path()));
            assert!(cache.is_persistent());
            cache.set_options(&opts).unwrap();
            cache.put(&result("a/B", 9, OutputKind::Source)).unwrap();
        }
        let cache = ResultCache::open_or_memory(Some(dir.path()));
        assert_eq!(cache.options(), opts);
        assert_eq!(cache.get("a/B", 9, OutputKind::Source).unwrap().unwrap().source, "class a/B // 9");
    }

    #[test]
    fn unusable_directory_degrades_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let cache = ResultCache::open_or_memory(Some(&file));
        assert!(!cache.is_persistent());
    }
}
