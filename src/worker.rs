//! One decompile worker: an engine instance behind a sequential scheduler.
//!
//! The worker consults the result cache before touching the engine. Misses
//! are serialised into the engine, bundled with the class's inner classes,
//! and written back under the cache generation observed when the call began.
//! Engine failures become error results for the affected classes only and
//! are not cached.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::archive::ArchiveView;
use crate::cache::{CacheSnapshot, ResultCache};
use crate::common::{import_tokens, outer_class, strip_class_suffix, DecompileResult, DecompilerOptions, OutputKind, Token};
use crate::engine::{load_engine, DecompileRequest, Engine, EngineFactory, EngineVariant, TracingLogger};
use crate::error::{JarlensError, Result};
use crate::progress::ProgressTracker;
use crate::scheduler::{Pending, SequentialScheduler};

/// Single-writer gate for propagating an option change across workers: only
/// the first worker to claim it writes the option store.
#[derive(Default)]
pub struct OptionGate {
    claimed: AtomicUsize,
}

impl OptionGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `true` exactly once per gate.
    pub fn claim(&self) -> bool {
        self.claimed.fetch_add(1, Ordering::AcqRel) == 0
    }
}

struct WorkerState {
    engine: Box<dyn Engine>,
}

pub struct DecompileWorker {
    id: usize,
    variant: EngineVariant,
    cache: Arc<ResultCache>,
    scheduler: SequentialScheduler<WorkerState>,
}

fn read_lossy(archive: &dyn ArchiveView, name: &str) -> Option<Vec<u8>> {
    match archive.read(name) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(class = name, "failed to read class bytes: {e}");
            None
        }
    }
}

/// Engine call for `units` (top-level names) plus their inner classes.
fn run_engine(
    engine: &mut dyn Engine,
    archive: &dyn ArchiveView,
    units: &[String],
    options: &DecompilerOptions,
) -> Result<BTreeMap<String, (String, Vec<Token>)>> {
    let mut names = Vec::with_capacity(units.len());
    for unit in units {
        names.push(unit.clone());
        names.extend(archive.inner_classes(unit));
    }
    let source = |n: &str| read_lossy(archive, n);
    let mut collected: BTreeMap<String, Vec<Token>> = BTreeMap::new();
    let sources = engine.decompile_many(
        &names,
        DecompileRequest {
            source: &source,
            resources: archive.class_names(),
            options,
            logger: &mut TracingLogger,
            tokens: &mut collected,
        },
    )?;

    let mut out = BTreeMap::new();
    for unit in units {
        let Some(text) = sources.get(unit) else {
            return Err(JarlensError::Engine(format!("engine produced no output for {unit}")));
        };
        let mut tokens = collected.remove(unit).unwrap_or_default();
        tokens.extend(import_tokens(text));
        tokens.sort_by_key(|t| t.start);
        out.insert(unit.clone(), (text.clone(), tokens));
    }
    Ok(out)
}

impl DecompileWorker {
    pub fn spawn(id: usize, factory: &dyn EngineFactory, prefer_native: bool, cache: Arc<ResultCache>) -> Result<Self> {
        let engine = load_engine(factory, prefer_native)?;
        let variant = engine.variant();
        let scheduler = SequentialScheduler::spawn(format!("decompile-{id}"), WorkerState { engine })?;
        tracing::debug!(worker = id, %variant, "decompile worker started");
        Ok(DecompileWorker { id, variant, cache, scheduler })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn variant(&self) -> EngineVariant {
        self.variant
    }

    pub fn pending_count(&self) -> usize {
        self.scheduler.pending_count()
    }

    /// Decompile one class (with its inner classes) to source. An inner class
    /// name resolves to the unit of its top-level class.
    pub fn decompile(&self, archive: &Arc<dyn ArchiveView>, name: &str) -> Result<DecompileResult> {
        self.single(archive, name, OutputKind::Source)
    }

    /// Bytecode listing of one class (with its inner classes).
    pub fn disassemble(&self, archive: &Arc<dyn ArchiveView>, name: &str) -> Result<DecompileResult> {
        self.single(archive, name, OutputKind::Disassembly)
    }

    fn single(&self, archive: &Arc<dyn ArchiveView>, name: &str, kind: OutputKind) -> Result<DecompileResult> {
        let requested = strip_class_suffix(name);
        // Inner classes only exist inside their outer unit's output.
        let name = outer_class(requested).to_string();
        if name != requested {
            tracing::debug!(class = %requested, unit = %name, "inner class resolved to its outer unit");
        }
        let Some(checksum) = archive.checksum(&name) else {
            return Ok(DecompileResult::not_found(requested, kind));
        };
        if let Some(hit) = self.cache.get(&name, checksum, kind)? {
            tracing::debug!(class = %name, %kind, "cache hit");
            return Ok(hit);
        }

        let cache = Arc::clone(&self.cache);
        let archive = Arc::clone(archive);
        let worker = self.id;
        self.scheduler
            .schedule(move |state: &mut WorkerState| {
                // An earlier job on this worker may have produced it meanwhile.
                if let Some(hit) = cache.get(&name, checksum, kind)? {
                    return Ok(hit);
                }
                let snapshot = cache.snapshot();
                tracing::debug!(worker, class = %name, %kind, "engine call");
                let result = match kind {
                    OutputKind::Source => {
                        match run_engine(state.engine.as_mut(), archive.as_ref(), std::slice::from_ref(&name), &snapshot.options) {
                            Ok(mut out) => out.remove(&name).map(|(source, tokens)| DecompileResult {
                                class_name: name.clone(),
                                checksum,
                                source,
                                tokens,
                                kind,
                            }),
                            Err(e) => {
                                tracing::warn!(worker, class = %name, "decompilation failed: {e}");
                                return Ok(DecompileResult::failed(&name, checksum, kind, &e.to_string()));
                            }
                        }
                    }
                    OutputKind::Disassembly => {
                        let mut classes = Vec::new();
                        for n in std::iter::once(name.clone()).chain(archive.inner_classes(&name)) {
                            if let Some(bytes) = archive.read(&n)? {
                                classes.push(bytes);
                            }
                        }
                        match state.engine.disassemble(&classes) {
                            Ok(source) => {
                                Some(DecompileResult { class_name: name.clone(), checksum, source, tokens: Vec::new(), kind })
                            }
                            Err(e) => {
                                tracing::warn!(worker, class = %name, "disassembly failed: {e}");
                                return Ok(DecompileResult::failed(&name, checksum, kind, &e.to_string()));
                            }
                        }
                    }
                };
                let result = result.ok_or_else(|| JarlensError::Engine(format!("no output for {name}")))?;
                cache.put_if_current(&result, &snapshot)?;
                Ok(result)
            })
            .wait()
    }

    /// Process one claimed batch of a whole-archive job. Cache hits are only
    /// reported; misses go to the engine in one call, falling back to one
    /// class per call if the grouped call fails. Returns how many classes
    /// were newly decompiled.
    pub fn decompile_batch(
        &self,
        archive: &Arc<dyn ArchiveView>,
        names: &[String],
        progress: &Arc<ProgressTracker>,
    ) -> Result<usize> {
        let mut misses = Vec::new();
        for name in names {
            let Some(checksum) = archive.checksum(name) else { continue };
            if self.cache.get(name, checksum, OutputKind::Source)?.is_some() {
                progress.record_class(self.id, name, false);
            } else {
                misses.push((name.clone(), checksum));
            }
        }
        if misses.is_empty() {
            return Ok(0);
        }

        let cache = Arc::clone(&self.cache);
        let archive = Arc::clone(archive);
        let progress = Arc::clone(progress);
        let worker = self.id;
        self.scheduler
            .schedule(move |state: &mut WorkerState| {
                let snapshot = cache.snapshot();
                let units: Vec<String> = misses.iter().map(|(n, _)| n.clone()).collect();
                let outputs = match run_engine(state.engine.as_mut(), archive.as_ref(), &units, &snapshot.options) {
                    Ok(out) => out,
                    Err(e) if units.len() > 1 => {
                        tracing::warn!(worker, classes = units.len(), "grouped engine call failed, retrying singly: {e}");
                        return decompile_singly(state, archive.as_ref(), &cache, &snapshot, &misses, &progress, worker);
                    }
                    Err(e) => {
                        tracing::warn!(worker, class = %units[0], "decompilation failed: {e}");
                        progress.record_class(worker, &units[0], false);
                        return Ok(0);
                    }
                };

                let results: Vec<DecompileResult> = misses
                    .iter()
                    .filter_map(|(name, checksum)| {
                        outputs.get(name).map(|(source, tokens)| DecompileResult {
                            class_name: name.clone(),
                            checksum: *checksum,
                            source: source.clone(),
                            tokens: tokens.clone(),
                            kind: OutputKind::Source,
                        })
                    })
                    .collect();
                cache.put_many_if_current(&results, &snapshot)?;
                for (name, _) in &misses {
                    progress.record_class(worker, name, outputs.contains_key(name));
                }
                Ok(results.len())
            })
            .wait()
    }

    /// Apply a changed option set. Every worker runs this behind its queued
    /// work; only the gate's winner writes the store.
    pub fn apply_options(&self, options: DecompilerOptions, gate: Arc<OptionGate>) -> Pending<bool> {
        let cache = Arc::clone(&self.cache);
        let worker = self.id;
        self.scheduler.schedule(move |_state: &mut WorkerState| {
            if !gate.claim() {
                return Ok(false);
            }
            tracing::debug!(worker, "writing decompiler options");
            cache.set_options(&options)
        })
    }

    /// Purge the result cache from this worker's queue.
    pub fn clear_cache(&self) -> Pending<usize> {
        let cache = Arc::clone(&self.cache);
        self.scheduler.schedule(move |_state: &mut WorkerState| cache.clear())
    }

    pub fn shutdown(&mut self) {
        self.scheduler.shutdown();
    }
}

fn decompile_singly(
    state: &mut WorkerState,
    archive: &dyn ArchiveView,
    cache: &ResultCache,
    snapshot: &CacheSnapshot,
    misses: &[(String, u32)],
    progress: &ProgressTracker,
    worker: usize,
) -> Result<usize> {
    let mut decompiled = 0;
    for (name, checksum) in misses {
        match run_engine(state.engine.as_mut(), archive, std::slice::from_ref(name), &snapshot.options) {
            Ok(mut out) => {
                if let Some((source, tokens)) = out.remove(name) {
                    let result = DecompileResult {
                        class_name: name.clone(),
                        checksum: *checksum,
                        source,
                        tokens,
                        kind: OutputKind::Source,
                    };
                    cache.put_if_current(&result, snapshot)?;
                    decompiled += 1;
                    progress.record_class(worker, name, true);
                    continue;
                }
            }
            Err(e) => tracing::warn!(worker, class = %name, "decompilation failed: {e}"),
        }
        progress.record_class(worker, name, false);
    }
    Ok(decompiled)
}
