//! Persistent compound-keyed store.
//!
//! Tables hold `Vec<String>` keys mapped to opaque byte values. Two backends
//! exist: [`DiskBackend`] (one zstd-compressed record file per key, survives
//! restarts) and [`MemoryBackend`] (degraded, process-lifetime only). The
//! typed [`Store`] wrapper serialises values with `serde_json`.
//!
//! On-disk layout:
//!
//! ```text
//! <root>/SCHEMA                      {"version": N}
//! <root>/<table>/<h(key[0])>/<h(key)>.rec
//! ```
//!
//! Grouping records by their first key component keeps delete-by-prefix
//! confined to one directory.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{JarlensError, Result};

pub type StoreKey = Vec<String>;

/// Current on-disk schema version.
pub const SCHEMA_VERSION: u32 = 2;

pub const OPTIONS_TABLE: &str = "options";
pub const RESULTS_TABLE: &str = "results";

const SCHEMA_FILE: &str = "SCHEMA";
const RECORD_EXT: &str = "rec";
const ZSTD_LEVEL: i32 = 3;

pub trait StoreBackend: Send + Sync {
    fn get(&self, table: &str, key: &[String]) -> Result<Option<Vec<u8>>>;
    fn put(&self, table: &str, key: &[String], value: &[u8]) -> Result<()>;
    fn delete(&self, table: &str, key: &[String]) -> Result<bool>;
    /// Remove every key starting with `prefix`; returns the number removed.
    fn delete_prefix(&self, table: &str, prefix: &[String]) -> Result<usize>;
    /// Remove every key of the table; returns the number removed.
    fn clear(&self, table: &str) -> Result<usize>;
    /// Number of keys in the table.
    fn count(&self, table: &str) -> Result<usize>;

    fn get_many(&self, table: &str, keys: &[StoreKey]) -> Result<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|k| self.get(table, k)).collect()
    }

    fn put_many(&self, table: &str, entries: &[(StoreKey, Vec<u8>)]) -> Result<()> {
        for (k, v) in entries {
            self.put(table, k, v)?;
        }
        Ok(())
    }

    fn is_persistent(&self) -> bool;
}

// --- memory -----------------------------------------------------------------

#[derive(Default)]
pub struct MemoryBackend {
    tables: RwLock<HashMap<String, BTreeMap<StoreKey, Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn starts_with(key: &[String], prefix: &[String]) -> bool {
    key.len() >= prefix.len() && key[..prefix.len()] == *prefix
}

impl StoreBackend for MemoryBackend {
    fn get(&self, table: &str, key: &[String]) -> Result<Option<Vec<u8>>> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.get(table).and_then(|t| t.get(key)).cloned())
    }

    fn put(&self, table: &str, key: &[String], value: &[u8]) -> Result<()> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.entry(table.to_string()).or_default().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, table: &str, key: &[String]) -> Result<bool> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.get_mut(table).and_then(|t| t.remove(key)).is_some())
    }

    fn delete_prefix(&self, table: &str, prefix: &[String]) -> Result<usize> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let Some(t) = tables.get_mut(table) else { return Ok(0) };
        let doomed: Vec<StoreKey> =
            t.range(prefix.to_vec()..).take_while(|(k, _)| starts_with(k, prefix)).map(|(k, _)| k.clone()).collect();
        for k in &doomed {
            t.remove(k);
        }
        Ok(doomed.len())
    }

    fn clear(&self, table: &str) -> Result<usize> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.remove(table).map(|t| t.len()).unwrap_or(0))
    }

    fn count(&self, table: &str) -> Result<usize> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.get(table).map(|t| t.len()).unwrap_or(0))
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

// --- disk -------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug)]
struct SchemaFile {
    version: u32,
}

pub struct DiskBackend {
    root: PathBuf,
}

fn digest(parts: &[String]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

impl DiskBackend {
    /// Open (creating if needed) a store rooted at `root`, migrating older schemas.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).map_err(|e| JarlensError::io(e, root))?;
        let backend = DiskBackend { root: root.to_path_buf() };
        backend.migrate()?;
        Ok(backend)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn migrate(&self) -> Result<()> {
        let schema_path = self.root.join(SCHEMA_FILE);
        let found = match fs::read(&schema_path) {
            Ok(bytes) => match serde_json::from_slice::<SchemaFile>(&bytes) {
                Ok(schema) => Some(schema.version),
                Err(e) => {
                    tracing::warn!(path = %schema_path.display(), "unreadable store schema, resetting: {e}");
                    Some(0)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(JarlensError::io(e, schema_path)),
        };

        match found {
            Some(v) if v == SCHEMA_VERSION => return Ok(()),
            Some(v) if v > SCHEMA_VERSION => {
                return Err(JarlensError::Store(format!(
                    "store at {} uses schema {v}, newer than supported {SCHEMA_VERSION}",
                    self.root.display()
                )))
            }
            Some(v) => {
                // v1 stored results without token descriptors; nothing is salvageable.
                tracing::warn!(store = %self.root.display(), from = v, to = SCHEMA_VERSION, "migrating store schema");
                self.clear(RESULTS_TABLE)?;
                if v == 0 {
                    self.clear(OPTIONS_TABLE)?;
                }
            }
            None => {}
        }

        let schema = serde_json::to_vec(&SchemaFile { version: SCHEMA_VERSION })?;
        self.write_atomic(&self.root, &schema_path, &schema)
    }

    fn group_dir(&self, table: &str, first: Option<&String>) -> PathBuf {
        let group = digest(first.map(std::slice::from_ref).unwrap_or(&[]));
        self.root.join(table).join(&group[..16])
    }

    fn record_path(&self, table: &str, key: &[String]) -> PathBuf {
        self.group_dir(table, key.first()).join(format!("{}.{RECORD_EXT}", digest(key)))
    }

    fn write_atomic(&self, dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| JarlensError::io(e, dir))?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| JarlensError::io(e, dir))?;
        tmp.write_all(bytes).map_err(|e| JarlensError::io(e, tmp.path()))?;
        tmp.persist(path).map_err(|e| JarlensError::io(e.error, path))?;
        Ok(())
    }

    fn encode(key: &[String], value: &[u8]) -> Result<Vec<u8>> {
        let key_json = serde_json::to_vec(key)?;
        let mut raw = Vec::with_capacity(4 + key_json.len() + value.len());
        raw.extend_from_slice(&(key_json.len() as u32).to_le_bytes());
        raw.extend_from_slice(&key_json);
        raw.extend_from_slice(value);
        Ok(zstd::encode_all(&raw[..], ZSTD_LEVEL)?)
    }

    fn decode(path: &Path, bytes: &[u8]) -> Result<(StoreKey, Vec<u8>)> {
        let mut raw = Vec::new();
        zstd::Decoder::new(bytes)
            .and_then(|mut d| d.read_to_end(&mut raw))
            .map_err(|e| JarlensError::io(e, path))?;
        let corrupt = || JarlensError::Store(format!("corrupt record {}", path.display()));
        let len_bytes: [u8; 4] = raw.get(..4).and_then(|b| b.try_into().ok()).ok_or_else(corrupt)?;
        let key_len = u32::from_le_bytes(len_bytes) as usize;
        let key_json = raw.get(4..4 + key_len).ok_or_else(corrupt)?;
        let key: StoreKey = serde_json::from_slice(key_json)?;
        Ok((key, raw[4 + key_len..].to_vec()))
    }

    /// All record files below `dir` (recursively one or two levels).
    fn record_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(dir).min_depth(1).max_depth(2) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) if e.io_error().is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound) => continue,
                Err(e) => return Err(JarlensError::io(e.into(), dir)),
            };
            if entry.file_type().is_file() && entry.path().extension().is_some_and(|x| x == RECORD_EXT) {
                out.push(entry.into_path());
            }
        }
        Ok(out)
    }

    fn remove_files(files: &[PathBuf]) -> Result<usize> {
        let mut removed = 0;
        for f in files {
            match fs::remove_file(f) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(JarlensError::io(e, f)),
            }
        }
        Ok(removed)
    }
}

impl StoreBackend for DiskBackend {
    fn get(&self, table: &str, key: &[String]) -> Result<Option<Vec<u8>>> {
        let path = self.record_path(table, key);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(JarlensError::io(e, path)),
        };
        let (stored_key, value) = Self::decode(&path, &bytes)?;
        // A digest collision is a miss, never a wrong answer.
        Ok((stored_key == key).then_some(value))
    }

    fn put(&self, table: &str, key: &[String], value: &[u8]) -> Result<()> {
        let dir = self.group_dir(table, key.first());
        let path = dir.join(format!("{}.{RECORD_EXT}", digest(key)));
        let record = Self::encode(key, value)?;
        self.write_atomic(&dir, &path, &record)
    }

    fn delete(&self, table: &str, key: &[String]) -> Result<bool> {
        let path = self.record_path(table, key);
        Ok(Self::remove_files(std::slice::from_ref(&path))? == 1)
    }

    fn delete_prefix(&self, table: &str, prefix: &[String]) -> Result<usize> {
        let Some(first) = prefix.first() else {
            return self.clear(table);
        };
        let dir = self.group_dir(table, Some(first));
        let mut doomed = Vec::new();
        for path in Self::record_files(&dir)? {
            let bytes = match fs::read(&path) {
                Ok(b) => b,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(JarlensError::io(e, path)),
            };
            let (key, _) = Self::decode(&path, &bytes)?;
            if starts_with(&key, prefix) {
                doomed.push(path);
            }
        }
        Self::remove_files(&doomed)
    }

    fn clear(&self, table: &str) -> Result<usize> {
        let dir = self.root.join(table);
        let files = Self::record_files(&dir)?;
        let removed = Self::remove_files(&files)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(JarlensError::io(e, dir)),
        }
        Ok(removed)
    }

    fn count(&self, table: &str) -> Result<usize> {
        Ok(Self::record_files(&self.root.join(table))?.len())
    }

    fn is_persistent(&self) -> bool {
        true
    }
}

// --- typed wrapper ----------------------------------------------------------

/// Typed access to a [`StoreBackend`].
pub struct Store {
    backend: Box<dyn StoreBackend>,
}

impl Store {
    pub fn new(backend: Box<dyn StoreBackend>) -> Self {
        Store { backend }
    }

    pub fn open(root: &Path) -> Result<Self> {
        Ok(Store::new(Box::new(DiskBackend::open(root)?)))
    }

    pub fn in_memory() -> Self {
        Store::new(Box::new(MemoryBackend::new()))
    }

    pub fn is_persistent(&self) -> bool {
        self.backend.is_persistent()
    }

    pub fn get<T: DeserializeOwned>(&self, table: &str, key: &[String]) -> Result<Option<T>> {
        match self.backend.get(table, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put<T: Serialize + ?Sized>(&self, table: &str, key: &[String], value: &T) -> Result<()> {
        self.backend.put(table, key, &serde_json::to_vec(value)?)
    }

    pub fn get_many<T: DeserializeOwned>(&self, table: &str, keys: &[StoreKey]) -> Result<Vec<Option<T>>> {
        self.backend
            .get_many(table, keys)?
            .into_iter()
            .map(|v| v.map(|bytes| serde_json::from_slice(&bytes)).transpose().map_err(Into::into))
            .collect()
    }

    pub fn put_many<T: Serialize>(&self, table: &str, entries: &[(StoreKey, T)]) -> Result<()> {
        let encoded = entries
            .iter()
            .map(|(k, v)| Ok((k.clone(), serde_json::to_vec(v)?)))
            .collect::<Result<Vec<_>>>()?;
        self.backend.put_many(table, &encoded)
    }

    pub fn delete(&self, table: &str, key: &[String]) -> Result<bool> {
        self.backend.delete(table, key)
    }

    pub fn delete_prefix(&self, table: &str, prefix: &[String]) -> Result<usize> {
        self.backend.delete_prefix(table, prefix)
    }

    pub fn clear(&self, table: &str) -> Result<usize> {
        self.backend.clear(table)
    }

    pub fn count(&self, table: &str) -> Result<usize> {
        self.backend.count(table)
    }
}
