//! # Archive views
//!
//! Read-only access to one versioned set of class files. Every view exposes the
//! sorted class names (entry paths without the `.class` suffix), a per-entry
//! CRC32 checksum and lazy access to the raw bytes. Nothing here mutates the
//! underlying container.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::common::strip_class_suffix;
use crate::error::{JarlensError, Result};

/// A class name → (checksum, bytes) mapping for one archive version.
pub trait ArchiveView: Send + Sync {
    /// Stable identity of this archive version. Two views with the same
    /// identity are expected to hold the same entries.
    fn identity(&self) -> &str;

    /// All class names, sorted ascending.
    fn class_names(&self) -> &[String];

    /// CRC32 of the entry, `None` when the archive has no such class.
    fn checksum(&self, name: &str) -> Option<u32>;

    /// Raw class bytes, `Ok(None)` when the archive has no such class.
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;

    fn contains(&self, name: &str) -> bool {
        self.checksum(name).is_some()
    }

    /// Names without a `$`, i.e. the units a whole-archive job enumerates.
    fn top_level_names(&self) -> Vec<String> {
        self.class_names().iter().filter(|n| !n.contains('$')).cloned().collect()
    }

    /// Every inner, local or anonymous class nested (at any depth) in `name`.
    fn inner_classes(&self, name: &str) -> Vec<String> {
        let prefix = format!("{}$", strip_class_suffix(name));
        let names = self.class_names();
        let start = names.partition_point(|n| n.as_str() < prefix.as_str());
        names[start..].iter().take_while(|n| n.starts_with(&prefix)).cloned().collect()
    }
}

/// Open a `.jar`/`.zip` file or a directory of `.class` files.
pub fn open_archive(path: &Path) -> Result<Arc<dyn ArchiveView>> {
    if path.is_dir() {
        Ok(Arc::new(DirectoryArchive::open(path)?))
    } else {
        Ok(Arc::new(JarArchive::open(path)?))
    }
}

// --- zip container ----------------------------------------------------------

/// Memory map shared between clones of the zip reader.
#[derive(Clone)]
struct SharedMap(Arc<Mmap>);

impl AsRef<[u8]> for SharedMap {
    fn as_ref(&self) -> &[u8] {
        &self.0[..]
    }
}

/// A zip/jar container read through a memory map.
pub struct JarArchive {
    identity: String,
    zip: zip::ZipArchive<Cursor<SharedMap>>,
    names: Vec<String>,
    /// class name -> (zip entry index, crc32)
    entries: BTreeMap<String, (usize, u32)>,
}

impl JarArchive {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| JarlensError::io(e, path))?;
        let meta = file.metadata().map_err(|e| JarlensError::io(e, path))?;
        // The archive is treated as immutable for the lifetime of the view.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| JarlensError::io(e, path))?;
        let mut zip = zip::ZipArchive::new(Cursor::new(SharedMap(Arc::new(mmap))))?;

        let mut entries = BTreeMap::new();
        for index in 0..zip.len() {
            let entry = zip.by_index_raw(index)?;
            if entry.is_dir() || !entry.name().ends_with(".class") {
                continue;
            }
            entries.insert(strip_class_suffix(entry.name()).to_string(), (index, entry.crc32()));
        }
        let names = entries.keys().cloned().collect();

        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let identity = format!("jar:{}:{}:{}", canonical.display(), meta.len(), modified);

        tracing::debug!(archive = %path.display(), classes = entries.len(), "opened jar");
        Ok(JarArchive { identity, zip, names, entries })
    }
}

impl ArchiveView for JarArchive {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn class_names(&self) -> &[String] {
        &self.names
    }

    fn checksum(&self, name: &str) -> Option<u32> {
        self.entries.get(strip_class_suffix(name)).map(|&(_, crc)| crc)
    }

    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let Some(&(index, _)) = self.entries.get(strip_class_suffix(name)) else {
            return Ok(None);
        };
        // Cloning only copies the cursor and the shared central directory.
        let mut zip = self.zip.clone();
        let mut entry = zip.by_index(index)?;
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        Ok(Some(bytes))
    }
}

// --- plain directory --------------------------------------------------------

/// A directory tree of `.class` files (e.g. a build output folder).
pub struct DirectoryArchive {
    identity: String,
    names: Vec<String>,
    entries: BTreeMap<String, (PathBuf, u32)>,
}

impl DirectoryArchive {
    pub fn open(root: &Path) -> Result<Self> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                JarlensError::io(e.into(), path)
            })?;
            if entry.file_type().is_file() && entry.path().extension().is_some_and(|x| x == "class") {
                files.push(entry.into_path());
            }
        }

        let hashed: Vec<(String, PathBuf, u32)> = files
            .into_par_iter()
            .map(|path| -> Result<(String, PathBuf, u32)> {
                let bytes = std::fs::read(&path).map_err(|e| JarlensError::io(e, &path))?;
                let rel = path.strip_prefix(root).unwrap_or(&path);
                let name = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
                Ok((strip_class_suffix(&name).to_string(), path, crc32fast::hash(&bytes)))
            })
            .collect::<Result<_>>()?;

        let entries: BTreeMap<_, _> = hashed.into_iter().map(|(name, path, crc)| (name, (path, crc))).collect();
        let names = entries.keys().cloned().collect();

        // Content-derived, so a rebuilt directory is a new archive version.
        let mut hasher = crc32fast::Hasher::new();
        for (name, (_, crc)) in &entries {
            hasher.update(name.as_bytes());
            hasher.update(&crc.to_le_bytes());
        }
        let canonical = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let identity = format!("dir:{}:{:08x}", canonical.display(), hasher.finalize());

        tracing::debug!(archive = %root.display(), classes = entries.len(), "opened class directory");
        Ok(DirectoryArchive { identity, names, entries })
    }
}

impl ArchiveView for DirectoryArchive {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn class_names(&self) -> &[String] {
        &self.names
    }

    fn checksum(&self, name: &str) -> Option<u32> {
        self.entries.get(strip_class_suffix(name)).map(|(_, crc)| *crc)
    }

    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match self.entries.get(strip_class_suffix(name)) {
            Some((path, _)) => std::fs::read(path).map(Some).map_err(|e| JarlensError::io(e, path)),
            None => Ok(None),
        }
    }
}

// --- in-process -------------------------------------------------------------

/// An archive held entirely in memory.
#[derive(Clone, Default)]
pub struct MemoryArchive {
    label: String,
    identity: String,
    names: Vec<String>,
    entries: BTreeMap<String, (u32, Arc<Vec<u8>>)>,
}

impl MemoryArchive {
    pub fn new(label: impl Into<String>) -> Self {
        let mut archive = MemoryArchive { label: label.into(), ..Default::default() };
        archive.refresh();
        archive
    }

    pub fn with_class(mut self, name: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(name, bytes);
        self
    }

    pub fn insert(&mut self, name: &str, bytes: impl Into<Vec<u8>>) {
        let bytes = bytes.into();
        let crc = crc32fast::hash(&bytes);
        self.entries.insert(strip_class_suffix(name).to_string(), (crc, Arc::new(bytes)));
        self.refresh();
    }

    fn refresh(&mut self) {
        self.names = self.entries.keys().cloned().collect();
        let mut hasher = crc32fast::Hasher::new();
        for (name, (crc, _)) in &self.entries {
            hasher.update(name.as_bytes());
            hasher.update(&crc.to_le_bytes());
        }
        self.identity = format!("mem:{}:{:08x}", self.label, hasher.finalize());
    }
}

impl ArchiveView for MemoryArchive {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn class_names(&self) -> &[String] {
        &self.names
    }

    fn checksum(&self, name: &str) -> Option<u32> {
        self.entries.get(strip_class_suffix(name)).map(|(crc, _)| *crc)
    }

    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(strip_class_suffix(name)).map(|(_, bytes)| bytes.as_ref().clone()))
    }
}
