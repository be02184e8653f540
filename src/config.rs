//! Runtime configuration.
//!
//! Layers, lowest first: built-in defaults, an optional JSON file, `JARLENS_*`
//! environment variables, then command-line flags (applied by the CLI).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::batch::DEFAULT_SPLITS;
use crate::error::{JarlensError, Result};
use crate::indexer::DEFAULT_INDEX_BATCH;

pub const ENV_THREADS: &str = "JARLENS_THREADS";
pub const ENV_INDEX_THREADS: &str = "JARLENS_INDEX_THREADS";
pub const ENV_BATCH_SIZE: &str = "JARLENS_BATCH_SIZE";
pub const ENV_CACHE_DIR: &str = "JARLENS_CACHE_DIR";
pub const ENV_PREFER_NATIVE: &str = "JARLENS_PREFER_NATIVE";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Decompile worker ceiling.
    pub threads: usize,
    pub index_threads: usize,
    pub batch_size: usize,
    pub index_batch_size: usize,
    /// `None` keeps the result cache in memory.
    pub cache_dir: Option<PathBuf>,
    pub prefer_native: bool,
    /// Decompiler option set.
    pub options: BTreeMap<String, String>,
}

pub fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("jarlens"))
}

impl Default for Config {
    fn default() -> Self {
        Config {
            threads: num_cpus::get(),
            index_threads: num_cpus::get(),
            batch_size: DEFAULT_SPLITS,
            index_batch_size: DEFAULT_INDEX_BATCH,
            cache_dir: default_cache_dir(),
            prefer_native: true,
            options: BTreeMap::new(),
        }
    }
}

fn parse_count(var: &str, raw: &str) -> Result<usize> {
    raw.trim().parse().map_err(|_| JarlensError::Config(format!("{var} must be a non-negative integer, got '{raw}'")))
}

fn parse_flag(var: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(JarlensError::Config(format!("{var} must be a boolean, got '{raw}'"))),
    }
}

impl Config {
    /// Defaults, then `file` if given, then the process environment.
    pub fn load(file: Option<&Path>) -> Result<Config> {
        let mut config = match file {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate();
        Ok(config)
    }

    /// Read a JSON file; absent keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path).map_err(|e| JarlensError::io(e, path))?;
        serde_json::from_str(&text).map_err(|e| JarlensError::Config(format!("{}: {e}", path.display())))
    }

    /// Apply `JARLENS_*` overrides looked up through `lookup`. An empty
    /// `JARLENS_CACHE_DIR` selects the in-memory cache.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_THREADS) {
            self.threads = parse_count(ENV_THREADS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_INDEX_THREADS) {
            self.index_threads = parse_count(ENV_INDEX_THREADS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_BATCH_SIZE) {
            self.batch_size = parse_count(ENV_BATCH_SIZE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_CACHE_DIR) {
            self.cache_dir = (!raw.trim().is_empty()).then(|| PathBuf::from(raw));
        }
        if let Some(raw) = lookup(ENV_PREFER_NATIVE) {
            self.prefer_native = parse_flag(ENV_PREFER_NATIVE, &raw)?;
        }
        Ok(())
    }

    /// Replace zero counts with their defaults.
    pub fn validate(&mut self) {
        let defaults = Config::default();
        for (value, default, what) in [
            (&mut self.threads, defaults.threads, "threads"),
            (&mut self.index_threads, defaults.index_threads, "index_threads"),
            (&mut self.batch_size, defaults.batch_size, "batch_size"),
            (&mut self.index_batch_size, defaults.index_batch_size, "index_batch_size"),
        ] {
            if *value == 0 {
                tracing::warn!(setting = what, default, "zero is not allowed; using the default");
                *value = default;
            }
        }
    }
}
