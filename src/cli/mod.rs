use clap::{Args as ClapArgs, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::Config;
use crate::error::{JarlensError, Result};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every subcommand. They override the config file and the
/// environment.
#[derive(ClapArgs, Clone, Debug, Default)]
pub struct GlobalOpts {
    /// JSON configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory of the persistent result cache.
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Keep the result cache in memory for this run.
    #[arg(long, global = true, conflicts_with = "cache_dir")]
    pub no_cache: bool,

    /// Decompile worker ceiling. [0 = auto-detect based on CPU cores]
    #[arg(long, global = true)]
    pub threads: Option<usize>,

    /// Do not try the native engine variant.
    #[arg(long, global = true)]
    pub no_native: bool,

    /// Decompiler option as `key=value`; repeatable.
    #[arg(short = 'O', long = "option", global = true, value_parser = parse_key_value)]
    pub options: Vec<(String, String)>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Decompile one class (with its inner classes) and print the source.
    #[command(alias = "d")]
    Decompile {
        /// A .jar/.zip file or a directory of .class files.
        archive: PathBuf,

        /// Internal class name, e.g. `com/example/Main`.
        class: String,

        /// Print the bytecode listing instead of source.
        #[arg(long)]
        bytecode: bool,
    },

    /// Decompile every top-level class into the cache.
    DecompileAll {
        archive: PathBuf,

        /// Classes per claimed batch.
        #[arg(long)]
        splits: Option<usize>,

        /// Show a progress line on stderr.
        #[arg(long)]
        progress: bool,
    },

    /// List every site referencing a class (`pkg/Name`) or member
    /// (`owner:name:descriptor`).
    Refs {
        archive: PathBuf,
        key: String,
    },

    /// Print the class table: name, superclass, flags and interfaces.
    Classes {
        archive: PathBuf,

        /// Prefix each row with the class kind.
        #[arg(long)]
        kind: bool,
    },

    /// Print the direct parents and children of a class.
    Hierarchy {
        archive: PathBuf,
        class: String,
    },

    /// Remove every cached result.
    ClearCache,
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

impl GlobalOpts {
    /// Load the layered configuration and apply these flags on top.
    pub fn resolve(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        self.apply(&mut config);
        config.validate();
        Ok(config)
    }

    pub fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = Some(dir.clone());
        }
        if self.no_cache {
            config.cache_dir = None;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if self.no_native {
            config.prefer_native = false;
        }
        if !self.options.is_empty() {
            let overrides: BTreeMap<String, String> = self.options.iter().cloned().collect();
            config.options.extend(overrides);
        }
    }
}

/// Parses command-line arguments using `clap`.
pub fn run() -> std::result::Result<Args, clap::Error> {
    Args::try_parse()
}

/// Fail early, with the path in the error, when an archive does not exist.
pub fn check_archive_path(path: &std::path::Path) -> Result<()> {
    if !path.exists() {
        return Err(JarlensError::io(std::io::Error::from(std::io::ErrorKind::NotFound), path));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_override_config() {
        let args = Args::try_parse_from([
            "jarlens",
            "--threads",
            "3",
            "--no-native",
            "-O",
            "indent=2",
            "--option",
            "hide-synthetic=true",
            "decompile",
            "app.jar",
            "a/B",
        ])
        .unwrap();
        let mut config = Config { cache_dir: Some("/tmp/x".into()), ..Config::default() };
        args.global.apply(&mut config);
        assert_eq!(config.threads, 3);
        assert!(!config.prefer_native);
        assert_eq!(config.options.len(), 2);
        assert!(matches!(args.command, Commands::Decompile { bytecode: false, .. }));
    }

    #[test]
    fn bad_option_syntax_is_a_usage_error() {
        assert!(Args::try_parse_from(["jarlens", "-O", "novalue", "clear-cache"]).is_err());
        assert!(Args::try_parse_from(["jarlens", "--no-cache", "--cache-dir", "d", "clear-cache"]).is_err());
    }

    #[test]
    fn no_cache_selects_memory() {
        let args = Args::try_parse_from(["jarlens", "clear-cache", "--no-cache"]).unwrap();
        let mut config = Config::default();
        args.global.apply(&mut config);
        assert_eq!(config.cache_dir, None);
    }
}
