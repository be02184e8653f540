use std::path::PathBuf;

use crate::engine::EngineVariant;

/// The primary error type for all operations in the `jarlens` crate.
#[derive(Debug, thiserror::Error)]
pub enum JarlensError {
    /// An I/O error occurred, typically while reading an archive or a store record.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io { source: std::io::Error, path: PathBuf },

    /// The archive container could not be read.
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// An error during serialization or deserialization of a store record.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The persistent store holds data this build cannot use.
    #[error("Store error: {0}")]
    Store(String),

    /// An engine variant failed to initialise.
    #[error("Failed to load {variant} engine: {reason}")]
    EngineLoad { variant: EngineVariant, reason: String },

    /// The decompilation engine rejected an input.
    #[error("Engine error: {0}")]
    Engine(String),

    /// Class bytes that do not follow the class file format.
    #[error("Malformed class file: {0}")]
    ClassFormat(String),

    /// The worker thread behind a request is gone (torn down or panicked mid-job).
    #[error("Worker terminated before completing the request")]
    WorkerGone,

    /// The index was destroyed because the active archive changed.
    #[error("Index has been destroyed")]
    IndexDestroyed,

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A wrapper for any other error that doesn't fit the specific variants.
    #[error("An unexpected error occurred: {0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, JarlensError>;

impl JarlensError {
    /// Attach a path to an I/O error.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        JarlensError::Io { source, path: path.into() }
    }
}

// Generic IO error conversion that doesn't require a path
impl From<std::io::Error> for JarlensError {
    fn from(err: std::io::Error) -> Self {
        JarlensError::Io { source: err, path: PathBuf::new() }
    }
}
