//! Decompilation engine seam.
//!
//! An [`Engine`] turns class bytes into source text while reporting symbol
//! tokens through a [`TokenCollector`]. Engines keep mutable per-call state and
//! are never shared between workers: each worker owns one boxed engine and
//! serialises calls into it.

use std::collections::BTreeMap;
use std::fmt;

use crate::common::{DecompilerOptions, Token};
use crate::error::{JarlensError, Result};

pub mod outline;

pub use outline::{OutlineEngine, OutlineEngineFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineVariant {
    /// Fast, natively compiled build.
    Native,
    /// Portable fallback that loads everywhere.
    Portable,
}

impl fmt::Display for EngineVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineVariant::Native => f.write_str("native"),
            EngineVariant::Portable => f.write_str("portable"),
        }
    }
}

/// Per-class progress and diagnostics emitted during an engine call.
pub trait DecompileLogger {
    fn on_start_class(&mut self, _name: &str) {}
    fn on_message(&mut self, _message: &str) {}
}

/// Logger that forwards engine messages to `tracing`.
pub struct TracingLogger;

impl DecompileLogger for TracingLogger {
    fn on_start_class(&mut self, name: &str) {
        tracing::trace!(class = name, "engine started class");
    }

    fn on_message(&mut self, message: &str) {
        tracing::debug!("engine: {message}");
    }
}

/// Receives tokens as the engine produces them, keyed by the unit (top-level
/// class) whose source text they point into.
pub trait TokenCollector {
    fn on_token(&mut self, unit: &str, token: Token);
}

impl TokenCollector for BTreeMap<String, Vec<Token>> {
    fn on_token(&mut self, unit: &str, token: Token) {
        self.entry(unit.to_string()).or_default().push(token);
    }
}

/// Inputs of one [`Engine::decompile_many`] call.
pub struct DecompileRequest<'a> {
    /// Lazy class byte lookup; `None` for classes outside the archive.
    pub source: &'a dyn Fn(&str) -> Option<Vec<u8>>,
    /// Every class name of the archive, for type resolution.
    pub resources: &'a [String],
    pub options: &'a DecompilerOptions,
    pub logger: &'a mut dyn DecompileLogger,
    pub tokens: &'a mut dyn TokenCollector,
}

pub trait Engine: Send {
    fn variant(&self) -> EngineVariant;

    /// Decompile `names` in one shared context. Inner classes listed in
    /// `names` are folded into their outer unit; the returned map is keyed by
    /// top-level class name.
    fn decompile_many(&mut self, names: &[String], request: DecompileRequest<'_>) -> Result<BTreeMap<String, String>>;

    /// Bytecode listing of the given classes, in order.
    fn disassemble(&mut self, classes: &[Vec<u8>]) -> Result<String>;
}

/// Creates engine instances; one instance per worker.
pub trait EngineFactory: Send + Sync {
    fn load(&self, variant: EngineVariant) -> Result<Box<dyn Engine>>;
}

/// Load the preferred variant, falling back to the portable one.
pub fn load_engine(factory: &dyn EngineFactory, prefer_native: bool) -> Result<Box<dyn Engine>> {
    if prefer_native {
        match factory.load(EngineVariant::Native) {
            Ok(engine) => return Ok(engine),
            Err(e) => tracing::warn!("native engine unavailable, using portable engine: {e}"),
        }
    }
    factory.load(EngineVariant::Portable).map_err(|e| match e {
        e @ JarlensError::EngineLoad { .. } => e,
        other => JarlensError::EngineLoad { variant: EngineVariant::Portable, reason: other.to_string() },
    })
}
