//! # jarlens Core Library
//!
//! On-demand decompilation of class-file archives. Requests are spread over a
//! pool of engine workers, each serialising its own engine calls, and every
//! result is kept in a content-addressed cache keyed by class name, entry
//! checksum and output kind. A separate indexer walks the same archive to
//! answer "who references this?" and class hierarchy queries.
//!
//! ## Key Modules
//!
//! - [`session`]: [`Workspace`] and per-archive [`ArchiveSession`]s, the public operations.
//! - [`pool`] and [`worker`]: worker lifecycle, least-busy routing, option propagation.
//! - [`batch`]: lock-free batch claiming for whole-archive jobs.
//! - [`cache`] and [`store`]: the result cache and its persistent record store.
//! - [`indexer`]: class data and reference index.
//! - [`navigation`]: jump-to-reference over decompiled tokens.
//! - [`engine`]: the engine seam and the built-in outline engine.
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use jarlens::{archive::open_archive, config::Config, engine::OutlineEngineFactory, Workspace};
//!
//! let workspace = Workspace::new(Arc::new(OutlineEngineFactory), Config::default())?;
//! let session = workspace.switch_archive(open_archive("app.jar".as_ref())?);
//! println!("{}", session.decompile_one("com/example/Main")?.source);
//! # Ok::<(), jarlens::JarlensError>(())
//! ```

pub mod archive;
pub mod batch;
pub mod cache;
pub mod classfile;
pub mod cli;
pub mod cli_runner;
pub mod common;
pub mod config;
pub mod engine;
pub mod error;
pub mod indexer;
pub mod navigation;
pub mod pool;
pub mod progress;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod worker;

pub use error::{JarlensError, Result};

pub use batch::{BatchClaim, JobOptions, StopHandle, WholeArchiveJob};
pub use cache::ResultCache;
pub use common::{DecompileResult, DecompilerOptions, OutputKind, Token, TokenKind};
pub use navigation::{get_next_jump_token, NavigationRequest};
pub use session::{ArchiveSession, Workspace};
