//! Command execution for the `jarlens` binary.
//!
//! Everything here is a thin layer over [`Workspace`]: resolve the
//! configuration, open the archive, run one operation, print the result.

use crate::archive::open_archive;
use crate::cli::{self, Commands};
use crate::engine::OutlineEngineFactory;
use crate::indexer::{format_reference, format_reference_query, ReferenceSite};
use crate::progress::ProgressState;
use crate::session::Workspace;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Public entry for running CLI logic.
pub fn run_cli_app() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::run()?;
    let config = args.global.resolve()?;
    tracing::debug!(?config, "configuration resolved");
    let workspace = Workspace::new(Arc::new(OutlineEngineFactory), config)?;
    let mut out = io::stdout().lock();

    match &args.command {
        Commands::Decompile { archive, class, bytecode } => {
            let session = workspace.switch_archive(open(archive)?);
            let result = if *bytecode { session.disassemble_one(class)? } else { session.decompile_one(class)? };
            writeln!(out, "{}", result.source)?;
        }
        Commands::DecompileAll { archive, splits, progress } => {
            let session = workspace.switch_archive(open(archive)?);
            let mut options = session.job_options();
            if let Some(splits) = splits {
                options.splits = (*splits).max(1);
            }
            if *progress {
                options.on_progress = Some(Arc::new(create_cli_progress_callback("decompile")));
            }
            let job = session.decompile_whole_archive(options);
            let total = job.total();
            let decompiled = job.start()?;
            writeln!(out, "Decompiled {decompiled} of {total} classes")?;
        }
        Commands::Refs { archive, key } => {
            let session = workspace.switch_archive(open(archive)?);
            let sites = session.get_reference(key)?;
            writeln!(out, "{} ({} references)", format_reference_query(key), sites.len())?;
            for site in &sites {
                let owner = site.parse::<ReferenceSite>().map(|s| s.owner().to_string()).unwrap_or_default();
                writeln!(out, "  {owner}  {}", format_reference(site))?;
            }
        }
        Commands::Classes { archive, kind } => {
            let session = workspace.switch_archive(open(archive)?);
            for entry in session.get_class_data()?.iter() {
                if *kind {
                    writeln!(out, "{:<10} {entry}", entry.kind().as_str())?;
                } else {
                    writeln!(out, "{entry}")?;
                }
            }
        }
        Commands::Hierarchy { archive, class } => {
            let session = workspace.switch_archive(open(archive)?);
            let hierarchy = session.hierarchy()?;
            if hierarchy.get(class).is_none() {
                tracing::warn!(class = %class, "class is not in the archive's class table");
            }
            writeln!(out, "{class}")?;
            writeln!(out, "parents:")?;
            for parent in hierarchy.parents(class) {
                writeln!(out, "  {parent}")?;
            }
            writeln!(out, "children:")?;
            for child in hierarchy.children(class) {
                writeln!(out, "  {child}")?;
            }
        }
        Commands::ClearCache => {
            let purged = workspace.clear_cache()?;
            writeln!(out, "Removed {purged} cached results")?;
        }
    }

    out.flush()?;
    Ok(())
}

fn open(path: &Path) -> crate::error::Result<Arc<dyn crate::archive::ArchiveView>> {
    cli::check_archive_path(path)?;
    open_archive(path)
}

// --- utils for CLI progress -------------------------------------------------

fn format_eta(state: &ProgressState) -> String {
    if state.classes_per_sec <= 0.0 || state.processed_classes == 0 {
        return "--".to_string();
    }
    let eta_seconds = state.estimated_time_remaining().as_secs_f32();
    if eta_seconds > 60.0 {
        format!("{:.1}m", eta_seconds / 60.0)
    } else {
        format!("{:.1}s", eta_seconds)
    }
}

fn status_line(operation: &str, state: &ProgressState, bar_width: usize) -> String {
    let filled = (((state.progress_percent / 100.0) * bar_width as f32) as usize).min(bar_width);
    let empty = bar_width - filled;
    format!(
        "[{}] [{}{}] {:.1}% | {}/{} classes | {:.1} classes/s | ETA: {}",
        operation.to_uppercase(),
        "█".repeat(filled),
        "░".repeat(empty),
        state.progress_percent,
        state.processed_classes,
        state.total_classes,
        state.classes_per_sec,
        format_eta(state)
    )
}

fn create_cli_progress_callback(operation: &str) -> impl Fn(ProgressState) + Send + Sync + 'static {
    let operation = operation.to_string();
    let start_time = Instant::now();
    let last_update = Mutex::new(start_time);
    let prev_len = Mutex::new(0usize);
    let done = AtomicBool::new(false);

    move |state: ProgressState| {
        if done.load(Ordering::Relaxed) {
            return;
        }
        let finished = state.progress_percent >= 100.0 || state.processed_classes >= state.total_classes;
        // Update every 100ms to avoid terminal spam, but always show completion
        let should_update = finished || {
            let mut last = last_update.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            if now.duration_since(*last).as_millis() >= 100 {
                *last = now;
                true
            } else {
                false
            }
        };
        if !should_update {
            return;
        }

        let term_width = term_size::dimensions().map(|(w, _)| w).unwrap_or(80);
        let mut bar_width = 40;
        let line = loop {
            let line = status_line(&operation, &state, bar_width);
            if line.chars().count() <= term_width || bar_width <= 10 {
                break line;
            }
            bar_width = bar_width.saturating_sub(4).max(10);
        };

        let mut line_to_print = line;
        {
            let mut prev = prev_len.lock().unwrap_or_else(PoisonError::into_inner);
            let len = line_to_print.chars().count();
            if *prev > len {
                line_to_print.push_str(&" ".repeat(*prev - len));
            }
            *prev = len;
        }
        // stderr keeps stdout clean for piping
        eprint!("\r\x1B[2K{line_to_print}");
        io::stderr().flush().ok();

        if finished {
            eprintln!();
            done.store(true, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn state(processed: u64, total: u64) -> ProgressState {
        ProgressState {
            total_classes: total,
            processed_classes: processed,
            decompiled_classes: processed,
            elapsed_time: Duration::from_secs(2),
            classes_per_sec: processed as f32 / 2.0,
            progress_percent: processed as f32 / total as f32 * 100.0,
        }
    }

    #[test]
    fn status_line_fills_bar_proportionally() {
        let line = status_line("decompile", &state(50, 100), 10);
        assert!(line.starts_with("[DECOMPILE] [█████░░░░░] 50.0%"));
        assert!(line.contains("50/100 classes"));
        assert!(line.contains("ETA: 2.0s"));
    }

    #[test]
    fn eta_unknown_before_progress() {
        assert_eq!(format_eta(&state(0, 100)), "--");
    }
}
