//! Main entry point for the jarlens CLI app

use tracing_subscriber::EnvFilter;

fn main() -> std::process::ExitCode {
    let filter = EnvFilter::try_from_env("JARLENS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    if let Err(e) = jarlens::cli_runner::run_cli_app() {
        if let Some(clap_err) = e.downcast_ref::<clap::Error>() {
            // Help and version requests come through here too.
            clap_err.exit();
        }
        eprintln!("Error: {}", e);
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}
