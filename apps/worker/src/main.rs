//! meetrec upload worker entry point.
//!
//! Usage: `meetrec-worker [request.json | -]`. The invocation request is read
//! from the given file or from stdin, the result is printed to stdout as JSON.

mod app;
mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr; stdout carries the result.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,meetrec=debug")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting meetrec worker");

    let config = config::Config::load()?;
    tracing::info!(
        fragments = %config.fragment_root.display(),
        checkpoints = %config.checkpoint_root.display(),
        secondary = config.secondary_configured(),
        "configuration loaded"
    );

    let request_path = std::env::args_os().nth(1).map(PathBuf::from);
    let request = app::read_request(request_path.as_deref())?;

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(app::run(config, request))?;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.success {
        tracing::info!(session = %result.session_id, "invocation finished");
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::error!(
            session = %result.session_id,
            kind = ?result.error_kind,
            "invocation failed"
        );
        Ok(ExitCode::FAILURE)
    }
}
