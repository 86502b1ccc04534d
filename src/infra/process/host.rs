//! Serving jobs from inside a worker process.

use std::io::{self, BufRead, Write};

use anyhow::Context;
use tracing::{debug, error};

use crate::core::AppResult;

use super::registry::JobRegistry;
use super::wire::{WorkerRequest, WorkerResponse, WORKER_ENV};

/// Whether this process was spawned as a gate worker.
#[must_use]
pub fn is_worker_process() -> bool {
    std::env::var_os(WORKER_ENV).is_some()
}

/// Read one request from stdin, run it and write the response to stdout.
///
/// # Errors
///
/// Fails only if stdin or stdout cannot be used; job failures are written
/// as responses.
pub fn serve_stdio(registry: &JobRegistry) -> AppResult<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve(registry, stdin.lock(), stdout.lock())
}

/// If running as a worker, serve one request and exit the process.
///
/// Call at the top of `main` in applications that offload jobs to copies of
/// themselves (see [`crate::config::ProcessWorkerConfig::current_exe`]).
/// Returns normally when the process is not a worker.
pub fn serve_if_worker(registry: &JobRegistry) {
    if !is_worker_process() {
        return;
    }
    let code = match serve_stdio(registry) {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %format!("{e:#}"), "worker failed to serve request");
            1
        }
    };
    std::process::exit(code);
}

/// Serve one request from `reader`, writing the response line to `writer`.
pub(crate) fn serve<R: BufRead, W: Write>(
    registry: &JobRegistry,
    mut reader: R,
    mut writer: W,
) -> AppResult<()> {
    let mut body = String::new();
    reader
        .read_to_string(&mut body)
        .context("reading request from stdin")?;

    let response = match serde_json::from_str::<WorkerRequest>(&body) {
        Ok(request) => registry.run(request),
        Err(e) => WorkerResponse::Failure {
            message: format!("malformed request: {e}"),
            panicked: false,
        },
    };
    debug!(ok = matches!(response, WorkerResponse::Success { .. }), "job finished");

    let mut line = serde_json::to_vec(&response).context("encoding response")?;
    line.push(b'\n');
    writer.write_all(&line).context("writing response")?;
    writer.flush().context("flushing response")?;
    Ok(())
}
