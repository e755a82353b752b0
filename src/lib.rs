// Library module for testable functions

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod ingestion;

use tracing_subscriber::EnvFilter;

/// Initialise logging for a binary
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` when verbose.
/// Logs go to stderr so command output on stdout stays clean.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .try_init();
}
