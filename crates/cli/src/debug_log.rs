//! Debug file logging for shipsync
//!
//! Every run writes a full trace to `/tmp/shipsync-{session_id}.log` while the
//! console only shows INFO (or DEBUG with `--verbose`).

use std::path::PathBuf;

use tracing_subscriber::Layer as _;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Keeps the non-blocking file writer flushing until dropped
pub struct DebugLogGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Session info returned after initializing logging
pub struct SessionInfo {
    pub log_path: PathBuf,
    pub guard: DebugLogGuard,
}

/// Initialize combined logging: file (everything shipsync emits) + console.
///
/// The guard must be kept alive for the duration of the program.
pub fn init(verbose: bool) -> SessionInfo {
    let session_id = uuid::Uuid::new_v4();
    let log_dir = std::env::temp_dir();
    let log_filename = format!("shipsync-{session_id}.log");
    let log_path = log_dir.join(&log_filename);

    let file_appender = tracing_appender::rolling::never(&log_dir, &log_filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(
            "warn,shipsync=trace,shipsync_core=trace,shipsync_transport=trace",
        )
    });
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(file_filter);

    let console_level = if verbose {
        tracing_subscriber::filter::LevelFilter::DEBUG
    } else {
        tracing_subscriber::filter::LevelFilter::INFO
    };
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_level);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .init();

    SessionInfo {
        log_path,
        guard: DebugLogGuard { _guard: guard },
    }
}
