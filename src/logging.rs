use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const LOG_ENV: &str = "CLAUDE_LAUNCHER_LOG";

/// Installs the global subscriber.
///
/// The returned guard flushes the log file when dropped, so the caller keeps it
/// until just before the process exits.
pub fn init(log_dir: &Path, verbose: bool) -> Option<WorkerGuard> {
    let default_level = if verbose { "debug" } else { "warn" };
    let stderr_filter = std::env::var(LOG_ENV)
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default_level));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    // The file layer is optional: a read-only config dir must not stop the launcher.
    let mut guard = None;
    let file_layer = if std::fs::create_dir_all(log_dir).is_ok() {
        let appender = tracing_appender::rolling::daily(log_dir, "launcher.log");
        let (non_blocking, file_guard) = tracing_appender::non_blocking(appender);
        guard = Some(file_guard);
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(non_blocking)
                .with_filter(LevelFilter::INFO),
        )
    } else {
        None
    };

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    guard
}
