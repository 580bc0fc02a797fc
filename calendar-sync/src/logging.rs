// calendar-sync/src/logging.rs
//! §6.B — the two log collaborators: a structured per-event logger and a
//! coarser rolling-file sink for lifecycle milestones (start/stop/auth
//! failure/parse failure), filtered to the `lifecycle` target.

use std::path::Path;

use crate::config::LogLevel;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Guards returned by [`init`] must be held for the process lifetime —
/// dropping them stops the non-blocking file writer from flushing.
pub struct LoggingGuards {
    _lifecycle_guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Wires a `tracing_subscriber::registry()` with two layers: stdout at
/// `level`, and a rolling daily file under `log_dir` carrying only
/// `target: "lifecycle"` events, regardless of `level`, so lifecycle
/// milestones are never filtered out by a quieter configured level.
pub fn init(level: LogLevel, log_dir: &Path) -> anyhow::Result<LoggingGuards> {
    let stdout_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level.as_filter_str().into());
    let stdout_layer = tracing_subscriber::fmt::layer().with_filter(stdout_filter);

    let file_appender = tracing_appender::rolling::daily(log_dir, "calendar-sync.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let lifecycle_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| metadata.target() == "lifecycle"));

    tracing_subscriber::registry().with(stdout_layer).with(lifecycle_layer).init();

    Ok(LoggingGuards {
        _lifecycle_guard: guard,
    })
}
