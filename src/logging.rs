//! Tracing subscriber setup.

use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::layout::FilesystemLayout;

// Keeps the non-blocking writer flushing for the process lifetime.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize file logging under `<home>/logs/kindling.log`.
///
/// Level filtering follows `RUST_LOG`, defaulting to `info`. Safe to call
/// more than once; only the first call installs a subscriber, so an
/// embedding application that already configured tracing wins.
pub fn init_for(layout: &FilesystemLayout) {
    let file_appender = tracing_appender::rolling::never(layout.logs_dir(), "kindling.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false),
        )
        .try_init();

    let _ = LOG_GUARD.set(guard);
}
