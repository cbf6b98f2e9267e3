// File-based tracing setup.
//
// stderr belongs to the media server (it parses FFmpeg-shaped progress
// from it), so human logs go to a file in the session directory via a
// non-blocking appender.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing to `<session_dir>/stderr.log`. The returned guard
/// must live for the whole process or tail log lines are lost.
pub fn init(session_dir: &Path, filter_directive: &str) -> Option<WorkerGuard> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(session_dir.join("stderr.log"))
        .ok()?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    let filter = EnvFilter::try_new(filter_directive)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        )
        .init();
    Some(guard)
}
