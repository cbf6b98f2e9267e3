// Input duration discovery.
//
// Splitting needs the source duration. ffprobe answers for anything the
// coordinator host can read (including http inputs); when the input is
// only reachable from an `@local` worker's disk, that worker's `/probe`
// endpoint is the fallback.

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::pool::{Worker, WorkerTag};

/// Probe the input duration in seconds; `None` disables multi-worker
/// dispatch rather than guessing.
pub async fn probe_duration(ffprobe_path: &str, input: &str, pool: &[Worker]) -> Option<f64> {
    match ffprobe_local(ffprobe_path, input).await {
        Some(duration) if duration > 0.0 => {
            debug!(input, duration, "duration from local ffprobe");
            return Some(duration);
        }
        _ => {}
    }

    for worker in pool.iter().filter(|w| w.tag == WorkerTag::Local) {
        match worker.client.probe(input).await {
            Ok(duration) if duration > 0.0 => {
                debug!(input, duration, worker = %worker.url, "duration from worker probe");
                return Some(duration);
            }
            Ok(_) => {}
            Err(e) => warn!(worker = %worker.url, error = %e, "worker probe failed"),
        }
    }

    warn!(input, "input duration unknown");
    None
}

async fn ffprobe_local(ffprobe_path: &str, input: &str) -> Option<f64> {
    let output = Command::new(ffprobe_path)
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("csv=p=0")
        .arg(input)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout).trim().parse().ok()
}
