// Keep-alive: FFmpeg-shaped stderr lines and progress POSTs.
//
// The media server watches both channels and kills the session after ~60 s
// of silence on either, so the reporter fires at ~1 Hz even when nothing
// advanced (seeks produce long stretches of out_time_us=0). Writes to a
// closed stderr are swallowed: the server closing its end must never take
// the coordinator down mid-swarm.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// One instant of forged transcoder progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressSnapshot {
    pub frame: u64,
    pub fps: f64,
    pub speed: f64,
    pub out_time_us: u64,
}

/// `frame=<F> fps=<R> q=-1.0 size=N/A time=<HH:MM:SS.ff> bitrate=N/A speed=<X>x`
pub fn format_progress_line(snap: &ProgressSnapshot) -> String {
    format!(
        "frame={} fps={:.1} q=-1.0 size=N/A time={} bitrate=N/A speed={:.1}x",
        snap.frame,
        snap.fps,
        format_clock(snap.out_time_us),
        snap.speed,
    )
}

/// Terminal line emitted exactly once when work stops.
pub fn format_terminal_line(out_time_us: u64) -> String {
    format!(
        "frame=9999 fps=0.0 q=-1.0 size=N/A time={} bitrate=N/A speed=0.0x",
        format_clock(out_time_us)
    )
}

fn format_clock(out_time_us: u64) -> String {
    let total_cs = out_time_us / 10_000;
    let cs = total_cs % 100;
    let total_secs = total_cs / 100;
    let secs = total_secs % 60;
    let mins = (total_secs / 60) % 60;
    let hours = total_secs / 3600;
    format!("{hours:02}:{mins:02}:{secs:02}.{cs:02}")
}

fn form_body(snap: &ProgressSnapshot) -> String {
    format!(
        "frame={}&fps={:.1}&speed={:.1}x&out_time_us={}&progress=continue",
        snap.frame, snap.fps, snap.speed, snap.out_time_us
    )
}

/// Emits both keep-alive channels from a shared snapshot slot.
#[derive(Clone)]
pub struct ProgressReporter {
    http: reqwest::Client,
    progress_url: Option<String>,
    snapshot: Arc<Mutex<ProgressSnapshot>>,
}

impl ProgressReporter {
    pub fn new(http: reqwest::Client, progress_url: Option<String>) -> Self {
        Self {
            http,
            progress_url,
            snapshot: Arc::new(Mutex::new(ProgressSnapshot::default())),
        }
    }

    /// Replace the current snapshot; the 1 Hz loop picks it up.
    pub fn update(&self, snap: ProgressSnapshot) {
        *self.snapshot.lock().expect("snapshot poisoned") = snap;
    }

    pub fn current(&self) -> ProgressSnapshot {
        *self.snapshot.lock().expect("snapshot poisoned")
    }

    /// Emit one round: stderr line plus form POST. Errors on either channel
    /// are logged and swallowed.
    pub async fn emit_once(&self) {
        let snap = self.current();
        let line = format_progress_line(&snap);
        write_stderr(&line);

        if let Some(url) = self.progress_url.as_deref() {
            let result = self
                .http
                .post(url)
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(form_body(&snap))
                .timeout(Duration::from_secs(5))
                .send()
                .await;
            match result {
                Ok(response) if !response.status().is_success() => {
                    warn!(status = %response.status(), "progress callback refused");
                }
                Ok(_) => trace!(out_time_us = snap.out_time_us, "progress posted"),
                Err(e) => warn!(error = %e, "progress callback failed"),
            }
        }
    }

    /// Emit the terminal line and a final POST.
    pub async fn emit_terminal(&self) {
        let snap = self.current();
        write_stderr(&format_terminal_line(snap.out_time_us));
        if let Some(url) = self.progress_url.as_deref() {
            let body = format!(
                "frame=9999&fps=0.0&speed=0.0x&out_time_us={}&progress=end",
                snap.out_time_us
            );
            let _ = self
                .http
                .post(url)
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(body)
                .timeout(Duration::from_secs(5))
                .send()
                .await;
        }
    }

    /// Spawn the ~1 Hz keep-alive loop; it stops when `token` fires.
    pub fn spawn_loop(&self, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let reporter = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => reporter.emit_once().await,
                }
            }
            debug!("keep-alive loop stopped");
        })
    }
}

/// Best-effort stderr write. EPIPE here means the media server closed its
/// end; the dispatcher keeps running regardless.
fn write_stderr(line: &str) {
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "{line}");
    let _ = stderr.flush();
}

/// Monotonic multi-worker progress approximation:
/// `completed_chunks * chunk_duration + capped wall-elapsed of the
/// earliest running chunk`.
pub fn approximate_out_time_us(
    completed_chunks: u64,
    chunk_duration_sec: f64,
    earliest_running_elapsed_sec: Option<f64>,
) -> u64 {
    let base = completed_chunks as f64 * chunk_duration_sec;
    let partial = earliest_running_elapsed_sec
        .unwrap_or(0.0)
        .min(chunk_duration_sec)
        .max(0.0);
    ((base + partial) * 1_000_000.0) as u64
}
