// Beam uploads: copy-remux the input interval to Matroska and stream the
// bytes into the worker as a chunked POST body.
//
// The remux child and the HTTP request run for the lifetime of the upload;
// cancelling the handle kills both. Progress of the actual encode is
// observed via `/status`, never via the upload.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use beam_proto::JobId;
use bytes::Bytes;
use futures::Stream;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::BeamError;
use crate::worker::WorkerClient;

/// A beam upload in flight.
///
/// Dropping the handle does not stop the upload; call [`UploadHandle::abort`]
/// or join it. The dispatcher promotes prefetch uploads by moving the handle
/// between slots, which is why it is a plain owned value.
#[derive(Debug)]
pub struct UploadHandle {
    pub job_id: JobId,
    token: CancellationToken,
    task: JoinHandle<Result<u64, BeamError>>,
}

impl UploadHandle {
    /// Cancel the upload: the remux child is killed and the request body
    /// ends early, which the worker sees as a broken stream.
    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Await the upload result. Aborted uploads report `Cancelled`.
    pub async fn join(self) -> Result<u64, BeamError> {
        match self.task.await {
            Ok(result) => result,
            Err(join_err) => {
                warn!(error = %join_err, "upload task panicked or was aborted");
                Err(BeamError::UploadAborted)
            }
        }
    }
}

/// Factory for beam-stream and staged uploads against a worker.
#[derive(Debug, Clone)]
pub struct BeamUploader {
    ffmpeg_path: String,
    rate_limit: u64,
    upload_timeout: Duration,
    staged_timeout: Duration,
}

impl BeamUploader {
    pub fn new(ffmpeg_path: impl Into<String>, rate_limit: u64) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            rate_limit,
            upload_timeout: Duration::from_secs(7_200),
            staged_timeout: Duration::from_secs(14_400),
        }
    }

    pub fn from_config(config: &crate::ClientConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            rate_limit: config.upload_rate_limit,
            upload_timeout: config.upload_timeout,
            staged_timeout: config.staged_upload_timeout,
        }
    }

    /// Start streaming `input` (optionally an `ss`/`t` interval) to
    /// `POST /beam/stream/<job_id>` on `worker`.
    pub fn start_stream(
        &self,
        worker: &WorkerClient,
        job_id: &JobId,
        input: &str,
        ss: Option<f64>,
        t: Option<f64>,
        parent: &CancellationToken,
    ) -> Result<UploadHandle, BeamError> {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-hide_banner").arg("-loglevel").arg("error");
        if let Some(ss) = ss {
            if ss > 0.0 {
                cmd.arg("-ss").arg(format!("{ss:.3}"));
            }
        }
        if let Some(t) = t {
            cmd.arg("-t").arg(format!("{t:.3}"));
        }
        cmd.arg("-i")
            .arg(input)
            .arg("-map")
            .arg("0")
            .arg("-c")
            .arg("copy")
            .arg("-f")
            .arg("matroska")
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| BeamError::RemuxSpawn {
            program: self.ffmpeg_path.clone(),
            source,
        })?;
        let stdout = child.stdout.take().ok_or_else(|| BeamError::RemuxSpawn {
            program: self.ffmpeg_path.clone(),
            source: std::io::Error::other("remux stdout unavailable"),
        })?;

        let url = worker.endpoint(&format!("beam/stream/{job_id}"))?;
        let counter = Arc::new(AtomicU64::new(0));
        let request = worker
            .with_key(worker.http().post(url))
            .timeout(self.upload_timeout)
            .body(reqwest::Body::wrap_stream(throttled_stream(
                stdout,
                self.rate_limit,
                Arc::clone(&counter),
            )));

        let token = parent.child_token();
        let task_token = token.clone();
        let job = job_id.clone();
        debug!(job_id = %job, input, ?ss, ?t, "beam stream starting");
        let task = tokio::spawn(async move {
            let send = async {
                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(BeamError::http_status(status, "beam/stream", "upload"));
                }
                Ok::<(), BeamError>(())
            };
            let result = tokio::select! {
                _ = task_token.cancelled() => {
                    let _ = child.kill().await;
                    info!(job_id = %job, "beam stream cancelled");
                    return Err(BeamError::Cancelled);
                }
                r = send => r,
            };
            match result {
                Ok(()) => {
                    // The worker replies only after ffmpeg drained the
                    // body; the child is done or moments from it.
                    let status = child.wait().await?;
                    let streamed = counter.load(Ordering::Relaxed);
                    if status.success() {
                        info!(job_id = %job, bytes = streamed, "beam stream complete");
                        Ok(streamed)
                    } else {
                        Err(BeamError::RemuxFailed { status })
                    }
                }
                Err(e) => {
                    let _ = child.kill().await;
                    warn!(job_id = %job, error = %e, "beam stream failed");
                    Err(e)
                }
            }
        });

        Ok(UploadHandle {
            job_id: job_id.clone(),
            token,
            task,
        })
    }

    /// `PUT /beam/stage/<id>`: ship the whole input file ahead of time.
    pub fn start_staged(
        &self,
        worker: &WorkerClient,
        stage_id: &str,
        input: &Path,
        parent: &CancellationToken,
    ) -> Result<UploadHandle, BeamError> {
        let url = worker.endpoint(&format!("beam/stage/{stage_id}"))?;
        let request_base = worker
            .with_key(worker.http().put(url))
            .timeout(self.staged_timeout);

        let token = parent.child_token();
        let task_token = token.clone();
        let input = input.to_path_buf();
        let rate = self.rate_limit;
        let stage = stage_id.to_owned();
        let task = tokio::spawn(async move {
            let file = tokio::fs::File::open(&input).await?;
            let size = file.metadata().await?.len();
            let request = request_base.body(reqwest::Body::wrap_stream(throttled_stream(
                file,
                rate,
                Arc::new(AtomicU64::new(0)),
            )));
            let send = async {
                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(BeamError::http_status(status, "beam/stage", "stage"));
                }
                Ok::<u64, BeamError>(size)
            };
            tokio::select! {
                _ = task_token.cancelled() => {
                    info!(stage_id = %stage, "staged upload cancelled");
                    Err(BeamError::Cancelled)
                }
                r = send => r,
            }
        });

        Ok(UploadHandle {
            job_id: JobId::raw(stage_id),
            token,
            task,
        })
    }
}

/// Turn an `AsyncRead` into a byte stream, counting bytes into `counter`
/// and, when `rate_limit` is non-zero, throttling with a cumulative token
/// bucket: if the bytes sent so far outrun `rate * elapsed`, the stream
/// sleeps off the difference.
fn throttled_stream<R>(
    reader: R,
    rate_limit: u64,
    counter: Arc<AtomicU64>,
) -> impl Stream<Item = std::io::Result<Bytes>>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let state = (reader, Instant::now(), counter);
    futures::stream::unfold(state, move |(mut reader, start, counter)| async move {
        let mut buf = vec![0u8; 256 * 1024];
        match reader.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                let sent = counter.fetch_add(n as u64, Ordering::Relaxed) + n as u64;
                if rate_limit > 0 {
                    let pause = throttle_pause(rate_limit, start.elapsed(), sent);
                    if !pause.is_zero() {
                        tokio::time::sleep(pause).await;
                    }
                }
                Some((Ok(Bytes::from(buf)), (reader, start, counter)))
            }
            Err(e) => Some((Err(e), (reader, start, counter))),
        }
    })
}

/// How long to sleep so `sent` bytes over `elapsed` stays at or under
/// `rate` bytes/s.
fn throttle_pause(rate: u64, elapsed: Duration, sent: u64) -> Duration {
    let budget_secs = sent as f64 / rate as f64;
    let elapsed_secs = elapsed.as_secs_f64();
    if budget_secs > elapsed_secs {
        Duration::from_secs_f64(budget_secs - elapsed_secs)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_pause_math() {
        // 1 MiB sent instantly at 1 MiB/s -> sleep ~1s
        let pause = throttle_pause(1 << 20, Duration::ZERO, 1 << 20);
        assert!((pause.as_secs_f64() - 1.0).abs() < 1e-6);

        // already behind schedule -> no sleep
        let pause = throttle_pause(1 << 20, Duration::from_secs(10), 1 << 20);
        assert_eq!(pause, Duration::ZERO);
    }

    #[tokio::test]
    async fn unthrottled_stream_passes_bytes_through() {
        use futures::StreamExt;
        let data = b"matroska bytes".to_vec();
        let counter = Arc::new(AtomicU64::new(0));
        let mut stream = std::pin::pin!(throttled_stream(
            std::io::Cursor::new(data.clone()),
            0,
            Arc::clone(&counter)
        ));
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, data);
        assert_eq!(counter.load(Ordering::Relaxed), data.len() as u64);
    }

    #[tokio::test]
    async fn throttled_stream_preserves_content() {
        use futures::StreamExt;
        let data = vec![7u8; 1024];
        // generous rate: no meaningful sleep, just the throttled code path
        let mut stream = std::pin::pin!(throttled_stream(
            std::io::Cursor::new(data.clone()),
            u64::MAX / 2,
            Arc::new(AtomicU64::new(0))
        ));
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, data);
    }
}
