// Starting one chunk job on one worker: proxy staging, submission, and
// the beam upload, shared by the chunked dispatchers.

use beam_client::UploadHandle;
use beam_proto::JobId;
use tracing::debug;

use crate::chunk::Chunk;
use crate::context::DispatchCtx;
use crate::error::DispatchError;
use crate::payload::build_chunk_payload;
use crate::pool::Worker;

/// A chunk job running on a worker, with whatever transfer feeds it.
#[derive(Debug)]
pub struct ActiveJob {
    pub chunk: usize,
    pub job_id: JobId,
    pub upload: Option<UploadHandle>,
    /// Pull-proxy object to delete on cleanup, when the proxy path was used.
    pub pull_id: Option<String>,
}

/// Submit `chunk` to `worker` as `job_id`. Prefetch promotion never goes
/// through here: a promoted chunk keeps its `_pre` job and its in-flight
/// upload, with no further HTTP.
pub async fn start_chunk_job(
    ctx: &DispatchCtx,
    worker: &Worker,
    worker_idx: usize,
    total_workers: usize,
    chunk: &Chunk,
    job_id: JobId,
) -> Result<ActiveJob, DispatchError> {
    let inv = &ctx.invocation;
    let beam_stream = worker.wants_beam_stream()
        || (worker.wants_pull_proxy() && ctx.config.beam_direct);

    let mut pull_url = None;
    let mut pull_id = None;
    if worker.wants_pull_proxy() && !ctx.config.beam_direct {
        let proxy = ctx.pull_proxy.as_ref().ok_or_else(|| {
            DispatchError::job_failed(
                job_id.to_string(),
                "https worker requires a pull proxy and none is configured",
            )
        })?;
        let id = job_id.to_string();
        pull_url = Some(
            proxy
                .upload_interval(&id, &inv.input_path, Some(chunk.ss_sec), Some(chunk.t_sec))
                .await?,
        );
        pull_id = Some(id);
    }

    let payload = build_chunk_payload(
        inv,
        &ctx.session,
        job_id.clone(),
        chunk.ss_sec,
        chunk.t_sec,
        worker_idx,
        total_workers,
        beam_stream,
        pull_url,
    );
    worker.client.submit(&payload).await?;
    debug!(job_id = %job_id, chunk = chunk.index, worker = %worker.url, "chunk submitted");

    let upload = if beam_stream {
        Some(ctx.uploader.start_stream(
            &worker.client,
            &job_id,
            &inv.input_path,
            Some(chunk.ss_sec),
            Some(chunk.t_sec),
            &ctx.token,
        )?)
    } else {
        None
    };

    Ok(ActiveJob {
        chunk: chunk.index,
        job_id,
        upload,
        pull_id,
    })
}

/// Tear an active job down: abort the transfer, best-effort cancel the
/// worker job, delete the proxy object.
pub async fn cleanup_job(ctx: &DispatchCtx, worker: &Worker, job: &ActiveJob) {
    if let Some(upload) = &job.upload {
        upload.abort();
    }
    let _ = worker.client.cancel(&job.job_id).await;
    if let (Some(id), Some(proxy)) = (&job.pull_id, ctx.pull_proxy.as_ref()) {
        let _ = proxy.delete(id).await;
    }
}
