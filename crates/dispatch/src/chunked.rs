// Mode A: simple chunked dispatch.
//
// One FIFO of pending chunk indices; any idle worker takes the lowest one.
// Downloads run in the background per worker; emission stays strictly in
// chunk-index order through the shared ordered-emission driver.

use std::collections::HashMap;

use beam_proto::{JobId, JobState};
use segmenter::{Aggregator, StagedChunk};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::assign::{ActiveJob, cleanup_job, start_chunk_job};
use crate::chunk::{ChunkState, ChunkTable};
use crate::context::{DispatchCtx, DispatchOutcome};
use crate::error::DispatchError;
use crate::pool::Worker;
use crate::progress::{ProgressReporter, ProgressSnapshot, approximate_out_time_us};
use crate::source::WorkerSegmentSource;

/// Message from a background chunk download back to the main loop.
pub(crate) struct DownloadDone {
    pub chunk: usize,
    pub result: Result<StagedChunk, segmenter::SegmentError>,
}

pub struct ChunkedDispatcher<'a> {
    ctx: &'a DispatchCtx,
    workers: Vec<Worker>,
}

struct Slot {
    job: Option<ActiveJob>,
}

impl<'a> ChunkedDispatcher<'a> {
    pub fn new(ctx: &'a DispatchCtx, workers: Vec<Worker>) -> Self {
        Self { ctx, workers }
    }

    pub async fn run(&self, duration_sec: f64) -> Result<DispatchOutcome, DispatchError> {
        let ctx = self.ctx;
        let inv = &ctx.invocation;
        let remaining = duration_sec - inv.seek_sec;
        let mut table = ChunkTable::split(inv.seek_sec, remaining, ctx.config.chunk_duration);
        if table.len() <= 1 {
            return Err(DispatchError::NotSplittable);
        }
        let threshold = ctx.config.failure_threshold(table.len());
        info!(
            chunks = table.len(),
            workers = self.workers.len(),
            "mode A dispatch starting"
        );

        let mut slots: Vec<Slot> = self.workers.iter().map(|_| Slot { job: None }).collect();
        let mut aggregator = Aggregator::new(
            inv.output_dir.clone(),
            inv.skip_to_segment,
            ctx.poster.clone(),
        );
        let mut staged_ready: HashMap<usize, StagedChunk> = HashMap::new();
        let (done_tx, mut done_rx) = mpsc::channel::<DownloadDone>(self.workers.len() * 2 + 4);

        let reporter = ProgressReporter::new(ctx.http.clone(), inv.progress_url.clone());
        let keepalive_token = ctx.token.child_token();
        let keepalive = reporter.spawn_loop(keepalive_token.clone());

        let mut interval = tokio::time::interval(ctx.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut emitted_any = false;

        let run_result = loop {
            tokio::select! {
                _ = ctx.token.cancelled() => break Err(DispatchError::Cancelled),
                _ = interval.tick() => {}
            }

            // Background downloads that finished since last tick.
            while let Ok(done) = done_rx.try_recv() {
                match done.result {
                    Ok(staged) => {
                        table.mark_completed(done.chunk, staged.vid_count, staged.aud_count);
                        staged_ready.insert(done.chunk, staged);
                    }
                    Err(e) => {
                        warn!(chunk = done.chunk, error = %e, "chunk download failed");
                        table.fail(done.chunk);
                    }
                }
            }

            // Poll running jobs.
            for (idx, slot) in slots.iter_mut().enumerate() {
                let Some((job_id, chunk_idx)) =
                    slot.job.as_ref().map(|j| (j.job_id.clone(), j.chunk))
                else {
                    continue;
                };
                let worker = &self.workers[idx];
                match worker.client.status(&job_id).await {
                    Ok(status) => match status.status {
                        Some(JobState::Completed) => {
                            debug!(chunk = chunk_idx, worker = %worker.url, "chunk encoded");
                            table.mark_downloading(chunk_idx);
                            let job = slot.job.take().expect("job present");
                            self.spawn_download(worker, &job, chunk_idx == 0, done_tx.clone());
                        }
                        Some(JobState::Failed) | Some(JobState::Cancelled) => {
                            warn!(
                                chunk = chunk_idx,
                                error = status.error.as_deref().unwrap_or("unknown"),
                                "chunk job failed"
                            );
                            let job = slot.job.take().expect("job present");
                            cleanup_job(ctx, worker, &job).await;
                            table.fail(chunk_idx);
                        }
                        _ => {}
                    },
                    Err(e) if e.is_retryable() => {
                        if worker.client.health().await.is_err() {
                            error!(worker = %worker.url, "worker died; returning chunk");
                            let job = slot.job.take().expect("job present");
                            cleanup_job(ctx, worker, &job).await;
                            table.fail(chunk_idx);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "status poll rejected");
                        let job = slot.job.take().expect("job present");
                        cleanup_job(ctx, worker, &job).await;
                        table.fail(chunk_idx);
                    }
                }
            }

            if table.failures() >= threshold {
                break Err(DispatchError::TooManyChunkFailures {
                    failures: table.failures(),
                    threshold,
                });
            }

            // FIFO assignment: lowest pending chunk to any idle worker.
            for (idx, slot) in slots.iter_mut().enumerate() {
                if slot.job.is_some() {
                    continue;
                }
                let Some(chunk_idx) = table.first_pending() else {
                    break;
                };
                let job_id = JobId::chunk(&ctx.session, chunk_idx);
                match start_chunk_job(
                    ctx,
                    &self.workers[idx],
                    idx,
                    self.workers.len(),
                    table.get(chunk_idx),
                    job_id.clone(),
                )
                .await
                {
                    Ok(job) => {
                        table.assign(chunk_idx, idx, job_id);
                        slot.job = Some(job);
                    }
                    Err(e) => {
                        warn!(chunk = chunk_idx, error = %e, "chunk submission failed");
                        table.fail(chunk_idx);
                    }
                }
            }

            // Ordered emission.
            match emit_ready(&mut table, &mut staged_ready, &mut aggregator).await {
                Ok(count) => emitted_any |= count > 0,
                Err(e) => break Err(e),
            }

            // Forged progress for the keep-alive loop.
            let out_time_us = approximate_out_time_us(
                table.completed_count(),
                self.ctx.config.chunk_duration,
                table.earliest_running_elapsed(),
            );
            reporter.update(ProgressSnapshot {
                frame: out_time_us / 41_666, // ~24 fps
                fps: 24.0,
                speed: 1.0,
                out_time_us,
            });

            if table.all_completed() && table.next_processable() >= table.len() {
                break Ok(DispatchOutcome::complete());
            }
        };

        keepalive_token.cancel();
        let _ = keepalive.await;

        // Cancel anything still running, whatever the exit reason.
        for (idx, slot) in slots.iter().enumerate() {
            if let Some(job) = &slot.job {
                cleanup_job(ctx, &self.workers[idx], job).await;
            }
        }
        reporter.emit_terminal().await;

        match run_result {
            Ok(outcome) => Ok(outcome),
            Err(e) if emitted_any => {
                warn!(error = %e, "mode A ended early with partial output");
                Ok(DispatchOutcome {
                    emitted_any: true,
                    completed: false,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn spawn_download(
        &self,
        worker: &Worker,
        job: &ActiveJob,
        primary: bool,
        done_tx: mpsc::Sender<DownloadDone>,
    ) {
        let source = WorkerSegmentSource::new(worker.client.clone(), job.job_id.clone())
            .with_token(self.ctx.token.child_token());
        let staging = self.ctx.staging_dir(job.chunk);
        let chunk = job.chunk;
        tokio::spawn(async move {
            let result = Aggregator::stage_chunk(&source, &staging, primary).await;
            let _ = done_tx.send(DownloadDone { chunk, result }).await;
        });
    }
}

/// Emit every staged chunk the cursor allows, in index order. Returns the
/// number of chunks emitted.
pub(crate) async fn emit_ready(
    table: &mut ChunkTable,
    staged_ready: &mut HashMap<usize, StagedChunk>,
    aggregator: &mut Aggregator,
) -> Result<usize, DispatchError> {
    let mut emitted = 0;
    loop {
        let cursor = table.next_processable();
        if cursor >= table.len() || table.get(cursor).state != ChunkState::Completed {
            break;
        }
        let Some(staged) = staged_ready.remove(&cursor) else {
            break;
        };
        aggregator.emit_staged(&staged, cursor == 0).await?;
        // staging space is per-chunk scratch; reclaim as soon as emitted
        let _ = tokio::fs::remove_dir_all(&staged.dir).await;
        table.advance_cursor(cursor);
        emitted += 1;
        debug!(chunk = cursor, "chunk emitted in order");
    }
    Ok(emitted)
}
