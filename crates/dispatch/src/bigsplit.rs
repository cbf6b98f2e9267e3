// Mode B: weighted big-split.
//
// Every worker encodes a 15-second calibration probe; the timeline is then
// cut into one slice per worker, sized proportionally to calibrated fps
// (30 s floor, last slice absorbs the remainder), and each worker gets its
// slice as a single big job. Stream offsets advance as each preceding
// slice completes, exactly like chunk emission everywhere else.

use std::collections::HashMap;
use std::time::Duration;

use beam_proto::{JobId, JobState};
use segmenter::{Aggregator, StagedChunk};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::assign::{ActiveJob, cleanup_job, start_chunk_job};
use crate::chunk::{Chunk, ChunkTable};
use crate::chunked::{DownloadDone, emit_ready};
use crate::context::{DispatchCtx, DispatchOutcome};
use crate::error::DispatchError;
use crate::pool::Worker;
use crate::progress::{ProgressReporter, ProgressSnapshot, approximate_out_time_us};
use crate::source::WorkerSegmentSource;

/// Fallback fps when a calibration probe yields nothing usable.
pub const CALIBRATION_FALLBACK_FPS: u32 = 30;
/// Calibration probe length in seconds.
pub const CALIBRATION_SECONDS: f64 = 15.0;
/// Minimum slice length in seconds.
pub const SLICE_FLOOR_SECONDS: f64 = 30.0;
/// How long to wait for a usable calibration fps.
const CALIBRATION_BUDGET: Duration = Duration::from_secs(60);

/// Slice the timeline proportionally to per-worker fps.
///
/// Zero weights degrade to 1 so a pathological probe never divides the
/// pool by zero. Slices below the floor are raised to it; the last worker
/// absorbs whatever is left. Workers whose computed slice would be empty
/// get none.
pub fn proportional_split(seek_sec: f64, remaining_sec: f64, fps: &[u32]) -> Vec<(f64, f64)> {
    if remaining_sec <= 0.0 || fps.is_empty() {
        return Vec::new();
    }
    let weights: Vec<f64> = fps.iter().map(|f| (*f).max(1) as f64).collect();
    let total: f64 = weights.iter().sum();

    let mut slices = Vec::with_capacity(fps.len());
    let mut cursor = seek_sec;
    let mut left = remaining_sec;
    for (i, weight) in weights.iter().enumerate() {
        if left <= 0.0 {
            break;
        }
        let t = if i + 1 == weights.len() {
            left
        } else {
            (remaining_sec * weight / total).max(SLICE_FLOOR_SECONDS).min(left)
        };
        slices.push((cursor, t));
        cursor += t;
        left -= t;
    }
    slices
}

pub struct BigSplitDispatcher<'a> {
    ctx: &'a DispatchCtx,
    workers: Vec<Worker>,
}

impl<'a> BigSplitDispatcher<'a> {
    pub fn new(ctx: &'a DispatchCtx, workers: Vec<Worker>) -> Self {
        Self { ctx, workers }
    }

    pub async fn run(&self, duration_sec: f64) -> Result<DispatchOutcome, DispatchError> {
        let ctx = self.ctx;
        let inv = &ctx.invocation;
        let remaining = duration_sec - inv.seek_sec;
        if remaining <= SLICE_FLOOR_SECONDS {
            return Err(DispatchError::NotSplittable);
        }

        // Calibrate every worker with a 15 s probe.
        let mut fps = Vec::with_capacity(self.workers.len());
        for (idx, worker) in self.workers.iter().enumerate() {
            fps.push(self.calibrate(worker, idx).await);
        }
        ctx.events.log_event(
            "calibration",
            serde_json::json!({
                "fps": fps,
                "workers": self.workers.iter().map(|w| w.url.clone()).collect::<Vec<_>>(),
            }),
        );

        let slices = proportional_split(inv.seek_sec, remaining, &fps);
        let mut table = ChunkTable::from_slices(&slices);
        if table.len() <= 1 {
            return Err(DispatchError::NotSplittable);
        }
        info!(slices = table.len(), ?fps, "mode B dispatch starting");

        // One big job per worker, all submitted up front.
        let mut jobs: Vec<Option<ActiveJob>> = Vec::new();
        for idx in 0..table.len() {
            let job_id = JobId::split(&ctx.session, idx);
            match start_chunk_job(
                ctx,
                &self.workers[idx],
                idx,
                table.len(),
                table.get(idx),
                job_id.clone(),
            )
            .await
            {
                Ok(job) => {
                    table.assign(idx, idx, job_id);
                    jobs.push(Some(job));
                }
                Err(e) => {
                    warn!(slice = idx, error = %e, "slice submission failed");
                    table.fail(idx);
                    jobs.push(None);
                }
            }
        }

        let threshold = ctx.config.failure_threshold(table.len());
        let mut aggregator = Aggregator::new(
            inv.output_dir.clone(),
            inv.skip_to_segment,
            ctx.poster.clone(),
        );
        let mut staged_ready: HashMap<usize, StagedChunk> = HashMap::new();
        let (done_tx, mut done_rx) = mpsc::channel::<DownloadDone>(table.len() + 2);

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

            while let Ok(done) = done_rx.try_recv() {
                match done.result {
                    Ok(staged) => {
                        table.mark_completed(done.chunk, staged.vid_count, staged.aud_count);
                        staged_ready.insert(done.chunk, staged);
                    }
                    Err(e) => {
                        warn!(slice = done.chunk, error = %e, "slice download failed");
                        table.fail(done.chunk);
                    }
                }
            }

            for idx in 0..jobs.len() {
                let Some((job_id, slice)) = jobs[idx].as_ref().map(|j| (j.job_id.clone(), j.chunk))
                else {
                    continue;
                };
                let worker = &self.workers[idx];
                match worker.client.status(&job_id).await {
                    Ok(status) => match status.status {
                        Some(JobState::Completed) => {
                            debug!(slice, worker = %worker.url, "slice encoded");
                            table.mark_downloading(slice);
                            let job = jobs[idx].take().expect("job present");
                            let source =
                                WorkerSegmentSource::new(worker.client.clone(), job.job_id.clone())
                                    .with_token(ctx.token.child_token());
                            let staging = ctx.staging_dir(slice);
                            let tx = done_tx.clone();
                            tokio::spawn(async move {
                                let result =
                                    Aggregator::stage_chunk(&source, &staging, slice == 0).await;
                                let _ = tx.send(DownloadDone { chunk: slice, result }).await;
                            });
                        }
                        Some(JobState::Failed) | Some(JobState::Cancelled) => {
                            let job = jobs[idx].take().expect("job present");
                            cleanup_job(ctx, worker, &job).await;
                            table.fail(slice);
                            warn!(
                                slice,
                                error = status.error.as_deref().unwrap_or("unknown"),
                                "slice job failed"
                            );
                        }
                        _ => {}
                    },
                    Err(e) if e.is_retryable() => {
                        if worker.client.health().await.is_err() {
                            let job = jobs[idx].take().expect("job present");
                            cleanup_job(ctx, worker, &job).await;
                            table.fail(slice);
                            warn!(worker = %worker.url, "worker died mid-slice");
                        }
                    }
                    Err(e) => {
                        let job = jobs[idx].take().expect("job present");
                        cleanup_job(ctx, worker, &job).await;
                        table.fail(slice);
                        warn!(error = %e, "status poll rejected");
                    }
                }
            }

            // Mode B has no reassignment: a failed slice fails the run once
            // the budget is gone, and any single failure leaves a timeline
            // hole, so bail on the first.
            if table.failures() > 0 {
                break Err(DispatchError::TooManyChunkFailures {
                    failures: table.failures(),
                    threshold,
                });
            }

            match emit_ready(&mut table, &mut staged_ready, &mut aggregator).await {
                Ok(count) => emitted_any |= count > 0,
                Err(e) => break Err(e),
            }

            let out_time_us = approximate_out_time_us(
                table.completed_count(),
                remaining / table.len() as f64,
                table.earliest_running_elapsed(),
            );
            reporter.update(ProgressSnapshot {
                frame: out_time_us / 41_666,
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
        for (idx, job) in jobs.iter().enumerate() {
            if let Some(job) = job {
                cleanup_job(ctx, &self.workers[idx], job).await;
            }
        }
        reporter.emit_terminal().await;

        match run_result {
            Ok(outcome) => Ok(outcome),
            Err(e) if emitted_any => {
                warn!(error = %e, "mode B ended early with partial output");
                Ok(DispatchOutcome {
                    emitted_any: true,
                    completed: false,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Run the 15 s calibration probe and record the first non-zero fps.
    async fn calibrate(&self, worker: &Worker, idx: usize) -> u32 {
        let ctx = self.ctx;
        let job_id = JobId::calibration(&ctx.session, idx);
        let probe = Chunk {
            index: idx,
            ss_sec: 0.0,
            t_sec: CALIBRATION_SECONDS,
            state: crate::chunk::ChunkState::Pending,
            worker_idx: None,
            job_id: None,
            start_epoch: None,
            vid_seg_count: 0,
            aud_seg_count: 0,
            endgame_duped: false,
            dup: None,
        };

        let job = match start_chunk_job(
            ctx,
            worker,
            idx,
            self.workers.len(),
            &probe,
            job_id.clone(),
        )
        .await
        {
            Ok(job) => job,
            Err(e) => {
                warn!(worker = %worker.url, error = %e, "calibration submit failed");
                return CALIBRATION_FALLBACK_FPS;
            }
        };

        let deadline = tokio::time::Instant::now() + CALIBRATION_BUDGET;
        let mut observed = 0u32;
        while tokio::time::Instant::now() < deadline && !ctx.token.is_cancelled() {
            tokio::time::sleep(ctx.config.poll_interval).await;
            match worker.client.status(&job_id).await {
                Ok(status) => {
                    if status.fps > 0.0 {
                        observed = status.fps.round() as u32;
                        break;
                    }
                    if matches!(
                        status.status,
                        Some(JobState::Failed) | Some(JobState::Cancelled)
                    ) {
                        break;
                    }
                    if status.status == Some(JobState::Completed) {
                        break;
                    }
                }
                Err(_) => break,
            }
        }

        cleanup_job(ctx, worker, &job).await;
        let fps = if observed == 0 {
            CALIBRATION_FALLBACK_FPS
        } else {
            observed.max(1)
        };
        debug!(worker = %worker.url, fps, "calibration result");
        fps
    }
}
