// Single-worker dispatcher: one job covering the whole timeline.

use beam_client::UploadHandle;
use beam_proto::{JobId, JobState};
use segmenter::Aggregator;
use tracing::{debug, error, info, warn};

use crate::context::{DispatchCtx, DispatchOutcome};
use crate::error::DispatchError;
use crate::payload::build_single_payload;
use crate::pool::Worker;
use crate::progress::{ProgressReporter, ProgressSnapshot};
use crate::source::WorkerSegmentSource;

pub struct SingleDispatcher<'a> {
    ctx: &'a DispatchCtx,
    worker: Worker,
}

impl<'a> SingleDispatcher<'a> {
    pub fn new(ctx: &'a DispatchCtx, worker: Worker) -> Self {
        Self { ctx, worker }
    }

    pub async fn run(&self) -> Result<DispatchOutcome, DispatchError> {
        let job_id = JobId::single(&self.ctx.session);
        let mut upload: Option<UploadHandle> = None;
        let mut pull_id: Option<String> = None;
        let mut stage_id: Option<String> = None;

        let result = self
            .dispatch(&job_id, &mut upload, &mut pull_id, &mut stage_id)
            .await;

        // Cleanup runs on every exit path: kill the upload, cancel the
        // worker job, unlink staged inputs.
        if let Some(handle) = upload.take() {
            handle.abort();
        }
        if let Err(e) = self.worker.client.cancel(&job_id).await {
            debug!(error = %e, "job cancel after run (worker may have finished)");
        }
        if let Some(id) = stage_id.take() {
            if let Err(e) = self.worker.client.delete_stage(&id).await {
                warn!(error = %e, "stage cleanup failed");
            }
        }
        if let (Some(id), Some(proxy)) = (pull_id.take(), self.ctx.pull_proxy.as_ref()) {
            if let Err(e) = proxy.delete(&id).await {
                warn!(error = %e, "pull proxy cleanup failed");
            }
        }

        result
    }

    async fn dispatch(
        &self,
        job_id: &JobId,
        upload: &mut Option<UploadHandle>,
        pull_id: &mut Option<String>,
        stage_id: &mut Option<String>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let ctx = self.ctx;
        let inv = &ctx.invocation;

        // Input-handling decision table: local reads the disk, beam (and
        // plain-http remote) gets a byte stream, https remote pulls from
        // the proxy.
        let mut beam_stream = self.worker.wants_beam_stream();
        let mut pull_url = None;
        if self.worker.wants_pull_proxy() && !ctx.config.beam_direct {
            let proxy = ctx.pull_proxy.as_ref().ok_or_else(|| {
                DispatchError::job_failed(
                    job_id.to_string(),
                    "https worker requires a pull proxy and none is configured",
                )
            })?;
            let id = job_id.to_string();
            pull_url = Some(
                proxy
                    .upload_interval(&id, &inv.input_path, None, None)
                    .await?,
            );
            *pull_id = Some(id);
        } else if self.worker.wants_pull_proxy() {
            // beam-direct override: stream even to https workers
            beam_stream = true;
        }

        let mut staged_input = None;
        if ctx.config.staged_upload && beam_stream && !inv.input_is_url() {
            // optional optimization: ship the whole file ahead, then run a
            // normal disk job against the staged copy
            let id = format!("{job_id}_stage");
            let handle = ctx.uploader.start_staged(
                &self.worker.client,
                &id,
                std::path::Path::new(&inv.input_path),
                &ctx.token,
            )?;
            let bytes = handle.join().await?;
            info!(bytes, stage = %id, "input staged on worker");
            *stage_id = Some(id.clone());
            staged_input = Some(id);
            beam_stream = false;
        }

        let payload = build_single_payload(
            inv,
            &ctx.session,
            job_id.clone(),
            beam_stream,
            pull_url,
            staged_input,
        );
        ctx.events.log_event(
            "single_dispatch",
            serde_json::json!({
                "worker": self.worker.url,
                "job_id": job_id.to_string(),
                "beam_stream": beam_stream,
            }),
        );
        self.worker.client.submit(&payload).await?;

        if beam_stream {
            *upload = Some(ctx.uploader.start_stream(
                &self.worker.client,
                job_id,
                &inv.input_path,
                None,
                None,
                &ctx.token,
            )?);
        }

        self.poll_until_done(job_id).await
    }

    async fn poll_until_done(&self, job_id: &JobId) -> Result<DispatchOutcome, DispatchError> {
        let ctx = self.ctx;
        let reporter = ProgressReporter::new(ctx.http.clone(), ctx.invocation.progress_url.clone());
        let mut aggregator = Aggregator::new(
            ctx.invocation.output_dir.clone(),
            ctx.invocation.skip_to_segment,
            ctx.poster.clone(),
        );
        let source = WorkerSegmentSource::new(self.worker.client.clone(), job_id.clone())
            .with_token(ctx.token.child_token());

        let mut interval = tokio::time::interval(ctx.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut emitted_any = false;

        for poll in 0..ctx.config.poll_cap {
            tokio::select! {
                _ = ctx.token.cancelled() => return Err(DispatchError::Cancelled),
                _ = interval.tick() => {}
            }

            let status = match self.worker.client.status(job_id).await {
                Ok(status) => status,
                Err(e) if e.is_retryable() => {
                    // one missed health probe during dispatch marks the
                    // worker dead
                    if self.worker.client.health().await.is_err() {
                        error!(worker = %self.worker.url, "worker died mid-dispatch");
                        return Err(DispatchError::job_failed(
                            job_id.to_string(),
                            "worker stopped answering",
                        ));
                    }
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            // Every fourth poll (~1 Hz) both keep-alive channels fire, even
            // while the job is still queued and out_time_us is 0 — silence
            // on either channel times the session out after ~60 s.
            if poll % ctx.config.progress_every == 0 {
                if status.status == Some(JobState::Running) {
                    reporter.update(ProgressSnapshot {
                        frame: status.frame,
                        fps: status.fps,
                        speed: status.speed,
                        out_time_us: status.out_time_ms,
                    });
                }
                reporter.emit_once().await;
            }

            match status.status {
                Some(JobState::Running) => {
                    if poll % ctx.config.progress_every == 0 {
                        match aggregator.drain_live(&source, true).await {
                            Ok(outcome) => emitted_any |= outcome.new_files > 0,
                            Err(e) => warn!(error = %e, "mid-run aggregation pass failed"),
                        }
                    }
                }
                Some(JobState::Completed) => {
                    let outcome = aggregator.drain_live(&source, true).await?;
                    emitted_any |= outcome.new_files > 0;
                    reporter.update(ProgressSnapshot {
                        frame: status.frame,
                        fps: 0.0,
                        speed: 0.0,
                        out_time_us: status.out_time_ms,
                    });
                    reporter.emit_terminal().await;
                    info!(job_id = %job_id, "single-worker job completed");
                    return Ok(DispatchOutcome {
                        emitted_any: true,
                        completed: true,
                    });
                }
                Some(JobState::Failed) | Some(JobState::Cancelled) => {
                    return Err(DispatchError::job_failed(
                        job_id.to_string(),
                        status
                            .error
                            .unwrap_or_else(|| "worker reported failure".to_owned()),
                    ));
                }
                // pending/queued (or a sparse document): keep waiting
                _ => {}
            }
        }

        // Partial successes count: the media server tolerates a short
        // stream better than a dead transcoder.
        if emitted_any {
            warn!(polls = ctx.config.poll_cap, "poll budget exhausted with partial output");
            Ok(DispatchOutcome {
                emitted_any: true,
                completed: false,
            })
        } else {
            Err(DispatchError::PollBudgetExhausted {
                polls: ctx.config.poll_cap,
            })
        }
    }
}
