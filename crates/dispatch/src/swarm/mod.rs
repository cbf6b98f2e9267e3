// Mode C: BitTorrent-style swarm dispatch.
//
// Phases: seed the first W chunks round-robin; calibrate each worker from
// the fps it reports on its first chunk; distribute the remaining pending
// chunks into per-worker queues proportionally to calibrated fps; then run
// steady state — prefetch promotion, own-queue pops, tail stealing — with
// endgame duplication for the stragglers and an orphan sweep as
// defense-in-depth against races in the steal/prefetch paths.
//
// Emission to the output directory is strictly in chunk-index order no
// matter what order encodes and downloads finish in; that is the property
// that keeps the player's view of the manifest coherent mid-encode.

mod faststart;
mod progressive;
mod queues;

use std::collections::{HashMap, VecDeque};

use beam_proto::{JobId, JobState};
use segmenter::{Aggregator, StagedChunk};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::assign::{ActiveJob, cleanup_job, start_chunk_job};
use crate::chunk::{ChunkState, ChunkTable};
use crate::chunked::{DownloadDone, emit_ready};
use crate::context::{DispatchCtx, DispatchOutcome};
use crate::error::DispatchError;
use crate::pool::Worker;
use crate::progress::{ProgressReporter, ProgressSnapshot, approximate_out_time_us};
use crate::source::WorkerSegmentSource;
use faststart::FastStart;
use progressive::ProgressiveChunk0;

struct PrefetchSlot {
    chunk: usize,
    job: ActiveJob,
}

struct Slot {
    worker: Worker,
    alive: bool,
    job: Option<ActiveJob>,
    calibrated_fps: Option<u32>,
    queue: VecDeque<usize>,
    prefetch: Option<PrefetchSlot>,
}

impl Slot {
    fn is_idle(&self) -> bool {
        self.alive && self.job.is_none()
    }
}

pub struct SwarmDispatcher<'a> {
    ctx: &'a DispatchCtx,
    slots: Vec<Slot>,
}

impl<'a> SwarmDispatcher<'a> {
    pub fn new(ctx: &'a DispatchCtx, workers: Vec<Worker>) -> Self {
        let slots = workers
            .into_iter()
            .map(|worker| Slot {
                worker,
                alive: true,
                job: None,
                calibrated_fps: None,
                queue: VecDeque::new(),
                prefetch: None,
            })
            .collect();
        Self { ctx, slots }
    }

    pub async fn run(&mut self, duration_sec: f64) -> Result<DispatchOutcome, DispatchError> {
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
            workers = self.slots.len(),
            "mode C dispatch starting"
        );

        // Fast-start: the real transcoder fills the output directory while
        // the swarm spins up.
        let mut fast_start = FastStart::spawn(
            ctx.config.real_transcoder.as_deref(),
            &inv.raw_args,
            &inv.output_dir,
        );

        // Seed: chunk i to worker i.
        let seed_count = self.slots.len().min(table.len());
        for idx in 0..seed_count {
            let job_id = JobId::chunk(&ctx.session, idx);
            match start_chunk_job(
                ctx,
                &self.slots[idx].worker,
                idx,
                self.slots.len(),
                table.get(idx),
                job_id.clone(),
            )
            .await
            {
                Ok(job) => {
                    table.assign(idx, idx, job_id);
                    self.slots[idx].job = Some(job);
                }
                Err(e) => {
                    warn!(chunk = idx, error = %e, "seed submission failed");
                    table.fail(idx);
                }
            }
        }

        // Progressive chunk-0 loop: second safety net for the first
        // on-screen segments.
        let progressive_token = ctx.token.child_token();
        let progressive = if let Some(job_id) = table.get(0).job_id.clone() {
            let owner = table.get(0).worker_idx.unwrap_or(0);
            Some(
                ProgressiveChunk0 {
                    client: self.slots[owner].worker.client.clone(),
                    job_id,
                    output_dir: inv.output_dir.clone(),
                    skip_to_segment: inv.skip_to_segment,
                    poster: ctx.poster.clone(),
                    interval: ctx.config.progressive_interval,
                }
                .spawn(progressive_token.clone()),
            )
        } else {
            None
        };

        let mut aggregator = Aggregator::new(
            inv.output_dir.clone(),
            inv.skip_to_segment,
            ctx.poster.clone(),
        );
        let mut staged_ready: HashMap<usize, StagedChunk> = HashMap::new();
        let (done_tx, mut done_rx) = mpsc::channel::<DownloadDone>(self.slots.len() * 2 + 4);

        let reporter = ProgressReporter::new(ctx.http.clone(), inv.progress_url.clone());
        let keepalive_token = ctx.token.child_token();
        let keepalive = reporter.spawn_loop(keepalive_token.clone());

        let mut interval = tokio::time::interval(ctx.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut distribution_done = false;
        let mut emitted_any = false;

        let run_result = loop {
            tokio::select! {
                _ = ctx.token.cancelled() => break Err(DispatchError::Cancelled),
                _ = interval.tick() => {}
            }

            // Finished background downloads.
            while let Ok(done) = done_rx.try_recv() {
                match done.result {
                    Ok(staged) => {
                        ctx.events.log_event(
                            "chunk_downloaded",
                            serde_json::json!({
                                "chunk": done.chunk,
                                "vid_segments": staged.vid_count,
                                "aud_segments": staged.aud_count,
                            }),
                        );
                        table.mark_completed(done.chunk, staged.vid_count, staged.aud_count);
                        staged_ready.insert(done.chunk, staged);
                    }
                    Err(e) => {
                        warn!(chunk = done.chunk, error = %e, "chunk download failed");
                        ctx.events.log_event(
                            "chunk_download_failed",
                            serde_json::json!({ "chunk": done.chunk, "error": e.to_string() }),
                        );
                        table.fail(done.chunk);
                    }
                }
            }

            let live_fps = self.poll_running(&mut table, &done_tx).await;

            if table.failures() >= threshold {
                break Err(DispatchError::TooManyChunkFailures {
                    failures: table.failures(),
                    threshold,
                });
            }

            // Distribute once everyone is calibrated and the seed chunks
            // have all moved past pending.
            if !distribution_done
                && self.all_alive_calibrated()
                && (0..seed_count).all(|i| table.get(i).state != ChunkState::Pending)
            {
                self.distribute_pending(&table);
                distribution_done = true;
            }

            self.fill_idle_workers(&mut table, distribution_done).await;

            if distribution_done {
                self.start_prefetches(&table).await;
                self.endgame(&mut table).await;
            }

            self.orphan_sweep(&mut table, &done_tx).await;

            match emit_ready(&mut table, &mut staged_ready, &mut aggregator).await {
                Ok(count) => emitted_any |= count > 0,
                Err(e) => break Err(e),
            }
            if table.next_processable() > 0 && !progressive_token.is_cancelled() {
                // chunk 0 is fully emitted; the progressive loop is done
                progressive_token.cancel();
            }

            let out_time_us = approximate_out_time_us(
                table.completed_count(),
                ctx.config.chunk_duration,
                table.earliest_running_elapsed(),
            );
            reporter.update(ProgressSnapshot {
                frame: out_time_us / 41_666,
                fps: if live_fps > 0.0 { live_fps } else { 24.0 },
                speed: 1.0,
                out_time_us,
            });

            if table.all_completed() && table.next_processable() >= table.len() {
                break Ok(DispatchOutcome::complete());
            }
        };

        // Teardown, on success and failure alike.
        progressive_token.cancel();
        if let Some(handle) = progressive {
            let _ = handle.await;
        }
        keepalive_token.cancel();
        let _ = keepalive.await;
        fast_start.terminate().await;
        for slot in &self.slots {
            if let Some(job) = &slot.job {
                cleanup_job(ctx, &slot.worker, job).await;
            }
            if let Some(prefetch) = &slot.prefetch {
                cleanup_job(ctx, &slot.worker, &prefetch.job).await;
            }
        }
        reporter.emit_terminal().await;

        match run_result {
            Ok(outcome) => {
                info!("mode C dispatch complete");
                Ok(outcome)
            }
            Err(e) if emitted_any => {
                warn!(error = %e, "mode C ended early with partial output");
                Ok(DispatchOutcome {
                    emitted_any: true,
                    completed: false,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Poll every busy worker's current job. Returns the summed fps of the
    /// running jobs for the forged progress line.
    async fn poll_running(
        &mut self,
        table: &mut ChunkTable,
        done_tx: &mpsc::Sender<DownloadDone>,
    ) -> f64 {
        let ctx = self.ctx;
        let mut live_fps = 0.0;

        for idx in 0..self.slots.len() {
            if !self.slots[idx].alive {
                continue;
            }
            let Some((job_id, chunk_idx)) = self.slots[idx]
                .job
                .as_ref()
                .map(|j| (j.job_id.clone(), j.chunk))
            else {
                continue;
            };

            let status = match self.slots[idx].worker.client.status(&job_id).await {
                Ok(status) => status,
                Err(e) if e.is_retryable() => {
                    if self.slots[idx].worker.client.health().await.is_err() {
                        self.worker_died(idx, chunk_idx, table).await;
                    }
                    continue;
                }
                Err(e) => {
                    warn!(worker = %self.slots[idx].worker.url, error = %e, "status poll rejected");
                    self.worker_died(idx, chunk_idx, table).await;
                    continue;
                }
            };

            // Calibration: the first usable fps a worker reports.
            if self.slots[idx].calibrated_fps.is_none() && status.fps > 0.0 {
                let fps = (status.fps.round() as u32).max(1);
                self.slots[idx].calibrated_fps = Some(fps);
                ctx.events.log_event(
                    "worker_calibrated",
                    serde_json::json!({
                        "worker": self.slots[idx].worker.url,
                        "fps": fps,
                    }),
                );
                debug!(worker = %self.slots[idx].worker.url, fps, "worker calibrated");
            }
            if status.status == Some(JobState::Running) {
                live_fps += status.fps;
            }

            match status.status {
                Some(JobState::Completed) => {
                    self.job_completed(idx, chunk_idx, table, done_tx).await;
                }
                Some(JobState::Failed) | Some(JobState::Cancelled) => {
                    self.job_failed(
                        idx,
                        chunk_idx,
                        table,
                        status.error.as_deref().unwrap_or("unknown"),
                    )
                    .await;
                }
                _ => {}
            }
        }
        live_fps
    }

    /// A tracked job reported completed. Resolves endgame races: first
    /// completion wins, the loser is cancelled.
    async fn job_completed(
        &mut self,
        idx: usize,
        chunk_idx: usize,
        table: &mut ChunkTable,
        done_tx: &mpsc::Sender<DownloadDone>,
    ) {
        let ctx = self.ctx;
        let job = self.slots[idx].job.take().expect("job present");
        let chunk = table.get(chunk_idx);

        if chunk.state != ChunkState::Encoding {
            // The other side of an endgame duplicate already won; this job
            // is the loser.
            debug!(chunk = chunk_idx, "duplicate completion ignored");
            cleanup_job(ctx, &self.slots[idx].worker, &job).await;
            return;
        }

        let is_dup = chunk
            .dup
            .as_ref()
            .is_some_and(|(_, dup_job)| *dup_job == job.job_id);
        if is_dup {
            // Duplicate finished first: cancel the owner and adopt the
            // winner's job into the chunk record.
            if let Some(owner_idx) = chunk.worker_idx {
                if let Some(owner_job) = self.slots[owner_idx].job.take() {
                    cleanup_job(ctx, &self.slots[owner_idx].worker, &owner_job).await;
                }
            }
            let chunk = table.get_mut(chunk_idx);
            chunk.worker_idx = Some(idx);
            chunk.job_id = Some(job.job_id.clone());
            chunk.dup = None;
            info!(chunk = chunk_idx, "endgame duplicate won");
        } else if let Some((dup_idx, _)) = chunk.dup.clone() {
            // Owner finished first: cancel the duplicate.
            if let Some(dup_job) = self.slots[dup_idx].job.take() {
                cleanup_job(ctx, &self.slots[dup_idx].worker, &dup_job).await;
            }
            table.get_mut(chunk_idx).dup = None;
            info!(chunk = chunk_idx, "endgame duplicate lost to owner");
        }

        debug!(chunk = chunk_idx, worker = %self.slots[idx].worker.url, "chunk encoded");
        table.mark_downloading(chunk_idx);
        let source = WorkerSegmentSource::new(self.slots[idx].worker.client.clone(), job.job_id)
            .with_token(ctx.token.child_token());
        let staging = ctx.staging_dir(chunk_idx);
        let tx = done_tx.clone();
        tokio::spawn(async move {
            let result = Aggregator::stage_chunk(&source, &staging, chunk_idx == 0).await;
            let _ = tx.send(DownloadDone { chunk: chunk_idx, result }).await;
        });
    }

    async fn job_failed(
        &mut self,
        idx: usize,
        chunk_idx: usize,
        table: &mut ChunkTable,
        reason: &str,
    ) {
        let ctx = self.ctx;
        warn!(chunk = chunk_idx, worker = %self.slots[idx].worker.url, reason, "chunk job failed");
        let job = self.slots[idx].job.take().expect("job present");
        cleanup_job(ctx, &self.slots[idx].worker, &job).await;

        let chunk = table.get(chunk_idx);
        if chunk.state != ChunkState::Encoding {
            // a straggling duplicate failing after the chunk already won
            return;
        }
        let failed_job_is_dup = chunk
            .dup
            .as_ref()
            .is_some_and(|(_, dup_job)| *dup_job == job.job_id);
        if failed_job_is_dup {
            // the owner is still encoding; just drop the duplicate
            table.get_mut(chunk_idx).dup = None;
            return;
        }
        if let Some((dup_idx, dup_job)) = chunk.dup.clone() {
            // owner failed but a duplicate is in flight: promote it
            let chunk = table.get_mut(chunk_idx);
            chunk.worker_idx = Some(dup_idx);
            chunk.job_id = Some(dup_job);
            chunk.dup = None;
            info!(chunk = chunk_idx, "owner failed, duplicate promoted");
            return;
        }
        table.fail(chunk_idx);
    }

    /// Worker stopped answering: return its chunk, drop its prefetch, keep
    /// its queue so stealing drains it.
    async fn worker_died(&mut self, idx: usize, chunk_idx: usize, table: &mut ChunkTable) {
        error!(worker = %self.slots[idx].worker.url, "worker died mid-dispatch");
        self.slots[idx].alive = false;
        if let Some(job) = self.slots[idx].job.take() {
            if let Some(upload) = &job.upload {
                upload.abort();
            }
        }
        if let Some(prefetch) = self.slots[idx].prefetch.take() {
            if let Some(upload) = &prefetch.job.upload {
                upload.abort();
            }
        }
        self.ctx.events.log_event(
            "worker_died",
            serde_json::json!({ "worker": self.slots[idx].worker.url, "chunk": chunk_idx }),
        );

        let chunk = table.get(chunk_idx);
        if let Some((dup_idx, dup_job)) = chunk.dup.clone() {
            if dup_idx != idx {
                let chunk = table.get_mut(chunk_idx);
                chunk.worker_idx = Some(dup_idx);
                chunk.job_id = Some(dup_job);
                chunk.dup = None;
                return;
            }
        }
        if chunk.state == ChunkState::Encoding {
            table.fail(chunk_idx);
        }
    }

    fn all_alive_calibrated(&self) -> bool {
        self.slots
            .iter()
            .filter(|s| s.alive)
            .all(|s| s.calibrated_fps.is_some())
    }

    /// Phase 3: split the pending chunks into per-worker queues
    /// proportionally to calibrated fps.
    fn distribute_pending(&mut self, table: &ChunkTable) {
        let pending = table.pending_indices();
        let alive: Vec<usize> = (0..self.slots.len())
            .filter(|&i| self.slots[i].alive)
            .collect();
        let weights: Vec<u32> = alive
            .iter()
            .map(|&i| self.slots[i].calibrated_fps.unwrap_or(1))
            .collect();
        let counts = queues::proportional_counts(pending.len(), &weights);

        let mut queue_refs: Vec<VecDeque<usize>> = alive
            .iter()
            .map(|&i| std::mem::take(&mut self.slots[i].queue))
            .collect();
        queues::distribute(&pending, &counts, &mut queue_refs);
        for (pos, &i) in alive.iter().enumerate() {
            self.slots[i].queue = std::mem::take(&mut queue_refs[pos]);
        }

        self.ctx.events.log_event(
            "distribution",
            serde_json::json!({
                "pending": pending,
                "weights": weights,
                "counts": counts,
            }),
        );
        info!(?counts, "pending chunks distributed");
    }

    /// Steady state: give every idle worker something to do.
    async fn fill_idle_workers(&mut self, table: &mut ChunkTable, distribution_done: bool) {
        let ctx = self.ctx;
        let total = self.slots.len();

        for idx in 0..total {
            if !self.slots[idx].is_idle() {
                continue;
            }

            // (i) promote a prefetched chunk whose upload is already in
            // flight, if it is still pending
            if let Some(prefetch) = self.slots[idx].prefetch.take() {
                if table.get(prefetch.chunk).state == ChunkState::Pending {
                    let chunk_idx = prefetch.chunk;
                    self.dequeue_everywhere(chunk_idx);
                    table.assign(chunk_idx, idx, prefetch.job.job_id.clone());
                    self.slots[idx].job = Some(prefetch.job);
                    info!(chunk = chunk_idx, worker = idx, "prefetched chunk activated");
                    continue;
                }
                // stale prefetch: the chunk went elsewhere
                cleanup_job(ctx, &self.slots[idx].worker, &prefetch.job).await;
            }

            // (ii) own queue head
            let mut picked = None;
            while let Some(head) = self.slots[idx].queue.pop_front() {
                if table.get(head).state == ChunkState::Pending {
                    picked = Some(head);
                    break;
                }
                // stale entry, drop and keep looking
            }

            // (iii) steal the tail of the longest other queue
            if picked.is_none() {
                let queue_view: Vec<VecDeque<usize>> =
                    self.slots.iter().map(|s| s.queue.clone()).collect();
                if let Some(victim) = queues::steal_victim(&queue_view, idx) {
                    if let Some(stolen) = self.slots[victim].queue.pop_back() {
                        if table.get(stolen).state == ChunkState::Pending {
                            debug!(chunk = stolen, thief = idx, victim, "chunk stolen");
                            picked = Some(stolen);
                        }
                        // no longer pending: silently discarded, the thief
                        // retries next tick
                    }
                }
            }

            // (iv) any pending chunk no queue knows about (seed phase, or
            // a chunk that failed after its queue entry was consumed)
            if picked.is_none() && !distribution_done {
                picked = table.first_pending();
            }
            if picked.is_none() {
                if let Some(orphan) = table
                    .pending_indices()
                    .into_iter()
                    .find(|c| !self.slots.iter().any(|s| s.queue.contains(c)))
                {
                    picked = Some(orphan);
                }
            }

            let Some(chunk_idx) = picked else { continue };
            let job_id = JobId::chunk(&ctx.session, chunk_idx);
            match start_chunk_job(
                ctx,
                &self.slots[idx].worker,
                idx,
                total,
                table.get(chunk_idx),
                job_id.clone(),
            )
            .await
            {
                Ok(job) => {
                    table.assign(chunk_idx, idx, job_id);
                    self.slots[idx].job = Some(job);
                }
                Err(e) => {
                    warn!(chunk = chunk_idx, error = %e, "assignment failed");
                    table.fail(chunk_idx);
                }
            }
        }
    }

    /// Phase 5: keep an upload in flight for every busy beam worker's
    /// queue head.
    async fn start_prefetches(&mut self, table: &ChunkTable) {
        let ctx = self.ctx;
        let total = self.slots.len();

        for idx in 0..total {
            let slot = &self.slots[idx];
            if !slot.alive
                || slot.job.is_none()
                || slot.prefetch.is_some()
                || !slot.worker.wants_beam_stream()
            {
                continue;
            }
            let Some(&head) = slot.queue.front() else {
                continue;
            };
            if table.get(head).state != ChunkState::Pending {
                continue;
            }

            let job_id = JobId::prefetch(&ctx.session, head);
            match start_chunk_job(
                ctx,
                &self.slots[idx].worker,
                idx,
                total,
                table.get(head),
                job_id.clone(),
            )
            .await
            {
                Ok(job) => {
                    debug!(chunk = head, worker = idx, "prefetch upload started");
                    self.slots[idx].prefetch = Some(PrefetchSlot { chunk: head, job });
                }
                Err(e) => {
                    warn!(chunk = head, error = %e, "prefetch start failed");
                }
            }
        }
    }

    /// Phase 6: duplicate the straggler owned by the slowest worker onto an
    /// idle one. A chunk is duplicated at most once.
    async fn endgame(&mut self, table: &mut ChunkTable) {
        let ctx = self.ctx;
        if table.first_pending().is_some() {
            return;
        }
        let Some(idle_idx) = (0..self.slots.len()).find(|&i| self.slots[i].is_idle()) else {
            return;
        };

        // slowest owner first
        let candidate = table
            .iter()
            .filter(|c| {
                c.state == ChunkState::Encoding
                    && !c.endgame_duped
                    && c.dup.is_none()
                    && c.worker_idx != Some(idle_idx)
            })
            .min_by_key(|c| {
                c.worker_idx
                    .and_then(|w| self.slots[w].calibrated_fps)
                    .unwrap_or(1)
            })
            .map(|c| c.index);
        let Some(chunk_idx) = candidate else { return };

        let job_id = JobId::duplicate(&ctx.session, chunk_idx);
        match start_chunk_job(
            ctx,
            &self.slots[idle_idx].worker,
            idle_idx,
            self.slots.len(),
            table.get(chunk_idx),
            job_id.clone(),
        )
        .await
        {
            Ok(job) => {
                let chunk = table.get_mut(chunk_idx);
                chunk.endgame_duped = true;
                chunk.dup = Some((idle_idx, job_id.clone()));
                self.slots[idle_idx].job = Some(job);
                ctx.events.log_event(
                    "endgame_duplicate",
                    serde_json::json!({ "chunk": chunk_idx, "worker": idle_idx }),
                );
                info!(chunk = chunk_idx, worker = idle_idx, "endgame duplicate submitted");
            }
            Err(e) => {
                warn!(chunk = chunk_idx, error = %e, "endgame duplicate failed to start");
            }
        }
    }

    /// Phase 7: re-link chunks whose owning worker lost track of them.
    async fn orphan_sweep(&mut self, table: &mut ChunkTable, done_tx: &mpsc::Sender<DownloadDone>) {
        let orphans: Vec<(usize, usize, JobId)> = table
            .iter()
            .filter(|c| c.state == ChunkState::Encoding)
            .filter_map(|c| {
                let owner = c.worker_idx?;
                let job_id = c.job_id.clone()?;
                let tracked = self.slots[owner]
                    .job
                    .as_ref()
                    .is_some_and(|j| j.chunk == c.index);
                if tracked || !self.slots[owner].alive {
                    None
                } else {
                    Some((c.index, owner, job_id))
                }
            })
            .collect();

        for (chunk_idx, owner, job_id) in orphans {
            debug!(chunk = chunk_idx, owner, "orphan chunk re-linked");
            match self.slots[owner].worker.client.status(&job_id).await {
                Ok(status) => match status.status {
                    Some(JobState::Completed) => {
                        table.mark_downloading(chunk_idx);
                        let source = WorkerSegmentSource::new(
                            self.slots[owner].worker.client.clone(),
                            job_id,
                        )
                        .with_token(self.ctx.token.child_token());
                        let staging = self.ctx.staging_dir(chunk_idx);
                        let tx = done_tx.clone();
                        tokio::spawn(async move {
                            let result =
                                Aggregator::stage_chunk(&source, &staging, chunk_idx == 0).await;
                            let _ = tx.send(DownloadDone { chunk: chunk_idx, result }).await;
                        });
                    }
                    Some(JobState::Running) | Some(JobState::Queued) | Some(JobState::Pending) => {
                        if self.slots[owner].job.is_none() {
                            // restore busy tracking
                            self.slots[owner].job = Some(ActiveJob {
                                chunk: chunk_idx,
                                job_id,
                                upload: None,
                                pull_id: None,
                            });
                        }
                    }
                    Some(JobState::Failed) | Some(JobState::Cancelled) | None => {
                        table.fail(chunk_idx);
                    }
                },
                Err(_) => {
                    if self.slots[owner].worker.client.health().await.is_err() {
                        self.worker_died(owner, chunk_idx, table).await;
                    }
                }
            }
        }
    }

    /// Remove a chunk from every queue (it is about to start encoding).
    fn dequeue_everywhere(&mut self, chunk: usize) {
        for slot in &mut self.slots {
            slot.queue.retain(|&c| c != chunk);
        }
    }
}
