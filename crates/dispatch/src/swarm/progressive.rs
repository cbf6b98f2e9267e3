// Progressive chunk-0 download.
//
// A safety net for the player's ~120 s first-segment budget: while chunk 0
// is still encoding, this loop copies whatever segments its worker has
// produced into the output directory (skip base applied) and gets the
// manifest rewritten and POSTed as soon as an init segment and one media
// segment exist. It terminates when chunk 0's worker reports completion —
// the ordered emission path takes over from there and skips everything
// already on disk.

use std::path::PathBuf;

use beam_client::WorkerClient;
use beam_proto::{JobId, JobState};
use segmenter::{Aggregator, ManifestPoster};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::source::WorkerSegmentSource;

/// Consecutive transport failures before the loop gives up; the ordered
/// path and the fast-start child still cover the session.
const MAX_CONSECUTIVE_ERRORS: u32 = 30;

pub(crate) struct ProgressiveChunk0 {
    pub client: WorkerClient,
    pub job_id: JobId,
    pub output_dir: PathBuf,
    pub skip_to_segment: u64,
    pub poster: ManifestPoster,
    pub interval: std::time::Duration,
}

impl ProgressiveChunk0 {
    pub fn spawn(self, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(token).await;
        })
    }

    async fn run(self, token: CancellationToken) {
        let source = WorkerSegmentSource::new(self.client.clone(), self.job_id.clone())
            .with_token(token.child_token());
        let mut aggregator =
            Aggregator::new(self.output_dir, self.skip_to_segment, self.poster);
        let mut errors = 0u32;
        debug!(job_id = %self.job_id, "progressive chunk-0 loop started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            match aggregator.drain_live(&source, true).await {
                Ok(outcome) => {
                    errors = 0;
                    if outcome.new_files > 0 {
                        debug!(
                            new_files = outcome.new_files,
                            vid = outcome.vid_count,
                            "progressive pass copied segments"
                        );
                    }
                }
                Err(e) => {
                    errors += 1;
                    warn!(error = %e, errors, "progressive pass failed");
                    if errors >= MAX_CONSECUTIVE_ERRORS {
                        warn!("progressive chunk-0 loop giving up");
                        break;
                    }
                    continue;
                }
            }

            match self.client.status(&self.job_id).await {
                Ok(status) if status.status == Some(JobState::Completed) => {
                    // one last sweep so the tail segments are not left to
                    // the ordered path alone
                    if let Err(e) = aggregator.drain_live(&source, true).await {
                        warn!(error = %e, "final progressive sweep failed");
                    }
                    info!(job_id = %self.job_id, "chunk 0 complete, progressive loop done");
                    break;
                }
                Ok(status)
                    if matches!(
                        status.status,
                        Some(JobState::Failed) | Some(JobState::Cancelled)
                    ) =>
                {
                    warn!(job_id = %self.job_id, "chunk 0 job ended abnormally");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    errors += 1;
                    if errors >= MAX_CONSECUTIVE_ERRORS {
                        warn!(error = %e, "progressive chunk-0 loop giving up");
                        break;
                    }
                }
            }
        }
    }
}
