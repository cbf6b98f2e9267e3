// Adapter: a worker job's /beam/segments endpoints as a SegmentSource.
//
// Segment fetches retry with backoff here; a staged chunk download that
// trips over one transient 5xx should not cost the whole chunk a failure.

use std::path::Path;

use async_trait::async_trait;
use beam_client::{RetryAction, RetryPolicy, WorkerClient, retry_with_backoff};
use beam_proto::JobId;
use segmenter::{SegmentError, SegmentSource};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct WorkerSegmentSource {
    client: WorkerClient,
    job_id: JobId,
    retry: RetryPolicy,
    token: CancellationToken,
}

impl WorkerSegmentSource {
    pub fn new(client: WorkerClient, job_id: JobId) -> Self {
        Self {
            client,
            job_id,
            retry: RetryPolicy::default(),
            token: CancellationToken::new(),
        }
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }
}

fn to_segment_error(e: beam_client::BeamError) -> SegmentError {
    SegmentError::transport(e.to_string(), e.is_retryable())
}

#[async_trait]
impl SegmentSource for WorkerSegmentSource {
    async fn list(&self) -> Result<Vec<String>, SegmentError> {
        // listings refresh on the next pass anyway; no retry here
        self.client
            .list_segments(&self.job_id)
            .await
            .map_err(to_segment_error)
    }

    async fn fetch_to(&self, name: &str, dest: &Path) -> Result<u64, SegmentError> {
        retry_with_backoff(&self.retry, &self.token, |_| async {
            match self.client.fetch_segment_to(&self.job_id, name, dest).await {
                Ok(bytes) => RetryAction::Success(bytes),
                Err(e) if e.is_retryable() => RetryAction::Retry(e),
                Err(e) => RetryAction::Fail(e),
            }
        })
        .await
        .map_err(to_segment_error)
    }

    async fn fetch_bytes(&self, name: &str) -> Result<Vec<u8>, SegmentError> {
        retry_with_backoff(&self.retry, &self.token, |_| async {
            match self.client.fetch_segment_bytes(&self.job_id, name).await {
                Ok(bytes) => RetryAction::Success(bytes),
                Err(e) if e.is_retryable() => RetryAction::Retry(e),
                Err(e) => RetryAction::Fail(e),
            }
        })
        .await
        .map_err(to_segment_error)
    }
}
