use beam_client::BeamError;
use segmenter::SegmentError;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatch cancelled")]
    Cancelled,

    #[error("no live workers in pool")]
    NoLiveWorkers,

    #[error("invalid pool spec `{spec}`: {reason}")]
    InvalidPoolSpec { spec: String, reason: String },

    #[error("input duration unavailable for `{input}`")]
    DurationUnknown { input: String },

    #[error("timeline too short to split, single-worker dispatch required")]
    NotSplittable,

    #[error("worker error: {source}")]
    Worker {
        #[from]
        source: BeamError,
    },

    #[error("aggregation error: {source}")]
    Segment {
        #[from]
        source: SegmentError,
    },

    #[error("job `{job_id}` failed on worker: {reason}")]
    JobFailed { job_id: String, reason: String },

    #[error("poll budget exhausted after {polls} polls")]
    PollBudgetExhausted { polls: u64 },

    #[error("chunk failure threshold reached ({failures} failures, {threshold} allowed)")]
    TooManyChunkFailures { failures: u32, threshold: u32 },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl DispatchError {
    pub fn job_failed(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::JobFailed {
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }
}
