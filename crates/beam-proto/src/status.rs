// Status, submission and listing documents read back from a worker.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a worker-side job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// States a `POST /transcode` response may carry for a successful
    /// submission.
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Pending | Self::Queued | Self::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Response body of `POST /transcode`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitAck {
    pub job_id: String,
    pub status: JobState,
    #[serde(default)]
    pub message: Option<String>,
}

/// Response body of `GET /status/<job_id>`.
///
/// `out_time_ms` is microseconds despite the name; the field inherits
/// ffmpeg's `-progress` key verbatim.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobStatus {
    pub status: Option<JobState>,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub fps: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub frame: u64,
    #[serde(default)]
    pub out_time_ms: u64,
    #[serde(default)]
    pub current_segment: Option<u64>,
    #[serde(default)]
    pub eta_seconds: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Response body of `GET /beam/segments/<job_id>`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SegmentListing {
    #[serde(default)]
    pub files: Vec<String>,
}

/// Response body of `GET /probe?path=…` on an `@local` worker.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeReply {
    pub duration: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_and_terminal_partitions() {
        for state in [JobState::Pending, JobState::Queued, JobState::Running] {
            assert!(state.is_accepted());
            assert!(!state.is_terminal());
        }
        for state in [JobState::Completed, JobState::Failed, JobState::Cancelled] {
            assert!(state.is_terminal());
            assert!(!state.is_accepted());
        }
    }

    #[test]
    fn status_tolerates_sparse_documents() {
        let status: JobStatus = serde_json::from_str(r#"{"status":"running"}"#).unwrap();
        assert_eq!(status.status, Some(JobState::Running));
        assert_eq!(status.frame, 0);
        assert!(status.error.is_none());

        let status: JobStatus = serde_json::from_str(
            r#"{"status":"failed","error":"encoder exploded","fps":0.0}"#,
        )
        .unwrap();
        assert_eq!(status.status, Some(JobState::Failed));
        assert_eq!(status.error.as_deref(), Some("encoder exploded"));
    }

    #[test]
    fn empty_segment_listing() {
        let listing: SegmentListing = serde_json::from_str(r#"{"files":[]}"#).unwrap();
        assert!(listing.files.is_empty());
        let listing: SegmentListing = serde_json::from_str("{}").unwrap();
        assert!(listing.files.is_empty());
    }
}
