use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum BeamError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("worker rejected job `{job_id}` with status `{status}`")]
    JobRejected { job_id: String, status: String },

    #[error("malformed response during {operation}: {reason}")]
    InvalidResponse {
        operation: &'static str,
        reason: String,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("failed to spawn remux process `{program}`: {source}")]
    RemuxSpawn {
        program: String,
        source: std::io::Error,
    },

    #[error("remux process exited with {status}")]
    RemuxFailed { status: std::process::ExitStatus },

    #[error("upload task aborted")]
    UploadAborted,
}

impl BeamError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>, operation: &'static str) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn invalid_response(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            operation,
            reason: reason.into(),
        }
    }

    /// Network transients and server-side errors are worth retrying within
    /// the polling cadence; everything else is a hard failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled
            | Self::InvalidUrl { .. }
            | Self::JobRejected { .. }
            | Self::InvalidResponse { .. }
            | Self::RemuxSpawn { .. }
            | Self::RemuxFailed { .. }
            | Self::UploadAborted => false,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Network { .. } | Self::Io { .. } => true,
        }
    }
}
