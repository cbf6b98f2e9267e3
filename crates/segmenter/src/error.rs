#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("segment transport error: {reason}")]
    Transport { reason: String, retryable: bool },

    #[error("manifest POST failed: {source}")]
    ManifestPost {
        #[from]
        source: reqwest::Error,
    },

    #[error("protocol violation: {reason}")]
    Protocol { reason: String },
}

impl SegmentError {
    pub fn transport(reason: impl Into<String>, retryable: bool) -> Self {
        Self::Transport {
            reason: reason.into(),
            retryable,
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }
}
