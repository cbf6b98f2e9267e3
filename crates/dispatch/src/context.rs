// Shared dispatch context and the event-log seam.

use std::path::PathBuf;
use std::sync::Arc;

use beam_client::{BeamUploader, ClientConfig, PullProxyClient};
use beam_proto::SessionId;
use invocation::ParsedInvocation;
use segmenter::ManifestPoster;
use tokio_util::sync::CancellationToken;

/// Where structured coordinator events go (the global
/// `cartridge_events.log`). The binary owns the file; dispatch only emits.
pub trait EventSink: Send + Sync {
    fn log_event(&self, kind: &str, detail: serde_json::Value);
}

/// Sink that drops everything; used by tests and bare library callers.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn log_event(&self, _kind: &str, _detail: serde_json::Value) {}
}

/// Everything a dispatcher needs beyond its worker list.
pub struct DispatchCtx {
    pub invocation: ParsedInvocation,
    pub session: SessionId,
    pub config: crate::DispatchConfig,
    pub client_config: ClientConfig,
    pub http: reqwest::Client,
    pub uploader: BeamUploader,
    pub pull_proxy: Option<PullProxyClient>,
    pub poster: ManifestPoster,
    pub events: Arc<dyn EventSink>,
    /// Per-session scratch space for chunk staging directories.
    pub staging_root: PathBuf,
    pub token: CancellationToken,
}

impl DispatchCtx {
    pub fn staging_dir(&self, chunk: usize) -> PathBuf {
        self.staging_root.join(format!("chunk{chunk}"))
    }
}

/// What a dispatch strategy reports back to the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOutcome {
    /// At least one segment landed in the output directory. Partial
    /// successes still exit 0: the media server tolerates a short stream
    /// better than a dead transcoder.
    pub emitted_any: bool,
    /// The full timeline was emitted.
    pub completed: bool,
}

impl DispatchOutcome {
    pub fn complete() -> Self {
        Self {
            emitted_any: true,
            completed: true,
        }
    }
}
