// Dispatch configuration.

use std::time::Duration;

/// Multi-worker strategy selector (`PLEXBEAM_MULTI_MODE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiMode {
    /// Fixed-size chunks, one FIFO, lowest pending index to any idle worker.
    Simple,
    /// One calibrated proportional slice per worker.
    BigSplit,
    /// Chunked with calibration, per-worker queues, prefetch, stealing and
    /// endgame duplication.
    #[default]
    Swarm,
}

impl MultiMode {
    pub fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Self::Simple),
            "B" => Some(Self::BigSplit),
            "C" => Some(Self::Swarm),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub mode: MultiMode,
    /// Target chunk length in seconds (`PLEXBEAM_CHUNK_DURATION`).
    pub chunk_duration: f64,
    /// Main-loop tick.
    pub poll_interval: Duration,
    /// Single-worker poll cap (~2 h at 250 ms).
    pub poll_cap: u64,
    /// Every Nth poll emits progress in the single-worker loop.
    pub progress_every: u64,
    /// Progressive chunk-0 download cadence.
    pub progressive_interval: Duration,
    /// Stage whole input files ahead of submission
    /// (`PLEXBEAM_STAGED_UPLOAD`).
    pub staged_upload: bool,
    /// Skip the pull proxy and beam-stream even to https workers
    /// (`PLEXBEAM_BEAM_DIRECT`).
    pub beam_direct: bool,
    /// Path of the real transcoder for the fast-start safety net; `None`
    /// disables fast-start.
    pub real_transcoder: Option<std::path::PathBuf>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: MultiMode::Swarm,
            chunk_duration: 300.0,
            poll_interval: Duration::from_millis(250),
            poll_cap: 28_800,
            progress_every: 4,
            progressive_interval: Duration::from_secs(2),
            staged_upload: false,
            beam_direct: false,
            real_transcoder: None,
        }
    }
}

impl DispatchConfig {
    /// Cumulative chunk-failure budget: `2 * n_chunks`.
    pub fn failure_threshold(&self, n_chunks: usize) -> u32 {
        (n_chunks as u32).saturating_mul(2)
    }
}
