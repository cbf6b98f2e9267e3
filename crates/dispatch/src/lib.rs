//! Dispatch strategies: how one transcoder invocation becomes work on one
//! or more remote GPU workers.
//!
//! The pool manager probes and ranks workers; the single-worker dispatcher
//! streams one job end to end; the multi-worker dispatchers split the
//! timeline into chunks and coordinate them — simple FIFO (Mode A),
//! calibrated big-split (Mode B), or the full swarm with per-worker
//! queues, prefetch, stealing and endgame duplication (Mode C, the
//! default). The keep-alive module keeps the media server convinced a
//! plain ffmpeg is running the whole time.

mod assign;
mod bigsplit;
mod chunk;
mod chunked;
mod config;
mod context;
mod duration;
mod error;
mod payload;
mod pool;
mod progress;
mod single;
mod source;
mod swarm;

pub use bigsplit::{BigSplitDispatcher, proportional_split};
pub use chunk::{Chunk, ChunkState, ChunkTable};
pub use chunked::ChunkedDispatcher;
pub use config::{DispatchConfig, MultiMode};
pub use context::{DispatchCtx, DispatchOutcome, EventSink, NullEventSink};
pub use duration::probe_duration;
pub use error::DispatchError;
pub use payload::{
    build_chunk_payload, build_single_payload, normalize_audio_codec, normalize_video_codec,
};
pub use pool::{Worker, WorkerTag, parse_pool_spec, probe_pool};
pub use progress::{
    ProgressReporter, ProgressSnapshot, approximate_out_time_us, format_progress_line,
    format_terminal_line,
};
pub use single::SingleDispatcher;
pub use source::WorkerSegmentSource;
pub use swarm::SwarmDispatcher;
