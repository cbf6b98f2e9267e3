//! Wire types for the plexbeam worker HTTP contract.
//!
//! Everything the cartridge puts on the wire when talking to a remote GPU
//! worker lives here: the job payload posted to `/transcode`, the status and
//! health documents read back, segment listings, and the job-id grammar that
//! ties a worker-side job to a cartridge session.

mod error;
mod health;
mod job;
mod status;

pub use error::ProtoError;
pub use health::{EncoderClass, HealthReport};
pub use job::{
    Arguments, InputSpec, JobId, JobPayload, Metadata, OutputSpec, SessionId, Source, SplitInfo,
    SubtitleSpec,
};
pub use status::{JobState, JobStatus, ProbeReply, SegmentListing, SubmitAck};

/// Sentinel the cartridge writes as the final element of forwarded argv.
/// Workers resolve it to their own temp directory before exec.
pub const OUTPUT_SENTINEL: &str = "dash";

/// Version string stamped into job metadata.
pub const CARTRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");
