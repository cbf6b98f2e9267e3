//! Local fallback: when no remote capacity is available the cartridge
//! rewrites the invocation for whatever GPU the host has and runs the real
//! transcoder in place.
//!
//! Also home of the self-heal machinery guarding the interception point:
//! host upgrades replace the transcoder binary under us, and the backup
//! copy must be re-validated (and re-found, if need be) before every run.

mod error;
mod exec;
mod gpu;
mod rewrite;
mod selfheal;

pub use error::LocalRunError;
pub use exec::run_local;
pub use gpu::{GpuKind, detect_gpu, detect_gpu_at};
pub use rewrite::{rewrite_for_gpu, wants_gpu_rewrite};
pub use selfheal::SelfHeal;
