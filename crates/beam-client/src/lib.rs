//! HTTP clients for plexbeam workers and the S3 pull proxy.
//!
//! One shared `reqwest::Client` is built once per process; per-operation
//! timeouts are applied request-side so a slow status poll can never stall
//! the dispatcher tick. Uploads stream an ffmpeg copy-remux child straight
//! into a chunked request body.

mod beam;
mod config;
mod error;
mod pull;
mod retry;
mod worker;

pub use beam::{BeamUploader, UploadHandle};
pub use config::{ClientConfig, create_client};
pub use error::BeamError;
pub use pull::PullProxyClient;
pub use retry::{RetryAction, RetryPolicy, retry_with_backoff};
pub use worker::WorkerClient;
