// Shared HTTP client configuration and construction.

use std::time::Duration;

use reqwest::Client;

use crate::error::BeamError;

/// Timeout and credential settings shared by every worker/proxy client.
///
/// The values mirror the wall budgets of the dispatch loop: the 250 ms tick
/// must never block behind a status poll for more than 5 s, submits get
/// 30 s, and long-haul upload bodies get hours.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Shared key sent as `X-API-Key` on worker requests; `None` disables
    /// the header entirely.
    pub api_key: Option<String>,
    pub connect_timeout: Duration,
    /// Health probes and per-tick status polls.
    pub status_timeout: Duration,
    /// Job submission (`POST /transcode`).
    pub submit_timeout: Duration,
    /// One media-segment download.
    pub segment_timeout: Duration,
    /// A beam-stream upload body, end to end.
    pub upload_timeout: Duration,
    /// A full-file staged upload body, end to end.
    pub staged_upload_timeout: Duration,
    /// Beam upload throttle in bytes/s; 0 means unlimited.
    pub upload_rate_limit: u64,
    /// ffmpeg binary used for the copy-remux feeding beam uploads.
    pub ffmpeg_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            connect_timeout: Duration::from_secs(2),
            status_timeout: Duration::from_secs(5),
            submit_timeout: Duration::from_secs(30),
            segment_timeout: Duration::from_secs(120),
            upload_timeout: Duration::from_secs(7_200),
            staged_upload_timeout: Duration::from_secs(14_400),
            upload_rate_limit: 0,
            ffmpeg_path: "ffmpeg".to_owned(),
        }
    }
}

/// Build the process-wide `reqwest::Client`.
///
/// No default overall timeout is installed here; every call site applies
/// its own per-request budget from [`ClientConfig`].
pub fn create_client(config: &ClientConfig) -> Result<Client, BeamError> {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .pool_idle_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(8)
        .build()
        .map_err(BeamError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_dispatch_budgets() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.connect_timeout, Duration::from_secs(2));
        assert_eq!(cfg.status_timeout, Duration::from_secs(5));
        assert_eq!(cfg.submit_timeout, Duration::from_secs(30));
        assert_eq!(cfg.upload_timeout, Duration::from_secs(7_200));
        assert_eq!(cfg.staged_upload_timeout, Duration::from_secs(14_400));
        assert_eq!(cfg.upload_rate_limit, 0);
    }

    #[test]
    fn client_builds() {
        assert!(create_client(&ClientConfig::default()).is_ok());
    }
}
