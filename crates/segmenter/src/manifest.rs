// The manifest first-POST gate.
//
// The media server tolerates a late manifest but not an early one: POSTing
// before an init segment and a media segment exist in the output directory
// makes the player fetch segments that 404 and kill the session. The gate
// is an explicit three-state machine; re-POSTs happen only when the
// manifest's md5 changes.

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::error::SegmentError;

/// Rewrite `startNumber="1"` to the player-requested starting segment.
///
/// Idempotent: once rewritten the attribute no longer equals `"1"` and a
/// second pass finds nothing to replace. `skip_to_segment <= 1` is a no-op.
pub fn rewrite_start_number(manifest: &str, skip_to_segment: u64) -> String {
    if skip_to_segment <= 1 {
        return manifest.to_owned();
    }
    manifest.replace(
        "startNumber=\"1\"",
        &format!("startNumber=\"{skip_to_segment}\""),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    NoManifest,
    ReadyNotPosted,
    Posted,
}

/// What the caller should do with an offered manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Conditions not met yet (or content unchanged); do nothing.
    Hold,
    /// POST this body now.
    Post,
}

/// Pure state machine deciding when a manifest may be POSTed.
#[derive(Debug)]
pub struct ManifestGate {
    state: GateState,
    last_posted_md5: Option<md5::Digest>,
}

impl Default for ManifestGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestGate {
    pub fn new() -> Self {
        Self {
            state: GateState::NoManifest,
            last_posted_md5: None,
        }
    }

    /// Offer the current manifest bytes together with the on-disk facts.
    pub fn offer(&mut self, manifest: &[u8], init_present: bool, media_present: bool) -> GateDecision {
        let digest = md5::compute(manifest);
        match self.state {
            GateState::NoManifest | GateState::ReadyNotPosted => {
                if init_present && media_present {
                    self.state = GateState::ReadyNotPosted;
                    GateDecision::Post
                } else {
                    GateDecision::Hold
                }
            }
            GateState::Posted => {
                if self.last_posted_md5 == Some(digest) {
                    GateDecision::Hold
                } else {
                    GateDecision::Post
                }
            }
        }
    }

    /// Record a successful POST of `manifest`.
    pub fn mark_posted(&mut self, manifest: &[u8]) {
        self.last_posted_md5 = Some(md5::compute(manifest));
        self.state = GateState::Posted;
    }

    pub fn has_posted(&self) -> bool {
        self.state == GateState::Posted
    }
}

/// Gate plus transport: shares one gate across the progressive chunk-0
/// loop and the normal aggregation path so the at-most-once-per-md5 rule
/// holds no matter which path sees the manifest first.
#[derive(Debug, Clone)]
pub struct ManifestPoster {
    http: reqwest::Client,
    callback_url: Option<String>,
    gate: Arc<Mutex<ManifestGate>>,
}

impl ManifestPoster {
    pub fn new(http: reqwest::Client, callback_url: Option<String>) -> Self {
        Self {
            http,
            callback_url,
            gate: Arc::new(Mutex::new(ManifestGate::new())),
        }
    }

    pub fn has_posted(&self) -> bool {
        self.gate.lock().expect("gate poisoned").has_posted()
    }

    /// Offer manifest bytes; POSTs when the gate allows it. Returns whether
    /// a POST went out.
    pub async fn offer(
        &self,
        manifest: &[u8],
        init_present: bool,
        media_present: bool,
    ) -> Result<bool, SegmentError> {
        let Some(url) = self.callback_url.as_deref() else {
            return Ok(false);
        };
        let decision = {
            let mut gate = self.gate.lock().expect("gate poisoned");
            gate.offer(manifest, init_present, media_present)
        };
        if decision == GateDecision::Hold {
            return Ok(false);
        }

        debug!(url, bytes = manifest.len(), "posting manifest");
        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/dash+xml")
            .body(manifest.to_vec())
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SegmentError::protocol(format!(
                "manifest callback answered {}",
                response.status()
            )));
        }

        self.gate
            .lock()
            .expect("gate poisoned")
            .mark_posted(manifest);
        info!(url, "manifest posted");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MPD: &str = r#"<?xml version="1.0"?><MPD><SegmentTemplate startNumber="1" duration="4"/></MPD>"#;

    #[test]
    fn start_number_rewrite_is_idempotent() {
        let once = rewrite_start_number(MPD, 6);
        assert!(once.contains("startNumber=\"6\""));
        assert!(!once.contains("startNumber=\"1\""));
        let twice = rewrite_start_number(&once, 6);
        assert_eq!(once, twice);
    }

    #[test]
    fn start_number_rewrite_noop_without_skip() {
        assert_eq!(rewrite_start_number(MPD, 0), MPD);
        assert_eq!(rewrite_start_number(MPD, 1), MPD);
    }

    #[test]
    fn gate_holds_until_init_and_media_exist() {
        let mut gate = ManifestGate::new();
        assert_eq!(gate.offer(MPD.as_bytes(), false, false), GateDecision::Hold);
        assert_eq!(gate.offer(MPD.as_bytes(), true, false), GateDecision::Hold);
        assert_eq!(gate.offer(MPD.as_bytes(), false, true), GateDecision::Hold);
        assert_eq!(gate.offer(MPD.as_bytes(), true, true), GateDecision::Post);
    }

    #[test]
    fn gate_rate_limits_by_md5() {
        let mut gate = ManifestGate::new();
        assert_eq!(gate.offer(MPD.as_bytes(), true, true), GateDecision::Post);
        gate.mark_posted(MPD.as_bytes());

        // unchanged content: held
        assert_eq!(gate.offer(MPD.as_bytes(), true, true), GateDecision::Hold);

        // content changed: posted again, still in Posted state
        let updated = MPD.replace("duration=\"4\"", "duration=\"4\" minBufferTime=\"2\"");
        assert_eq!(gate.offer(updated.as_bytes(), true, true), GateDecision::Post);
        gate.mark_posted(updated.as_bytes());
        assert_eq!(gate.offer(updated.as_bytes(), true, true), GateDecision::Hold);
        assert!(gate.has_posted());
    }

    #[test]
    fn unposted_gate_reposts_on_next_offer() {
        // a failed POST leaves the gate un-marked; the next offer fires again
        let mut gate = ManifestGate::new();
        assert_eq!(gate.offer(MPD.as_bytes(), true, true), GateDecision::Post);
        assert_eq!(gate.offer(MPD.as_bytes(), true, true), GateDecision::Post);
    }
}
