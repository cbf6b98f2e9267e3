// Worker health document and encoder-class ranking.

use serde::{Deserialize, Serialize};

/// Hardware encoder family reported by a worker's `/health` endpoint.
///
/// Ordering is by dispatch priority: chunk 0 carries the init segments and
/// the base manifest, so the fastest encoder class must sort first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderClass {
    Nvenc,
    Qsv,
    Vaapi,
    Other,
}

impl EncoderClass {
    /// Map the `hw_accel` field of a health report to an encoder class.
    /// Unknown identifiers rank last rather than failing.
    pub fn from_hw_accel(hw_accel: &str) -> Self {
        match hw_accel.trim().to_ascii_lowercase().as_str() {
            "nvenc" | "cuda" | "nvidia" => Self::Nvenc,
            "qsv" | "quicksync" => Self::Qsv,
            "vaapi" => Self::Vaapi,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for EncoderClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Nvenc => "nvenc",
            Self::Qsv => "qsv",
            Self::Vaapi => "vaapi",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Response body of `GET /health`.
///
/// Only `status` and `hw_accel` are contractual; the rest is informational
/// and tolerated as absent so older workers keep probing healthy.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(default)]
    pub hw_accel: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub active_jobs: Option<u32>,
    #[serde(default)]
    pub ffmpeg_available: Option<bool>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy")
    }

    pub fn encoder_class(&self) -> EncoderClass {
        EncoderClass::from_hw_accel(&self.hw_accel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_priority_order() {
        let mut classes = vec![
            EncoderClass::Other,
            EncoderClass::Vaapi,
            EncoderClass::Nvenc,
            EncoderClass::Qsv,
        ];
        classes.sort();
        assert_eq!(
            classes,
            vec![
                EncoderClass::Nvenc,
                EncoderClass::Qsv,
                EncoderClass::Vaapi,
                EncoderClass::Other,
            ]
        );
    }

    #[test]
    fn hw_accel_aliases() {
        assert_eq!(EncoderClass::from_hw_accel("CUDA"), EncoderClass::Nvenc);
        assert_eq!(EncoderClass::from_hw_accel("qsv"), EncoderClass::Qsv);
        assert_eq!(EncoderClass::from_hw_accel("none"), EncoderClass::Other);
        assert_eq!(EncoderClass::from_hw_accel(""), EncoderClass::Other);
    }

    #[test]
    fn minimal_health_document_parses() {
        let report: HealthReport =
            serde_json::from_str(r#"{"status":"healthy","hw_accel":"nvenc"}"#).unwrap();
        assert!(report.is_healthy());
        assert_eq!(report.encoder_class(), EncoderClass::Nvenc);
        assert!(report.active_jobs.is_none());
    }
}
