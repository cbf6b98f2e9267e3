// Job payload schema and the job-id grammar.
//
// A job id always embeds the owning session id, so a worker can never
// confuse jobs from two cartridge runs even when both target the same
// source file. The suffix encodes the job's role in the dispatch strategy.

use serde::{Deserialize, Serialize};

use crate::ProtoError;

/// Identifier of one cartridge run: `<utc-compact-timestamp>_<pid>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Build from a pre-formatted compact UTC timestamp (`YYYYMMDDHHMMSS`)
    /// and the coordinator's pid.
    pub fn from_parts(utc_compact: &str, pid: u32) -> Self {
        Self(format!("{utc_compact}_{pid}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Worker-side job identifier.
///
/// Grammar: `<session>` for a single-worker job, `<session>_c<n>` for a
/// media chunk, `<session>_cal<i>` for a calibration probe,
/// `<session>_pre<c>` for a prefetch upload, `<session>_dup<c>` for an
/// endgame duplicate and `<session>_w<i>` for a big-split slice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn single(session: &SessionId) -> Self {
        Self(session.as_str().to_owned())
    }

    pub fn chunk(session: &SessionId, index: usize) -> Self {
        Self(format!("{session}_c{index}"))
    }

    pub fn calibration(session: &SessionId, worker_idx: usize) -> Self {
        Self(format!("{session}_cal{worker_idx}"))
    }

    pub fn prefetch(session: &SessionId, chunk: usize) -> Self {
        Self(format!("{session}_pre{chunk}"))
    }

    pub fn duplicate(session: &SessionId, chunk: usize) -> Self {
        Self(format!("{session}_dup{chunk}"))
    }

    pub fn split(session: &SessionId, worker_idx: usize) -> Self {
        Self(format!("{session}_w{worker_idx}"))
    }

    /// Escape hatch for identifiers outside the job grammar (staged-upload
    /// stage ids share the upload plumbing).
    pub fn raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which media server spawned the cartridge. Decides dialect handling on
/// the worker and whether self-heal arms locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Plex,
    Jellyfin,
}

impl std::str::FromStr for Source {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plex" => Ok(Self::Plex),
            "jellyfin" => Ok(Self::Jellyfin),
            other => Err(ProtoError::UnknownSource(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
}

impl InputSpec {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            kind: "file".to_owned(),
            path: path.into(),
        }
    }

    pub fn http(url: impl Into<String>) -> Self {
        Self {
            kind: "http".to_owned(),
            path: url.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    pub segment_duration: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtitleSpec {
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Arguments {
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub video_bitrate: Option<String>,
    pub resolution: Option<String>,
    pub seek: Option<f64>,
    #[serde(default)]
    pub tone_mapping: bool,
    #[serde(default)]
    pub subtitle: SubtitleSpec,
    /// Original argv, verbatim apart from hex-specifier decimalization and
    /// the trailing output sentinel.
    #[serde(default)]
    pub raw_args: Vec<String>,
}

/// Multi-worker split coordinates, attached to big-split jobs so a worker
/// can log which slice of the timeline it owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitInfo {
    pub worker_index: usize,
    pub total_workers: usize,
    pub ss: f64,
    pub t: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub cartridge_version: String,
    pub session_id: SessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split_info: Option<SplitInfo>,
}

/// Body of `POST /transcode`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub job_id: JobId,
    pub input: InputSpec,
    pub output: OutputSpec,
    pub arguments: Arguments,
    pub source: Source,
    pub beam_stream: bool,
    pub pull_url: Option<String>,
    pub staged_input: Option<String>,
    pub callback_url: Option<String>,
    pub metadata: Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionId {
        SessionId::from_parts("20260802T101500", 4242)
    }

    #[test]
    fn job_id_grammar() {
        let s = session();
        assert_eq!(JobId::single(&s).as_str(), "20260802T101500_4242");
        assert_eq!(JobId::chunk(&s, 3).as_str(), "20260802T101500_4242_c3");
        assert_eq!(
            JobId::calibration(&s, 1).as_str(),
            "20260802T101500_4242_cal1"
        );
        assert_eq!(JobId::prefetch(&s, 7).as_str(), "20260802T101500_4242_pre7");
        assert_eq!(JobId::duplicate(&s, 2).as_str(), "20260802T101500_4242_dup2");
        assert_eq!(JobId::split(&s, 0).as_str(), "20260802T101500_4242_w0");
    }

    #[test]
    fn payload_serializes_with_contract_keys() {
        let s = session();
        let payload = JobPayload {
            job_id: JobId::chunk(&s, 0),
            input: InputSpec::file("/m/film.mkv"),
            output: OutputSpec {
                kind: "dash".to_owned(),
                path: "dash".to_owned(),
                segment_duration: 4,
            },
            arguments: Arguments {
                video_codec: Some("h264".to_owned()),
                raw_args: vec!["-i".to_owned(), "pipe:0".to_owned(), "dash".to_owned()],
                ..Arguments::default()
            },
            source: Source::Plex,
            beam_stream: true,
            pull_url: None,
            staged_input: None,
            callback_url: None,
            metadata: Metadata {
                cartridge_version: crate::CARTRIDGE_VERSION.to_owned(),
                session_id: s,
                split_info: None,
            },
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["input"]["type"], "file");
        assert_eq!(value["output"]["type"], "dash");
        assert_eq!(value["source"], "plex");
        assert_eq!(value["beam_stream"], true);
        assert!(value["pull_url"].is_null());
        // split_info is omitted entirely when absent
        assert!(value["metadata"].get("split_info").is_none());
    }

    #[test]
    fn source_round_trip() {
        assert_eq!("plex".parse::<Source>().unwrap(), Source::Plex);
        assert_eq!("Jellyfin".parse::<Source>().unwrap(), Source::Jellyfin);
        assert!("emby".parse::<Source>().is_err());
    }
}
