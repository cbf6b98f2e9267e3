// Environment configuration.
//
// The cartridge has no command line of its own; every flag it receives
// belongs to the media server. All knobs are environment variables, most
// baked in by the installer.

use std::path::PathBuf;

use dispatch::MultiMode;

use crate::error::CliError;

#[derive(Debug, Clone)]
pub struct Config {
    /// `PLEXBEAM_WORKER_POOL`: `url1[@tag],url2[@tag],…`
    pub worker_pool: Option<String>,
    /// `PLEXBEAM_REMOTE_WORKER_URL`: single-worker fallback entry.
    pub single_worker_url: Option<String>,
    /// `PLEXBEAM_API_KEY`: shared key sent as `X-API-Key`.
    pub api_key: Option<String>,
    /// `PLEXBEAM_MULTI_MODE`: A, B or C (default C).
    pub multi_mode: MultiMode,
    /// `PLEXBEAM_CHUNK_DURATION` seconds (default 300).
    pub chunk_duration: f64,
    /// `PLEXBEAM_UPLOAD_RATE` bytes/s, 0 = unlimited.
    pub upload_rate: u64,
    /// `PLEXBEAM_BEAM_DIRECT`: stream even to https workers.
    pub beam_direct: bool,
    /// `PLEXBEAM_STAGED_UPLOAD`: ship whole files ahead of submission.
    pub staged_upload: bool,
    /// `PLEXBEAM_PULL_PROXY_URL`: localhost S3 pull proxy.
    pub pull_proxy_url: Option<String>,
    /// `PLEXBEAM_PULL_DIR`: where the proxy parks staged objects; swept on
    /// exit.
    pub pull_dir: Option<PathBuf>,
    /// `PLEXBEAM_STATE_DIR`: session logs, fingerprints, master log.
    pub state_dir: PathBuf,
    /// `PLEXBEAM_FFMPEG` / `PLEXBEAM_FFPROBE` binaries.
    pub ffmpeg: String,
    pub ffprobe: String,
    /// `PLEXBEAM_REAL_TRANSCODER`: the backup of the intercepted binary.
    pub real_transcoder: Option<PathBuf>,
    /// `PLEXBEAM_LOG`: tracing filter directive.
    pub log_filter: String,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, CliError> {
        let multi_mode = match var("PLEXBEAM_MULTI_MODE") {
            Some(value) => MultiMode::from_env_value(&value).ok_or_else(|| {
                CliError::Config(format!("PLEXBEAM_MULTI_MODE=`{value}`, expected A, B or C"))
            })?,
            None => MultiMode::default(),
        };
        let chunk_duration = match var("PLEXBEAM_CHUNK_DURATION") {
            Some(value) => value.parse().map_err(|_| {
                CliError::Config(format!("PLEXBEAM_CHUNK_DURATION=`{value}` is not a number"))
            })?,
            None => 300.0,
        };
        let upload_rate = match var("PLEXBEAM_UPLOAD_RATE") {
            Some(value) => value.parse().map_err(|_| {
                CliError::Config(format!("PLEXBEAM_UPLOAD_RATE=`{value}` is not a number"))
            })?,
            None => 0,
        };
        let state_dir = var("PLEXBEAM_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var("HOME")
                    .map(|home| PathBuf::from(home).join(".plexbeam"))
                    .unwrap_or_else(|_| PathBuf::from("/var/lib/plexbeam"))
            });

        Ok(Self {
            worker_pool: var("PLEXBEAM_WORKER_POOL"),
            single_worker_url: var("PLEXBEAM_REMOTE_WORKER_URL"),
            api_key: var("PLEXBEAM_API_KEY"),
            multi_mode,
            chunk_duration,
            upload_rate,
            beam_direct: var("PLEXBEAM_BEAM_DIRECT")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            staged_upload: var("PLEXBEAM_STAGED_UPLOAD")
                .map(|v| v == "1")
                .unwrap_or(false),
            pull_proxy_url: var("PLEXBEAM_PULL_PROXY_URL"),
            pull_dir: var("PLEXBEAM_PULL_DIR").map(PathBuf::from),
            state_dir,
            ffmpeg: var("PLEXBEAM_FFMPEG").unwrap_or_else(|| "ffmpeg".to_owned()),
            ffprobe: var("PLEXBEAM_FFPROBE").unwrap_or_else(|| "ffprobe".to_owned()),
            real_transcoder: var("PLEXBEAM_REAL_TRANSCODER").map(PathBuf::from),
            log_filter: var("PLEXBEAM_LOG").unwrap_or_else(|| {
                "cartridge=info,dispatch=info,segmenter=info,beam_client=info,localrun=info"
                    .to_owned()
            }),
        })
    }
}
