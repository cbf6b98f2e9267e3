// Argument parser: transcoder argv -> ParsedInvocation.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, trace};

use crate::dialect::PLEX_ONLY_FLAGS;
use crate::error::InvocationError;
use crate::rewrite::decimalize_stream_specifiers;

static SCALE_WH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"scale(?:_[a-z0-9]+)?=w=(\d+):h=(-?\d+)").unwrap());
static SCALE_SHORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"scale(?:_[a-z0-9]+)?=(\d+):(-?\d+)").unwrap());

/// Streaming container family of the output target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Dash,
    Hls,
    Unknown,
}

/// Semantic view of one transcoder invocation.
///
/// `raw_args` keeps the original argv, with one deviation: a relative
/// output target is absolutized against the working directory and the same
/// substitution is applied to the matching `raw_args` element, so forwarding
/// and local exec agree on where the output lands.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedInvocation {
    pub input_path: String,
    pub output_target: PathBuf,
    pub output_dir: PathBuf,
    pub output_kind: OutputKind,
    pub video_codec_out: Option<String>,
    pub audio_codec_out: Option<String>,
    pub bitrate: Option<String>,
    pub resolution: Option<String>,
    pub segment_duration_sec: Option<f64>,
    pub seek_sec: f64,
    pub subtitle_mode: Option<String>,
    pub tone_map: bool,
    pub hw_accel_hint: Option<String>,
    pub manifest_callback_url: Option<String>,
    pub progress_url: Option<String>,
    /// Player-requested starting segment number; 0 when absent.
    pub skip_to_segment: u64,
    pub is_plex_dialect: bool,
    pub raw_args: Vec<String>,
}

impl ParsedInvocation {
    /// Parse a transcoder argv (without argv[0]) against a working
    /// directory for relative-path resolution.
    pub fn parse(argv: &[String], cwd: &Path) -> Result<Self, InvocationError> {
        if argv.is_empty() {
            return Err(InvocationError::EmptyArgv);
        }

        let mut raw_args: Vec<String> = argv.to_vec();

        let mut input_path: Option<String> = None;
        let mut video_codec_out = None;
        let mut audio_codec_out = None;
        let mut bitrate = None;
        let mut segment_duration_sec = None;
        let mut seek_sec = 0.0f64;
        let mut subtitle_mode: Option<String> = None;
        let mut tone_map = false;
        let mut hw_accel_hint = None;
        let mut manifest_name: Option<String> = None;
        let mut progress_url = None;
        let mut skip_to_segment = 0u64;
        let mut format_flag: Option<String> = None;
        let mut filters = String::new();

        let is_plex_dialect = argv
            .iter()
            .any(|a| PLEX_ONLY_FLAGS.contains(&a.as_str()));

        let mut i = 0;
        while i < argv.len() {
            let flag = argv[i].as_str();
            let value = argv.get(i + 1).map(|s| s.as_str());
            let mut consumed_value = true;
            match flag {
                "-i" => {
                    if let Some(v) = value {
                        input_path = Some(strip_file_scheme(v));
                    }
                }
                "-ss" => {
                    if let Some(v) = value {
                        // first -ss wins; Plex repeats it per output leg
                        if seek_sec == 0.0 {
                            seek_sec = v.parse().unwrap_or(0.0);
                        }
                    }
                }
                "-codec:0" | "-c:v" | "-c:v:0" | "-vcodec" => {
                    video_codec_out = value.map(str::to_owned);
                }
                "-codec:1" | "-c:a" | "-c:a:0" | "-acodec" => {
                    audio_codec_out = value.map(str::to_owned);
                }
                "-b:v" | "-b:0" | "-maxrate:0" | "-maxrate:v" => {
                    if bitrate.is_none() {
                        bitrate = value.map(str::to_owned);
                    }
                }
                "-seg_duration" | "-hls_time" => {
                    segment_duration_sec = value.and_then(|v| v.parse().ok());
                }
                "-hwaccel" => {
                    hw_accel_hint = value.map(str::to_owned);
                }
                "-filter_complex" | "-vf" | "-af" => {
                    if let Some(v) = value {
                        filters.push_str(v);
                        filters.push(';');
                    }
                }
                "-progressurl" => {
                    progress_url = value.map(str::to_owned);
                }
                "-skip_to_segment" => {
                    if let Some(v) = value {
                        skip_to_segment =
                            v.parse().map_err(|_| InvocationError::InvalidValue {
                                flag: flag.to_owned(),
                                value: v.to_owned(),
                            })?;
                    }
                }
                "-manifest_name" => {
                    manifest_name = value.map(str::to_owned);
                }
                "-sn" => {
                    subtitle_mode = Some("none".to_owned());
                    consumed_value = false;
                }
                "-f" => {
                    format_flag = value.map(str::to_owned);
                }
                _ => consumed_value = false,
            }
            i += if consumed_value && value.is_some() { 2 } else { 1 };
        }

        let input_path = input_path.ok_or(InvocationError::MissingInput)?;

        if filters.contains("subtitles=") || filters.contains("ass=") {
            subtitle_mode = Some("burn".to_owned());
        }
        if filters.contains("tonemap") {
            tone_map = true;
        }
        let resolution = parse_resolution(&filters);

        // Trailing positional is the output target.
        let last = raw_args
            .last()
            .cloned()
            .ok_or(InvocationError::EmptyArgv)?;
        if last.starts_with('-') {
            return Err(InvocationError::FlagAsOutput(last));
        }
        let output_target = if Path::new(&last).is_absolute() {
            PathBuf::from(&last)
        } else {
            let absolute = cwd.join(&last);
            let idx = raw_args.len() - 1;
            raw_args[idx] = absolute.to_string_lossy().into_owned();
            trace!(from = %last, to = %raw_args[idx], "absolutized output target");
            absolute
        };
        let output_dir = output_target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| cwd.to_path_buf());

        let output_kind = detect_output_kind(format_flag.as_deref(), &output_target);

        // The manifest callback defaults to the progress URL's sibling
        // `manifest` endpoint unless the server named one explicitly.
        let manifest_callback_url = match manifest_name {
            Some(name) if name.starts_with("http://") || name.starts_with("https://") => {
                Some(name)
            }
            _ => progress_url.as_deref().map(sibling_manifest_url),
        };

        debug!(
            input = %input_path,
            output = %output_target.display(),
            kind = ?output_kind,
            seek = seek_sec,
            skip_to_segment,
            plex = is_plex_dialect,
            "parsed transcoder invocation"
        );

        Ok(Self {
            input_path,
            output_target,
            output_dir,
            output_kind,
            video_codec_out,
            audio_codec_out,
            bitrate,
            resolution,
            segment_duration_sec,
            seek_sec,
            subtitle_mode,
            tone_map,
            hw_accel_hint,
            manifest_callback_url,
            progress_url,
            skip_to_segment,
            is_plex_dialect,
            raw_args,
        })
    }

    /// `skip_to_segment` expressed as the numbering offset applied to every
    /// emitted media segment.
    pub fn skip_base(&self) -> u64 {
        self.skip_to_segment.saturating_sub(1)
    }

    /// True when the input is an http(s) URL rather than a local file.
    pub fn input_is_url(&self) -> bool {
        self.input_path.starts_with("http://") || self.input_path.starts_with("https://")
    }

    /// Argv forwarded to a worker: verbatim `raw_args` with hex stream
    /// specifiers decimalized and the output target replaced by the
    /// sentinel the worker resolves to its own temp dir.
    pub fn worker_args(&self, sentinel: &str) -> Vec<String> {
        let mut args = decimalize_stream_specifiers(&self.raw_args);
        if let Some(last) = args.last_mut() {
            *last = sentinel.to_owned();
        }
        args
    }
}

/// Strip Jellyfin's `file:` input prefix, quoted or bare.
fn strip_file_scheme(value: &str) -> String {
    if let Some(rest) = value.strip_prefix("file:\"") {
        rest.strip_suffix('"').unwrap_or(rest).to_owned()
    } else if let Some(rest) = value.strip_prefix("file:") {
        rest.to_owned()
    } else {
        value.to_owned()
    }
}

fn detect_output_kind(format_flag: Option<&str>, target: &Path) -> OutputKind {
    match format_flag {
        Some("dash") => return OutputKind::Dash,
        Some("hls") => return OutputKind::Hls,
        _ => {}
    }
    match target.extension().and_then(|e| e.to_str()) {
        Some("mpd") => OutputKind::Dash,
        Some("m3u8") => OutputKind::Hls,
        _ => {
            // Plex names the DASH output directory target literally `dash`.
            if target.file_name().and_then(|n| n.to_str()) == Some("dash") {
                OutputKind::Dash
            } else {
                OutputKind::Unknown
            }
        }
    }
}

fn parse_resolution(filters: &str) -> Option<String> {
    let caps = SCALE_WH
        .captures(filters)
        .or_else(|| SCALE_SHORT.captures(filters))?;
    Some(format!("{}x{}", &caps[1], &caps[2]))
}

fn sibling_manifest_url(progress_url: &str) -> String {
    match progress_url.rsplit_once('/') {
        Some((base, _leaf)) => format!("{base}/manifest"),
        None => progress_url.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    fn plex_argv() -> Vec<String> {
        argv(&[
            "-loglevel_plex", "error",
            "-ss", "0",
            "-i", "/m/film.mkv",
            "-map", "0:#0x1d",
            "-codec:0", "libx264",
            "-crf", "21",
            "-filter_complex", "[0:0]scale=w=1920:h=1080[0]",
            "-codec:1", "aac_lc",
            "-b:v", "4000k",
            "-f", "dash",
            "-seg_duration", "4",
            "-progressurl", "http://127.0.0.1:32400/video/:/transcode/session/abc/progress",
            "-skip_to_segment", "5",
            "Transcode/Sessions/abc/dash",
        ])
    }

    #[test]
    fn happy_path_plex_invocation() {
        let cwd = Path::new("/var/lib/plex");
        let parsed = ParsedInvocation::parse(&plex_argv(), cwd).unwrap();

        assert_eq!(parsed.input_path, "/m/film.mkv");
        assert_eq!(
            parsed.output_target,
            PathBuf::from("/var/lib/plex/Transcode/Sessions/abc/dash")
        );
        assert_eq!(
            parsed.output_dir,
            PathBuf::from("/var/lib/plex/Transcode/Sessions/abc")
        );
        assert_eq!(parsed.output_kind, OutputKind::Dash);
        assert_eq!(parsed.video_codec_out.as_deref(), Some("libx264"));
        assert_eq!(parsed.audio_codec_out.as_deref(), Some("aac_lc"));
        assert_eq!(parsed.bitrate.as_deref(), Some("4000k"));
        assert_eq!(parsed.resolution.as_deref(), Some("1920x1080"));
        assert_eq!(parsed.segment_duration_sec, Some(4.0));
        assert_eq!(parsed.skip_to_segment, 5);
        assert_eq!(parsed.skip_base(), 4);
        assert!(parsed.is_plex_dialect);
        assert_eq!(
            parsed.progress_url.as_deref(),
            Some("http://127.0.0.1:32400/video/:/transcode/session/abc/progress")
        );
        assert_eq!(
            parsed.manifest_callback_url.as_deref(),
            Some("http://127.0.0.1:32400/video/:/transcode/session/abc/manifest")
        );
        // relative target absolutized inside raw_args too
        assert_eq!(
            parsed.raw_args.last().map(String::as_str),
            Some("/var/lib/plex/Transcode/Sessions/abc/dash")
        );
        // ...but hex specifiers stay verbatim until worker_args
        assert!(parsed.raw_args.contains(&"0:#0x1d".to_owned()));
    }

    #[test]
    fn worker_args_decimalize_and_append_sentinel() {
        let parsed =
            ParsedInvocation::parse(&plex_argv(), Path::new("/var/lib/plex")).unwrap();
        let args = parsed.worker_args("dash");
        assert_eq!(args.last().map(String::as_str), Some("dash"));
        assert!(args.contains(&"0:#29".to_owned()));
        assert!(!args.iter().any(|a| a.contains("0x")));
    }

    #[test]
    fn jellyfin_file_prefix_is_stripped() {
        let args = argv(&["-i", "file:/media/show.mkv", "-c:v", "h264", "out.mpd"]);
        let parsed = ParsedInvocation::parse(&args, Path::new("/tmp")).unwrap();
        assert_eq!(parsed.input_path, "/media/show.mkv");
        assert!(!parsed.is_plex_dialect);

        let args = argv(&["-i", "file:\"/media/show.mkv\"", "out.mpd"]);
        let parsed = ParsedInvocation::parse(&args, Path::new("/tmp")).unwrap();
        assert_eq!(parsed.input_path, "/media/show.mkv");
    }

    #[test]
    fn output_kind_detection() {
        let cases = [
            (argv(&["-i", "/a.mkv", "out.mpd"]), OutputKind::Dash),
            (argv(&["-i", "/a.mkv", "out.m3u8"]), OutputKind::Hls),
            (argv(&["-i", "/a.mkv", "-f", "hls", "seg"]), OutputKind::Hls),
            (argv(&["-i", "/a.mkv", "dash"]), OutputKind::Dash),
            (argv(&["-i", "/a.mkv", "out.mp4"]), OutputKind::Unknown),
        ];
        for (args, expected) in cases {
            let parsed = ParsedInvocation::parse(&args, Path::new("/tmp")).unwrap();
            assert_eq!(parsed.output_kind, expected, "argv {args:?}");
        }
    }

    #[test]
    fn http_input_is_recognized() {
        let args = argv(&["-i", "http://server:32400/library/parts/1", "dash"]);
        let parsed = ParsedInvocation::parse(&args, Path::new("/tmp")).unwrap();
        assert!(parsed.input_is_url());
    }

    #[test]
    fn subtitle_burn_and_tone_map_from_filters() {
        let args = argv(&[
            "-i", "/a.mkv",
            "-filter_complex",
            "[0:0]scale=w=1280:h=720,subtitles=/tmp/s.srt,tonemap=hable[v]",
            "dash",
        ]);
        let parsed = ParsedInvocation::parse(&args, Path::new("/tmp")).unwrap();
        assert_eq!(parsed.subtitle_mode.as_deref(), Some("burn"));
        assert!(parsed.tone_map);
        assert_eq!(parsed.resolution.as_deref(), Some("1280x720"));
    }

    #[test]
    fn missing_input_is_an_error() {
        let args = argv(&["-f", "dash", "out"]);
        assert!(matches!(
            ParsedInvocation::parse(&args, Path::new("/tmp")),
            Err(InvocationError::MissingInput)
        ));
    }

    #[test]
    fn skip_to_segment_zero_means_no_offset() {
        let args = argv(&["-i", "/a.mkv", "dash"]);
        let parsed = ParsedInvocation::parse(&args, Path::new("/tmp")).unwrap();
        assert_eq!(parsed.skip_to_segment, 0);
        assert_eq!(parsed.skip_base(), 0);
    }
}
