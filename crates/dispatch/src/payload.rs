// Job payload construction shared by every dispatch strategy.

use beam_proto::{
    Arguments, CARTRIDGE_VERSION, InputSpec, JobId, JobPayload, Metadata, OUTPUT_SENTINEL,
    OutputSpec, SessionId, Source, SplitInfo, SubtitleSpec,
};
use invocation::{OutputKind, ParsedInvocation};

/// Map the argv encoder name to the worker contract's codec family.
pub fn normalize_video_codec(codec: &str) -> String {
    match codec {
        "libx264" | "h264" | "h264_nvenc" | "h264_qsv" | "h264_vaapi" => "h264".to_owned(),
        "libx265" | "hevc" | "x265" | "hevc_nvenc" | "hevc_qsv" | "hevc_vaapi" => {
            "hevc".to_owned()
        }
        other => other.to_owned(),
    }
}

pub fn normalize_audio_codec(codec: &str) -> String {
    invocation::substitute_codec_token(codec).to_owned()
}

fn arguments_for(inv: &ParsedInvocation, seek_override: Option<f64>) -> Arguments {
    Arguments {
        video_codec: inv
            .video_codec_out
            .as_deref()
            .map(normalize_video_codec),
        audio_codec: inv.audio_codec_out.as_deref().map(normalize_audio_codec),
        video_bitrate: inv.bitrate.clone(),
        resolution: inv.resolution.clone(),
        seek: seek_override.or(if inv.seek_sec > 0.0 {
            Some(inv.seek_sec)
        } else {
            None
        }),
        tone_mapping: inv.tone_map,
        subtitle: SubtitleSpec {
            mode: inv.subtitle_mode.clone(),
        },
        raw_args: inv.worker_args(OUTPUT_SENTINEL),
    }
}

fn output_for(inv: &ParsedInvocation) -> OutputSpec {
    let kind = match inv.output_kind {
        OutputKind::Dash => "dash",
        OutputKind::Hls => "hls",
        OutputKind::Unknown => "unknown",
    };
    OutputSpec {
        kind: kind.to_owned(),
        path: OUTPUT_SENTINEL.to_owned(),
        segment_duration: inv
            .segment_duration_sec
            .map(|d| d.round() as u32)
            .unwrap_or(4),
    }
}

fn source_for(inv: &ParsedInvocation) -> Source {
    if inv.is_plex_dialect {
        Source::Plex
    } else {
        Source::Jellyfin
    }
}

/// Payload for a whole-timeline single-worker job.
pub fn build_single_payload(
    inv: &ParsedInvocation,
    session: &SessionId,
    job_id: JobId,
    beam_stream: bool,
    pull_url: Option<String>,
    staged_input: Option<String>,
) -> JobPayload {
    let input = if inv.input_is_url() {
        InputSpec::http(inv.input_path.clone())
    } else {
        InputSpec::file(inv.input_path.clone())
    };
    JobPayload {
        job_id,
        input,
        output: output_for(inv),
        arguments: arguments_for(inv, None),
        source: source_for(inv),
        beam_stream,
        pull_url,
        staged_input,
        callback_url: None,
        metadata: Metadata {
            cartridge_version: CARTRIDGE_VERSION.to_owned(),
            session_id: session.clone(),
            split_info: None,
        },
    }
}

/// Payload for one chunk (or split slice) of the timeline.
///
/// `ss`/`t` are absolute source coordinates. Beamed chunks carry the
/// interval in the remuxed stream itself, so their `seek` is cleared; disk
/// readers get it via `split_info`.
#[allow(clippy::too_many_arguments)]
pub fn build_chunk_payload(
    inv: &ParsedInvocation,
    session: &SessionId,
    job_id: JobId,
    ss: f64,
    t: f64,
    worker_index: usize,
    total_workers: usize,
    beam_stream: bool,
    pull_url: Option<String>,
) -> JobPayload {
    let input = if beam_stream || pull_url.is_some() {
        // the worker never touches the original path; keep it for logs
        InputSpec::file(inv.input_path.clone())
    } else if inv.input_is_url() {
        InputSpec::http(inv.input_path.clone())
    } else {
        InputSpec::file(inv.input_path.clone())
    };
    let seek_override = if beam_stream || pull_url.is_some() {
        None
    } else {
        Some(ss)
    };
    JobPayload {
        job_id,
        input,
        output: output_for(inv),
        arguments: arguments_for(inv, seek_override),
        source: source_for(inv),
        beam_stream,
        pull_url,
        staged_input: None,
        callback_url: None,
        metadata: Metadata {
            cartridge_version: CARTRIDGE_VERSION.to_owned(),
            session_id: session.clone(),
            split_info: Some(SplitInfo {
                worker_index,
                total_workers,
                ss,
                t,
            }),
        },
    }
}
