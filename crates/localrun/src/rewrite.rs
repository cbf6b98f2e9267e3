// The local GPU rewrite pass.
//
// Takes the media server's software-encoder argv and produces one the
// system ffmpeg can run on NVENC or QSV: codec substitution, quality
// mapping, hardware-device injection, scale-filter conversion, and
// removal of every flag the hardware encoders (or a stock ffmpeg) reject.

use std::sync::LazyLock;

use invocation::{
    GPU_STRIP_EXACT, GPU_STRIP_PREFIXES, PLEX_ONLY_FLAGS, decimalize_token,
    substitute_codec_token, substitute_filter_dialect,
};
use regex::{Captures, Regex};
use tracing::debug;

use crate::gpu::GpuKind;

static SCALE_FILTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"scale=w=(\d+):h=(-?\d+)").unwrap());

/// The rewrite only fires when the invocation actually uses a software
/// encoder this pass knows how to replace.
pub fn wants_gpu_rewrite(args: &[String]) -> bool {
    args.iter().any(|a| a == "libx264" || a == "libx265")
}

/// Quality mapping: `-crf N` becomes NVENC `-qp N` or QSV
/// `-global_quality N+2`, both clamped to the encoders' 1..51 range.
fn map_quality(gpu: GpuKind, crf: i64) -> (&'static str, i64) {
    match gpu {
        GpuKind::Nvenc => ("-qp", crf.clamp(1, 51)),
        GpuKind::Qsv => ("-global_quality", (crf + 2).clamp(1, 51)),
    }
}

fn substitute_encoder(gpu: GpuKind, codec: &str) -> Option<&'static str> {
    match (codec, gpu) {
        ("libx264", GpuKind::Nvenc) => Some("h264_nvenc"),
        ("libx264", GpuKind::Qsv) => Some("h264_qsv"),
        ("libx265", GpuKind::Nvenc) => Some("hevc_nvenc"),
        ("libx265", GpuKind::Qsv) => Some("hevc_qsv"),
        _ => None,
    }
}

fn rewrite_scale_filter(gpu: GpuKind, filter: &str) -> String {
    SCALE_FILTER
        .replace_all(filter, |caps: &Captures<'_>| {
            let (w, h) = (&caps[1], &caps[2]);
            match gpu {
                // decode stays in software; upload frames and scale on the
                // QSV engine
                GpuKind::Qsv => format!(
                    "format=nv12,hwupload=extra_hw_frames=64,scale_qsv=w={w}:h={h}"
                ),
                // software scale, then hand frames to the CUDA encoder
                GpuKind::Nvenc => format!("scale=w={w}:h={h},format=nv12,hwupload_cuda"),
            }
        })
        .into_owned()
}

fn is_stripped_flag(flag: &str) -> bool {
    PLEX_ONLY_FLAGS.contains(&flag)
        || GPU_STRIP_EXACT.contains(&flag)
        || GPU_STRIP_PREFIXES.iter().any(|p| flag.starts_with(p))
        || flag == "-loglevel"
}

/// Produce the GPU argv. The caller has already checked
/// [`wants_gpu_rewrite`]; an argv without a known software encoder passes
/// through with only the dialect fixes applied.
pub fn rewrite_for_gpu(args: &[String], gpu: GpuKind) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(args.len() + 8);

    // Fixed preamble: quiet logging plus the hardware device setup.
    out.push("-loglevel".to_owned());
    out.push("warning".to_owned());
    match gpu {
        GpuKind::Qsv => {
            out.push("-init_hw_device".to_owned());
            out.push("qsv=hw".to_owned());
            out.push("-filter_hw_device".to_owned());
            out.push("hw".to_owned());
        }
        GpuKind::Nvenc => {
            out.push("-hwaccel".to_owned());
            out.push("cuda".to_owned());
            out.push("-hwaccel_output_format".to_owned());
            out.push("cuda".to_owned());
        }
    }

    let mut crf: Option<i64> = None;
    let mut i = 0;
    while i < args.len() {
        let token = args[i].as_str();

        if token == "-crf" {
            // remember the value; the mapped flag is appended right where
            // the encoder expects quality options
            crf = args.get(i + 1).and_then(|v| v.parse().ok());
            i += 2;
            continue;
        }
        if is_stripped_flag(token) {
            // flag plus its value
            i += if i + 1 < args.len() { 2 } else { 1 };
            continue;
        }

        if token == "-filter_complex" || token == "-vf" || token == "-af" {
            out.push(token.to_owned());
            if let Some(value) = args.get(i + 1) {
                let value = substitute_filter_dialect(value);
                let value = decimalize_token(&value);
                out.push(rewrite_scale_filter(gpu, &value));
                i += 2;
                continue;
            }
            i += 1;
            continue;
        }

        if let Some(encoder) = substitute_encoder(gpu, token) {
            out.push(encoder.to_owned());
            if let Some(crf) = crf.take() {
                let (flag, value) = map_quality(gpu, crf);
                out.push(flag.to_owned());
                out.push(value.to_string());
            }
            i += 1;
            continue;
        }

        out.push(decimalize_token(substitute_codec_token(token)));
        i += 1;
    }

    // -crf seen after the encoder token: append the mapping at the end
    if let Some(crf) = crf {
        let (flag, value) = map_quality(gpu, crf);
        out.push(flag.to_owned());
        out.push(value.to_string());
    }

    debug!(gpu = ?gpu, args = out.len(), "argv rewritten for local GPU");
    out
}
