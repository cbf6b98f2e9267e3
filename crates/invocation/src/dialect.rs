// Enumerated dialect tables.
//
// Only identifiers the media servers are *known* to emit non-standardly
// appear here; anything else passes through unmodified.

/// Plex-only flags, each followed by a value. Their presence identifies a
/// Plex invocation; when running on the system encoder they are stripped
/// together with their value.
pub const PLEX_ONLY_FLAGS: &[&str] = &[
    "-loglevel_plex",
    "-progressurl",
    "-time_delta",
    "-delete_removed",
    "-skip_to_segment",
    "-manifest_name",
];

/// Flags stripped (with value) when the GPU rewrite replaces a software
/// encoder: software-encoder tuning the hardware encoders reject.
pub const GPU_STRIP_EXACT: &[&str] = &["-x264opts", "-x265-params"];

/// Prefix-matched variants of the above (`-preset`, `-preset:0`, …).
pub const GPU_STRIP_PREFIXES: &[&str] = &["-preset"];

/// Plex spells the AAC-LC encoder `aac_lc`; system ffmpeg knows only `aac`.
pub fn substitute_codec_token(token: &str) -> &str {
    if token == "aac_lc" { "aac" } else { token }
}

/// Plex abbreviates `out_chlayout=` to `ochl=` inside filter graphs.
pub fn substitute_filter_dialect(filter: &str) -> String {
    filter.replace("ochl=", "out_chlayout=")
}
