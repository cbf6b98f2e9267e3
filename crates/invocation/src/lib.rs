//! Parsing and rewriting of the transcoder command line the media server
//! hands to the cartridge.
//!
//! The argv is mostly standard FFmpeg with two known dialects on top (Plex
//! and Jellyfin). Parsing extracts the semantic fields dispatch needs;
//! unknown flags are never interpreted and ride along verbatim in
//! `raw_args` so the worker-side encoder sees exactly what the media
//! server asked for.

mod dialect;
mod error;
mod parse;
mod rewrite;

pub use dialect::{
    GPU_STRIP_EXACT, GPU_STRIP_PREFIXES, PLEX_ONLY_FLAGS, substitute_codec_token,
    substitute_filter_dialect,
};
pub use error::InvocationError;
pub use parse::{OutputKind, ParsedInvocation};
pub use rewrite::{decimalize_stream_specifiers, decimalize_token};
