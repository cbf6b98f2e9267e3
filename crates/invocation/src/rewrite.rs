// Hex stream-specifier decimalization.
//
// Plex emits stream specifiers like `[#0x1e]` or `-map 0:#0x1d`; system
// ffmpeg builds only accept the decimal form. The pass is idempotent:
// already-decimal specifiers contain no `0x` and never match.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static HEX_SPECIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#0x([0-9A-Fa-f]+)").unwrap());

/// Rewrite every `#0xNN` occurrence in one token to its decimal form.
pub fn decimalize_token(token: &str) -> String {
    if !token.contains("#0x") {
        return token.to_owned();
    }
    HEX_SPECIFIER
        .replace_all(token, |caps: &Captures<'_>| {
            match u64::from_str_radix(&caps[1], 16) {
                Ok(n) => format!("#{n}"),
                // Overflowing hex is left untouched rather than corrupted.
                Err(_) => caps[0].to_owned(),
            }
        })
        .into_owned()
}

/// Apply [`decimalize_token`] across a full argv.
pub fn decimalize_stream_specifiers(args: &[String]) -> Vec<String> {
    args.iter().map(|a| decimalize_token(a)).collect()
}
