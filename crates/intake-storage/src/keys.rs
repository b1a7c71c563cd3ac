//! Shared key generation for storage backends.
//!
//! Key format: `{area}/{qid}/{filename}`, where the filename segment is
//! reduced to characters every backend accepts verbatim.

use intake_core::Qid;

/// Maximum length of the filename segment of a key.
const MAX_SEGMENT_LEN: usize = 200;

/// Reduce a client-supplied filename to a single safe key segment.
///
/// Path separators and anything outside `[A-Za-z0-9._-]` become `_`, and
/// dot runs are collapsed so the segment can never read as `..`.
pub fn key_segment(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);

    let mut out = String::with_capacity(base.len());
    let mut last_dot = false;
    for c in base.chars() {
        if c == '.' {
            if !last_dot {
                out.push('.');
            }
            last_dot = true;
            continue;
        }
        last_dot = false;
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            out.push(c);
        } else {
            out.push('_');
        }
    }

    let trimmed = out.trim_matches('.');
    let mut segment: String = trimmed.chars().take(MAX_SEGMENT_LEN).collect();
    if segment.is_empty() {
        segment = "file".to_string();
    }
    segment
}

/// Generate the key of `filename` for `qid` under `prefix`.
pub fn generate_storage_key(prefix: &str, qid: Qid, filename: &str) -> String {
    format!("{}/{}/{}", prefix, qid, key_segment(filename))
}
