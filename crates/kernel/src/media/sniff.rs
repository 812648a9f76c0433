//! Content sniffing.
//!
//! Classifies a byte stream by its leading bytes, independent of whatever
//! content type the client declared.

/// Number of leading bytes inspected by [`sniff`].
pub const SNIFF_LEN: usize = 512;

/// Fallback type for unrecognised binary content.
const OCTET_STREAM: &str = "application/octet-stream";

/// Fallback type for content that decodes as text.
const PLAIN_TEXT: &str = "text/plain; charset=utf-8";

/// Classify `prefix` by magic bytes.
///
/// Only the first [`SNIFF_LEN`] bytes are considered. Content with no known
/// signature is reported as plain text when it is valid UTF-8 without
/// control bytes, and as `application/octet-stream` otherwise.
pub fn sniff(prefix: &[u8]) -> String {
    let prefix = &prefix[..prefix.len().min(SNIFF_LEN)];

    if let Some(kind) = infer::get(prefix) {
        return kind.mime_type().to_string();
    }

    if !prefix.is_empty() && looks_like_text(prefix) {
        PLAIN_TEXT.to_string()
    } else {
        OCTET_STREAM.to_string()
    }
}

/// Whether `content_type` belongs to an allowed media family.
pub fn is_allowed_media_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence.starts_with("image/") || essence.starts_with("video/")
}

fn looks_like_text(bytes: &[u8]) -> bool {
    // The prefix may end in the middle of a multi-byte character.
    let valid = match std::str::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) if e.error_len().is_none() => {
            // Truncated trailing sequence, the valid part is still text.
            match std::str::from_utf8(&bytes[..e.valid_up_to()]) {
                Ok(s) => s,
                Err(_) => return false,
            }
        }
        Err(_) => return false,
    };
    !valid
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\x0c'))
}
