//! UTF-8 validation for text messages and close reasons
//!
//! Backed by `simdutf8`, which picks the widest instruction set available
//! at runtime and falls back to `std` elsewhere.

/// Validate that the input is valid UTF-8
#[inline]
pub fn validate_utf8(data: &[u8]) -> bool {
    simdutf8::basic::from_utf8(data).is_ok()
}

/// Length of the valid prefix of a fragmented text message
///
/// A sequence cut in the middle of a multi-byte character is still
/// acceptable, later fragments may complete it; the returned length stops
/// before that character. Returns `None` only when no continuation could
/// make the data valid.
pub fn valid_utf8_prefix_len(data: &[u8]) -> Option<usize> {
    match simdutf8::compat::from_utf8(data) {
        Ok(_) => Some(data.len()),
        // error_len() == None means the input ended mid-character
        Err(e) if e.error_len().is_none() => Some(e.valid_up_to()),
        Err(_) => None,
    }
}
