//! Fixed-width symbol utilities.
//!
//! Records carry their symbol as a `[u8; 8]` array so they stay plain-old-data
//! and can be copied byte-for-byte onto the wire. The convention is:
//!
//! - up to [`SYMBOL_LEN`] significant bytes, no terminator required
//!   (`"SPRSTOCK"` fills the whole buffer and is valid);
//! - unused trailing bytes are always zero;
//! - equality is on the raw array, never on C-string semantics.

/// Width of the fixed symbol buffer in every record.
pub const SYMBOL_LEN: usize = 8;

/// Encode `s` into a zero-padded `[u8; SYMBOL_LEN]`.
///
/// Input longer than `SYMBOL_LEN` bytes is truncated on the last UTF-8
/// character boundary that fits, so the stored bytes always decode.
#[inline]
pub fn symbol_to_bytes(s: &str) -> [u8; SYMBOL_LEN] {
    let mut buf = [0u8; SYMBOL_LEN];
    let mut len = s.len().min(SYMBOL_LEN);
    while !s.is_char_boundary(len) {
        len -= 1;
    }
    buf[..len].copy_from_slice(&s.as_bytes()[..len]);
    buf
}

/// Decode a fixed symbol buffer, stopping at the first zero byte.
///
/// Returns `""` for a buffer that does not hold valid UTF-8 (only possible
/// for frames that were not produced by [`symbol_to_bytes`]).
#[inline]
pub fn symbol_from_bytes(buf: &[u8; SYMBOL_LEN]) -> &str {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(SYMBOL_LEN);
    std::str::from_utf8(&buf[..end]).unwrap_or("")
}
