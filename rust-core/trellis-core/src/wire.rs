//! # Wire Encoding
//!
//! The host boundary carries header text one byte per code point (ISO-8859-1),
//! which is how HTTP/1.x header bytes map onto strings. Every header value is
//! re-decoded to UTF-8 on the way in and re-encoded on the way out.

/// Re-decode a byte-per-char string as UTF-8
///
/// Strings that already hold code points above U+00FF were never
/// byte-per-char and are returned unchanged. Invalid UTF-8 is replaced
/// lossily.
#[must_use]
pub fn latin1_to_utf8(s: &str) -> String {
    let Some(bytes) = latin1_to_bytes(s) else {
        return s.to_string();
    };
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}

/// Encode UTF-8 text as a byte-per-char string for the wire
#[must_use]
pub fn utf8_to_latin1(s: &str) -> String {
    latin1_from_bytes(s.as_bytes())
}

/// Map raw header bytes onto a byte-per-char string
#[must_use]
pub fn latin1_from_bytes(bytes: &[u8]) -> String {
    bytes.iter().copied().map(char::from).collect()
}

/// Map a byte-per-char string back onto raw bytes
///
/// Returns `None` if any char is above U+00FF.
#[must_use]
pub fn latin1_to_bytes(s: &str) -> Option<Vec<u8>> {
    s.chars().map(|c| u8::try_from(u32::from(c)).ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_non_ascii() {
        let wire = utf8_to_latin1("héllo ✓");
        assert_ne!(wire, "héllo ✓");
        assert_eq!(wire.chars().count(), "héllo ✓".len());
        assert_eq!(latin1_to_utf8(&wire), "héllo ✓");
    }

    #[test]
    fn test_ascii_is_unchanged() {
        assert_eq!(utf8_to_latin1("text/html"), "text/html");
        assert_eq!(latin1_to_utf8("text/html"), "text/html");
    }

    #[test]
    fn test_already_decoded_passes_through() {
        assert_eq!(latin1_to_utf8("✓"), "✓");
        assert_eq!(latin1_to_bytes("✓"), None);
    }
}
