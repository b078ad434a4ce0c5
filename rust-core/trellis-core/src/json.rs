//! # JSON Helpers
//!
//! Request bodies are parsed with simd-json; responses serialize through
//! `serde_json::Value`.

use serde::de::DeserializeOwned;

/// Parse JSON bytes into a typed value using simd-json
///
/// simd-json parses in place, so the input is copied into a scratch buffer.
///
/// # Errors
///
/// Returns the simd-json error when the bytes are not valid JSON for `T`.
pub fn parse_json_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, simd_json::Error> {
    let mut scratch = bytes.to_vec();
    simd_json::from_slice(&mut scratch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_parse_json_bytes() {
        let value: Value = parse_json_bytes(br#"{"a": [1, 2], "b": {"c": null}}"#).unwrap();
        assert_eq!(value, json!({"a": [1, 2], "b": {"c": null}}));
    }

    #[test]
    fn test_parse_json_bytes_invalid() {
        assert!(parse_json_bytes::<Value>(b"{not json").is_err());
    }

    #[test]
    fn test_parse_typed() {
        let pair: (String, u8) = parse_json_bytes(br#"["k", 7]"#).unwrap();
        assert_eq!(pair, ("k".to_string(), 7));
    }
}
