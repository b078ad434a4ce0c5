//! # multipart/form-data
//!
//! Splits a fully buffered multipart body (RFC 7578) into parts. The request
//! body is already capped, so parsing works on one slice instead of a
//! streaming buffer.

use crate::form::{FileUpload, FormData, FormValue};
use std::fmt;

/// MIME type assumed for parts that do not declare one
pub const DEFAULT_PART_TYPE: &str = "text/plain";

/// Multipart parse failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultipartError {
    /// Content type has no usable `boundary` parameter
    MissingBoundary,
    /// A part header block could not be read
    InvalidHeader,
    /// Body ended before the closing delimiter
    Incomplete,
}

impl fmt::Display for MultipartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingBoundary => write!(f, "missing multipart boundary"),
            Self::InvalidHeader => write!(f, "invalid part header"),
            Self::Incomplete => write!(f, "incomplete multipart data"),
        }
    }
}

impl std::error::Error for MultipartError {}

/// One body part
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Part {
    /// `name` from Content-Disposition
    pub name: Option<String>,
    /// `filename` from Content-Disposition
    pub filename: Option<String>,
    /// Declared Content-Type (media type only)
    pub content_type: Option<String>,
    /// Raw part body
    pub body: Vec<u8>,
}

/// Split `; key=value` header parameters, honouring quoted strings
#[must_use]
pub fn header_params(value: &str) -> Vec<(String, String)> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;
    for c in value.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => escaped = true,
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ';' if !quoted => pieces.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    pieces.push(current);

    pieces
        .iter()
        .skip(1)
        .filter_map(|piece| {
            let (key, val) = piece.split_once('=')?;
            let val = val.trim();
            let val = val
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(val);
            Some((key.trim().to_ascii_lowercase(), val.to_string()))
        })
        .collect()
}

/// `boundary` parameter of a multipart Content-Type
#[must_use]
pub fn boundary(content_type: &str) -> Option<String> {
    header_params(content_type)
        .into_iter()
        .find(|(k, v)| k == "boundary" && !v.is_empty())
        .map(|(_, v)| v)
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_part_headers(block: &[u8]) -> Result<Part, MultipartError> {
    let text = std::str::from_utf8(block).map_err(|_| MultipartError::InvalidHeader)?;
    let mut part = Part::default();
    for line in text.split("\r\n").filter(|l| !l.is_empty()) {
        let (name, value) = line.split_once(':').ok_or(MultipartError::InvalidHeader)?;
        let name = name.trim();
        if name.eq_ignore_ascii_case("Content-Disposition") {
            for (key, val) in header_params(value) {
                match key.as_str() {
                    "name" => part.name = Some(val),
                    "filename" => part.filename = Some(val),
                    _ => {}
                }
            }
        } else if name.eq_ignore_ascii_case("Content-Type") {
            let media = value.split(';').next().unwrap_or("").trim();
            if !media.is_empty() {
                part.content_type = Some(media.to_ascii_lowercase());
            }
        }
    }
    Ok(part)
}

/// Split a buffered body into parts
///
/// An empty body yields no parts.
///
/// # Errors
///
/// Returns `MultipartError::Incomplete` when a delimiter or header block is
/// missing, and `MultipartError::InvalidHeader` for undecodable headers.
pub fn parse(body: &[u8], boundary: &str) -> Result<Vec<Part>, MultipartError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    if boundary.is_empty() {
        return Err(MultipartError::MissingBoundary);
    }

    let delimiter = format!("--{boundary}");
    let next_delimiter = format!("\r\n--{boundary}");
    let mut pos = find_bytes(body, delimiter.as_bytes()).ok_or(MultipartError::Incomplete)?;
    let mut parts = Vec::new();

    loop {
        pos += delimiter.len();
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            return Ok(parts);
        }
        let header_start = if rest.starts_with(b"\r\n") {
            pos + 2
        } else {
            return Err(MultipartError::Incomplete);
        };

        let header_len = find_bytes(&body[header_start..], b"\r\n\r\n")
            .ok_or(MultipartError::Incomplete)?;
        let mut part = parse_part_headers(&body[header_start..header_start + header_len])?;

        let body_start = header_start + header_len + 4;
        let body_len = find_bytes(&body[body_start..], next_delimiter.as_bytes())
            .ok_or(MultipartError::Incomplete)?;
        part.body = body[body_start..body_start + body_len].to_vec();
        parts.push(part);

        // Point at the next delimiter, past its leading CRLF.
        pos = body_start + body_len + 2;
    }
}

/// Convert parts into form fields
///
/// Parts with a non-empty filename become [`FileUpload`]s; everything else
/// is a text value. Parts without a name are skipped.
#[must_use]
pub fn into_form_data(parts: Vec<Part>) -> FormData {
    let mut form = FormData::new();
    for part in parts {
        let Some(name) = part.name else { continue };
        let value = match part.filename.filter(|f| !f.is_empty()) {
            Some(filename) => FormValue::File(FileUpload {
                filename,
                bytes: part.body,
                mime_type: part
                    .content_type
                    .unwrap_or_else(|| DEFAULT_PART_TYPE.to_string()),
            }),
            None => FormValue::Text(String::from_utf8_lossy(&part.body).into_owned()),
        };
        form.insert(name, value);
    }
    form
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = b"--XyZ\r\n\
        Content-Disposition: form-data; name=\"foo\"\r\n\r\n\
        hello\r\n\
        --XyZ\r\n\
        Content-Disposition: form-data; name=\"fup\"; filename=\"a;b.txt\"\r\n\
        Content-Type: text/markdown\r\n\r\n\
        # Title\r\nline\r\n\
        --XyZ\r\n\
        Content-Disposition: form-data; name=\"empty\"; filename=\"\"\r\n\r\n\
        \r\n\
        --XyZ--\r\n";

    #[test]
    fn test_boundary() {
        assert_eq!(
            boundary("multipart/form-data; boundary=XyZ"),
            Some("XyZ".to_string())
        );
        assert_eq!(
            boundary("multipart/form-data; boundary=\"a b\""),
            Some("a b".to_string())
        );
        assert_eq!(boundary("multipart/form-data"), None);
    }

    #[test]
    fn test_parse_parts() {
        let parts = parse(BODY, "XyZ").unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].name.as_deref(), Some("foo"));
        assert_eq!(parts[0].body, b"hello");
        assert_eq!(parts[1].filename.as_deref(), Some("a;b.txt"));
        assert_eq!(parts[1].content_type.as_deref(), Some("text/markdown"));
        assert_eq!(parts[1].body, b"# Title\r\nline");
        assert_eq!(parts[2].body, b"");
    }

    #[test]
    fn test_into_form_data() {
        let form = into_form_data(parse(BODY, "XyZ").unwrap());
        assert_eq!(form.text("foo"), Some("hello"));
        let file = form.file("fup").unwrap();
        assert_eq!(file.filename, "a;b.txt");
        assert_eq!(file.mime_type, "text/markdown");
        assert_eq!(file.bytes, b"# Title\r\nline");
        assert_eq!(form.text("empty"), Some(""));
    }

    #[test]
    fn test_default_part_type() {
        let body = b"--b\r\nContent-Disposition: form-data; name=\"f\"; filename=\"x.bin\"\r\n\r\n\x00\x01\r\n--b--";
        let form = into_form_data(parse(body, "b").unwrap());
        assert_eq!(form.file("f").unwrap().mime_type, DEFAULT_PART_TYPE);
    }

    #[test]
    fn test_truncated_body() {
        let body = b"--b\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\nno end";
        assert_eq!(parse(body, "b"), Err(MultipartError::Incomplete));
    }

    #[test]
    fn test_empty_body() {
        assert_eq!(parse(b"", "b").unwrap(), Vec::new());
    }
}
