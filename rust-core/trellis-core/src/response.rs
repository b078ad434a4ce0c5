//! # HTTP Response
//!
//! Mutable accumulator for status, content type, headers and cookies.
//! [`Response::finalize`] consumes it together with the handler's
//! [`Output`] and yields the immutable [`Finalized`] triple handed back to
//! the host adapter.

use crate::cookie::{CookieOptions, SetCookie};
use crate::error::{Error, Fault, HttpError, Result, StatusLine};
use crate::signing;
use crate::wire::utf8_to_latin1;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

/// Content type used until a handler sets another
pub const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=UTF-8";

/// Content type forced by structured output
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Value a handler returns
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Text, sent as UTF-8
    Text(String),
    /// Raw bytes, sent unchanged
    Bytes(Vec<u8>),
    /// Structured value; objects and arrays are sent as JSON
    Json(Value),
    /// Nothing
    Empty,
}

impl Output {
    /// Serialize any value into a structured output
    ///
    /// # Errors
    ///
    /// Returns an unexpected fault when the value is not representable as
    /// JSON.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> std::result::Result<Self, Fault> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    /// Bytes to send and whether they must be labelled as JSON
    fn into_body(self) -> (Vec<u8>, bool) {
        match self {
            Self::Text(s) => (s.into_bytes(), false),
            Self::Bytes(b) => (b, false),
            Self::Empty => (Vec::new(), false),
            Self::Json(v @ (Value::Object(_) | Value::Array(_))) => (v.to_string().into_bytes(), true),
            Self::Json(Value::String(s)) => (s.into_bytes(), false),
            Self::Json(other) => (other.to_string().into_bytes(), false),
        }
    }
}

impl From<String> for Output {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Output {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Output {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<&[u8]> for Output {
    fn from(b: &[u8]) -> Self {
        Self::Bytes(b.to_vec())
    }
}

impl From<Value> for Output {
    fn from(v: Value) -> Self {
        Self::Json(v)
    }
}

impl From<()> for Output {
    fn from((): ()) -> Self {
        Self::Empty
    }
}

macro_rules! output_from_display {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Output {
                fn from(v: $t) -> Self {
                    Self::Text(v.to_string())
                }
            }
        )*
    };
}

output_from_display!(i32, i64, u32, u64, usize, f32, f64, bool, char);

/// Final (status, headers, body) triple for the host adapter
///
/// Header values are already in the wire encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalized {
    /// Status line
    pub status: StatusLine,
    /// Ordered header list
    pub headers: Vec<(String, String)>,
    /// Body bytes
    pub body: Vec<u8>,
}

impl Finalized {
    /// Wire-encoded status line
    #[must_use]
    pub fn status_line(&self) -> String {
        utf8_to_latin1(&self.status.to_string())
    }

    /// First header with this name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All headers with this name (case-insensitive)
    pub fn header_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body as UTF-8 text
    #[must_use]
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// Response under construction
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusLine,
    content_type: String,
    headers: BTreeMap<String, String>,
    cookies: BTreeMap<String, SetCookie>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

fn header_key(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

impl Response {
    /// `200 OK`, HTML content type, no headers or cookies
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: StatusLine::default(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            headers: BTreeMap::new(),
            cookies: BTreeMap::new(),
        }
    }

    /// Current status line
    #[must_use]
    pub const fn status(&self) -> &StatusLine {
        &self.status
    }

    /// Replace the status (code or full status line)
    pub fn set_status(&mut self, status: impl Into<StatusLine>) {
        self.status = status.into();
    }

    /// Current content type
    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Replace the content type
    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = content_type.into();
    }

    /// Set a header; names are case-insensitive
    ///
    /// `Content-Type` updates the dedicated content-type field.
    ///
    /// # Errors
    ///
    /// Returns `Error::ContentLengthManaged` for `Content-Length`, which is
    /// always computed at finalize time.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        match header_key(name).as_str() {
            "CONTENT-TYPE" => self.content_type = value.into(),
            "CONTENT-LENGTH" => return Err(Error::ContentLengthManaged),
            key => {
                self.headers.insert(key.to_string(), value.into());
            }
        }
        Ok(())
    }

    /// Set several headers
    ///
    /// # Errors
    ///
    /// Stops at the first rejected header; see [`Response::set_header`].
    pub fn set_headers<'a, I>(&mut self, headers: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        headers
            .into_iter()
            .try_for_each(|(name, value)| self.set_header(name, value))
    }

    /// Header previously set on this response
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(&header_key(name)).map(String::as_str)
    }

    /// Queue a cookie whose value is sent as-is
    pub fn set_unsigned_cookie(
        &mut self,
        name: &str,
        value: &str,
        options: Option<CookieOptions>,
    ) -> String {
        let cookie = SetCookie::new(name, value, options.unwrap_or_default());
        self.cookies.insert(name.to_string(), cookie);
        value.to_string()
    }

    /// Queue a cookie, signing the value when a secret is given
    ///
    /// Returns the value as it will be sent.
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if signing fails to serialize the value.
    pub fn set_cookie(
        &mut self,
        name: &str,
        value: &str,
        secret: Option<&str>,
        options: Option<CookieOptions>,
    ) -> Result<String> {
        match secret {
            Some(secret) => self.set_signed_cookie(name, value, secret, options),
            None => Ok(self.set_unsigned_cookie(name, value, options)),
        }
    }

    /// Queue a signed cookie holding any serializable value
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if the value cannot be serialized.
    pub fn set_signed_cookie<T: Serialize + ?Sized>(
        &mut self,
        name: &str,
        value: &T,
        secret: &str,
        options: Option<CookieOptions>,
    ) -> Result<String> {
        let signed = signing::wrap(value, secret)?;
        Ok(self.set_unsigned_cookie(name, &signed, options))
    }

    /// Cookie queued under this name
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&SetCookie> {
        self.cookies.get(name)
    }

    /// Read a file as the response body
    ///
    /// The content type is `mime_type` when given, otherwise guessed from
    /// the extension.
    ///
    /// # Errors
    ///
    /// A missing file raises a 404 tagged `fileNotFound`; other I/O
    /// failures are unexpected faults.
    pub fn static_file(
        &mut self,
        path: impl AsRef<Path>,
        mime_type: Option<&str>,
    ) -> std::result::Result<Output, Fault> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Fault::Http(HttpError::file_not_found()),
            _ => Fault::from(e),
        })?;
        self.content_type = mime_type.map_or_else(|| guess_mime_type(path).to_string(), str::to_string);
        Ok(Output::Bytes(bytes))
    }

    /// `302 Found` to `url`; returns the (empty) body
    pub fn redirect(&mut self, url: &str) -> Output {
        self.status = StatusLine::from_code(302);
        self.headers.insert("LOCATION".to_string(), url.to_string());
        Output::Empty
    }

    /// Serialize the handler output and freeze the response
    ///
    /// Structured output forces `application/json`. `Content-Length` is
    /// computed from the body, every queued cookie becomes a `SET-COOKIE`
    /// header, and all header values are re-encoded for the wire.
    #[must_use]
    pub fn finalize(mut self, output: Output) -> Finalized {
        let (body, is_json) = output.into_body();
        if is_json {
            self.content_type = JSON_CONTENT_TYPE.to_string();
        }

        let mut headers: Vec<(String, String)> = self.headers.into_iter().collect();
        headers.extend(
            self.cookies
                .values()
                .map(|c| ("SET-COOKIE".to_string(), c.to_string())),
        );
        headers.push(("CONTENT-TYPE".to_string(), self.content_type));
        headers.push(("CONTENT-LENGTH".to_string(), body.len().to_string()));

        Finalized {
            status: self.status,
            headers: headers
                .into_iter()
                .map(|(k, v)| (k, utf8_to_latin1(&v)))
                .collect(),
            body,
        }
    }
}

/// Guess a MIME type from a file extension
///
/// Unknown extensions map to `application/octet-stream`.
#[must_use]
pub fn guess_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "txt" | "text" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/vnd.microsoft.icon",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "wasm" => "application/wasm",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// Escape text for inclusion in HTML
#[must_use]
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorTag;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let fin = Response::new().finalize("hi".into());
        assert_eq!(fin.status_line(), "200 OK");
        assert_eq!(fin.header("content-type"), Some(DEFAULT_CONTENT_TYPE));
        assert_eq!(fin.header("content-length"), Some("2"));
        assert_eq!(fin.body, b"hi");
    }

    #[test]
    fn test_set_header_normalizes_names() {
        let mut res = Response::new();
        res.set_header("x-frame-options", "DENY").unwrap();
        res.set_header("  X-Frame-Options ", "SAMEORIGIN").unwrap();
        assert_eq!(res.get_header("X-FRAME-OPTIONS"), Some("SAMEORIGIN"));

        res.set_header("Content-Type", "text/plain").unwrap();
        assert_eq!(res.content_type(), "text/plain");
        assert_eq!(res.get_header("content-type"), None);
    }

    #[test]
    fn test_content_length_is_rejected() {
        let mut res = Response::new();
        assert!(matches!(
            res.set_header("Content-Length", "10"),
            Err(Error::ContentLengthManaged)
        ));
        assert!(res
            .set_headers([("X-A", "1"), ("content-length", "2")])
            .is_err());
        assert_eq!(res.get_header("x-a"), Some("1"));
    }

    #[test]
    fn test_structured_output_is_json() {
        let fin = Response::new().finalize(json!({"ok": true}).into());
        assert_eq!(fin.header("content-type"), Some(JSON_CONTENT_TYPE));
        assert_eq!(fin.body_str(), Some(r#"{"ok":true}"#));

        let fin = Response::new().finalize(Output::json(&vec![1, 2]).unwrap());
        assert_eq!(fin.body_str(), Some("[1,2]"));
    }

    #[test]
    fn test_scalars_are_stringified() {
        let fin = Response::new().finalize(42.into());
        assert_eq!(fin.body_str(), Some("42"));
        assert_eq!(fin.header("content-type"), Some(DEFAULT_CONTENT_TYPE));

        let fin = Response::new().finalize(json!("plain").into());
        assert_eq!(fin.body_str(), Some("plain"));
    }

    #[test]
    fn test_bytes_pass_through() {
        let fin = Response::new().finalize(vec![0u8, 255].into());
        assert_eq!(fin.body, vec![0u8, 255]);
        assert_eq!(fin.header("content-length"), Some("2"));
    }

    #[test]
    fn test_header_values_are_wire_encoded() {
        let mut res = Response::new();
        res.set_header("X-Name", "Zoë").unwrap();
        let fin = res.finalize(Output::Empty);
        assert_eq!(fin.header("x-name"), Some(utf8_to_latin1("Zoë").as_str()));
    }

    #[test]
    fn test_cookies_become_set_cookie_headers() {
        let mut res = Response::new();
        res.set_cookie("a", "1", None, None).unwrap();
        res.set_cookie(
            "b",
            "2",
            None,
            Some(CookieOptions {
                http_only: false,
                ..CookieOptions::default()
            }),
        )
        .unwrap();
        let fin = res.finalize(Output::Empty);
        let cookies: Vec<&str> = fin.header_all("set-cookie").collect();
        assert_eq!(cookies, vec!["a=1; Path=/; HttpOnly", "b=2; Path=/"]);
    }

    #[test]
    fn test_signed_cookie_value() {
        let mut res = Response::new();
        let sent = res.set_cookie("sid", "ada", Some("k"), None).unwrap();
        assert_eq!(signing::unwrap::<String>(&sent, "k"), Some("ada".to_string()));
        assert_eq!(res.cookie("sid").map(SetCookie::value), Some(sent.as_str()));
    }

    #[test]
    fn test_redirect() {
        let mut res = Response::new();
        let out = res.redirect("/bar");
        let fin = res.finalize(out);
        assert_eq!(fin.status.code(), 302);
        assert_eq!(fin.header("location"), Some("/bar"));
        assert!(fin.body.is_empty());
    }

    #[test]
    fn test_static_file() {
        let dir = std::env::temp_dir().join(format!("trellis-static-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("site.css");
        std::fs::File::create(&file)
            .unwrap()
            .write_all(b"body{}")
            .unwrap();

        let mut res = Response::new();
        let out = res.static_file(&file, None).unwrap();
        assert_eq!(out, Output::Bytes(b"body{}".to_vec()));
        assert_eq!(res.content_type(), "text/css");

        let mut res = Response::new();
        res.static_file(&file, Some("text/plain")).unwrap();
        assert_eq!(res.content_type(), "text/plain");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_static_file() {
        let mut res = Response::new();
        let fault = res
            .static_file("/definitely/not/here.txt", None)
            .unwrap_err();
        match fault {
            Fault::Http(err) => {
                assert_eq!(err.status.code(), 404);
                assert_eq!(err.error_tag(), Some(ErrorTag::FileNotFound));
            }
            other => panic!("expected HTTP fault, got {other:?}"),
        }
        assert_eq!(res.content_type(), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(guess_mime_type(Path::new("a/b.PNG")), "image/png");
        assert_eq!(guess_mime_type(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#039;&amp;&#039;&lt;/a&gt;"
        );
    }
}
