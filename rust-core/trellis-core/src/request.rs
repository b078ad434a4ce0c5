//! # HTTP Request
//!
//! Builds a read-mostly [`Request`] from the host [`Environ`]:
//!
//! - header values are re-decoded from the wire encoding on every read
//! - the body is read up to a hard cap; anything beyond it is a 413
//! - query string and body are parsed eagerly into flat maps / [`FormData`]
//!
//! Only the match-derived fields (`wildcards`, `matched`) change after
//! construction, and only the dispatcher writes them.

use crate::environ::{cgi_key, keys, Environ};
use crate::error::HttpError;
use crate::form::{parse_query, FormData};
use crate::matcher::{Captures, PatternMatch};
use crate::wire::latin1_to_utf8;
use crate::{cookie, json, multipart, signing};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Default request body cap (1 MiB)
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        Self(REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw counter value
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// One inbound request
#[derive(Debug, Clone)]
pub struct Request {
    id: RequestId,
    environ: HashMap<String, String>,
    method: String,
    path: String,
    url: String,
    query_string: String,
    query: HashMap<String, String>,
    cookies: HashMap<String, String>,
    content_type: Option<String>,
    body: Vec<u8>,
    form: FormData,
    wildcards: Vec<String>,
    matched: Option<PatternMatch>,
}

impl Request {
    /// Build a request, reading the body with the default cap
    ///
    /// # Errors
    ///
    /// Returns a 413 `requestTooLarge` error when the body exceeds
    /// [`MAX_BODY_SIZE`], and a 400 when the body cannot be read or parsed.
    pub fn build(environ: Environ) -> Result<Self, HttpError> {
        Self::build_with_limit(environ, MAX_BODY_SIZE)
    }

    /// Build a request, reading at most `limit` body bytes
    ///
    /// # Errors
    ///
    /// See [`Request::build`].
    pub fn build_with_limit(environ: Environ, limit: usize) -> Result<Self, HttpError> {
        let (mut request, mut input) = Self::from_environ(environ);
        request.load_body(&mut input, limit)?;
        Ok(request)
    }

    /// Everything that can be derived without touching the body
    pub(crate) fn from_environ(environ: Environ) -> (Self, Box<dyn Read + Send>) {
        let (vars, input) = environ.into_parts();
        let ekey = |key: &str| vars.get(key).map(|v| latin1_to_utf8(v));

        let method = ekey(keys::REQUEST_METHOD)
            .unwrap_or_else(|| "GET".to_string())
            .to_ascii_uppercase();
        let path = ekey(keys::PATH_INFO).unwrap_or_else(|| "/".to_string());
        let query_string = ekey(keys::QUERY_STRING).unwrap_or_default();
        let query = parse_query(query_string.as_bytes());
        let cookies = ekey(keys::HTTP_COOKIE)
            .map(|h| cookie::parse_cookie_header(&h))
            .unwrap_or_default();
        let content_type = ekey(keys::CONTENT_TYPE).filter(|ct| !ct.is_empty());
        let url = reconstruct_url(&ekey);

        let request = Self {
            id: RequestId::next(),
            environ: vars,
            method,
            path,
            url,
            query_string,
            query,
            cookies,
            content_type,
            body: Vec::new(),
            form: FormData::new(),
            wildcards: Vec::new(),
            matched: None,
        };
        (request, input)
    }

    /// Read the capped body and parse it into form data
    pub(crate) fn load_body(&mut self, input: &mut dyn Read, limit: usize) -> Result<(), HttpError> {
        let mut body = Vec::new();
        Read::take(&mut *input, limit as u64)
            .read_to_end(&mut body)
            .map_err(|e| unreadable_body(&e))?;

        let mut probe = [0u8; 1];
        loop {
            match input.read(&mut probe) {
                Ok(0) => break,
                Ok(_) => return Err(HttpError::request_too_large()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(unreadable_body(&e)),
            }
        }

        self.body = body;
        self.form = self.parse_form()?;
        Ok(())
    }

    fn parse_form(&self) -> Result<FormData, HttpError> {
        let Some(content_type) = self.content_type.as_deref() else {
            return Ok(FormData::new());
        };
        match self.media_type().as_deref() {
            Some("application/x-www-form-urlencoded") => {
                Ok(FormData::from_text(parse_query(&self.body)))
            }
            Some("application/json") => {
                if self.body.iter().all(u8::is_ascii_whitespace) {
                    return Ok(FormData::new());
                }
                json::parse_json_bytes(&self.body)
                    .map(FormData::from_json)
                    .map_err(|e| {
                        warn!(request_id = %self.id, error = %e, "Malformed JSON body");
                        HttpError::bad_request("Malformed JSON body.")
                    })
            }
            Some("multipart/form-data") => {
                let boundary = multipart::boundary(content_type).unwrap_or_default();
                multipart::parse(&self.body, &boundary)
                    .map(multipart::into_form_data)
                    .map_err(|e| {
                        warn!(request_id = %self.id, error = %e, "Malformed multipart body");
                        HttpError::bad_request("Malformed multipart body.")
                    })
            }
            _ => Ok(FormData::new()),
        }
    }

    pub(crate) fn apply_captures(&mut self, captures: Captures) {
        match captures {
            Captures::Exact => {}
            Captures::Wildcards(w) => self.wildcards = w,
            Captures::Pattern(m) => self.matched = Some(m),
        }
    }

    /// Identity used to key per-request side tables
    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// Upper-cased request verb
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Path below the mount point (`PATH_INFO`)
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Reconstructed request URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Raw query string
    #[must_use]
    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    /// Parsed query parameters (last value wins)
    #[must_use]
    pub const fn query_map(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// One query parameter
    #[must_use]
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// Header value by name (case-insensitive), UTF-8 decoded
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        self.environ_var(&cgi_key(name))
    }

    /// Environment variable, UTF-8 decoded
    #[must_use]
    pub fn environ_var(&self, key: &str) -> Option<String> {
        self.environ.get(key).map(|v| latin1_to_utf8(v))
    }

    /// Raw environment as handed over by the host adapter
    #[must_use]
    pub const fn environ(&self) -> &HashMap<String, String> {
        &self.environ
    }

    /// Full `Content-Type` header
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Lower-cased media type of `Content-Type`, without parameters
    #[must_use]
    pub fn media_type(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|mt| mt.trim().to_ascii_lowercase())
    }

    /// Raw (capped) body bytes
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as UTF-8 text
    #[must_use]
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Parsed body
    #[must_use]
    pub const fn form(&self) -> &FormData {
        &self.form
    }

    /// Segments captured by a wildcard route
    #[must_use]
    pub fn wildcards(&self) -> &[String] {
        &self.wildcards
    }

    /// Match result of a pattern route
    #[must_use]
    pub const fn matched(&self) -> Option<&PatternMatch> {
        self.matched.as_ref()
    }

    /// Request cookie jar
    #[must_use]
    pub const fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    /// Raw cookie value; empty values read as absent
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Verified and decoded value of a signed cookie
    ///
    /// A missing cookie, a bad signature and a malformed value all read as
    /// `None`.
    #[must_use]
    pub fn signed_cookie<T: DeserializeOwned>(&self, name: &str, secret: &str) -> Option<T> {
        signing::unwrap(self.cookie(name)?, secret)
    }
}

fn unreadable_body(err: &io::Error) -> HttpError {
    warn!(error = %err, "Failed to read request body");
    HttpError::bad_request("Unreadable request body.")
}

fn reconstruct_url(ekey: &impl Fn(&str) -> Option<String>) -> String {
    let scheme = ekey(keys::URL_SCHEME).unwrap_or_else(|| "http".to_string());
    let netloc = match ekey(keys::HTTP_HOST).filter(|h| !h.is_empty()) {
        Some(host) => host,
        None => {
            let name = ekey(keys::SERVER_NAME).unwrap_or_default();
            let default_port = if scheme == "https" { "443" } else { "80" };
            match ekey(keys::SERVER_PORT) {
                Some(port) if !port.is_empty() && port != default_port => format!("{name}:{port}"),
                _ => name,
            }
        }
    };
    let path = format!(
        "{}{}",
        ekey(keys::SCRIPT_NAME).unwrap_or_default(),
        ekey(keys::PATH_INFO).unwrap_or_default()
    );
    let query = ekey(keys::QUERY_STRING).unwrap_or_default();

    let mut url = format!("{scheme}://{netloc}{path}");
    if !query.is_empty() {
        url.push('?');
        url.push_str(&query);
    }
    url
}
