//! # Host Environment
//!
//! The mapping a host adapter hands to the dispatcher for one request:
//! CGI-style variables (wire-encoded strings) plus a readable body stream.
//! The builder methods double as a fixture for driving the dispatcher
//! without a network stack.

use crate::wire::utf8_to_latin1;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Cursor, Read};

/// Well-known environment keys
pub mod keys {
    /// Request verb
    pub const REQUEST_METHOD: &str = "REQUEST_METHOD";
    /// Mount point of the application
    pub const SCRIPT_NAME: &str = "SCRIPT_NAME";
    /// Path below the mount point
    pub const PATH_INFO: &str = "PATH_INFO";
    /// Raw query string, without `?`
    pub const QUERY_STRING: &str = "QUERY_STRING";
    /// Server host name
    pub const SERVER_NAME: &str = "SERVER_NAME";
    /// Server port
    pub const SERVER_PORT: &str = "SERVER_PORT";
    /// Protocol of the request line (e.g. `HTTP/1.1`)
    pub const SERVER_PROTOCOL: &str = "SERVER_PROTOCOL";
    /// `http` or `https`
    pub const URL_SCHEME: &str = "URL_SCHEME";
    /// Peer address
    pub const REMOTE_ADDR: &str = "REMOTE_ADDR";
    /// `Content-Type` header
    pub const CONTENT_TYPE: &str = "CONTENT_TYPE";
    /// `Content-Length` header
    pub const CONTENT_LENGTH: &str = "CONTENT_LENGTH";
    /// `Host` header
    pub const HTTP_HOST: &str = "HTTP_HOST";
    /// `Cookie` header
    pub const HTTP_COOKIE: &str = "HTTP_COOKIE";
}

/// Environment key under which a header is stored
///
/// `Content-Type` and `Content-Length` map to their bare CGI names; every
/// other header gets an `HTTP_` prefix.
#[must_use]
pub fn cgi_key(header: &str) -> String {
    let key = header.trim().to_ascii_uppercase().replace('-', "_");
    if key == keys::CONTENT_TYPE || key == keys::CONTENT_LENGTH {
        key
    } else {
        format!("HTTP_{key}")
    }
}

/// Raw per-request environment
pub struct Environ {
    vars: HashMap<String, String>,
    input: Box<dyn Read + Send>,
}

impl Default for Environ {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Environ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environ")
            .field("vars", &self.vars)
            .finish_non_exhaustive()
    }
}

impl Environ {
    /// Empty environment with an empty body
    #[must_use]
    pub fn new() -> Self {
        Self {
            vars: HashMap::new(),
            input: Box::new(io::empty()),
        }
    }

    /// Environment for `method target` against `localhost:80`
    ///
    /// `target` may carry a query string (`/search?q=rust`).
    #[must_use]
    pub fn request(method: &str, target: &str) -> Self {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        Self::new()
            .with_var(keys::REQUEST_METHOD, method)
            .with_var(keys::SCRIPT_NAME, "")
            .with_var(keys::PATH_INFO, path)
            .with_var(keys::QUERY_STRING, query)
            .with_var(keys::SERVER_NAME, "localhost")
            .with_var(keys::SERVER_PORT, "80")
            .with_var(keys::SERVER_PROTOCOL, "HTTP/1.1")
            .with_var(keys::URL_SCHEME, "http")
    }

    /// Shorthand for a GET request
    #[must_use]
    pub fn get(target: &str) -> Self {
        Self::request("GET", target)
    }

    /// Shorthand for a POST request with a typed body
    #[must_use]
    pub fn post(target: &str, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self::request("POST", target)
            .with_header("Content-Type", content_type)
            .with_body(body)
    }

    /// Set a raw (already wire-encoded) variable
    #[must_use]
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.set_var(key, value);
        self
    }

    /// Set a raw (already wire-encoded) variable in place
    pub fn set_var(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_string(), value.to_string());
    }

    /// Add to a variable, joining with any value already present
    ///
    /// Repeated headers are folded into one value: `; ` for `HTTP_COOKIE`,
    /// `, ` for everything else.
    pub fn append_var(&mut self, key: &str, value: &str) {
        match self.vars.get_mut(key) {
            Some(existing) => {
                existing.push_str(if key == keys::HTTP_COOKIE { "; " } else { ", " });
                existing.push_str(value);
            }
            None => self.set_var(key, value),
        }
    }

    /// Set a header from UTF-8 text
    #[must_use]
    pub fn with_header(self, name: &str, value: &str) -> Self {
        let key = cgi_key(name);
        self.with_var(&key, &utf8_to_latin1(value))
    }

    /// Use an in-memory body and set `CONTENT_LENGTH`
    #[must_use]
    pub fn with_body(self, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        let len = body.len().to_string();
        self.with_var(keys::CONTENT_LENGTH, &len)
            .with_input(Cursor::new(body))
    }

    /// Use an arbitrary body stream
    #[must_use]
    pub fn with_input(mut self, input: impl Read + Send + 'static) -> Self {
        self.input = Box::new(input);
        self
    }

    /// Raw (wire-encoded) variable
    #[must_use]
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// All raw variables
    #[must_use]
    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }

    pub(crate) fn into_parts(self) -> (HashMap<String, String>, Box<dyn Read + Send>) {
        (self.vars, self.input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cgi_key() {
        assert_eq!(cgi_key("Content-Type"), "CONTENT_TYPE");
        assert_eq!(cgi_key("content-length"), "CONTENT_LENGTH");
        assert_eq!(cgi_key("X-Request-Id"), "HTTP_X_REQUEST_ID");
        assert_eq!(cgi_key("Cookie"), keys::HTTP_COOKIE);
    }

    #[test]
    fn test_append_var_joins_repeats() {
        let mut env = Environ::new();
        env.append_var("HTTP_ACCEPT", "text/html");
        env.append_var("HTTP_ACCEPT", "text/plain");
        env.append_var(keys::HTTP_COOKIE, "a=1");
        env.append_var(keys::HTTP_COOKIE, "b=2");
        assert_eq!(env.var("HTTP_ACCEPT"), Some("text/html, text/plain"));
        assert_eq!(env.var(keys::HTTP_COOKIE), Some("a=1; b=2"));
    }

    #[test]
    fn test_request_splits_query() {
        let env = Environ::get("/search?q=rust&page=2");
        assert_eq!(env.var(keys::PATH_INFO), Some("/search"));
        assert_eq!(env.var(keys::QUERY_STRING), Some("q=rust&page=2"));
        assert_eq!(env.var(keys::REQUEST_METHOD), Some("GET"));
    }

    #[test]
    fn test_with_body_sets_length() {
        let env = Environ::post("/echo", "text/plain", "hello");
        assert_eq!(env.var(keys::CONTENT_LENGTH), Some("5"));
        let (_, mut input) = env.into_parts();
        let mut body = String::new();
        input.read_to_string(&mut body).unwrap();
        assert_eq!(body, "hello");
    }

    #[test]
    fn test_header_is_wire_encoded() {
        let env = Environ::get("/").with_header("X-Name", "Zoë");
        assert_eq!(env.var("HTTP_X_NAME"), Some(utf8_to_latin1("Zoë").as_str()));
    }
}
