//! # Cookies
//!
//! Parsing of the request `Cookie` header and rendering of `Set-Cookie`
//! values for the response jar.

use std::collections::HashMap;
use std::fmt;

/// Parse a `Cookie` header into a name -> value jar
///
/// Pairs without `=` or with an empty name are skipped. Surrounding double
/// quotes are removed from values. Later pairs overwrite earlier ones.
#[must_use]
pub fn parse_cookie_header(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// `SameSite` attribute values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    /// `SameSite=Strict`
    Strict,
    /// `SameSite=Lax`
    Lax,
    /// `SameSite=None`
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "Strict"),
            Self::Lax => write!(f, "Lax"),
            Self::None => write!(f, "None"),
        }
    }
}

/// Attributes of an outgoing cookie
///
/// Defaults to `Path=/` and `HttpOnly`; override individual fields with
/// struct update syntax:
///
/// ```
/// use trellis_core::CookieOptions;
///
/// let opts = CookieOptions { max_age: Some(3600), ..CookieOptions::default() };
/// assert_eq!(opts.path.as_deref(), Some("/"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    /// `Path` attribute
    pub path: Option<String>,
    /// `Domain` attribute
    pub domain: Option<String>,
    /// `Max-Age` in seconds
    pub max_age: Option<i64>,
    /// Preformatted `Expires` date
    pub expires: Option<String>,
    /// `Secure` flag
    pub secure: bool,
    /// `HttpOnly` flag
    pub http_only: bool,
    /// `SameSite` attribute
    pub same_site: Option<SameSite>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: Some("/".to_string()),
            domain: None,
            max_age: None,
            expires: None,
            secure: false,
            http_only: true,
            same_site: None,
        }
    }
}

/// A cookie queued on the response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    name: String,
    value: String,
    options: CookieOptions,
}

impl SetCookie {
    /// Create a cookie with the given attributes
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>, options: CookieOptions) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            options,
        }
    }

    /// Cookie name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cookie value as sent
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Attributes
    #[must_use]
    pub const fn options(&self) -> &CookieOptions {
        &self.options
    }
}

impl fmt::Display for SetCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        let opts = &self.options;

        if let Some(expires) = &opts.expires {
            write!(f, "; Expires={expires}")?;
        }
        if let Some(max_age) = opts.max_age {
            write!(f, "; Max-Age={max_age}")?;
        }
        if let Some(domain) = &opts.domain {
            write!(f, "; Domain={domain}")?;
        }
        if let Some(path) = &opts.path {
            write!(f, "; Path={path}")?;
        }
        if opts.secure {
            write!(f, "; Secure")?;
        }
        if opts.http_only {
            write!(f, "; HttpOnly")?;
        }
        if let Some(same_site) = opts.same_site {
            write!(f, "; SameSite={same_site}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cookie_header() {
        let jar = parse_cookie_header("session=abc123; user=\"john\"; junk; =x");
        assert_eq!(jar.get("session").map(String::as_str), Some("abc123"));
        assert_eq!(jar.get("user").map(String::as_str), Some("john"));
        assert_eq!(jar.len(), 2);
    }

    #[test]
    fn test_parse_keeps_signed_values_intact() {
        let jar = parse_cookie_header("sid=c2ln+/A==@|Imhp\"==");
        assert_eq!(jar.get("sid").map(String::as_str), Some("c2ln+/A==@|Imhp\"=="));
    }

    #[test]
    fn test_set_cookie_defaults() {
        let cookie = SetCookie::new("sid", "v", CookieOptions::default());
        assert_eq!(cookie.to_string(), "sid=v; Path=/; HttpOnly");
    }

    #[test]
    fn test_set_cookie_all_attributes() {
        let opts = CookieOptions {
            path: Some("/app".to_string()),
            domain: Some("example.com".to_string()),
            max_age: Some(60),
            expires: None,
            secure: true,
            http_only: false,
            same_site: Some(SameSite::Lax),
        };
        assert_eq!(
            SetCookie::new("a", "b", opts).to_string(),
            "a=b; Max-Age=60; Domain=example.com; Path=/app; Secure; SameSite=Lax"
        );
    }
}
