//! # Route Model
//!
//! A [`Route`] is the immutable description of one registered endpoint:
//! verb set, path pattern, matching mode, handler and optional name.
//! Pattern problems are rejected here, at registration, so the matcher never
//! sees a malformed wildcard or regex.

use crate::error::{Error, Result};
use crate::matcher::{self, Captures};
use crate::plugin::Handler;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

/// HTTP methods a route can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP POST
    Post,
    /// HTTP PUT
    Put,
    /// HTTP DELETE
    Delete,
    /// HTTP PATCH
    Patch,
    /// HTTP HEAD
    Head,
    /// HTTP OPTIONS
    Options,
}

impl Method {
    /// Upper-case wire form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "PATCH" => Ok(Self::Patch),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            _ => Err(Error::UnsupportedMethod {
                method: s.to_string(),
            }),
        }
    }
}

/// How a route's path is compared against the request path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchMode {
    /// Byte-for-byte equality
    Exact,
    /// `*` / `**` segment wildcards
    Wildcard,
    /// Regular expression anchored at the path start
    Pattern,
}

impl MatchMode {
    /// Infer the mode from pattern syntax
    ///
    /// Grouping parentheses select `Pattern`, a `*` selects `Wildcard`,
    /// anything else is `Exact`.
    #[must_use]
    pub fn detect(path: &str) -> Self {
        if path.contains('(') && path.contains(')') {
            Self::Pattern
        } else if path.contains('*') {
            Self::Wildcard
        } else {
            Self::Exact
        }
    }
}

/// Check the layout rules for wildcard patterns
///
/// # Errors
///
/// Returns `Error::InvalidRoutePattern` when the pattern has no wildcard,
/// starts with one, has a non-trailing `*` that does not fill its segment,
/// or ends in anything but `*` / `**` when the last segment is a wildcard.
pub fn validate_wildcard_path(path: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidRoutePattern {
        pattern: path.to_string(),
        reason: reason.to_string(),
    };

    if !path.contains('*') {
        return Err(invalid("wildcard mode requires a '*' segment"));
    }
    if path.starts_with('*') {
        return Err(invalid("path can't begin with '*'"));
    }

    let segments: Vec<&str> = path.split('/').collect();
    let Some((last, init)) = segments.split_last() else {
        return Err(invalid("empty pattern"));
    };
    if init.iter().any(|seg| seg.contains('*') && *seg != "*") {
        return Err(invalid("non-trailing '*' must span an entire segment"));
    }
    if last.contains('*') && *last != "*" && *last != "**" {
        return Err(invalid("trailing wildcard must be '*' or '**'"));
    }
    Ok(())
}

/// One registered endpoint
#[derive(Clone)]
pub struct Route {
    verbs: Vec<Method>,
    path: String,
    mode: MatchMode,
    handler: Handler,
    name: Option<String>,
    regex: Option<Regex>,
}

impl Route {
    /// Build and validate a route
    ///
    /// `mode` is inferred with [`MatchMode::detect`] when not given.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for malformed wildcard patterns,
    /// regexes that fail to compile, or an empty verb set.
    pub fn new(
        verbs: &[Method],
        path: &str,
        handler: Handler,
        mode: Option<MatchMode>,
        name: Option<String>,
    ) -> Result<Self> {
        if verbs.is_empty() {
            return Err(Error::InvalidRoutePattern {
                pattern: path.to_string(),
                reason: "route needs at least one HTTP method".to_string(),
            });
        }

        let mode = mode.unwrap_or_else(|| MatchMode::detect(path));
        let regex = match mode {
            MatchMode::Exact => None,
            MatchMode::Wildcard => {
                validate_wildcard_path(path)?;
                None
            }
            MatchMode::Pattern => Some(Regex::new(&format!("^(?:{path})")).map_err(|e| {
                Error::InvalidRoutePattern {
                    pattern: path.to_string(),
                    reason: e.to_string(),
                }
            })?),
        };

        Ok(Self {
            verbs: verbs.to_vec(),
            path: path.to_string(),
            mode,
            handler,
            name,
            regex,
        })
    }

    /// Methods this route answers
    #[must_use]
    pub fn verbs(&self) -> &[Method] {
        &self.verbs
    }

    /// Registered path pattern
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Matching mode
    #[must_use]
    pub const fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Route name, if any
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The unwrapped handler
    #[must_use]
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Whether the route accepts this request verb
    #[must_use]
    pub fn allows(&self, verb: &str) -> bool {
        self.verbs.iter().any(|m| m.as_str() == verb)
    }

    /// Test the request path against this route's pattern
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<Captures> {
        match self.mode {
            MatchMode::Exact => matcher::match_exact(&self.path, path).then_some(Captures::Exact),
            MatchMode::Wildcard => {
                matcher::match_wildcard(&self.path, path).map(Captures::Wildcards)
            }
            MatchMode::Pattern => self
                .regex
                .as_ref()
                .and_then(|re| matcher::match_pattern(re, path))
                .map(Captures::Pattern),
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("verbs", &self.verbs)
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
