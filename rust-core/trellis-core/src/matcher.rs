//! # Path Matching
//!
//! Pure predicates that test an actual request path against a route pattern.
//! One predicate per [`MatchMode`](crate::route::MatchMode):
//!
//! - exact: byte-for-byte equality
//! - wildcard: `*` captures one non-empty segment, a trailing `**` captures
//!   the (non-empty) remainder
//! - pattern: regex anchored at the start of the path

use regex::Regex;
use std::collections::HashMap;

/// What a successful match extracted from the path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Captures {
    /// Exact match, nothing captured
    Exact,
    /// Wildcard segments in declaration order
    Wildcards(Vec<String>),
    /// Regex match result
    Pattern(PatternMatch),
}

/// Owned result of a pattern-mode match
///
/// Mirrors the parts of a regex match a handler cares about: the full
/// matched text, positional groups and named groups.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PatternMatch {
    matched: String,
    groups: Vec<Option<String>>,
    named: HashMap<String, String>,
}

impl PatternMatch {
    /// The full matched prefix of the path
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.matched
    }

    /// Positional group; `0` is the full match
    #[must_use]
    pub fn group(&self, index: usize) -> Option<&str> {
        if index == 0 {
            return Some(&self.matched);
        }
        self.groups.get(index - 1).and_then(Option::as_deref)
    }

    /// All positional groups after the full match
    #[must_use]
    pub fn groups(&self) -> &[Option<String>] {
        &self.groups
    }

    /// Named group
    #[must_use]
    pub fn name(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }
}

/// Exact mode: byte-for-byte equality
#[must_use]
pub fn match_exact(pattern: &str, path: &str) -> bool {
    pattern == path
}

/// Wildcard mode
///
/// The path is split on `/` at most as many times as the pattern has
/// separators, so a trailing `**` absorbs any remaining depth. Returns the
/// captured segments left to right, or `None` on mismatch.
#[must_use]
pub fn match_wildcard(pattern: &str, path: &str) -> Option<Vec<String>> {
    let pieces = pattern.matches('/').count() + 1;
    let pattern_segs: Vec<&str> = pattern.splitn(pieces, '/').collect();
    let path_segs: Vec<&str> = path.splitn(pieces, '/').collect();
    if pattern_segs.len() != path_segs.len() {
        return None;
    }

    let (last_pattern, init_pattern) = pattern_segs.split_last()?;
    let (last_path, init_path) = path_segs.split_last()?;

    let mut wildcards = Vec::new();
    for (p, a) in init_pattern.iter().zip(init_path) {
        if *p == "*" {
            if a.is_empty() {
                return None;
            }
            wildcards.push((*a).to_string());
        } else if p != a {
            return None;
        }
    }

    match *last_pattern {
        "*" => {
            if last_path.is_empty() || last_path.contains('/') {
                return None;
            }
            wildcards.push((*last_path).to_string());
        }
        // `/s/**` vs `/s/` must not match: an empty remainder is rejected.
        "**" => {
            if last_path.is_empty() {
                return None;
            }
            wildcards.push((*last_path).to_string());
        }
        literal => {
            if literal != *last_path {
                return None;
            }
        }
    }

    Some(wildcards)
}

/// Pattern mode: the regex must already be anchored at the start
#[must_use]
pub fn match_pattern(regex: &Regex, path: &str) -> Option<PatternMatch> {
    let caps = regex.captures(path)?;
    let full = caps.get(0)?;
    if full.start() != 0 {
        return None;
    }

    let groups = caps
        .iter()
        .skip(1)
        .map(|g| g.map(|m| m.as_str().to_string()))
        .collect();
    let named = regex
        .capture_names()
        .flatten()
        .filter_map(|name| {
            caps.name(name)
                .map(|m| (name.to_string(), m.as_str().to_string()))
        })
        .collect();

    Some(PatternMatch {
        matched: full.as_str().to_string(),
        groups,
        named,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(pattern: &str, path: &str) -> bool {
        match_wildcard(pattern, path).is_some()
    }

    #[test]
    fn test_exact() {
        assert!(match_exact("/users", "/users"));
        assert!(!match_exact("/users", "/users/"));
    }

    #[test]
    fn test_single_segment_wildcard() {
        assert!(w("/*", "/foo"));
        assert!(!w("/*", "/"));
        assert!(w("/foo/*", "/foo/bar"));
        assert!(!w("/foo/*", "/foo/bar/baz"));
    }

    #[test]
    fn test_multi_segment_wildcard() {
        assert!(w("/s/**", "/s/foo"));
        assert_eq!(
            match_wildcard("/s/**", "/s/foo/bar"),
            Some(vec!["foo/bar".to_string()])
        );
        assert!(!w("/s/**", "/s/"));
        assert!(!w("/s/**", "/s"));
    }

    #[test]
    fn test_inner_wildcard() {
        assert!(w("/*/do", "/foo/do"));
        assert!(!w("/*/do", "/foo/bar/do"));
        assert!(!w("/*/do", "//do"));
        assert!(!w("/*/do", "/foo/undo"));
    }

    #[test]
    fn test_inner_and_trailing_wildcards() {
        assert_eq!(
            match_wildcard("/*/do/**", "/x/do/y"),
            Some(vec!["x".to_string(), "y".to_string()])
        );
        assert_eq!(
            match_wildcard("/*/do/**", "/x/do/y/z"),
            Some(vec!["x".to_string(), "y/z".to_string()])
        );
        assert!(!w("/*/do/**", "/x/do/"));
        assert!(!w("/*/do/**", "//do/y/z"));
    }

    #[test]
    fn test_capture_order() {
        assert_eq!(
            match_wildcard("/hi/*/*", "/hi/ada/lovelace"),
            Some(vec!["ada".to_string(), "lovelace".to_string()])
        );
    }

    #[test]
    fn test_pattern_groups() {
        let re = Regex::new(r"^(?:/hello/(?P<name>[^/]+)$)").unwrap();
        let m = match_pattern(&re, "/hello/world").unwrap();
        assert_eq!(m.group(0), Some("/hello/world"));
        assert_eq!(m.group(1), Some("world"));
        assert_eq!(m.name("name"), Some("world"));
        assert!(match_pattern(&re, "/hello/a/b").is_none());
    }

    #[test]
    fn test_pattern_prefix_only() {
        let re = Regex::new(r"^(?:/static/(.+))").unwrap();
        let m = match_pattern(&re, "/static/css/site.css").unwrap();
        assert_eq!(m.groups(), &[Some("css/site.css".to_string())]);
        assert!(match_pattern(&re, "/x/static/a").is_none());
    }
}
