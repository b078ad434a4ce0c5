//! # Error Handling
//!
//! Two families of errors live here:
//!
//! - [`Error`] - setup-time failures (bad route patterns, duplicate names,
//!   unknown error tags). These signal programming mistakes and are returned
//!   from registration calls, never produced mid-request.
//! - [`HttpError`] / [`Fault`] - the request-time channel. Handlers return
//!   `Result<Output, Fault>`; the dispatcher is the only place that consumes
//!   a `Fault`.
//!
//! Uses `thiserror` for ergonomic error definitions.

use crate::response::Output;
use hyper::StatusCode;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic;
use std::str::FromStr;
use std::sync::Once;
use thiserror::Error;

/// Result type alias for trellis setup operations
pub type Result<T> = std::result::Result<T, Error>;

/// Setup-time and host-adapter errors
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid route pattern provided
    #[error("Invalid route pattern: {pattern}: {reason}")]
    InvalidRoutePattern {
        /// The invalid pattern
        pattern: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Verb outside the supported method set
    #[error("Unsupported HTTP method: {method}")]
    UnsupportedMethod {
        /// The rejected verb
        method: String,
    },

    /// A route with this name is already registered
    #[error("Route name already in use: {name}")]
    DuplicateRouteName {
        /// The conflicting name
        name: String,
    },

    /// Error tag is not one of the pre-seeded tags
    #[error("Unknown error tag: {tag}")]
    UnknownErrorTag {
        /// The rejected tag
        tag: String,
    },

    /// `Content-Length` is computed when the response is finalized
    #[error("The Content-Length header is set automatically")]
    ContentLengthManaged,

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP protocol error (host adapter)
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// Server failed to bind to the specified address
    #[error("Failed to bind server to {address}: {source}")]
    BindError {
        /// The address we tried to bind to
        address: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },
}

/// Symbolic labels that select a centralized error presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorTag {
    /// No registered route matched the request
    RouteNotFound,
    /// A static file could not be found
    FileNotFound,
    /// The request body exceeded the configured cap
    RequestTooLarge,
    /// A handler or plugin failed in an unplanned way
    UnexpectedError,
}

impl ErrorTag {
    /// All tags with a pre-seeded handler
    pub const ALL: [Self; 4] = [
        Self::RouteNotFound,
        Self::FileNotFound,
        Self::RequestTooLarge,
        Self::UnexpectedError,
    ];

    /// Wire name of the tag (e.g. `routeNotFound`)
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RouteNotFound => "routeNotFound",
            Self::FileNotFound => "fileNotFound",
            Self::RequestTooLarge => "requestTooLarge",
            Self::UnexpectedError => "unexpectedError",
        }
    }

    /// Status code the tag is raised with
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::RouteNotFound | Self::FileNotFound => 404,
            Self::RequestTooLarge => 413,
            Self::UnexpectedError => 500,
        }
    }

    /// Short human-readable message used by the default presentations
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::RouteNotFound => "No such route.",
            Self::FileNotFound => "No such file.",
            Self::RequestTooLarge => "Request too large.",
            Self::UnexpectedError => "Internal server error.",
        }
    }
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| Error::UnknownErrorTag { tag: s.to_string() })
    }
}

/// HTTP status line: numeric code plus reason phrase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    code: u16,
    reason: String,
}

impl StatusLine {
    /// Build from a numeric code using the canonical reason phrase
    ///
    /// Codes without a known reason fall back to `404 Not Found`.
    #[must_use]
    pub fn from_code(code: u16) -> Self {
        match StatusCode::from_u16(code)
            .ok()
            .and_then(|status| status.canonical_reason())
        {
            Some(reason) => Self {
                code,
                reason: reason.to_string(),
            },
            None => Self::from_code(404),
        }
    }

    /// Parse a full status line such as `"418 I'm a teapot"`
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (code, reason) = line.split_once(' ').unwrap_or((line, ""));
        let code = code.parse::<u16>().ok().filter(|c| (100..=999).contains(c))?;
        Some(Self {
            code,
            reason: reason.trim().to_string(),
        })
    }

    /// Numeric status code
    #[must_use]
    pub const fn code(&self) -> u16 {
        self.code
    }

    /// Reason phrase
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl Default for StatusLine {
    fn default() -> Self {
        Self::from_code(200)
    }
}

impl From<u16> for StatusLine {
    fn from(code: u16) -> Self {
        Self::from_code(code)
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} {}", self.code, self.reason)
        }
    }
}

/// An HTTP-level failure raised by a handler (or by the framework itself)
///
/// Carries the body to send, the status line, and an optional error tag.
/// When the tag names a registered error handler, that handler produces the
/// body instead.
#[derive(Error, Debug, Clone)]
#[error("{status}")]
pub struct HttpError {
    /// Body used when no tag handler takes over
    pub body: Output,
    /// Status line sent to the client
    pub status: StatusLine,
    /// Optional error tag (e.g. `routeNotFound`)
    pub tag: Option<String>,
    /// Operator-facing detail, filled in for unexpected faults
    pub diagnostics: Option<String>,
}

impl HttpError {
    /// Create an untagged error
    #[must_use]
    pub fn new(body: impl Into<Output>, status: impl Into<StatusLine>) -> Self {
        Self {
            body: body.into(),
            status: status.into(),
            tag: None,
            diagnostics: None,
        }
    }

    /// Create an error raised with one of the framework tags
    #[must_use]
    pub fn tagged(tag: ErrorTag, body: impl Into<Output>) -> Self {
        Self::new(body, tag.status_code()).with_tag(tag.as_str())
    }

    /// Attach an error tag
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Attach diagnostic detail
    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: impl Into<String>) -> Self {
        self.diagnostics = Some(diagnostics.into());
        self
    }

    /// The tag, if it is one the dispatcher knows about
    #[must_use]
    pub fn error_tag(&self) -> Option<ErrorTag> {
        self.tag.as_deref().and_then(|t| t.parse().ok())
    }

    pub(crate) fn route_not_found() -> Self {
        Self::tagged(ErrorTag::RouteNotFound, "<h2>Route Not Found</h2>")
    }

    pub(crate) fn file_not_found() -> Self {
        Self::tagged(ErrorTag::FileNotFound, "<h2>File Not Found</h2>")
    }

    pub(crate) fn request_too_large() -> Self {
        Self::tagged(ErrorTag::RequestTooLarge, "<h2>Request Too Large</h2>")
    }

    pub(crate) fn unexpected(diagnostics: String) -> Self {
        Self::tagged(ErrorTag::UnexpectedError, "<h2>Internal Server Error</h2>")
            .with_diagnostics(diagnostics)
    }

    pub(crate) fn bad_request(what: &str) -> Self {
        Self::new(format!("<h2>Bad Request</h2><p>{what}</p>"), 400)
    }
}

/// Failure channel of a handler or plugin
#[derive(Error, Debug)]
pub enum Fault {
    /// Deliberate HTTP error
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Anything else; becomes a 500 tagged `unexpectedError`
    #[error("{message}")]
    Unexpected {
        /// Display form of the underlying failure
        message: String,
        /// Backtrace taken where the failure arose, when capture is enabled
        backtrace: Option<String>,
    },
}

impl Fault {
    /// Wrap any displayable failure as an unexpected fault
    ///
    /// The backtrace follows `RUST_BACKTRACE`, except while a debug-mode app
    /// runs its handler, where it is always taken.
    pub fn unexpected(err: impl fmt::Display) -> Self {
        let backtrace = if FORCE_BACKTRACE.with(Cell::get) {
            Backtrace::force_capture()
        } else {
            Backtrace::capture()
        };
        Self::Unexpected {
            message: err.to_string(),
            backtrace: (backtrace.status() == BacktraceStatus::Captured)
                .then(|| backtrace.to_string()),
        }
    }

    /// Full operator-facing description (message plus backtrace if any)
    #[must_use]
    pub fn diagnostics(&self) -> String {
        match self {
            Self::Http(err) => err
                .diagnostics
                .clone()
                .unwrap_or_else(|| err.status.to_string()),
            Self::Unexpected {
                message,
                backtrace: Some(bt),
            } => format!("{message}\n\n{bt}"),
            Self::Unexpected { message, .. } => message.clone(),
        }
    }
}

thread_local! {
    static FORCE_BACKTRACE: Cell<bool> = const { Cell::new(false) };
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Chain a panic hook that records the panic-site backtrace while forced
fn install_panic_trace_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if FORCE_BACKTRACE.with(Cell::get) {
                let trace = Backtrace::force_capture().to_string();
                PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            } else {
                previous(info);
            }
        }));
    });
}

/// Run `f`, turning a panic into an unexpected [`Fault`]
///
/// With `force` set, faults created and panics raised inside `f` carry a
/// backtrace regardless of `RUST_BACKTRACE`; a panic's trace is the one
/// taken at the panic site.
pub(crate) fn capture_faults<F, T>(force: bool, f: F) -> std::result::Result<T, Fault>
where
    F: FnOnce() -> T,
{
    if force {
        install_panic_trace_hook();
    }
    PANIC_TRACE.with(|slot| *slot.borrow_mut() = None);
    let outer = FORCE_BACKTRACE.with(|flag| flag.replace(force));
    let result = panic::catch_unwind(panic::AssertUnwindSafe(f));
    FORCE_BACKTRACE.with(|flag| flag.set(outer));

    result.map_err(|payload| Fault::Unexpected {
        message: panic_message(payload.as_ref()),
        backtrace: PANIC_TRACE.with(|slot| slot.borrow_mut().take()),
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

impl From<std::io::Error> for Fault {
    fn from(err: std::io::Error) -> Self {
        Self::unexpected(err)
    }
}

impl From<serde_json::Error> for Fault {
    fn from(err: serde_json::Error) -> Self {
        Self::unexpected(err)
    }
}

impl From<std::num::ParseIntError> for Fault {
    fn from(err: std::num::ParseIntError) -> Self {
        Self::unexpected(err)
    }
}

impl From<std::num::ParseFloatError> for Fault {
    fn from(err: std::num::ParseFloatError) -> Self {
        Self::unexpected(err)
    }
}

impl From<Error> for Fault {
    fn from(err: Error) -> Self {
        Self::unexpected(err)
    }
}
