//! # Trellis Core
//!
//! A small synchronous HTTP dispatch library: routes matched by exact path,
//! segment wildcards or regular expressions; handlers wrapped by a plugin
//! chain; errors routed through tag-based presentation handlers; cookies
//! optionally signed with HMAC-SHA512.
//!
//! ```
//! use trellis_core::{App, Environ};
//!
//! let mut app = App::new();
//! app.get("/hello/*", |req, _res| {
//!     Ok(format!("Hello, {}!", req.wildcards()[0]).into())
//! })
//! .unwrap();
//!
//! let response = app.dispatch(Environ::get("/hello/world"));
//! assert_eq!(response.status_line(), "200 OK");
//! assert_eq!(response.body, b"Hello, world!");
//! ```
//!
//! ## Modules
//!
//! - `app` - Dispatcher: route table, plugins, error-tag handlers
//! - `route` / `matcher` - Route model and the three matching modes
//! - `environ` - Host-adapter environment handed to the dispatcher
//! - `request` / `form` / `multipart` / `json` / `cookie` - Request building
//! - `response` - Response building and finalization
//! - `plugin` - Handler and plugin types, composition, bundled plugins
//! - `signing` - Signed-value codec used by cookies
//! - `side_table` - Per-request data keyed by request identity
//! - `wire` - Header transport encoding
//! - `server` - Hyper/Tokio host adapter
//! - `error` - Error types and handling

pub mod app;
pub mod cookie;
pub mod environ;
pub mod error;
pub mod form;
pub mod json;
pub mod matcher;
pub mod multipart;
pub mod plugin;
pub mod request;
pub mod response;
pub mod route;
pub mod server;
pub mod side_table;
pub mod signing;
pub mod wire;

pub use app::{App, AppConfig, ErrorContext, ErrorHandler, RouteBuilder};
pub use cookie::{CookieOptions, SameSite, SetCookie};
pub use environ::Environ;
pub use error::{Error, ErrorTag, Fault, HttpError, Result, StatusLine};
pub use form::{FileUpload, FormData, FormValue};
pub use matcher::PatternMatch;
pub use plugin::{compose, handler, logging_plugin, plugin, timing_plugin, Handler, HandlerResult, Plugin};
pub use request::{Request, RequestId};
pub use response::{escape_html, Finalized, Output, Response};
pub use route::{MatchMode, Method, Route};
pub use server::{init_tracing, Server, ServerConfig};
pub use side_table::SideTable;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "0.1.0");
    }

    #[test]
    fn test_side_table_from_plugin() {
        let seen: SideTable<String> = SideTable::new();
        let table = seen.clone();
        let tagger = plugin(move |next: Handler| {
            let table = table.clone();
            handler(move |req, res| {
                table.insert(req.id(), req.path().to_string());
                let out = next(req, res);
                table.remove(req.id());
                out
            })
        });

        let mut app = App::new();
        let inner = seen.clone();
        app.get("/p", move |req, _| Ok(inner.get(req.id()).unwrap_or_default().into()))
            .unwrap();
        app.install(tagger);

        let response = app.dispatch(Environ::get("/p"));
        assert_eq!(response.body, b"/p");
        assert!(seen.is_empty());
    }
}
