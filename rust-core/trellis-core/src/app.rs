//! # Dispatcher
//!
//! [`App`] owns the route table, the plugin list and the error-tag handler
//! table, and runs one request from [`Environ`] to [`Finalized`].
//!
//! ## Lifecycle
//!
//! 1. Build the request (body read up to the configured cap).
//! 2. Pick the first route, in registration order, whose verb set and
//!    pattern both accept the request.
//! 3. Wrap its handler with every installed plugin and call it.
//! 4. Turn raised errors into a body through the error-tag table; anything
//!    unplanned (including panics) becomes a 500 tagged `unexpectedError`.
//! 5. Finalize exactly once.
//!
//! Registration methods take `&mut self`; configure the app fully before
//! sharing it across threads. Dispatch only needs `&self`.

use crate::environ::Environ;
use crate::error::{capture_faults, Error, ErrorTag, Fault, HttpError, Result, StatusLine};
use crate::matcher::Captures;
use crate::plugin::{compose, Handler, HandlerResult, Plugin};
use crate::request::{Request, MAX_BODY_SIZE};
use crate::response::{escape_html, Finalized, Output, Response, JSON_CONTENT_TYPE};
use crate::route::{MatchMode, Method, Route};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Environment variable enabling debug mode
pub const ENV_DEBUG: &str = "TRELLIS_DEBUG";

/// Environment variable overriding the body cap (bytes)
pub const ENV_MAX_BODY_SIZE: &str = "TRELLIS_MAX_BODY_SIZE";

/// Dispatcher settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppConfig {
    /// Expose diagnostics in the `unexpectedError` presentation
    pub debug: bool,
    /// Request body cap in bytes
    pub max_body_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debug: false,
            max_body_size: MAX_BODY_SIZE,
        }
    }
}

impl AppConfig {
    /// Read overrides from `TRELLIS_DEBUG` and `TRELLIS_MAX_BODY_SIZE`
    ///
    /// Missing or unparsable values keep the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let debug = lookup(ENV_DEBUG).map_or(defaults.debug, |v| {
            matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
        });
        let max_body_size = lookup(ENV_MAX_BODY_SIZE)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(defaults.max_body_size);
        Self {
            debug,
            max_body_size,
        }
    }
}

/// What an error-tag handler gets to look at
#[derive(Debug)]
pub struct ErrorContext<'a> {
    error: &'a HttpError,
    debug: bool,
}

impl ErrorContext<'_> {
    /// The error being presented
    #[must_use]
    pub const fn error(&self) -> &HttpError {
        self.error
    }

    /// Whether the app runs in debug mode
    #[must_use]
    pub const fn is_debug(&self) -> bool {
        self.debug
    }
}

/// Produces the body for a tagged error
pub type ErrorHandler =
    Arc<dyn Fn(&Request, &mut Response, &ErrorContext<'_>) -> Output + Send + Sync>;

fn default_tag_handler(tag: ErrorTag) -> ErrorHandler {
    let status = StatusLine::from_code(tag.status_code()).to_string();
    Arc::new(move |req: &Request, _res: &mut Response, _ctx: &ErrorContext<'_>| {
        if req.media_type().as_deref() == Some(JSON_CONTENT_TYPE) {
            Output::Json(json!({ "status": status, "msg": tag.message() }))
        } else {
            Output::Text(format!(
                "<h2>{}</h2><pre>{}</pre>",
                escape_html(&status),
                escape_html(tag.message())
            ))
        }
    })
}

fn default_unexpected_handler() -> ErrorHandler {
    Arc::new(|_req: &Request, _res: &mut Response, ctx: &ErrorContext<'_>| {
        if !ctx.is_debug() {
            return Output::Text("<h2>500 Internal Server Error</h2>".to_string());
        }
        let diagnostics = ctx.error().diagnostics.as_deref().unwrap_or_default();
        Output::Text(format!(
            "<h2>500 Internal Server Error</h2>\n<hr>\n<h3>Diagnostics</h3>\n<pre>{}</pre>",
            escape_html(diagnostics)
        ))
    })
}

fn default_error_handlers() -> HashMap<ErrorTag, ErrorHandler> {
    ErrorTag::ALL
        .into_iter()
        .map(|tag| {
            let handler = match tag {
                ErrorTag::UnexpectedError => default_unexpected_handler(),
                other => default_tag_handler(other),
            };
            (tag, handler)
        })
        .collect()
}

/// The dispatcher
pub struct App {
    routes: Vec<Option<Route>>,
    names: HashMap<String, usize>,
    vacated: HashMap<String, usize>,
    plugins: Vec<Plugin>,
    error_handlers: HashMap<ErrorTag, ErrorHandler>,
    config: AppConfig,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("routes", &self.routes().collect::<Vec<_>>())
            .field("plugins", &self.plugins.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl App {
    /// Empty app with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    /// Empty app with the given configuration
    #[must_use]
    pub fn with_config(config: AppConfig) -> Self {
        Self {
            routes: Vec::new(),
            names: HashMap::new(),
            vacated: HashMap::new(),
            plugins: Vec::new(),
            error_handlers: default_error_handlers(),
            config,
        }
    }

    /// Current configuration
    #[must_use]
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Toggle debug mode
    pub fn set_debug(&mut self, debug: bool) {
        self.config.debug = debug;
    }

    /// Change the request body cap
    pub fn set_max_body_size(&mut self, bytes: usize) {
        self.config.max_body_size = bytes;
    }

    /// Whether debug mode is on
    #[must_use]
    pub const fn is_debug(&self) -> bool {
        self.config.debug
    }

    /// Register a route
    ///
    /// Routes are tried in registration order. A named route re-registered
    /// after [`App::remove_named_route`] takes back its old position.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for a malformed pattern and
    /// `Error::DuplicateRouteName` when `name` is already taken.
    pub fn add_route(
        &mut self,
        verbs: &[Method],
        path: &str,
        handler: Handler,
        mode: Option<MatchMode>,
        name: Option<&str>,
    ) -> Result<()> {
        if let Some(name) = name {
            if self.names.contains_key(name) {
                return Err(Error::DuplicateRouteName {
                    name: name.to_string(),
                });
            }
        }
        let route = Route::new(verbs, path, handler, mode, name.map(str::to_string))?;
        debug!(path = %route.path(), mode = ?route.mode(), name = ?route.name(), "Route registered");

        let Some(name) = name else {
            self.routes.push(Some(route));
            return Ok(());
        };
        let slot = match self.vacated.remove(name) {
            Some(slot) => {
                self.routes[slot] = Some(route);
                slot
            }
            None => {
                self.routes.push(Some(route));
                self.routes.len() - 1
            }
        };
        self.names.insert(name.to_string(), slot);
        Ok(())
    }

    /// Start a route registration
    ///
    /// ```
    /// use trellis_core::{App, Method};
    ///
    /// let mut app = App::new();
    /// app.route(&[Method::Get], "/hello")
    ///     .name("hello")
    ///     .to(|_req, _res| Ok("Hello".into()))
    ///     .unwrap();
    /// assert!(app.find_named_route("hello").is_some());
    /// ```
    pub fn route(&mut self, verbs: &[Method], path: &str) -> RouteBuilder<'_> {
        RouteBuilder {
            app: self,
            verbs: verbs.to_vec(),
            path: path.to_string(),
            mode: None,
            name: None,
        }
    }

    /// Register a GET route
    ///
    /// # Errors
    ///
    /// See [`App::add_route`].
    pub fn get<F>(&mut self, path: &str, f: F) -> Result<()>
    where
        F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(&[Method::Get], path).to(f)
    }

    /// Register a POST route
    ///
    /// # Errors
    ///
    /// See [`App::add_route`].
    pub fn post<F>(&mut self, path: &str, f: F) -> Result<()>
    where
        F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(&[Method::Post], path).to(f)
    }

    /// Register a PUT route
    ///
    /// # Errors
    ///
    /// See [`App::add_route`].
    pub fn put<F>(&mut self, path: &str, f: F) -> Result<()>
    where
        F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(&[Method::Put], path).to(f)
    }

    /// Register a DELETE route
    ///
    /// # Errors
    ///
    /// See [`App::add_route`].
    pub fn delete<F>(&mut self, path: &str, f: F) -> Result<()>
    where
        F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(&[Method::Delete], path).to(f)
    }

    /// Look up a route by name
    #[must_use]
    pub fn find_named_route(&self, name: &str) -> Option<&Route> {
        self.names
            .get(name)
            .and_then(|&slot| self.routes.get(slot))
            .and_then(Option::as_ref)
    }

    /// Unregister a named route, keeping its position for the same name
    pub fn remove_named_route(&mut self, name: &str) -> Option<Route> {
        let slot = self.names.remove(name)?;
        self.vacated.insert(name.to_string(), slot);
        self.routes.get_mut(slot).and_then(Option::take)
    }

    /// Registered routes in match order
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter().flatten()
    }

    /// Append a plugin; the first installed wraps closest to the handler
    pub fn install(&mut self, plugin: Plugin) {
        self.plugins.push(plugin);
    }

    /// Replace the presentation for one error tag
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownErrorTag` for tags without a default handler.
    pub fn on_error_tag<F>(&mut self, tag: &str, f: F) -> Result<()>
    where
        F: Fn(&Request, &mut Response, &ErrorContext<'_>) -> Output + Send + Sync + 'static,
    {
        let tag: ErrorTag = tag.parse()?;
        self.error_handlers.insert(tag, Arc::new(f));
        Ok(())
    }

    fn find_route(&self, req: &Request) -> std::result::Result<(&Route, Captures), HttpError> {
        self.routes()
            .filter(|route| route.allows(req.method()))
            .find_map(|route| route.matches(req.path()).map(|captures| (route, captures)))
            .ok_or_else(HttpError::route_not_found)
    }

    fn run(&self, req: &mut Request, res: &mut Response) -> HandlerResult {
        let (route, captures) = self.find_route(req)?;
        debug!(
            path = %req.path(),
            pattern = %route.path(),
            mode = ?route.mode(),
            request_id = %req.id(),
            "Route matched"
        );
        req.apply_captures(captures);

        let req = &*req;
        capture_faults(self.config.debug, || {
            compose(route.handler(), &self.plugins)(req, res)
        })
        .unwrap_or_else(Err)
    }

    fn recover(&self, req: &Request, res: &mut Response, fault: Fault) -> Output {
        let err = match fault {
            Fault::Http(err) => err,
            unexpected @ Fault::Unexpected { .. } => {
                error!(
                    method = %req.method(),
                    path = %req.path(),
                    request_id = %req.id(),
                    fault = %unexpected,
                    "Unhandled fault"
                );
                HttpError::unexpected(unexpected.diagnostics())
            }
        };
        res.set_status(err.status.clone());

        let Some(handler) = err.error_tag().and_then(|tag| self.error_handlers.get(&tag)) else {
            return err.body;
        };
        let ctx = ErrorContext {
            error: &err,
            debug: self.config.debug,
        };
        capture_faults(false, || handler(req, res, &ctx)).unwrap_or_else(|fault| {
            error!(request_id = %req.id(), panic = %fault, "Error handler panicked");
            err.body.clone()
        })
    }

    /// Run one request end to end
    ///
    /// Never fails: every error becomes a response.
    #[must_use]
    pub fn dispatch(&self, environ: Environ) -> Finalized {
        let start = Instant::now();
        let (mut req, mut input) = Request::from_environ(environ);
        let mut res = Response::new();

        let outcome = match req.load_body(&mut input, self.config.max_body_size) {
            Ok(()) => self.run(&mut req, &mut res),
            Err(err) => Err(err.into()),
        };
        let output = match outcome {
            Ok(output) => output,
            Err(fault) => self.recover(&req, &mut res, fault),
        };

        let finalized = res.finalize(output);
        info!(
            method = %req.method(),
            path = %req.path(),
            status = finalized.status.code(),
            duration_us = start.elapsed().as_micros(),
            request_id = %req.id(),
            "Request dispatched"
        );
        finalized
    }
}

/// Pending route registration started by [`App::route`]
#[must_use = "a route is only registered by calling `to`"]
pub struct RouteBuilder<'a> {
    app: &'a mut App,
    verbs: Vec<Method>,
    path: String,
    mode: Option<MatchMode>,
    name: Option<String>,
}

impl RouteBuilder<'_> {
    /// Force a match mode instead of inferring it
    pub fn mode(mut self, mode: MatchMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Name the route
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Register the route with this handler
    ///
    /// # Errors
    ///
    /// See [`App::add_route`].
    pub fn to<F>(self, f: F) -> Result<()>
    where
        F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.app.add_route(
            &self.verbs,
            &self.path,
            Arc::new(f),
            self.mode,
            self.name.as_deref(),
        )
    }
}
