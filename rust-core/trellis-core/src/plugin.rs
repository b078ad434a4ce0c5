//! # Handlers and Plugins
//!
//! A [`Handler`] turns `(request, response)` into an [`Output`]. A [`Plugin`]
//! is a handler-to-handler transformation; the dispatcher composes every
//! installed plugin around the matched route's handler right before calling
//! it.
//!
//! Composition is innermost-first: with plugins `A` then `B` installed the
//! call is `B(A(handler))`, so `A` runs closest to the route code.

use crate::error::Fault;
use crate::request::Request;
use crate::response::{Output, Response};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// What a handler returns
pub type HandlerResult = Result<Output, Fault>;

/// Route handler
pub type Handler = Arc<dyn Fn(&Request, &mut Response) -> HandlerResult + Send + Sync>;

/// Handler-wrapping transformation
pub type Plugin = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// Box a closure as a [`Handler`]
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Box a closure as a [`Plugin`]
pub fn plugin<F>(f: F) -> Plugin
where
    F: Fn(Handler) -> Handler + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap `inner` with every plugin, first plugin innermost
#[must_use]
pub fn compose(inner: &Handler, plugins: &[Plugin]) -> Handler {
    plugins
        .iter()
        .fold(Arc::clone(inner), |wrapped, plugin| plugin(wrapped))
}

/// Structured request/response log lines
#[must_use]
pub fn logging_plugin() -> Plugin {
    plugin(|next: Handler| {
        handler(move |req, res| {
            info!(
                method = %req.method(),
                path = %req.path(),
                request_id = %req.id(),
                "Request received"
            );
            let result = next(req, res);
            info!(
                method = %req.method(),
                path = %req.path(),
                status = res.status().code(),
                ok = result.is_ok(),
                request_id = %req.id(),
                "Handler finished"
            );
            result
        })
    })
}

/// Handler duration at debug level
#[must_use]
pub fn timing_plugin() -> Plugin {
    plugin(|next: Handler| {
        handler(move |req, res| {
            let start = Instant::now();
            let result = next(req, res);
            debug!(
                method = %req.method(),
                path = %req.path(),
                duration_us = start.elapsed().as_micros(),
                "Request timing"
            );
            result
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environ::Environ;
    use std::sync::Mutex;

    fn tracer(log: &Arc<Mutex<Vec<String>>>, label: &'static str) -> Plugin {
        let log = Arc::clone(log);
        plugin(move |next: Handler| {
            let log = Arc::clone(&log);
            handler(move |req, res| {
                log.lock().unwrap().push(format!("{label}:before"));
                let out = next(req, res);
                log.lock().unwrap().push(format!("{label}:after"));
                out
            })
        })
    }

    fn request() -> Request {
        Request::build(Environ::get("/")).unwrap()
    }

    #[test]
    fn test_compose_without_plugins() {
        let h = handler(|_, _| Ok("raw".into()));
        let composed = compose(&h, &[]);
        let out = composed(&request(), &mut Response::new()).unwrap();
        assert_eq!(out, Output::Text("raw".to_string()));
    }

    #[test]
    fn test_first_plugin_is_innermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner_log = Arc::clone(&log);
        let h = handler(move |_, _| {
            inner_log.lock().unwrap().push("handler".to_string());
            Ok(Output::Empty)
        });

        let plugins = [tracer(&log, "A"), tracer(&log, "B")];
        compose(&h, &plugins)(&request(), &mut Response::new()).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["B:before", "A:before", "handler", "A:after", "B:after"]
        );
    }

    #[test]
    fn test_plugin_can_rewrite_output() {
        let shout = plugin(|next: Handler| {
            handler(move |req, res| {
                let out = next(req, res)?;
                Ok(match out {
                    Output::Text(s) => Output::Text(s.to_uppercase()),
                    other => other,
                })
            })
        });
        let h = handler(|_, _| Ok("quiet".into()));
        let out = compose(&h, &[shout])(&request(), &mut Response::new()).unwrap();
        assert_eq!(out, Output::Text("QUIET".to_string()));
    }

    #[test]
    fn test_bundled_plugins_pass_through() {
        let h = handler(|_, res| {
            res.set_status(201);
            Ok("made".into())
        });
        let mut res = Response::new();
        let out = compose(&h, &[logging_plugin(), timing_plugin()])(&request(), &mut res).unwrap();
        assert_eq!(out, Output::Text("made".to_string()));
        assert_eq!(res.status().code(), 201);
    }
}
