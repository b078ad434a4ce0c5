//! # HTTP Server
//!
//! Thin host adapter built on Hyper and Tokio. Each request is turned into
//! an [`Environ`], dispatched synchronously on the blocking pool, and the
//! [`Finalized`] triple is written back.
//!
//! ## Key Features
//!
//! - HTTP/1 connections with optional keep-alive
//! - Body read capped at one byte past the configured limit
//! - Graceful shutdown on Ctrl-C with a bounded drain

use crate::app::App;
use crate::environ::{cgi_key, keys, Environ};
use crate::error::{Error, Result};
use crate::response::Finalized;
use crate::wire::{latin1_from_bytes, latin1_to_bytes};
use http_body_util::{BodyExt, Full};
pub use hyper::body::Bytes;
use hyper::body::Body;
use hyper::ext::ReasonPhrase;
use hyper::header::{HeaderName, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::StatusCode;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_DIRECTIVE: &str = "trellis_core=info";

/// HTTP Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub address: SocketAddr,
    /// Enable keep-alive connections
    pub keep_alive: bool,
    /// Shutdown timeout for graceful shutdown (default: 30 seconds)
    pub shutdown_timeout: Duration,
    /// Max request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 8000).into(),
            keep_alive: true,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: crate::request::MAX_BODY_SIZE,
        }
    }
}

/// Install a JSON `tracing` subscriber filtered by `RUST_LOG`
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVE));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .try_init();
}

/// Serves one [`App`] over HTTP/1
#[derive(Clone)]
pub struct Server {
    app: Arc<App>,
    config: ServerConfig,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Serve `app` with the default configuration and the app's body cap
    #[must_use]
    pub fn new(app: App) -> Self {
        let config = ServerConfig {
            max_body_size: app.config().max_body_size,
            ..ServerConfig::default()
        };
        Self {
            app: Arc::new(app),
            config,
        }
    }

    /// Serve `app` with an explicit configuration
    ///
    /// The configured body cap replaces the app's own.
    #[must_use]
    pub fn with_config(mut app: App, config: ServerConfig) -> Self {
        app.set_max_body_size(config.max_body_size);
        Self {
            app: Arc::new(app),
            config,
        }
    }

    /// Set the bind address
    #[must_use]
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.config.address = addr;
        self
    }

    /// Current configuration
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The application being served
    #[must_use]
    pub fn app(&self) -> &App {
        &self.app
    }

    /// Accept connections until Ctrl-C, then drain
    ///
    /// # Errors
    ///
    /// Returns `Error::BindError` if the listener cannot be set up and
    /// `Error::Io` if accepting fails.
    pub async fn serve(&self) -> Result<()> {
        let addr = self.config.address;
        let bind_error = |source: std::io::Error| Error::BindError {
            address: addr.to_string(),
            source,
        };

        let socket = if addr.is_ipv4() {
            tokio::net::TcpSocket::new_v4()
        } else {
            tokio::net::TcpSocket::new_v6()
        }
        .map_err(bind_error)?;
        socket.set_reuseaddr(true).map_err(bind_error)?;
        socket.bind(addr).map_err(bind_error)?;
        let listener = socket.listen(1024).map_err(bind_error)?;

        info!(address = %addr, "Server listening");

        let active = Arc::new(AtomicUsize::new(0));
        let keep_alive = self.config.keep_alive;

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, remote_addr) = accept_result?;
                    let io = TokioIo::new(stream);
                    let server = self.clone();
                    let active = Arc::clone(&active);

                    tokio::task::spawn(async move {
                        active.fetch_add(1, Ordering::Relaxed);
                        let service = service_fn(move |req| {
                            let server = server.clone();
                            async move {
                                Ok::<_, Infallible>(server.handle(req, Some(remote_addr)).await)
                            }
                        });
                        if let Err(err) = http1::Builder::new()
                            .keep_alive(keep_alive)
                            .serve_connection(io, service)
                            .await
                        {
                            warn!(remote = %remote_addr, error = %err, "Error serving connection");
                        }
                        active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                () = shutdown_signal() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        let drain = async {
            while active.load(Ordering::Relaxed) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        if tokio::time::timeout(self.config.shutdown_timeout, drain)
            .await
            .is_err()
        {
            warn!(
                open = active.load(Ordering::Relaxed),
                "Shutdown timeout reached with connections still open"
            );
        }
        Ok(())
    }

    /// Translate, dispatch and translate back one hyper request
    pub async fn handle<B>(
        &self,
        req: hyper::Request<B>,
        remote: Option<SocketAddr>,
    ) -> hyper::Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Unpin,
        B::Error: fmt::Display,
    {
        let (parts, body) = req.into_parts();
        let limit = self.app.config().max_body_size.saturating_add(1);
        let body = match read_capped(body, limit).await {
            Ok(body) => body,
            Err(err) => {
                warn!(path = %parts.uri.path(), error = %err, "Failed to read request body");
                return plain_response(StatusCode::BAD_REQUEST, "Bad Request");
            }
        };

        let environ = build_environ(&parts, self.config.address, remote).with_input(Cursor::new(body));
        let app = Arc::clone(&self.app);
        match tokio::task::spawn_blocking(move || app.dispatch(environ)).await {
            Ok(finalized) => into_hyper(finalized),
            Err(err) => {
                error!(error = %err, "Dispatch task failed");
                plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}

/// Collect at most `limit` body bytes
async fn read_capped<B>(mut body: B, limit: usize) -> std::result::Result<Vec<u8>, B::Error>
where
    B: Body<Data = Bytes> + Unpin,
{
    let mut buf = Vec::new();
    while buf.len() < limit {
        let Some(frame) = body.frame().await else {
            break;
        };
        if let Ok(data) = frame?.into_data() {
            let take = data.len().min(limit - buf.len());
            buf.extend_from_slice(&data[..take]);
        }
    }
    Ok(buf)
}

fn build_environ(
    parts: &hyper::http::request::Parts,
    local: SocketAddr,
    remote: Option<SocketAddr>,
) -> Environ {
    let mut environ = Environ::new()
        .with_var(keys::REQUEST_METHOD, parts.method.as_str())
        .with_var(keys::SCRIPT_NAME, "")
        .with_var(keys::PATH_INFO, parts.uri.path())
        .with_var(keys::QUERY_STRING, parts.uri.query().unwrap_or(""))
        .with_var(keys::SERVER_NAME, &local.ip().to_string())
        .with_var(keys::SERVER_PORT, &local.port().to_string())
        .with_var(keys::SERVER_PROTOCOL, &format!("{:?}", parts.version))
        .with_var(keys::URL_SCHEME, "http");
    if let Some(remote) = remote {
        environ.set_var(keys::REMOTE_ADDR, &remote.ip().to_string());
    }
    for (name, value) in &parts.headers {
        environ.append_var(&cgi_key(name.as_str()), &latin1_from_bytes(value.as_bytes()));
    }
    environ
}

fn plain_response(status: StatusCode, body: &'static str) -> hyper::Response<Full<Bytes>> {
    let mut response = hyper::Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

fn into_hyper(finalized: Finalized) -> hyper::Response<Full<Bytes>> {
    let Finalized {
        status,
        headers,
        body,
    } = finalized;

    let mut response = hyper::Response::new(Full::new(Bytes::from(body)));
    let code = StatusCode::from_u16(status.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    *response.status_mut() = code;
    if code.canonical_reason() != Some(status.reason()) && !status.reason().is_empty() {
        if let Some(reason) = latin1_to_bytes(status.reason())
            .and_then(|bytes| ReasonPhrase::try_from(bytes).ok())
        {
            response.extensions_mut().insert(reason);
        }
    }

    for (name, value) in headers {
        let header = HeaderName::from_bytes(name.as_bytes()).ok().zip(
            latin1_to_bytes(&value).and_then(|bytes| HeaderValue::from_bytes(&bytes).ok()),
        );
        match header {
            Some((name, value)) => {
                response.headers_mut().append(name, value);
            }
            None => warn!(header = %name, "Dropping unrepresentable response header"),
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppConfig;
    use crate::error::{HttpError, StatusLine};
    use crate::response::Output;

    fn demo_app() -> App {
        let mut app = App::new();
        app.get("/hello", |req, _| {
            Ok(format!("Hello {}", req.query("name").unwrap_or("world")).into())
        })
        .unwrap();
        app.post("/echo", |req, res| {
            res.set_header("X-Peer", req.environ_var(keys::REMOTE_ADDR).unwrap_or_default())?;
            Ok(req.body().to_vec().into())
        })
        .unwrap();
        app.get("/teapot", |_, _| {
            Err(HttpError::new(Output::Empty, StatusLine::parse("418 Short And Stout").unwrap()).into())
        })
        .unwrap();
        app
    }

    fn request(method: &str, uri: &str, body: &'static str) -> hyper::Request<Full<Bytes>> {
        hyper::Request::builder()
            .method(method)
            .uri(uri)
            .header("host", "example.com")
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    async fn body_of(response: hyper::Response<Full<Bytes>>) -> Vec<u8> {
        response.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.address.port(), 8000);
        assert!(config.keep_alive);
        assert_eq!(config.max_body_size, 1024 * 1024);
    }

    #[test]
    fn test_body_cap_is_shared_with_app() {
        let server = Server::new(App::with_config(AppConfig {
            max_body_size: 10,
            ..AppConfig::default()
        }));
        assert_eq!(server.config().max_body_size, 10);

        let config = ServerConfig {
            max_body_size: 3,
            ..ServerConfig::default()
        };
        let server = Server::with_config(App::new(), config).bind(([0, 0, 0, 0], 9000).into());
        assert_eq!(server.app().config().max_body_size, 3);
        assert_eq!(server.config().address.port(), 9000);
    }

    #[tokio::test]
    async fn test_handle_get() {
        let server = Server::new(demo_app());
        let response = server.handle(request("GET", "/hello?name=Ada", ""), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/html; charset=UTF-8"
        );
        assert_eq!(response.headers().get("content-length").unwrap(), "9");
        assert_eq!(body_of(response).await, b"Hello Ada");
    }

    #[tokio::test]
    async fn test_handle_post_body_and_peer() {
        let server = Server::new(demo_app());
        let peer: SocketAddr = ([10, 0, 0, 7], 5555).into();
        let response = server.handle(request("POST", "/echo", "ping"), Some(peer)).await;
        assert_eq!(response.headers().get("x-peer").unwrap(), "10.0.0.7");
        assert_eq!(body_of(response).await, b"ping");
    }

    #[tokio::test]
    async fn test_handle_oversized_body() {
        let config = ServerConfig {
            max_body_size: 3,
            ..ServerConfig::default()
        };
        let server = Server::with_config(demo_app(), config);
        let response = server.handle(request("POST", "/echo", "abc"), None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = server.handle(request("POST", "/echo", "abcd"), None).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_custom_reason_phrase() {
        let server = Server::new(demo_app());
        let response = server.handle(request("GET", "/teapot", ""), None).await;
        assert_eq!(response.status().as_u16(), 418);
        let reason = response.extensions().get::<ReasonPhrase>().unwrap();
        assert_eq!(reason.as_bytes(), b"Short And Stout");
    }

    #[test]
    fn test_not_found_blocking_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let server = Server::new(demo_app());
        let response = runtime.block_on(server.handle(request("GET", "/missing", ""), None));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_read_capped() {
        let body = Full::new(Bytes::from_static(b"0123456789"));
        let bytes = tokio_test::block_on(read_capped(body, 4)).unwrap();
        assert_eq!(bytes, b"0123");

        let body = Full::new(Bytes::from_static(b"01"));
        let bytes = tokio_test::block_on(read_capped(body, 4)).unwrap();
        assert_eq!(bytes, b"01");
    }

    #[test]
    fn test_build_environ() {
        let req = hyper::Request::builder()
            .uri("/a/b?x=1")
            .header("Content-Type", "text/plain")
            .header("X-Token", "abc")
            .header("Accept", "text/html")
            .header("Accept", "application/json")
            .header("Cookie", "a=1")
            .header("Cookie", "b=2")
            .body(())
            .unwrap();
        let (parts, ()) = req.into_parts();
        let environ = build_environ(&parts, ([127, 0, 0, 1], 8000).into(), None);
        assert_eq!(environ.var(keys::PATH_INFO), Some("/a/b"));
        assert_eq!(environ.var(keys::QUERY_STRING), Some("x=1"));
        assert_eq!(environ.var(keys::CONTENT_TYPE), Some("text/plain"));
        assert_eq!(environ.var("HTTP_X_TOKEN"), Some("abc"));
        assert_eq!(environ.var("HTTP_ACCEPT"), Some("text/html, application/json"));
        assert_eq!(environ.var(keys::HTTP_COOKIE), Some("a=1; b=2"));
        assert_eq!(environ.var(keys::SERVER_PROTOCOL), Some("HTTP/1.1"));
        assert_eq!(environ.var(keys::REMOTE_ADDR), None);
    }

    #[test]
    fn test_into_hyper_encodes_headers() {
        let finalized = Finalized {
            status: StatusLine::from_code(201),
            headers: vec![
                ("X-NAME".to_string(), crate::wire::utf8_to_latin1("Zoë")),
                ("SET-COOKIE".to_string(), "a=1".to_string()),
                ("SET-COOKIE".to_string(), "b=2".to_string()),
            ],
            body: b"ok".to_vec(),
        };
        let response = into_hyper(finalized);
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get("x-name").unwrap().as_bytes(), "Zoë".as_bytes());
        assert_eq!(response.headers().get_all("set-cookie").iter().count(), 2);
        assert!(response.extensions().get::<ReasonPhrase>().is_none());
    }
}
