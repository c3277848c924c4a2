//! HTTP server for the scrape endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};
use v2ray_stats::StatsSource;

use crate::config::{BasicAuthConfig, HEALTH_PATH, READY_PATH};
use crate::exporter::Exporter;

/// Content type produced by the `prometheus-client` text encoder.
pub const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Application state shared across handlers.
struct AppState<S> {
    exporter: Arc<Exporter<S>>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            exporter: self.exporter.clone(),
        }
    }
}

/// Create the HTTP router.
///
/// Basic Auth, when configured, guards only the scrape route.
pub fn create_router<S: StatsSource>(
    exporter: Arc<Exporter<S>>,
    metrics_path: &str,
    basic_auth: Option<BasicAuthConfig>,
) -> Router {
    let state = AppState { exporter };

    let mut scrape = Router::new().route(metrics_path, get(scrape_handler::<S>));
    if let Some(credentials) = basic_auth {
        scrape = scrape.layer(middleware::from_fn_with_state(
            Arc::new(credentials),
            basic_auth_middleware,
        ));
    }

    Router::new()
        .merge(scrape)
        .route(HEALTH_PATH, get(health_handler))
        .route(READY_PATH, get(ready_handler::<S>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the scrape endpoint.
///
/// A failed collection pass still serves whatever the registry holds.
async fn scrape_handler<S: StatsSource>(State(state): State<AppState<S>>) -> Response {
    let _ = state.exporter.collect().await;

    match state.exporter.render() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to render metrics\n").into_response()
        }
    }
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
async fn ready_handler<S: StatsSource>(State(state): State<AppState<S>>) -> Response {
    if state.exporter.is_ready() {
        (StatusCode::OK, "ready\n").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - last scrape failed\n",
        )
            .into_response()
    }
}

/// Reject requests whose `Authorization: Basic` header does not carry the
/// configured credentials.
async fn basic_auth_middleware(
    State(credentials): State<Arc<BasicAuthConfig>>,
    request: Request,
    next: Next,
) -> Response {
    if check_basic_auth(request.headers(), &credentials) {
        return next.run(request).await;
    }

    debug!(path = %request.uri().path(), "Rejected scrape without valid credentials");
    (
        StatusCode::UNAUTHORIZED,
        [(WWW_AUTHENTICATE, "Basic realm=\"Restricted\"")],
        "401 Unauthorized\n",
    )
        .into_response()
}

fn check_basic_auth(headers: &HeaderMap, credentials: &BasicAuthConfig) -> bool {
    let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Some((scheme, encoded)) = value.split_once(' ') else {
        return false;
    };
    if !scheme.eq_ignore_ascii_case("basic") {
        return false;
    }
    let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };

    match decoded.split_once(':') {
        Some((user, pass)) => user == credentials.username && pass == credentials.password,
        None => false,
    }
}

/// HTTP server configuration.
pub struct HttpServer<S> {
    exporter: Arc<Exporter<S>>,
    listen_addr: SocketAddr,
    metrics_path: String,
    basic_auth: Option<BasicAuthConfig>,
}

impl<S: StatsSource> HttpServer<S> {
    /// Create a new HTTP server.
    pub fn new(
        exporter: Arc<Exporter<S>>,
        listen_addr: SocketAddr,
        metrics_path: String,
        basic_auth: Option<BasicAuthConfig>,
    ) -> Self {
        Self {
            exporter,
            listen_addr,
            metrics_path,
            basic_auth,
        }
    }

    /// Bind the listener, failing if the address is unavailable.
    pub async fn bind(&self) -> anyhow::Result<tokio::net::TcpListener> {
        tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))
    }

    /// Serve on an already bound listener until the shutdown signal is received.
    pub async fn serve(
        self,
        listener: tokio::net::TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let addr = listener.local_addr().unwrap_or(self.listen_addr);
        let router = create_router(self.exporter, &self.metrics_path, self.basic_auth.clone());

        info!(
            addr = %addr,
            path = %self.metrics_path,
            basic_auth = self.basic_auth.is_some(),
            "Server is ready to handle incoming scrape requests"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
