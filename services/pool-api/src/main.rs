//! Email pool API
//!
//! Single-binary service that:
//! 1. Loads the record store from a JSON file
//! 2. Serves the lease API, /health and /metrics on the external listener
//! 3. Serves the admin API on a second listener
//! 4. Records every pool operation to the audit sinks

mod admin;
mod api;
mod auth;
mod config;
mod error;
mod metrics;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{DefaultBodyLimit, FromRef, State};
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use email_pool::{
    AuditSink, EmailPool, FanoutAuditSink, JsonlAuditSink, RecentAuditLog, TracingAuditSink,
};
use metrics_exporter_prometheus::PrometheusHandle;
use pool_store::JsonStore;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::AdminState;
use crate::auth::KeyCheck;
use crate::config::Config;
use crate::metrics::ServiceStats;

/// How long in-flight requests may take to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the audit writer gets to flush once the servers are down.
const AUDIT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared application state for the external listener
#[derive(Clone)]
pub struct AppState {
    pool: EmailPool,
    stats: Arc<ServiceStats>,
    prometheus: PrometheusHandle,
}

impl FromRef<AppState> for EmailPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

/// Request limits applied to both listeners.
#[derive(Debug, Clone, Copy)]
struct Limits {
    max_connections: usize,
    body_limit: usize,
}

/// Build the external router: lease API behind the API key, plus the
/// unauthenticated /health and /metrics.
fn build_router(state: AppState, api_key: KeyCheck, limits: Limits) -> Router {
    let stats = state.stats.clone();
    Router::new()
        .merge(
            api::routes()
                .route_layer(middleware::from_fn_with_state(api_key, auth::require_key)),
        )
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn_with_state(stats, metrics::track_request))
        .layer(DefaultBodyLimit::max(limits.body_limit))
        .layer(tower::limit::ConcurrencyLimitLayer::new(limits.max_connections))
        .with_state(state)
}

/// Build the admin router served on its own listener.
fn build_admin_router(
    state: AdminState,
    admin_key: KeyCheck,
    stats: Arc<ServiceStats>,
    limits: Limits,
) -> Router {
    admin::routes(admin_key)
        .route_layer(middleware::from_fn_with_state(stats, metrics::track_request))
        .layer(DefaultBodyLimit::max(limits.body_limit))
        .layer(tower::limit::ConcurrencyLimitLayer::new(limits.max_connections))
        .with_state(state)
}

type ServerHandle = JoinHandle<std::io::Result<()>>;

/// Serve `app` until the returned sender fires.
fn spawn_server(listener: TcpListener, app: Router) -> (oneshot::Sender<()>, ServerHandle) {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });
    (shutdown_tx, handle)
}

fn log_server_exit(
    name: &str,
    result: std::result::Result<std::io::Result<()>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(())) => info!(listener = name, "all in-flight requests drained"),
        Ok(Err(e)) => error!(listener = name, error = %e, "server error during shutdown"),
        Err(e) => error!(listener = name, error = %e, "server task panicked"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting email-pool-api");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let keys = config
        .keys
        .take()
        .context("configuration loaded without keys")?;

    info!(
        listen_addr = %config.server.listen_addr,
        admin_listen_addr = %config.server.admin_listen_addr,
        store = %config.store.path.display(),
        max_connections = config.server.max_connections,
        "configuration loaded"
    );

    let store = JsonStore::load(config.store.path.clone())
        .await
        .with_context(|| format!("failed to load store from {}", config.store.path.display()))?;
    info!(records = store.len().await, "record store loaded");

    // Audit: tracing always, in-memory ring for the admin view, file if configured
    let recent = Arc::new(RecentAuditLog::new(config.audit.recent_capacity));
    let mut fanout = FanoutAuditSink::new()
        .with(Arc::new(TracingAuditSink))
        .with(recent.clone());
    let mut audit_writer = None;
    if let Some(path) = &config.audit.file {
        recent
            .restore(path)
            .await
            .with_context(|| format!("failed to read audit file {}", path.display()))?;
        let (sink, handle) = JsonlAuditSink::open(path)
            .await
            .with_context(|| format!("failed to open audit file {}", path.display()))?;
        fanout = fanout.with(Arc::new(sink));
        audit_writer = Some(handle);
    }
    let audit: Arc<dyn AuditSink> = Arc::new(fanout);

    let pool = EmailPool::new(Arc::new(store), audit);
    let stats = Arc::new(ServiceStats::new());
    let limits = Limits {
        max_connections: config.server.max_connections,
        body_limit: config.server.request_body_limit,
    };

    let app = build_router(
        AppState {
            pool: pool.clone(),
            stats: stats.clone(),
            prometheus: prometheus_handle,
        },
        KeyCheck::api(Arc::new(keys.api)),
        limits,
    );
    let admin_app = build_admin_router(
        AdminState { pool, recent },
        KeyCheck::admin(Arc::new(keys.admin)),
        stats.clone(),
        limits,
    );

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    let admin_addr = config.server.admin_listen_addr;
    let admin_listener = TcpListener::bind(admin_addr)
        .await
        .with_context(|| format!("failed to bind admin listener to {admin_addr}"))?;

    let (shutdown_tx, server_handle) = spawn_server(listener, app);
    let (admin_shutdown_tx, admin_handle) = spawn_server(admin_listener, admin_app);
    info!(addr = %listen_addr, admin_addr = %admin_addr, "accepting requests");

    // Wait for the OS signal
    shutdown_signal().await;

    // Signal both servers to begin draining
    let _ = shutdown_tx.send(());
    let _ = admin_shutdown_tx.send(());

    // The drain timer starts at signal receipt
    match tokio::time::timeout(DRAIN_TIMEOUT, async {
        tokio::join!(server_handle, admin_handle)
    })
    .await
    {
        Ok((external, admin)) => {
            log_server_exit("external", external);
            log_server_exit("admin", admin);
        }
        Err(_) => {
            warn!(
                requests_served = stats.requests_total.load(Ordering::Relaxed),
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    // The writer exits once every pool handle (and its sink sender) is gone
    if let Some(writer) = audit_writer {
        if tokio::time::timeout(AUDIT_FLUSH_TIMEOUT, writer).await.is_err() {
            warn!("audit writer did not finish flushing");
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: status, uptime, requests served and pool size.
/// Returns 503 "degraded" when the store cannot be read.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.stats.started_at.elapsed().as_secs();
    let requests = state.stats.requests_total.load(Ordering::Relaxed);

    let (status_code, body) = match state.pool.store().count().await {
        Ok(records) => (
            axum::http::StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "uptime_seconds": uptime,
                "requests_served": requests,
                "records_total": records,
            }),
        ),
        Err(e) => {
            warn!(error = %e, "health check could not read store");
            (
                axum::http::StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({
                    "status": "degraded",
                    "uptime_seconds": uptime,
                    "requests_served": requests,
                }),
            )
        }
    };

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_json() {
        let app = TestApp::new().await;
        app.seed("a@x.com", "p1").await;
        app.seed("b@x.com", "p2").await;

        let (status, json) = app.external(get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["records_total"], 2);
        assert!(json["uptime_seconds"].is_u64());
    }

    #[tokio::test]
    async fn health_needs_no_key_and_counts_requests() {
        let app = TestApp::new().await;
        app.external(post_json("/api/v1/emails/fetch", Some(TEST_API_KEY), "{}"))
            .await;
        app.external(post_json("/api/v1/emails/fetch", None, "{}"))
            .await;

        let (status, json) = app.external(get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        // The health request itself is counted after the handler runs
        assert_eq!(json["requests_served"], 2);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_format() {
        let app = TestApp::new().await;
        let response = app.external_raw(get("/metrics")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.contains("text/plain"));
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = TestApp::new().await;
        let (status, _) = app.external(get("/api/v1/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
