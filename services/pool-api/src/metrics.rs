//! Prometheus metrics exposition
//!
//! - `pool_requests_total` (counter): labels `route`, `status`
//! - `pool_request_duration_seconds` (histogram): label `route`
//! - `pool_leased_records_total` (counter): label `platform`, one of the
//!   registered platform keys, `any`, or `other`
//! - `pool_lease_exhausted_total` (counter)

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use email_pool::Platform;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("pool_request_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// `pool_request_duration_seconds` gets explicit buckets so it renders as a
/// histogram with `_bucket` lines rather than a summary.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed request.
pub fn record_request(route: &str, status: u16, duration_secs: f64) {
    metrics::counter!("pool_requests_total", "route" => route.to_string(), "status" => status.to_string())
        .increment(1);
    metrics::histogram!("pool_request_duration_seconds", "route" => route.to_string())
        .record(duration_secs);
}

/// Label for a leased platform: the registry key when `requested` is
/// registered, `any` when no platform was asked for, `other` otherwise.
pub fn platform_label(requested: Option<&str>, registry: &[Platform]) -> String {
    let Some(requested) = requested.map(str::trim).filter(|p| !p.is_empty()) else {
        return "any".to_string();
    };
    registry
        .iter()
        .find(|p| p.key == requested)
        .map_or_else(|| "other".to_string(), |p| p.key.clone())
}

/// Record records handed out by a lease under a label from `platform_label`.
pub fn record_leased(label: String, count: usize) {
    metrics::counter!("pool_leased_records_total", "platform" => label).increment(count as u64);
}

/// Record a lease that found no eligible records.
pub fn record_lease_exhausted() {
    metrics::counter!("pool_lease_exhausted_total").increment(1);
}

/// Process-level counters behind /health.
#[derive(Debug)]
pub struct ServiceStats {
    pub requests_total: AtomicU64,
    pub started_at: Instant,
}

impl ServiceStats {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }
}

/// Middleware: count and time every routed request.
pub async fn track_request(
    State(stats): State<Arc<ServiceStats>>,
    request: Request,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    stats.requests_total.fetch_add(1, Ordering::Relaxed);
    record_request(
        &route,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}
