//! External lease API
//!
//! Endpoints (all require `X-API-Key`):
//! - POST /api/v1/emails/fetch : lease records
//! - POST /api/v1/emails/status: mark a record used / add platforms
//! - POST /api/v1/emails/delete: delete a record

use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::post;
use email_pool::{
    CallContext, DeleteOutcome, EmailPool, LeaseRequest, PlatformSet, Record, Scope,
    SetStatusRequest, StatusOutcome,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::AppState;
use crate::error::{ApiError, ok};
use crate::metrics;

/// Build a call context with a fresh request id and the forwarded client
/// address, if any.
pub fn call_context(scope: Scope, headers: &HeaderMap) -> CallContext {
    let ctx = CallContext::new(scope, format!("req_{}", uuid::Uuid::new_v4().as_simple()));
    let client = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    match client {
        Some(client) => ctx.with_client(client),
        None => ctx,
    }
}

/// A platform list given either as one string or as an array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_set(self) -> PlatformSet {
        match self {
            OneOrMany::One(key) => PlatformSet::from_keys([key]),
            OneOrMany::Many(keys) => PlatformSet::from_keys(keys),
        }
    }
}

/// Leased record as returned to callers.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LeasedRecord<'a> {
    email: &'a str,
    password: &'a str,
    remark: Option<&'a str>,
    supported_platforms: &'a PlatformSet,
    used_platforms: &'a PlatformSet,
}

impl<'a> From<&'a Record> for LeasedRecord<'a> {
    fn from(record: &'a Record) -> Self {
        Self {
            email: &record.key,
            password: &record.secret,
            remark: record.note.as_deref(),
            supported_platforms: &record.supported_platforms,
            used_platforms: &record.used_platforms,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FetchBody {
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    is_used: bool,
    #[serde(default)]
    count: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    is_used: Option<bool>,
    #[serde(default)]
    used_platforms: Option<OneOrMany>,
}

#[derive(Debug, Default, Deserialize)]
struct DeleteBody {
    #[serde(default)]
    email: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/emails/fetch", post(fetch))
        .route("/api/v1/emails/status", post(set_status))
        .route("/api/v1/emails/delete", post(delete))
}

async fn fetch(
    State(pool): State<EmailPool>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<FetchBody>,
) -> Result<Response, ApiError> {
    let ctx = call_context(Scope::Api, &headers);
    let request = LeaseRequest {
        platform: body.platform,
        include_used: body.is_used,
        count: body
            .count
            .map_or(1, |c| usize::try_from(c).unwrap_or(usize::MAX)),
    };
    let platform = request.platform.clone();
    let outcome = pool.lease(&ctx, request).await?;

    if outcome.is_empty() {
        metrics::record_lease_exhausted();
        return Ok(ok(serde_json::json!({
            "status": "error",
            "message": "no records available",
            "data": [],
        })));
    }

    let registry = pool.store().platforms().await.unwrap_or_else(|e| {
        warn!(error = %e, "failed to read platforms for lease metrics");
        Vec::new()
    });
    metrics::record_leased(
        metrics::platform_label(platform.as_deref(), &registry),
        outcome.records.len(),
    );
    let data: Vec<LeasedRecord<'_>> = outcome.records.iter().map(LeasedRecord::from).collect();
    Ok(ok(serde_json::json!({ "status": "success", "data": data })))
}

async fn set_status(
    State(pool): State<EmailPool>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<StatusBody>,
) -> Result<Response, ApiError> {
    let ctx = call_context(Scope::Api, &headers);
    let request = SetStatusRequest {
        key: body.email.unwrap_or_default(),
        used: body.is_used,
        add_platforms: body
            .used_platforms
            .map(OneOrMany::into_set)
            .unwrap_or_default(),
    };
    let body = match pool.set_status(&ctx, request).await? {
        StatusOutcome::Updated(_) => {
            serde_json::json!({ "status": "success", "message": "status updated" })
        }
        StatusOutcome::NotFound => {
            serde_json::json!({ "status": "error", "message": "email not found" })
        }
    };
    Ok(ok(body))
}

async fn delete(
    State(pool): State<EmailPool>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<DeleteBody>,
) -> Result<Response, ApiError> {
    let ctx = call_context(Scope::Api, &headers);
    let key = body.email.unwrap_or_default();
    let body = match pool.delete_record(&ctx, &key).await? {
        DeleteOutcome::Deleted => serde_json::json!({ "status": "success", "message": "deleted" }),
        DeleteOutcome::NotFound => {
            serde_json::json!({ "status": "error", "message": "email not found" })
        }
    };
    Ok(ok(body))
}
