//! Admin API for pool management
//!
//! Runs on a separate listener and requires `X-Admin-Key`.
//!
//! Endpoints (under `/api/admin`):
//! - GET    /platforms      : list platforms
//! - POST   /platforms      : add a platform
//! - PUT    /platforms/{id} : rename a platform
//! - DELETE /platforms/{id} : remove a platform
//! - GET    /emails         : paginated record listing
//! - POST   /emails/import  : bulk import from delimited text
//! - POST   /emails/batch   : bulk delete / platform assignment
//! - GET    /stats          : pool totals and per-platform usage
//! - GET    /logs           : recent audit entries

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::middleware;
use axum::routing::{get, post, put};
use email_pool::{
    BatchOutcome, BatchRequest, EmailPool, ImportRequest, Platform, PlatformSet,
    RecentAuditLog, Record, RecordQuery, Scope,
};
use serde::{Deserialize, Serialize};

use crate::api::call_context;
use crate::auth::{self, KeyCheck};
use crate::error::{ApiError, json_response, ok};

/// Entries shown on the stats view.
const STATS_RECENT_LOGS: usize = 50;
/// Days covered by `apiFrequency` on `/stats`.
const API_FREQUENCY_DAYS: u64 = 7;
const DEFAULT_LOG_PAGE_SIZE: usize = 50;

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    pub pool: EmailPool,
    pub recent: Arc<RecentAuditLog>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlatformView<'a> {
    id: u64,
    key: &'a str,
    name: &'a str,
    created_at: u64,
}

impl<'a> From<&'a Platform> for PlatformView<'a> {
    fn from(p: &'a Platform) -> Self {
        Self {
            id: p.id,
            key: &p.key,
            name: &p.name,
            created_at: p.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordView<'a> {
    id: u64,
    email: &'a str,
    password: &'a str,
    remark: Option<&'a str>,
    is_used: bool,
    supported_platforms: &'a PlatformSet,
    used_platforms: &'a PlatformSet,
    created_at: u64,
    updated_at: u64,
}

impl<'a> From<&'a Record> for RecordView<'a> {
    fn from(r: &'a Record) -> Self {
        Self {
            id: r.id,
            email: &r.key,
            password: &r.secret,
            remark: r.note.as_deref(),
            is_used: r.used,
            supported_platforms: &r.supported_platforms,
            used_platforms: &r.used_platforms,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlatformBody {
    #[serde(default)]
    key: String,
    #[serde(default)]
    name: String,
}

/// Query parameters arrive as strings; blanks mean "not set".
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    page: Option<String>,
    page_size: Option<String>,
    search: Option<String>,
    is_used: Option<String>,
    platform: Option<String>,
}

fn parse_number(value: Option<&str>, default: usize) -> usize {
    value
        .map(str::trim)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// `1`/`true` and `0`/`false`; anything else is no filter.
fn parse_used(value: Option<&str>) -> Option<bool> {
    match value.map(str::trim) {
        Some("1" | "true") => Some(true),
        Some("0" | "false") => Some(false),
        _ => None,
    }
}

impl ListParams {
    fn into_query(self) -> RecordQuery {
        let defaults = RecordQuery::default();
        RecordQuery {
            page: parse_number(self.page.as_deref(), defaults.page),
            page_size: parse_number(self.page_size.as_deref(), defaults.page_size),
            used: parse_used(self.is_used.as_deref()),
            search: self.search,
            platform: self.platform,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogParams {
    page: Option<String>,
    page_size: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportBody {
    #[serde(default)]
    content: String,
    #[serde(default)]
    separator: Option<String>,
    #[serde(default)]
    supported_platforms: Option<Vec<String>>,
    #[serde(default)]
    used_platforms: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchBody {
    /// Newline-separated record keys
    #[serde(default)]
    emails: String,
    #[serde(default)]
    action: String,
    #[serde(default)]
    supported_platforms: Option<Vec<String>>,
    #[serde(default)]
    used_platforms: Option<Vec<String>>,
    #[serde(default)]
    confirmed: bool,
}

/// Admin routes behind the admin key check.
pub fn routes(key: KeyCheck) -> Router<AdminState> {
    let api = Router::new()
        .route("/platforms", get(list_platforms).post(add_platform))
        .route(
            "/platforms/{id}",
            put(update_platform).delete(remove_platform),
        )
        .route("/emails", get(list_emails))
        .route("/emails/import", post(import_emails))
        .route("/emails/batch", post(batch_emails))
        .route("/stats", get(stats))
        .route("/logs", get(logs))
        .route_layer(middleware::from_fn_with_state(key, auth::require_key));
    Router::new().nest("/api/admin", api)
}

async fn list_platforms(
    State(state): State<AdminState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = call_context(Scope::Admin, &headers);
    let platforms = state.pool.list_platforms(&ctx).await?;
    let views: Vec<PlatformView<'_>> = platforms.iter().map(PlatformView::from).collect();
    Ok(ok(serde_json::json!(views)))
}

async fn add_platform(
    State(state): State<AdminState>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<PlatformBody>,
) -> Result<Response, ApiError> {
    let ctx = call_context(Scope::Admin, &headers);
    let platform = state.pool.add_platform(&ctx, &body.key, &body.name).await?;
    Ok(ok(serde_json::json!({
        "success": true,
        "platform": PlatformView::from(&platform),
    })))
}

async fn update_platform(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
    axum::Json(body): axum::Json<PlatformBody>,
) -> Result<Response, ApiError> {
    let ctx = call_context(Scope::Admin, &headers);
    match state
        .pool
        .update_platform(&ctx, id, &body.key, &body.name)
        .await?
    {
        Some(platform) => Ok(ok(serde_json::json!({
            "success": true,
            "platform": PlatformView::from(&platform),
        }))),
        None => Ok(json_response(
            StatusCode::NOT_FOUND,
            serde_json::json!({ "error": "platform not found", "code": "NOT_FOUND" }),
        )),
    }
}

async fn remove_platform(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Result<Response, ApiError> {
    let ctx = call_context(Scope::Admin, &headers);
    let removed = state.pool.remove_platform(&ctx, id).await?;
    Ok(ok(serde_json::json!({ "success": true, "removed": removed })))
}

async fn list_emails(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let ctx = call_context(Scope::Admin, &headers);
    let page = state.pool.list_records(&ctx, params.into_query()).await?;
    let data: Vec<RecordView<'_>> = page.records.iter().map(RecordView::from).collect();
    Ok(ok(serde_json::json!({
        "data": data,
        "total": page.total,
        "page": page.page,
        "pageSize": page.page_size,
    })))
}

async fn import_emails(
    State(state): State<AdminState>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<ImportBody>,
) -> Result<Response, ApiError> {
    let ctx = call_context(Scope::Admin, &headers);
    let request = ImportRequest {
        content: body.content,
        separator: body.separator,
        supported: body
            .supported_platforms
            .map(PlatformSet::from_keys)
            .unwrap_or_default(),
        used: body
            .used_platforms
            .map(PlatformSet::from_keys)
            .unwrap_or_default(),
    };
    let report = state.pool.import_bulk(&ctx, request).await?;
    Ok(ok(serde_json::json!({
        "successCount": report.success_count,
        "failCount": report.fail_count,
        "errors": report.errors,
    })))
}

async fn batch_emails(
    State(state): State<AdminState>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<BatchBody>,
) -> Result<Response, ApiError> {
    let ctx = call_context(Scope::Admin, &headers);
    let request = BatchRequest {
        keys: body.emails.lines().map(str::to_string).collect(),
        action: body.action,
        supported: body.supported_platforms.map(PlatformSet::from_keys),
        add_used: body.used_platforms.map(PlatformSet::from_keys),
        confirmed: body.confirmed,
    };

    let body = match state.pool.apply_batch(&ctx, request).await? {
        BatchOutcome::Deleted {
            attempted,
            removed,
            failures,
        } => serde_json::json!({
            "success": true,
            "count": attempted,
            "removed": removed,
            "failures": failures,
        }),
        BatchOutcome::Applied {
            attempted,
            updated,
            skipped,
            failures,
        } => serde_json::json!({
            "success": true,
            "count": attempted,
            "updated": updated,
            "skipped": skipped,
            "failures": failures,
        }),
        BatchOutcome::ConflictDetected(report) => serde_json::json!({
            "hasConflicts": true,
            "conflicts": report.groups,
            "message": "records would end up with different platform counts; resubmit with confirmed=true to apply",
        }),
    };
    Ok(ok(body))
}

async fn stats(State(state): State<AdminState>, headers: HeaderMap) -> Result<Response, ApiError> {
    let ctx = call_context(Scope::Admin, &headers);
    let stats = state.pool.stats(&ctx).await?;
    let platform_stats: Vec<serde_json::Value> = stats
        .platforms
        .iter()
        .map(|p| {
            serde_json::json!({
                "key": p.key,
                "name": p.name,
                "usedCount": p.used_count,
                "supportedCount": p.supported_count,
            })
        })
        .collect();
    Ok(ok(serde_json::json!({
        "totalEmails": stats.total,
        "usedEmails": stats.used,
        "unusedEmails": stats.unused,
        "platformStats": platform_stats,
        "recentLogs": state.recent.latest(STATS_RECENT_LOGS),
        "apiFrequency": state
            .recent
            .daily_counts(API_FREQUENCY_DAYS, pool_store::now_millis()),
    })))
}

async fn logs(State(state): State<AdminState>, Query(params): Query<LogParams>) -> Response {
    let page = parse_number(params.page.as_deref(), 1);
    let page_size = parse_number(params.page_size.as_deref(), DEFAULT_LOG_PAGE_SIZE);
    ok(serde_json::json!(state.recent.page(page, page_size)))
}
