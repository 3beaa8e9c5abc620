//! Stateless key authorization
//!
//! Each request carries its key in a header; the check is a pure predicate
//! over the request headers. There is no session or cookie state.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use common::Secret;
use tracing::warn;

use crate::error::json_response;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Header name plus the key it must carry.
#[derive(Clone)]
pub struct KeyCheck {
    header: &'static str,
    key: Arc<Secret<String>>,
}

impl KeyCheck {
    pub fn api(key: Arc<Secret<String>>) -> Self {
        Self {
            header: API_KEY_HEADER,
            key,
        }
    }

    pub fn admin(key: Arc<Secret<String>>) -> Self {
        Self {
            header: ADMIN_KEY_HEADER,
            key,
        }
    }

    pub fn authorize(&self, headers: &HeaderMap) -> bool {
        headers
            .get(self.header)
            .is_some_and(|value| self.key.matches(value.as_bytes()))
    }
}

/// Middleware: reject requests without the expected key header.
pub async fn require_key(State(check): State<KeyCheck>, request: Request, next: Next) -> Response {
    if check.authorize(request.headers()) {
        return next.run(request).await;
    }
    warn!(
        header = check.header,
        path = %request.uri().path(),
        "rejected unauthorized request"
    );
    json_response(
        StatusCode::UNAUTHORIZED,
        serde_json::json!({ "error": "unauthorized", "code": "UNAUTHORIZED" }),
    )
}
