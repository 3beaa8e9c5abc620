//! HTTP mapping for pool errors

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use email_pool::{Classification, Error};

/// JSON body with the given status.
pub fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// 200 with a JSON body.
pub fn ok(body: serde_json::Value) -> Response {
    json_response(StatusCode::OK, body)
}

fn status_for(classification: Classification) -> StatusCode {
    StatusCode::from_u16(classification.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// A failed pool operation, rendered as
/// `{"status":"error","error":"...","code":"..."}`.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self.0 {
            Error::Validation(_) => "INVALID_REQUEST",
            Error::Conflict(_) => "CONFLICT",
            Error::Storage(_) => "STORAGE_FAILURE",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self.0 {
            // Storage details stay in the logs.
            Error::Storage(_) => "storage unavailable".to_string(),
            other => other.to_string(),
        };
        json_response(
            status_for(self.0.classification()),
            serde_json::json!({
                "status": "error",
                "error": message,
                "code": self.code(),
            }),
        )
    }
}
