//! Error types and outcome classification for pool operations

use pool_store::StoreError;
use serde::{Deserialize, Serialize};

/// Errors from pool operations.
///
/// Outcomes that are not failures (an empty lease, a status update for a
/// missing record, a batch conflict report) are returned as `Ok` values and
/// carry their own `Classification`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Storage(#[source] StoreError),
}

impl From<StoreError> for Error {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Duplicate(key) => Self::Conflict(format!("{key} already exists")),
            StoreError::Invalid(msg) => Self::Validation(msg),
            other => Self::Storage(other),
        }
    }
}

impl Error {
    pub fn classification(&self) -> Classification {
        match self {
            Error::Validation(_) => Classification::Invalid,
            Error::Conflict(_) => Classification::Conflict,
            Error::Storage(_) => Classification::StorageFailure,
        }
    }
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Status class of an operation outcome, used by transports to pick a
/// response status and by the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Ok,
    /// Lease found no eligible records.
    NoData,
    /// Target record absent; a successful no-op.
    NotFound,
    Invalid,
    Conflict,
    /// Batch conflict scan wants caller confirmation; nothing was written.
    NeedsConfirmation,
    StorageFailure,
}

impl Classification {
    /// HTTP-style status code for this outcome.
    pub fn http_status(self) -> u16 {
        match self {
            Classification::Ok
            | Classification::NoData
            | Classification::NotFound
            | Classification::NeedsConfirmation => 200,
            Classification::Invalid => 400,
            Classification::Conflict => 409,
            Classification::StorageFailure => 500,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Classification::Ok => "ok",
            Classification::NoData => "no_data",
            Classification::NotFound => "not_found",
            Classification::Invalid => "invalid",
            Classification::Conflict => "conflict",
            Classification::NeedsConfirmation => "needs_confirmation",
            Classification::StorageFailure => "storage_failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_taxonomy() {
        let dup: Error = StoreError::Duplicate("a@x.com".into()).into();
        assert!(matches!(dup, Error::Conflict(_)));
        assert!(dup.to_string().contains("a@x.com"));

        let invalid: Error = StoreError::Invalid("bad".into()).into();
        assert_eq!(invalid.classification(), Classification::Invalid);

        let io: Error = StoreError::Io("disk gone".into()).into();
        assert_eq!(io.classification(), Classification::StorageFailure);
        assert!(
            std::error::Error::source(&io).is_some(),
            "storage errors keep their source"
        );
    }

    #[test]
    fn successful_non_data_outcomes_map_to_200() {
        assert_eq!(Classification::NoData.http_status(), 200);
        assert_eq!(Classification::NotFound.http_status(), 200);
        assert_eq!(Classification::NeedsConfirmation.http_status(), 200);
        assert_eq!(Classification::Invalid.http_status(), 400);
        assert_eq!(Classification::Conflict.http_status(), 409);
        assert_eq!(Classification::StorageFailure.http_status(), 500);
    }

    #[test]
    fn classification_serializes_snake_case() {
        let json = serde_json::to_string(&Classification::NeedsConfirmation).unwrap();
        assert_eq!(json, "\"needs_confirmation\"");
        assert_eq!(Classification::NoData.label(), "no_data");
    }
}
