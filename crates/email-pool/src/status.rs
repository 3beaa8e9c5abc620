//! Single-record status updates and deletes

use pool_store::{PlatformSet, Record, RecordUpdate};
use tracing::{debug, info, warn};

use crate::context::CallContext;
use crate::error::{Classification, Error, Result};
use crate::pool::{EmailPool, required};

/// Status change for one record, addressed by its key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetStatusRequest {
    pub key: String,
    /// Explicit used flag. `None` derives it from the platform history.
    pub used: Option<bool>,
    /// Platforms to add to the record's history.
    pub add_platforms: PlatformSet,
}

#[derive(Debug, Clone)]
pub enum StatusOutcome {
    Updated(Record),
    /// No record with that key; nothing changed.
    NotFound,
}

impl StatusOutcome {
    pub fn classification(&self) -> Classification {
        match self {
            StatusOutcome::Updated(_) => Classification::Ok,
            StatusOutcome::NotFound => Classification::NotFound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

impl DeleteOutcome {
    pub fn classification(self) -> Classification {
        match self {
            DeleteOutcome::Deleted => Classification::Ok,
            DeleteOutcome::NotFound => Classification::NotFound,
        }
    }
}

impl EmailPool {
    /// Set the used flag and/or extend the platform history of one record.
    ///
    /// Adding platforms implicitly marks the record used; an explicit
    /// `used = false` does not clear the history. `updated_at` is always
    /// refreshed for an existing record.
    pub async fn set_status(
        &self,
        ctx: &CallContext,
        request: SetStatusRequest,
    ) -> Result<StatusOutcome> {
        let params = serde_json::json!({
            "key": request.key,
            "used": request.used,
            "add_platforms": request.add_platforms,
        });
        let key = match required(&request.key, "email") {
            Ok(key) => key,
            Err(e) => return Err(self.audit_error(ctx, "set_status", params, e)),
        };

        let update = RecordUpdate {
            used: request.used,
            supported: None,
            add_used: request.add_platforms,
        };

        let outcome = match self.store.update(&key, &update).await {
            Ok(Some(record)) => {
                info!(
                    request_id = %ctx.request_id,
                    key = %key,
                    used = record.used,
                    "record status updated"
                );
                StatusOutcome::Updated(record)
            }
            Ok(None) => {
                debug!(request_id = %ctx.request_id, key = %key, "status update for unknown record");
                StatusOutcome::NotFound
            }
            Err(e) => {
                warn!(request_id = %ctx.request_id, key = %key, error = %e, "status update failed");
                return Err(self.audit_error(ctx, "set_status", params, Error::from(e)));
            }
        };

        let result = match &outcome {
            StatusOutcome::Updated(record) => serde_json::json!({
                "used": record.used,
                "used_platforms": record.used_platforms,
            }),
            StatusOutcome::NotFound => serde_json::json!({ "message": "record not found" }),
        };
        self.audit(ctx, "set_status", params, outcome.classification(), result);
        Ok(outcome)
    }

    /// Delete one record by key. A missing key is a successful no-op.
    pub async fn delete_record(&self, ctx: &CallContext, key: &str) -> Result<DeleteOutcome> {
        let params = serde_json::json!({ "key": key });
        let key = match required(key, "email") {
            Ok(key) => key,
            Err(e) => return Err(self.audit_error(ctx, "delete_record", params, e)),
        };

        let outcome = match self.store.delete(&key).await {
            Ok(true) => {
                info!(request_id = %ctx.request_id, key = %key, "record deleted");
                DeleteOutcome::Deleted
            }
            Ok(false) => DeleteOutcome::NotFound,
            Err(e) => {
                warn!(request_id = %ctx.request_id, key = %key, error = %e, "delete failed");
                return Err(self.audit_error(ctx, "delete_record", params, Error::from(e)));
            }
        };

        self.audit(
            ctx,
            "delete_record",
            params,
            outcome.classification(),
            serde_json::json!({}),
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::test_support::{ctx, harness, set};

    fn add(key: &str, platforms: &[&str]) -> SetStatusRequest {
        SetStatusRequest {
            key: key.into(),
            used: None,
            add_platforms: set(platforms),
        }
    }

    #[tokio::test]
    async fn missing_key_is_validation_error() {
        let h = harness();
        let err = h.pool.set_status(&ctx(), add("  ", &[])).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(h.audit.latest(1)[0].status, Classification::Invalid);
    }

    #[tokio::test]
    async fn unknown_record_is_not_found_outcome() {
        let h = harness();
        let outcome = h.pool.set_status(&ctx(), add("nobody@x.com", &["a"])).await.unwrap();
        assert!(matches!(outcome, StatusOutcome::NotFound));
        assert_eq!(outcome.classification().http_status(), 200);
    }

    #[tokio::test]
    async fn union_is_idempotent() {
        let h = harness();
        h.seed("a@x.com", &[], &[]).await;
        let req = SetStatusRequest {
            key: "a@x.com".into(),
            used: None,
            add_platforms: PlatformSet::from_keys(["a", "a", "b"]),
        };
        h.pool.set_status(&ctx(), req.clone()).await.unwrap();
        h.pool.set_status(&ctx(), req).await.unwrap();

        let stored = h.get("a@x.com").await.unwrap();
        assert_eq!(stored.used_platforms, set(&["a", "b"]));
        assert!(stored.used, "adding platforms marks the record used");
    }

    #[tokio::test]
    async fn explicit_unused_keeps_history() {
        let h = harness();
        h.seed("a@x.com", &[], &["google"]).await;
        let req = SetStatusRequest {
            key: "a@x.com".into(),
            used: Some(false),
            add_platforms: PlatformSet::new(),
        };
        let outcome = h.pool.set_status(&ctx(), req).await.unwrap();
        let StatusOutcome::Updated(record) = outcome else {
            panic!("expected update");
        };
        assert!(!record.used);
        assert_eq!(record.used_platforms, set(&["google"]));
    }

    #[tokio::test]
    async fn no_changes_still_refreshes_updated_at() {
        let h = harness();
        h.seed("a@x.com", &[], &[]).await;
        let before = h.get("a@x.com").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        h.pool.set_status(&ctx(), add("a@x.com", &[])).await.unwrap();
        let after = h.get("a@x.com").await.unwrap();
        assert!(after.updated_at > before.updated_at);
        assert!(!after.used, "no platforms and no flag leaves used unchanged");
    }

    #[tokio::test]
    async fn platform_outside_supported_is_rejected() {
        let h = harness();
        h.seed("a@x.com", &["google"], &[]).await;
        let err = h
            .pool
            .set_status(&ctx(), add("a@x.com", &["github"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "got {err:?}");
        assert!(h.get("a@x.com").await.unwrap().used_platforms.is_empty());
    }

    #[tokio::test]
    async fn delete_record_outcomes() {
        let h = harness();
        h.seed("a@x.com", &[], &[]).await;
        assert_eq!(
            h.pool.delete_record(&ctx(), "a@x.com").await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert_eq!(
            h.pool.delete_record(&ctx(), "a@x.com").await.unwrap(),
            DeleteOutcome::NotFound
        );
        assert!(h.pool.delete_record(&ctx(), "").await.is_err());
    }
}
