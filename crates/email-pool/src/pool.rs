//! Pool engine facade
//!
//! `EmailPool` holds no state of its own beyond handles to the store and the
//! audit sink. Each operation lives in its own module as an `impl EmailPool`
//! block; this module holds the shared plumbing.

use std::sync::Arc;

use pool_store::RecordStore;

use crate::audit::{AuditEntry, AuditSink};
use crate::context::CallContext;
use crate::error::{Classification, Error};

/// Allocation and state-transition engine over a record store.
#[derive(Clone)]
pub struct EmailPool {
    pub(crate) store: Arc<dyn RecordStore>,
    audit: Arc<dyn AuditSink>,
}

impl EmailPool {
    pub fn new(store: Arc<dyn RecordStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    /// Underlying store, for transports that need direct reads (health).
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub(crate) fn audit(
        &self,
        ctx: &CallContext,
        operation: &'static str,
        params: serde_json::Value,
        status: Classification,
        result: serde_json::Value,
    ) {
        self.audit
            .record(AuditEntry::new(ctx, operation, params, status, result));
    }

    /// Record a failed operation and hand the error back.
    pub(crate) fn audit_error(
        &self,
        ctx: &CallContext,
        operation: &'static str,
        params: serde_json::Value,
        error: Error,
    ) -> Error {
        self.audit(
            ctx,
            operation,
            params,
            error.classification(),
            serde_json::json!({ "error": error.to_string() }),
        );
        error
    }
}

/// Trim a required text field, failing when it ends up empty.
pub(crate) fn required(value: &str, field: &str) -> Result<String, Error> {
    let value = value.trim();
    if value.is_empty() {
        Err(Error::Validation(format!("{field} is required")))
    } else {
        Ok(value.to_string())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::audit::RecentAuditLog;
    use crate::context::Scope;
    use pool_store::{JsonStore, NewRecord, PlatformSet};

    pub struct Harness {
        pub pool: EmailPool,
        pub store: Arc<JsonStore>,
        pub audit: Arc<RecentAuditLog>,
    }

    pub fn harness() -> Harness {
        let store = Arc::new(JsonStore::in_memory());
        let audit = Arc::new(RecentAuditLog::new(100));
        let pool = EmailPool::new(store.clone(), audit.clone());
        Harness { pool, store, audit }
    }

    pub fn ctx() -> CallContext {
        CallContext::new(Scope::Api, "req_test")
    }

    pub fn set(keys: &[&str]) -> PlatformSet {
        PlatformSet::from_keys(keys)
    }

    impl Harness {
        pub async fn seed(&self, key: &str, supported: &[&str], used: &[&str]) {
            use pool_store::RecordStore;
            self.store
                .insert(NewRecord {
                    key: key.into(),
                    secret: format!("pw_{key}"),
                    note: None,
                    supported_platforms: set(supported),
                    used_platforms: set(used),
                })
                .await
                .unwrap();
        }

        pub async fn get(&self, key: &str) -> Option<pool_store::Record> {
            use pool_store::RecordStore;
            self.store.get(key).await.unwrap()
        }
    }

    #[test]
    fn required_trims_and_rejects_blank() {
        assert_eq!(required("  a@x.com ", "email").unwrap(), "a@x.com");
        let err = required("   ", "email").unwrap_err();
        assert_eq!(err.to_string(), "validation failed: email is required");
    }
}
