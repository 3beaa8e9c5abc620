//! Allocator: hand out eligible records
//!
//! A lease picks up to `count` eligible records uniformly at random and marks
//! them used in the same storage step. When the request names a platform,
//! that platform is written into each leased record's history in the same
//! step, so a leased record never ends up used with no platform recorded.

use pool_store::{Eligibility, LeaseQuery, Record};
use tracing::{debug, info, warn};

use crate::context::CallContext;
use crate::error::{Classification, Error, Result};
use crate::pool::EmailPool;

/// Hard cap on records handed out by a single lease.
pub const MAX_LEASE_COUNT: usize = 100;

/// Lease request from an external caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRequest {
    pub platform: Option<String>,
    /// Also consider records already marked used.
    pub include_used: bool,
    pub count: usize,
}

impl Default for LeaseRequest {
    fn default() -> Self {
        Self {
            platform: None,
            include_used: false,
            count: 1,
        }
    }
}

/// Records handed out by a lease.
#[derive(Debug, Clone)]
pub struct LeaseOutcome {
    pub records: Vec<Record>,
    pub requested: usize,
    /// Effective count after clamping.
    pub limit: usize,
}

impl LeaseOutcome {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether the requested count was reduced to the cap.
    pub fn clamped(&self) -> bool {
        self.requested > self.limit
    }

    pub fn classification(&self) -> Classification {
        if self.is_empty() {
            Classification::NoData
        } else {
            Classification::Ok
        }
    }
}

/// Clamp a requested count to `MAX_LEASE_COUNT`.
pub fn clamp_count(count: usize) -> usize {
    count.min(MAX_LEASE_COUNT)
}

impl EmailPool {
    /// Lease up to `request.count` eligible records.
    ///
    /// An empty pool is a successful `NoData` outcome, and so is a zero
    /// count, which never touches the store. Storage failures are surfaced
    /// immediately; nothing is marked in that case.
    pub async fn lease(&self, ctx: &CallContext, request: LeaseRequest) -> Result<LeaseOutcome> {
        let limit = clamp_count(request.count);
        let query = LeaseQuery {
            eligibility: Eligibility::new(request.platform.as_deref(), request.include_used),
            limit,
            record_platform: true,
        };
        let params = serde_json::json!({
            "platform": query.eligibility.platform,
            "include_used": request.include_used,
            "count": request.count,
        });

        if limit < request.count {
            debug!(requested = request.count, limit, "lease count clamped");
        }

        let records = if limit == 0 {
            Vec::new()
        } else {
            match self.store.lease(&query).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(request_id = %ctx.request_id, error = %e, "lease failed");
                    return Err(self.audit_error(ctx, "lease", params, Error::from(e)));
                }
            }
        };

        let outcome = LeaseOutcome {
            records,
            requested: request.count,
            limit,
        };

        if outcome.is_empty() {
            info!(
                request_id = %ctx.request_id,
                platform = query.eligibility.platform.as_deref(),
                "no records available"
            );
        } else {
            info!(
                request_id = %ctx.request_id,
                platform = query.eligibility.platform.as_deref(),
                count = outcome.records.len(),
                "records leased"
            );
        }

        let keys: Vec<&str> = outcome.records.iter().map(|r| r.key.as_str()).collect();
        self.audit(
            ctx,
            "lease",
            params,
            outcome.classification(),
            serde_json::json!({ "keys": keys, "clamped": outcome.clamped() }),
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::test_support::{ctx, harness, set};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn request(platform: Option<&str>, count: usize) -> LeaseRequest {
        LeaseRequest {
            platform: platform.map(str::to_string),
            include_used: false,
            count,
        }
    }

    #[tokio::test]
    async fn empty_pool_is_no_data_not_error() {
        let h = harness();
        let outcome = h.pool.lease(&ctx(), LeaseRequest::default()).await.unwrap();
        assert!(outcome.is_empty());
        assert_eq!(outcome.classification(), Classification::NoData);
        assert_eq!(h.audit.latest(1)[0].status, Classification::NoData);
    }

    #[tokio::test]
    async fn lease_returns_full_records_and_marks_used() {
        let h = harness();
        h.seed("a@x.com", &[], &[]).await;
        let outcome = h.pool.lease(&ctx(), request(None, 1)).await.unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].secret, "pw_a@x.com");
        assert!(h.get("a@x.com").await.unwrap().used);

        let again = h.pool.lease(&ctx(), request(None, 1)).await.unwrap();
        assert!(again.is_empty(), "used records are skipped by default");
    }

    #[tokio::test]
    async fn include_used_allows_reuse_on_other_platforms() {
        let h = harness();
        h.seed("a@x.com", &[], &["google"]).await;
        let req = LeaseRequest {
            platform: Some("github".into()),
            include_used: true,
            count: 1,
        };
        let outcome = h.pool.lease(&ctx(), req).await.unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].used_platforms, set(&["github", "google"]));
    }

    #[tokio::test]
    async fn platform_already_used_is_never_leased() {
        let h = harness();
        h.seed("a@x.com", &["google"], &["google"]).await;
        h.seed("b@x.com", &[], &["google"]).await;
        let req = LeaseRequest {
            platform: Some("google".into()),
            include_used: true,
            count: 10,
        };
        let outcome = h.pool.lease(&ctx(), req).await.unwrap();
        assert!(outcome.is_empty());
    }

    #[tokio::test]
    async fn open_supported_set_matches_any_platform() {
        let h = harness();
        h.seed("open@x.com", &[], &[]).await;
        h.seed("narrow@x.com", &["github"], &[]).await;
        let outcome = h
            .pool
            .lease(&ctx(), request(Some("some-new-platform"), 10))
            .await
            .unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].key, "open@x.com");
    }

    #[tokio::test]
    async fn lease_with_platform_records_it_in_history() {
        let h = harness();
        h.seed("a@x.com", &["google"], &[]).await;
        h.pool
            .lease(&ctx(), request(Some("google"), 1))
            .await
            .unwrap();
        let stored = h.get("a@x.com").await.unwrap();
        assert!(stored.used);
        assert_eq!(stored.used_platforms, set(&["google"]));
    }

    #[tokio::test]
    async fn lease_without_platform_leaves_history_empty() {
        let h = harness();
        h.seed("a@x.com", &[], &[]).await;
        h.pool.lease(&ctx(), request(None, 1)).await.unwrap();
        let stored = h.get("a@x.com").await.unwrap();
        assert!(stored.used);
        assert!(stored.used_platforms.is_empty());
    }

    #[tokio::test]
    async fn count_is_clamped_to_cap() {
        let h = harness();
        for i in 0..120 {
            h.seed(&format!("k{i}@x.com"), &[], &[]).await;
        }
        let outcome = h.pool.lease(&ctx(), request(None, 500)).await.unwrap();
        assert_eq!(outcome.records.len(), MAX_LEASE_COUNT);
        assert_eq!(outcome.limit, MAX_LEASE_COUNT);
        assert!(outcome.clamped());

        let rest = h.pool.lease(&ctx(), request(None, 100)).await.unwrap();
        assert_eq!(rest.records.len(), 20);
        assert!(!rest.clamped());
    }

    #[tokio::test]
    async fn zero_count_is_no_data() {
        let h = harness();
        h.seed("a@x.com", &[], &[]).await;
        let outcome = h.pool.lease(&ctx(), request(None, 0)).await.unwrap();
        assert!(outcome.is_empty());
        assert_eq!(outcome.classification(), Classification::NoData);
        assert!(!h.get("a@x.com").await.unwrap().used);

        let entry = &h.audit.latest(1)[0];
        assert_eq!(entry.status, Classification::NoData);
        assert_eq!(entry.params["count"], 0);
    }

    #[test]
    fn clamp_count_values() {
        assert_eq!(clamp_count(500), 100);
        assert_eq!(clamp_count(100), 100);
        assert_eq!(clamp_count(3), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_single_leases_are_distinct_and_complete() {
        let h = harness();
        let n = 40;
        let mut expected = HashSet::new();
        for i in 0..n {
            let key = format!("k{i}@x.com");
            h.seed(&key, &[], &[]).await;
            expected.insert(key);
        }

        let pool = Arc::new(h.pool.clone());
        let mut handles = vec![];
        for _ in 0..n {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.lease(&ctx(), request(None, 1)).await.unwrap()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            let outcome = handle.await.unwrap();
            assert_eq!(outcome.records.len(), 1);
            assert!(
                seen.insert(outcome.records[0].key.clone()),
                "record returned twice"
            );
        }
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn storage_failure_is_surfaced_and_audited() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("data");
        std::fs::create_dir_all(&sub).unwrap();
        let store = Arc::new(pool_store::JsonStore::load(sub.join("pool.json")).await.unwrap());
        {
            use pool_store::RecordStore;
            store
                .insert(pool_store::NewRecord {
                    key: "a@x.com".into(),
                    secret: "pw".into(),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        let audit = Arc::new(crate::audit::RecentAuditLog::new(10));
        let pool = EmailPool::new(store, audit.clone());
        std::fs::remove_dir_all(&sub).unwrap();

        let err = pool.lease(&ctx(), request(None, 1)).await.unwrap_err();
        assert_eq!(err.classification(), Classification::StorageFailure);
        assert_eq!(audit.latest(1)[0].status, Classification::StorageFailure);
    }
}
