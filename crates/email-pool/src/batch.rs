//! Batch reconciler: bulk delete and platform assignment
//!
//! `setPlatforms` runs a dry-run conflict scan before writing anything. Records
//! are grouped by the size of the union of their current supported set and the
//! requested one; more than one group means the call mixes records of
//! different platform breadth and is sent back for confirmation.
//!
//! The scan and the writes are separate storage steps. A record changed by
//! someone else in between is updated against its new state; each record's
//! own read-modify-write is still atomic.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use pool_store::{PlatformSet, Record, RecordUpdate, StoreError};
use serde::Serialize;
use tracing::{info, warn};

use crate::context::CallContext;
use crate::error::{Classification, Error, Result};
use crate::pool::EmailPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    Delete,
    SetPlatforms,
}

impl BatchAction {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchAction::Delete => "delete",
            BatchAction::SetPlatforms => "setPlatforms",
        }
    }
}

impl FromStr for BatchAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "delete" => Ok(BatchAction::Delete),
            "setPlatforms" => Ok(BatchAction::SetPlatforms),
            other => Err(Error::Validation(format!("unknown batch action: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub keys: Vec<String>,
    /// Action name as submitted (`delete` or `setPlatforms`).
    pub action: String,
    /// Replacement supported set. `None` keeps each record's current set.
    pub supported: Option<PlatformSet>,
    /// Platforms to union into each record's history.
    pub add_used: Option<PlatformSet>,
    /// Skip the conflict gate after the caller reviewed a report.
    pub confirmed: bool,
}

impl BatchRequest {
    pub fn new(keys: Vec<String>, action: BatchAction) -> Self {
        Self {
            keys,
            action: action.as_str().to_string(),
            supported: None,
            add_used: None,
            confirmed: false,
        }
    }
}

/// Why a single record in a batch was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub key: String,
    pub reason: String,
}

/// Records grouped by their prospective supported-platform count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub groups: BTreeMap<usize, Vec<String>>,
}

impl ConflictReport {
    pub fn has_conflicts(&self) -> bool {
        self.groups.len() > 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// `attempted` counts the keys submitted, not the records found.
    Deleted {
        attempted: usize,
        removed: usize,
        failures: Vec<BatchFailure>,
    },
    Applied {
        attempted: usize,
        updated: usize,
        skipped: usize,
        failures: Vec<BatchFailure>,
    },
    /// Nothing was written.
    ConflictDetected(ConflictReport),
}

impl BatchOutcome {
    pub fn classification(&self) -> Classification {
        match self {
            BatchOutcome::ConflictDetected(_) => Classification::NeedsConfirmation,
            _ => Classification::Ok,
        }
    }

    fn audit_result(&self) -> serde_json::Value {
        match self {
            BatchOutcome::Deleted {
                attempted,
                removed,
                failures,
            } => serde_json::json!({
                "attempted": attempted,
                "removed": removed,
                "failures": failures,
            }),
            BatchOutcome::Applied {
                attempted,
                updated,
                skipped,
                failures,
            } => serde_json::json!({
                "attempted": attempted,
                "updated": updated,
                "skipped": skipped,
                "failures": failures,
            }),
            BatchOutcome::ConflictDetected(report) => serde_json::json!({
                "conflicts": report.groups,
            }),
        }
    }
}

/// Group existing records by `|current supported ∪ requested|`.
///
/// Keys without a record are left out. Pure: nothing is read or written.
pub fn scan_conflicts<'a>(
    records: impl IntoIterator<Item = &'a Record>,
    requested: Option<&PlatformSet>,
) -> ConflictReport {
    let empty = PlatformSet::new();
    let requested = requested.unwrap_or(&empty);
    let mut report = ConflictReport::default();
    for record in records {
        let count = record.supported_platforms.union(requested).len();
        report
            .groups
            .entry(count)
            .or_default()
            .push(record.key.clone());
    }
    report
}

/// Trim keys, drop blanks and repeats, keep first-seen order.
fn normalize_keys(keys: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    keys.iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.to_string()))
        .map(str::to_string)
        .collect()
}

impl EmailPool {
    /// Apply a bulk action to an explicit list of record keys.
    ///
    /// Per-record failures are collected in the outcome and never stop the
    /// rest of the batch. The whole call fails on an unknown action, an
    /// empty key list, or a failed store read or write.
    pub async fn apply_batch(&self, ctx: &CallContext, request: BatchRequest) -> Result<BatchOutcome> {
        let keys = normalize_keys(&request.keys);
        let params = serde_json::json!({
            "action": request.action.trim(),
            "keys": keys.len(),
            "supported": request.supported,
            "add_used": request.add_used,
            "confirmed": request.confirmed,
        });
        let action = match request.action.parse::<BatchAction>() {
            Ok(action) => action,
            Err(e) => return Err(self.audit_error(ctx, "apply_batch", params, e)),
        };
        if keys.is_empty() {
            let e = Error::Validation("email list is required".into());
            return Err(self.audit_error(ctx, "apply_batch", params, e));
        }

        let result = match action {
            BatchAction::Delete => self.batch_delete(ctx, &keys).await,
            BatchAction::SetPlatforms => self.batch_set_platforms(ctx, &keys, &request).await,
        };
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.audit_error(ctx, "apply_batch", params, e)),
        };

        self.audit(
            ctx,
            "apply_batch",
            params,
            outcome.classification(),
            outcome.audit_result(),
        );
        Ok(outcome)
    }

    async fn batch_delete(&self, ctx: &CallContext, keys: &[String]) -> Result<BatchOutcome> {
        let removed = self
            .store
            .delete_many(keys)
            .await
            .inspect_err(|e| warn!(request_id = %ctx.request_id, error = %e, "batch delete failed"))?
            .into_iter()
            .filter(|removed| *removed)
            .count();
        info!(
            request_id = %ctx.request_id,
            attempted = keys.len(),
            removed,
            "batch delete finished"
        );
        Ok(BatchOutcome::Deleted {
            attempted: keys.len(),
            removed,
            failures: Vec::new(),
        })
    }

    async fn batch_set_platforms(
        &self,
        ctx: &CallContext,
        keys: &[String],
        request: &BatchRequest,
    ) -> Result<BatchOutcome> {
        if !request.confirmed {
            let mut existing = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(record) = self.store.get(key).await? {
                    existing.push(record);
                }
            }
            let report = scan_conflicts(&existing, request.supported.as_ref());
            if report.has_conflicts() {
                info!(
                    request_id = %ctx.request_id,
                    groups = report.groups.len(),
                    "batch platform update needs confirmation"
                );
                return Ok(BatchOutcome::ConflictDetected(report));
            }
        }

        let update = RecordUpdate {
            used: None,
            supported: request.supported.clone(),
            add_used: request.add_used.clone().unwrap_or_default(),
        };

        let results = self
            .store
            .update_many(keys, &update)
            .await
            .inspect_err(|e| warn!(request_id = %ctx.request_id, error = %e, "batch update failed"))?;

        let mut updated = 0;
        let mut skipped = 0;
        let mut failures = Vec::new();
        for (key, result) in keys.iter().zip(results) {
            match result {
                Ok(Some(_)) => updated += 1,
                Ok(None) => skipped += 1,
                Err(e) => {
                    let reason = match e {
                        StoreError::Invalid(message) => message,
                        other => other.to_string(),
                    };
                    failures.push(BatchFailure {
                        key: key.clone(),
                        reason,
                    });
                }
            }
        }

        info!(
            request_id = %ctx.request_id,
            attempted = keys.len(),
            updated,
            skipped,
            failed = failures.len(),
            "batch platform update finished"
        );
        Ok(BatchOutcome::Applied {
            attempted: keys.len(),
            updated,
            skipped,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::test_support::{ctx, harness, set};

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|k| k.to_string()).collect()
    }

    fn set_platforms(list: &[&str], supported: &[&str]) -> BatchRequest {
        BatchRequest {
            supported: Some(set(supported)),
            ..BatchRequest::new(keys(list), BatchAction::SetPlatforms)
        }
    }

    #[test]
    fn action_parses_known_names_only() {
        assert_eq!("delete".parse::<BatchAction>().unwrap(), BatchAction::Delete);
        assert_eq!(
            "setPlatforms".parse::<BatchAction>().unwrap(),
            BatchAction::SetPlatforms
        );
        assert!(matches!(
            "truncate".parse::<BatchAction>(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn normalize_keys_trims_and_dedupes() {
        let got = normalize_keys(&keys(&[" b@x.com", "", "a@x.com", "b@x.com ", "  "]));
        assert_eq!(got, keys(&["b@x.com", "a@x.com"]));
    }

    #[test]
    fn scan_groups_by_merged_count() {
        let make = |key: &str, supported: &[&str]| {
            Record::create(
                0,
                pool_store::NewRecord {
                    key: key.into(),
                    secret: "s".into(),
                    supported_platforms: set(supported),
                    ..Default::default()
                },
                0,
            )
            .unwrap()
        };
        let records = [make("a", &["x"]), make("b", &["y"]), make("c", &[])];
        let report = scan_conflicts(&records, Some(&set(&["x"])));
        assert_eq!(report.groups[&1], vec!["a".to_string(), "c".to_string()]);
        assert_eq!(report.groups[&2], vec!["b".to_string()]);
        assert!(report.has_conflicts());
    }

    #[tokio::test]
    async fn empty_key_list_is_validation_error() {
        let h = harness();
        let err = h
            .pool
            .apply_batch(&ctx(), BatchRequest::new(keys(&["", "  "]), BatchAction::Delete))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(h.audit.latest(1)[0].status, Classification::Invalid);
    }

    #[tokio::test]
    async fn delete_counts_attempted_not_found() {
        let h = harness();
        h.seed("a@x.com", &[], &[]).await;
        h.seed("b@x.com", &[], &[]).await;
        let outcome = h
            .pool
            .apply_batch(
                &ctx(),
                BatchRequest::new(keys(&["a@x.com", "ghost@x.com", "b@x.com"]), BatchAction::Delete),
            )
            .await
            .unwrap();
        assert_eq!(
            outcome,
            BatchOutcome::Deleted {
                attempted: 3,
                removed: 2,
                failures: vec![],
            }
        );
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn conflict_gate_blocks_mixed_breadth() {
        let h = harness();
        h.seed("two@x.com", &["a"], &[]).await;
        h.seed("three@x.com", &["a", "c"], &[]).await;

        let outcome = h
            .pool
            .apply_batch(&ctx(), set_platforms(&["two@x.com", "three@x.com"], &["a", "b"]))
            .await
            .unwrap();

        let BatchOutcome::ConflictDetected(report) = outcome else {
            panic!("expected conflict report, got {outcome:?}");
        };
        assert_eq!(report.groups[&2], vec!["two@x.com".to_string()]);
        assert_eq!(report.groups[&3], vec!["three@x.com".to_string()]);
        assert_eq!(h.get("two@x.com").await.unwrap().supported_platforms, set(&["a"]));
        assert_eq!(
            h.get("three@x.com").await.unwrap().supported_platforms,
            set(&["a", "c"])
        );
        assert_eq!(h.audit.latest(1)[0].status, Classification::NeedsConfirmation);
    }

    #[tokio::test]
    async fn confirmed_request_skips_gate() {
        let h = harness();
        h.seed("two@x.com", &["a"], &[]).await;
        h.seed("three@x.com", &["a", "c"], &[]).await;

        let mut request = set_platforms(&["two@x.com", "three@x.com"], &["a", "b"]);
        request.confirmed = true;
        let outcome = h.pool.apply_batch(&ctx(), request).await.unwrap();
        assert!(matches!(outcome, BatchOutcome::Applied { updated: 2, .. }));
        assert_eq!(
            h.get("three@x.com").await.unwrap().supported_platforms,
            set(&["a", "b"])
        );
    }

    #[tokio::test]
    async fn consistent_group_applies_and_skips_missing() {
        let h = harness();
        h.seed("a@x.com", &["g"], &[]).await;
        h.seed("b@x.com", &["h"], &[]).await;

        let mut request = set_platforms(&["a@x.com", "b@x.com", "ghost@x.com"], &["g", "h"]);
        request.add_used = Some(set(&["g"]));
        let outcome = h.pool.apply_batch(&ctx(), request).await.unwrap();
        assert_eq!(
            outcome,
            BatchOutcome::Applied {
                attempted: 3,
                updated: 2,
                skipped: 1,
                failures: vec![],
            }
        );

        let a = h.get("a@x.com").await.unwrap();
        assert_eq!(a.supported_platforms, set(&["g", "h"]));
        assert_eq!(a.used_platforms, set(&["g"]));
        assert!(a.used);
    }

    #[tokio::test]
    async fn supported_none_keeps_sets_and_only_unions_history() {
        let h = harness();
        h.seed("a@x.com", &[], &["old"]).await;
        let mut request = BatchRequest::new(keys(&["a@x.com"]), BatchAction::SetPlatforms);
        request.add_used = Some(set(&["new"]));
        h.pool.apply_batch(&ctx(), request).await.unwrap();

        let a = h.get("a@x.com").await.unwrap();
        assert!(a.supported_platforms.is_empty());
        assert_eq!(a.used_platforms, set(&["new", "old"]));
    }

    #[tokio::test]
    async fn invariant_violation_is_reported_per_record() {
        let h = harness();
        h.seed("ok@x.com", &[], &[]).await;
        h.seed("bad@x.com", &[], &["github"]).await;

        let mut request = set_platforms(&["ok@x.com", "bad@x.com"], &["google"]);
        request.confirmed = true;
        let outcome = h.pool.apply_batch(&ctx(), request).await.unwrap();

        let BatchOutcome::Applied {
            updated, failures, ..
        } = outcome
        else {
            panic!("expected applied outcome");
        };
        assert_eq!(updated, 1);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key, "bad@x.com");
        assert!(h.get("bad@x.com").await.unwrap().supported_platforms.is_empty());
    }

    #[tokio::test]
    async fn unknown_action_is_rejected_and_audited() {
        let h = harness();
        h.seed("a@x.com", &[], &[]).await;
        let request = BatchRequest {
            action: "truncate".into(),
            ..BatchRequest::new(keys(&["a@x.com"]), BatchAction::Delete)
        };
        let err = h.pool.apply_batch(&ctx(), request).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(h.get("a@x.com").await.is_some());

        let entry = &h.audit.latest(1)[0];
        assert_eq!(entry.operation, "apply_batch");
        assert_eq!(entry.status, Classification::Invalid);
        assert_eq!(entry.params["action"], "truncate");
    }

    #[tokio::test]
    async fn batch_writes_the_store_once() {
        use pool_store::{JsonStore, NewRecord, RecordStore};
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonStore::load(dir.path().join("pool.json")).await.unwrap());
        let pool = EmailPool::new(
            store.clone(),
            Arc::new(crate::audit::RecentAuditLog::new(10)),
        );
        let records = (0..50)
            .map(|i| NewRecord {
                key: format!("k{i}@x.com"),
                secret: "s".into(),
                ..Default::default()
            })
            .collect();
        store.insert_many(records).await.unwrap();
        let all: Vec<String> = (0..50).map(|i| format!("k{i}@x.com")).collect();

        let before = store.write_count();
        pool.apply_batch(
            &ctx(),
            BatchRequest {
                confirmed: true,
                ..set_platforms(&all.iter().map(String::as_str).collect::<Vec<_>>(), &["a"])
            },
        )
        .await
        .unwrap();
        assert_eq!(store.write_count(), before + 1);

        let outcome = pool
            .apply_batch(&ctx(), BatchRequest::new(all, BatchAction::Delete))
            .await
            .unwrap();
        assert!(matches!(outcome, BatchOutcome::Deleted { removed: 50, .. }));
        assert_eq!(store.write_count(), before + 2);
    }
}
