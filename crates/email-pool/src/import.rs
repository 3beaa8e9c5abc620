//! Bulk import from delimited text
//!
//! One record per line: `key<sep>secret[<sep>note]`. Everything after the
//! second field is the note, re-joined with the separator so notes may
//! contain it. Blank lines are ignored; every other line either becomes a
//! record or a failure entry in the report.

use pool_store::{NewRecord, PlatformSet, StoreError, check_used_within_supported};
use serde::Serialize;
use tracing::{debug, info};

use crate::context::CallContext;
use crate::error::{Classification, Error, Result};
use crate::pool::EmailPool;

pub const DEFAULT_SEPARATOR: &str = "|";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportRequest {
    pub content: String,
    /// Field separator. `None` or blank uses `DEFAULT_SEPARATOR`.
    pub separator: Option<String>,
    /// Supported set given to every imported record.
    pub supported: PlatformSet,
    /// Platform history given to every imported record.
    pub used: PlatformSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportFailureReason {
    /// Fewer than two fields, or a blank key.
    Malformed,
    /// A record with this key already exists.
    Duplicate,
    Storage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportFailure {
    /// 1-based line number in the submitted content.
    pub line: usize,
    pub reason: ImportFailureReason,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub success_count: usize,
    pub fail_count: usize,
    pub errors: Vec<ImportFailure>,
}

impl ImportReport {
    fn fail(&mut self, line: usize, reason: ImportFailureReason, detail: String) {
        self.fail_count += 1;
        self.errors.push(ImportFailure {
            line,
            reason,
            detail,
        });
    }
}

/// Split one trimmed line into `(key, secret, note)`.
fn parse_line(line: &str, separator: &str) -> Option<(String, String, Option<String>)> {
    let mut fields = line.split(separator);
    let key = fields.next()?.trim();
    let secret = fields.next()?.trim();
    if key.is_empty() {
        return None;
    }
    let note = fields.collect::<Vec<_>>().join(separator);
    let note = note.trim();
    let note = (!note.is_empty()).then(|| note.to_string());
    Some((key.to_string(), secret.to_string(), note))
}

impl EmailPool {
    /// Insert one record per line of `request.content`.
    ///
    /// Line failures are collected in the report and never stop the import.
    /// All accepted lines are stored in a single write. Fails as a whole on
    /// empty content, default sets that violate the supported/used
    /// invariant, or a failed store write (nothing is imported then).
    pub async fn import_bulk(&self, ctx: &CallContext, request: ImportRequest) -> Result<ImportReport> {
        let separator = request
            .separator
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SEPARATOR)
            .to_string();
        let params = serde_json::json!({
            "lines": request.content.lines().filter(|l| !l.trim().is_empty()).count(),
            "separator": separator,
            "supported": request.supported,
            "used": request.used,
        });

        if request.content.trim().is_empty() {
            let e = Error::Validation("content is required".into());
            return Err(self.audit_error(ctx, "import_bulk", params, e));
        }
        if let Err(e) = check_used_within_supported(&request.supported, &request.used) {
            return Err(self.audit_error(ctx, "import_bulk", params, Error::from(e)));
        }

        let mut report = ImportReport::default();
        let mut pending: Vec<(usize, String)> = Vec::new();
        let mut records = Vec::new();
        for (index, raw) in request.content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let line_no = index + 1;

            let Some((key, secret, note)) = parse_line(line, &separator) else {
                debug!(line = line_no, "malformed import line");
                report.fail(
                    line_no,
                    ImportFailureReason::Malformed,
                    format!("malformed line: {line}"),
                );
                continue;
            };

            pending.push((line_no, key.clone()));
            records.push(NewRecord {
                key,
                secret,
                note,
                supported_platforms: request.supported.clone(),
                used_platforms: request.used.clone(),
            });
        }

        // One store write for the whole import
        let results = match self.store.insert_many(records).await {
            Ok(results) => results,
            Err(e) => return Err(self.audit_error(ctx, "import_bulk", params, Error::from(e))),
        };
        for ((line_no, key), result) in pending.into_iter().zip(results) {
            match result {
                Ok(_) => report.success_count += 1,
                Err(StoreError::Duplicate(_)) => report.fail(
                    line_no,
                    ImportFailureReason::Duplicate,
                    format!("{key} already exists"),
                ),
                Err(e) => report.fail(
                    line_no,
                    ImportFailureReason::Storage,
                    format!("failed to import {key}: {e}"),
                ),
            }
        }
        report.errors.sort_by_key(|f| f.line);

        info!(
            request_id = %ctx.request_id,
            imported = report.success_count,
            failed = report.fail_count,
            "import finished"
        );
        self.audit(
            ctx,
            "import_bulk",
            params,
            Classification::Ok,
            serde_json::json!({
                "success_count": report.success_count,
                "fail_count": report.fail_count,
            }),
        );
        Ok(report)
    }
}
