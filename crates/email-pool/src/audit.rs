//! Audit trail for pool operations
//!
//! Every engine operation hands one `AuditEntry` to the configured sink,
//! whether it succeeded or not. Sinks are fire-and-forget: `record` cannot
//! fail, and a sink that loses an entry only logs a warning. The operation
//! itself is never affected.
//!
//! The JSON-lines file doubles as the durable log: at startup it is replayed
//! into `RecentAuditLog` so paging and daily call counts survive a restart.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::context::{CallContext, Scope};
use crate::error::Classification;

/// Outcome of one engine call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unix milliseconds
    pub at: u64,
    pub operation: String,
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    pub request_id: String,
    pub params: serde_json::Value,
    pub status: Classification,
    pub result: serde_json::Value,
}

impl AuditEntry {
    pub fn new(
        ctx: &CallContext,
        operation: &'static str,
        params: serde_json::Value,
        status: Classification,
        result: serde_json::Value,
    ) -> Self {
        Self {
            at: pool_store::now_millis(),
            operation: operation.to_string(),
            scope: ctx.scope,
            client: ctx.client.clone(),
            request_id: ctx.request_id.clone(),
            params,
            status,
            result,
        }
    }
}

/// Append-only destination for audit entries.
pub trait AuditSink: Send + Sync {
    /// Accept an entry. Must not block on I/O and must not fail.
    fn record(&self, entry: AuditEntry);
}

/// Emits each entry as a structured `tracing` event on target `audit`.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) {
        info!(
            target: "audit",
            operation = %entry.operation,
            scope = ?entry.scope,
            request_id = %entry.request_id,
            client = entry.client.as_deref(),
            status = entry.status.label(),
            params = %entry.params,
            "pool operation"
        );
    }
}

/// Days of per-day call counts kept in memory.
const DAILY_RETENTION_DAYS: usize = 31;

/// Bounded in-memory log of the most recent entries.
///
/// Besides the entries themselves it keeps a per-UTC-day count of external
/// API calls. The counts are not bounded by `capacity`.
pub struct RecentAuditLog {
    capacity: usize,
    entries: Mutex<VecDeque<AuditEntry>>,
    daily: Mutex<BTreeMap<NaiveDate, usize>>,
}

/// External API calls on one UTC day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    /// `YYYY-MM-DD`
    pub date: String,
    pub count: usize,
}

fn utc_day(at_ms: u64) -> Option<NaiveDate> {
    let ms = i64::try_from(at_ms).ok()?;
    DateTime::<Utc>::from_timestamp_millis(ms).map(|t| t.date_naive())
}

/// One page of recent audit entries.
#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub data: Vec<AuditEntry>,
    pub total: usize,
    pub page: usize,
    #[serde(rename = "pageSize")]
    pub page_size: usize,
}

impl RecentAuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            daily: Mutex::new(BTreeMap::new()),
        }
    }

    /// Replay a JSON-lines audit file written by `JsonlAuditSink`.
    ///
    /// A missing file restores nothing. Lines that do not parse are skipped
    /// with a warning. Returns the number of entries replayed.
    pub async fn restore(&self, path: &Path) -> std::io::Result<usize> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut restored = 0;
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) => {
                    self.record(entry);
                    restored += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), line = index + 1, error = %e, "skipping unreadable audit line");
                }
            }
        }
        info!(path = %path.display(), restored, "audit log restored");
        Ok(restored)
    }

    /// External API calls per UTC day over the `days` days ending on the day
    /// of `now_ms`, oldest first. Days without calls are omitted.
    pub fn daily_counts(&self, days: u64, now_ms: u64) -> Vec<DailyCount> {
        let Some(today) = utc_day(now_ms) else {
            return Vec::new();
        };
        let first = today
            .checked_sub_days(Days::new(days.saturating_sub(1)))
            .unwrap_or(NaiveDate::MIN);
        let daily = self
            .daily
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        daily
            .range(first..=today)
            .map(|(date, count)| DailyCount {
                date: date.format("%Y-%m-%d").to_string(),
                count: *count,
            })
            .collect()
    }

    /// Entries newest first, paged (1-based).
    pub fn page(&self, page: usize, page_size: usize) -> AuditPage {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let data = entries
            .iter()
            .rev()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .cloned()
            .collect();
        AuditPage {
            data,
            total: entries.len(),
            page,
            page_size,
        }
    }

    /// The `n` most recent entries, newest first.
    pub fn latest(&self, n: usize) -> Vec<AuditEntry> {
        self.page(1, n).data
    }
}

impl AuditSink for RecentAuditLog {
    fn record(&self, entry: AuditEntry) {
        let api_day = match entry.scope {
            Scope::Api => utc_day(entry.at),
            Scope::Admin => None,
        };
        if let Some(day) = api_day {
            let mut daily = self
                .daily
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *daily.entry(day).or_default() += 1;
            while daily.len() > DAILY_RETENTION_DAYS {
                daily.pop_first();
            }
        }

        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }
}

/// Appends entries as JSON lines to a file.
///
/// `record` only enqueues; a spawned writer task owns the file handle and
/// writes entries in order.
pub struct JsonlAuditSink {
    tx: mpsc::UnboundedSender<AuditEntry>,
}

impl JsonlAuditSink {
    /// Open (or create) `path` for appending and spawn the writer task.
    pub async fn open(path: &Path) -> std::io::Result<(Self, tokio::task::JoinHandle<()>)> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEntry>();
        let shown = path.display().to_string();

        let handle = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                let mut line = match serde_json::to_vec(&entry) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "failed to serialize audit entry");
                        continue;
                    }
                };
                line.push(b'\n');
                if let Err(e) = file.write_all(&line).await {
                    warn!(path = %shown, error = %e, "failed to append audit entry");
                }
            }
            if let Err(e) = file.flush().await {
                warn!(path = %shown, error = %e, "failed to flush audit file");
            }
        });

        info!(path = %path.display(), "audit file opened");
        Ok((Self { tx }, handle))
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, entry: AuditEntry) {
        if self.tx.send(entry).is_err() {
            warn!("audit writer stopped, dropping entry");
        }
    }
}

/// Forwards every entry to several sinks.
#[derive(Default)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditSink for FanoutAuditSink {
    fn record(&self, entry: AuditEntry) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.record(entry.clone());
            }
            last.record(entry);
        }
    }
}
