//! JSON document store
//!
//! Keeps the record and platform tables in memory behind a tokio Mutex and
//! persists the whole document after every mutation. Writes use atomic
//! temp-file + rename, and the new state is only swapped in once the write
//! succeeded, so a failed write leaves both disk and memory at the previous
//! state.
//!
//! The Mutex is held across selection, marking and persistence, which is what
//! makes `lease` a single atomic step.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::filter::{LeaseQuery, RecordPage, RecordQuery};
use crate::model::{NewPlatform, NewRecord, Platform, Record, RecordUpdate, now_millis};
use crate::{RecordStore, StoreFuture};

/// On-disk document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tables {
    #[serde(default)]
    next_record_id: u64,
    #[serde(default)]
    next_platform_id: u64,
    /// Records keyed by their unique key.
    #[serde(default)]
    records: BTreeMap<String, Record>,
    #[serde(default)]
    platforms: Vec<Platform>,
}

impl Tables {
    /// Make sure id sequences are ahead of every stored id, in case the file
    /// was edited by hand.
    fn normalize(&mut self) {
        let max_record = self.records.values().map(|r| r.id).max().unwrap_or(0);
        let max_platform = self.platforms.iter().map(|p| p.id).max().unwrap_or(0);
        self.next_record_id = self.next_record_id.max(max_record);
        self.next_platform_id = self.next_platform_id.max(max_platform);
    }

    fn insert_record(&mut self, record: NewRecord, now: u64) -> Result<Record> {
        if self.records.contains_key(&record.key) {
            return Err(StoreError::Duplicate(record.key));
        }
        let created = Record::create(self.next_record_id + 1, record, now)?;
        self.next_record_id = created.id;
        self.records.insert(created.key.clone(), created.clone());
        Ok(created)
    }

    fn update_record(&mut self, key: &str, update: &RecordUpdate, now: u64) -> Result<Option<Record>> {
        let Some(current) = self.records.get_mut(key) else {
            return Ok(None);
        };
        let mut updated = current.clone();
        updated.apply(update, now)?;
        *current = updated.clone();
        Ok(Some(updated))
    }
}

/// File-backed record store.
pub struct JsonStore {
    path: Option<PathBuf>,
    tables: Mutex<Tables>,
    /// Completed document writes.
    writes: AtomicU64,
}

impl JsonStore {
    /// Load the store from `path`.
    ///
    /// If the file doesn't exist, creates it empty (cold start with an empty
    /// pool).
    pub async fn load(path: PathBuf) -> Result<Self> {
        let tables = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| StoreError::Io(format!("reading store file: {e}")))?;
            let mut tables: Tables = serde_json::from_str(&contents)
                .map_err(|e| StoreError::Parse(format!("parsing store file: {e}")))?;
            tables.normalize();
            info!(
                path = %path.display(),
                records = tables.records.len(),
                platforms = tables.platforms.len(),
                "loaded store"
            );
            tables
        } else {
            info!(path = %path.display(), "store file not found, starting with empty pool");
            let tables = Tables::default();
            write_atomic(&path, &tables).await?;
            tables
        };

        Ok(Self {
            path: Some(path),
            tables: Mutex::new(tables),
            writes: AtomicU64::new(0),
        })
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            tables: Mutex::new(Tables::default()),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.tables.lock().await.records.len()
    }

    /// Whether the pool holds no records.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of times the document was written to disk since load.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Persist `next` and swap it in. The caller holds the lock.
    async fn commit(&self, tables: &mut Tables, next: Tables) -> Result<()> {
        if let Some(path) = &self.path {
            write_atomic(path, &next).await?;
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        *tables = next;
        Ok(())
    }
}

impl RecordStore for JsonStore {
    fn lease<'a>(&'a self, query: &'a LeaseQuery) -> StoreFuture<'a, Vec<Record>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().await;

            let mut keys: Vec<String> = tables
                .records
                .values()
                .filter(|r| query.eligibility.matches(r))
                .map(|r| r.key.clone())
                .collect();
            if keys.is_empty() || query.limit == 0 {
                return Ok(Vec::new());
            }
            keys.shuffle(&mut rand::rng());
            keys.truncate(query.limit);

            let now = now_millis();
            let mut next = tables.clone();
            let mut leased = Vec::with_capacity(keys.len());
            for key in &keys {
                if let Some(record) = next.records.get_mut(key) {
                    record.mark_leased(query.mark_platform(), now);
                    leased.push(record.clone());
                }
            }

            self.commit(&mut tables, next).await?;
            debug!(
                count = leased.len(),
                platform = query.eligibility.platform.as_deref(),
                "leased records"
            );
            Ok(leased)
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Record>> {
        Box::pin(async move { Ok(self.tables.lock().await.records.get(key).cloned()) })
    }

    fn update<'a>(
        &'a self,
        key: &'a str,
        update: &'a RecordUpdate,
    ) -> StoreFuture<'a, Option<Record>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().await;
            if !tables.records.contains_key(key) {
                return Ok(None);
            }

            let mut next = tables.clone();
            let updated = next.update_record(key, update, now_millis())?;
            self.commit(&mut tables, next).await?;
            debug!(key, "updated record");
            Ok(updated)
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut tables = self.tables.lock().await;
            if !tables.records.contains_key(key) {
                return Ok(false);
            }
            let mut next = tables.clone();
            next.records.remove(key);
            self.commit(&mut tables, next).await?;
            debug!(key, "deleted record");
            Ok(true)
        })
    }

    fn insert(&self, record: NewRecord) -> StoreFuture<'_, Record> {
        Box::pin(async move {
            let mut tables = self.tables.lock().await;
            if tables.records.contains_key(&record.key) {
                return Err(StoreError::Duplicate(record.key));
            }

            let mut next = tables.clone();
            let created = next.insert_record(record, now_millis())?;
            self.commit(&mut tables, next).await?;
            debug!(key = %created.key, id = created.id, "inserted record");
            Ok(created)
        })
    }

    fn insert_many(&self, records: Vec<NewRecord>) -> StoreFuture<'_, Vec<Result<Record>>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().await;
            let now = now_millis();
            let mut next = tables.clone();
            let results: Vec<Result<Record>> = records
                .into_iter()
                .map(|record| next.insert_record(record, now))
                .collect();

            let inserted = results.iter().filter(|r| r.is_ok()).count();
            if inserted > 0 {
                self.commit(&mut tables, next).await?;
            }
            debug!(inserted, failed = results.len() - inserted, "inserted records");
            Ok(results)
        })
    }

    fn update_many<'a>(
        &'a self,
        keys: &'a [String],
        update: &'a RecordUpdate,
    ) -> StoreFuture<'a, Vec<Result<Option<Record>>>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().await;
            let now = now_millis();
            let mut next = tables.clone();
            let results: Vec<Result<Option<Record>>> = keys
                .iter()
                .map(|key| next.update_record(key, update, now))
                .collect();

            let updated = results.iter().filter(|r| matches!(r, Ok(Some(_)))).count();
            if updated > 0 {
                self.commit(&mut tables, next).await?;
            }
            debug!(updated, keys = keys.len(), "updated records");
            Ok(results)
        })
    }

    fn delete_many<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, Vec<bool>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().await;
            let mut next = tables.clone();
            let removed: Vec<bool> = keys
                .iter()
                .map(|key| next.records.remove(key).is_some())
                .collect();

            let count = removed.iter().filter(|r| **r).count();
            if count > 0 {
                self.commit(&mut tables, next).await?;
            }
            debug!(removed = count, keys = keys.len(), "deleted records");
            Ok(removed)
        })
    }

    fn query<'a>(&'a self, query: &'a RecordQuery) -> StoreFuture<'a, RecordPage> {
        Box::pin(async move {
            let tables = self.tables.lock().await;
            let mut matching: Vec<&Record> =
                tables.records.values().filter(|r| query.matches(r)).collect();
            matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

            let total = matching.len();
            let records = matching
                .into_iter()
                .skip(query.offset())
                .take(query.page_size)
                .cloned()
                .collect();
            Ok(RecordPage {
                records,
                total,
                page: query.page.max(1),
                page_size: query.page_size,
            })
        })
    }

    fn records(&self) -> StoreFuture<'_, Vec<Record>> {
        Box::pin(async move { Ok(self.tables.lock().await.records.values().cloned().collect()) })
    }

    fn count(&self) -> StoreFuture<'_, usize> {
        Box::pin(async move { Ok(self.len().await) })
    }

    fn platforms(&self) -> StoreFuture<'_, Vec<Platform>> {
        Box::pin(async move {
            let tables = self.tables.lock().await;
            let mut platforms = tables.platforms.clone();
            platforms.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            Ok(platforms)
        })
    }

    fn insert_platform(&self, platform: NewPlatform) -> StoreFuture<'_, Platform> {
        Box::pin(async move {
            let mut tables = self.tables.lock().await;
            if tables.platforms.iter().any(|p| p.key == platform.key) {
                return Err(StoreError::Duplicate(platform.key));
            }

            let mut next = tables.clone();
            next.next_platform_id += 1;
            let created = Platform {
                id: next.next_platform_id,
                key: platform.key,
                name: platform.name,
                created_at: now_millis(),
            };
            next.platforms.push(created.clone());
            self.commit(&mut tables, next).await?;
            debug!(key = %created.key, id = created.id, "inserted platform");
            Ok(created)
        })
    }

    fn update_platform(
        &self,
        id: u64,
        platform: NewPlatform,
    ) -> StoreFuture<'_, Option<Platform>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().await;
            if tables
                .platforms
                .iter()
                .any(|p| p.id != id && p.key == platform.key)
            {
                return Err(StoreError::Duplicate(platform.key));
            }

            let mut next = tables.clone();
            let Some(existing) = next.platforms.iter_mut().find(|p| p.id == id) else {
                return Ok(None);
            };
            existing.key = platform.key;
            existing.name = platform.name;
            let updated = existing.clone();
            self.commit(&mut tables, next).await?;
            debug!(id, key = %updated.key, "updated platform");
            Ok(Some(updated))
        })
    }

    fn delete_platform(&self, id: u64) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut tables = self.tables.lock().await;
            if !tables.platforms.iter().any(|p| p.id == id) {
                return Ok(false);
            }
            let mut next = tables.clone();
            next.platforms.retain(|p| p.id != id);
            self.commit(&mut tables, next).await?;
            debug!(id, "deleted platform");
            Ok(true)
        })
    }
}

/// Write the store document atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 since the document contains
/// credentials.
async fn write_atomic(path: &Path, tables: &Tables) -> Result<()> {
    let json = serde_json::to_string_pretty(tables)
        .map_err(|e| StoreError::Parse(format!("serializing store: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| StoreError::Io("store path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".pool.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| StoreError::Io(format!("writing temp store file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| StoreError::Io(format!("setting store file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| StoreError::Io(format!("renaming temp store file: {e}")))?;

    debug!(path = %path.display(), "persisted store");
    Ok(())
}
