//! Storage for the credential record pool
//!
//! Defines the record/platform data model, the pure eligibility predicate,
//! and the `RecordStore` trait the pool engine talks to. `JsonStore` is the
//! bundled backend: an in-memory table persisted as a single JSON document.
//!
//! The storage contract that matters most is `RecordStore::lease`: selecting
//! eligible records and marking them used happens in one exclusive step, so
//! two concurrent leases can never receive the same record.

pub mod error;
pub mod filter;
pub mod json;
pub mod model;

pub use error::{Result, StoreError};
pub use filter::{Eligibility, LeaseQuery, RecordPage, RecordQuery};
pub use json::JsonStore;
pub use model::{
    NewPlatform, NewRecord, Platform, PlatformSet, Record, RecordUpdate,
    check_used_within_supported, derive_used_flag, now_millis,
};

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by `RecordStore` methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Storage backend for records and platforms.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn RecordStore>`).
pub trait RecordStore: Send + Sync {
    /// Atomically select up to `query.limit` eligible records at random,
    /// mark each one leased and return them.
    ///
    /// No other lease or mutation may observe or change the selected records
    /// between selection and marking.
    fn lease<'a>(&'a self, query: &'a LeaseQuery) -> StoreFuture<'a, Vec<Record>>;

    /// Point lookup by record key.
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Record>>;

    /// Read-modify-write of a single record. `None` when the key is absent.
    fn update<'a>(
        &'a self,
        key: &'a str,
        update: &'a RecordUpdate,
    ) -> StoreFuture<'a, Option<Record>>;

    /// Delete by key. Returns whether a record was removed.
    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool>;

    /// Insert a record. Fails with `StoreError::Duplicate` if the key exists.
    fn insert(&self, record: NewRecord) -> StoreFuture<'_, Record>;

    /// Insert several records and persist once.
    ///
    /// Each item gets its own outcome, in input order; a key that already
    /// exists, or repeats an earlier item, fails with `StoreError::Duplicate`
    /// without affecting the rest. The outer error means nothing was
    /// persisted.
    fn insert_many(&self, records: Vec<NewRecord>) -> StoreFuture<'_, Vec<Result<Record>>>;

    /// Apply one update to each key and persist once. `None` for keys
    /// without a record; a rejected update leaves that record untouched.
    fn update_many<'a>(
        &'a self,
        keys: &'a [String],
        update: &'a RecordUpdate,
    ) -> StoreFuture<'a, Vec<Result<Option<Record>>>>;

    /// Delete each key and persist once. Per key: whether a record was
    /// removed.
    fn delete_many<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, Vec<bool>>;

    /// Filtered, paginated listing, newest first.
    fn query<'a>(&'a self, query: &'a RecordQuery) -> StoreFuture<'a, RecordPage>;

    /// Snapshot of every record.
    fn records(&self) -> StoreFuture<'_, Vec<Record>>;

    /// Number of stored records.
    fn count(&self) -> StoreFuture<'_, usize>;

    /// All platforms, newest first.
    fn platforms(&self) -> StoreFuture<'_, Vec<Platform>>;

    /// Insert a platform. Fails with `StoreError::Duplicate` if the key exists.
    fn insert_platform(&self, platform: NewPlatform) -> StoreFuture<'_, Platform>;

    /// Replace key and name of a platform. `None` when the id is absent.
    fn update_platform(&self, id: u64, platform: NewPlatform)
    -> StoreFuture<'_, Option<Platform>>;

    /// Delete a platform. Records referencing its key are left untouched.
    fn delete_platform(&self, id: u64) -> StoreFuture<'_, bool>;
}
