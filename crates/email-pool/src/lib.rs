//! Credential pool engine
//!
//! Allocation and state transitions for a pool of credential records:
//! leasing eligible records under concurrency, status updates, bulk
//! reconciliation with a conflict gate, and bulk import. Every operation
//! takes a [`CallContext`] built by an already-authorized transport and
//! reports its outcome to an [`AuditSink`].

pub mod audit;
pub mod batch;
pub mod context;
pub mod error;
pub mod import;
pub mod lease;
pub mod platforms;
pub mod pool;
pub mod stats;
pub mod status;

pub use audit::{
    AuditEntry, AuditPage, AuditSink, DailyCount, FanoutAuditSink, JsonlAuditSink, RecentAuditLog,
    TracingAuditSink,
};
pub use batch::{BatchAction, BatchFailure, BatchOutcome, BatchRequest, ConflictReport};
pub use context::{CallContext, Scope};
pub use error::{Classification, Error, Result};
pub use import::{ImportFailure, ImportFailureReason, ImportReport, ImportRequest};
pub use lease::{LeaseOutcome, LeaseRequest, MAX_LEASE_COUNT};
pub use pool::EmailPool;
pub use stats::{PlatformStats, PoolStats};
pub use status::{DeleteOutcome, SetStatusRequest, StatusOutcome};

pub use pool_store::{PlatformSet, Platform, Record, RecordPage, RecordQuery};
