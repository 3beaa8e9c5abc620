//! Pool data model
//!
//! Records carry their platform history as typed sets. The sets are only
//! turned into JSON arrays at the storage boundary; business logic never sees
//! the serialized form, so "empty means every platform" is decided here once.

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Current time as a unix timestamp in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Ordered set of platform keys.
///
/// As `supported_platforms`, an empty set means the record may be used on any
/// platform. As `used_platforms`, it is the platform history of the record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlatformSet(BTreeSet<String>);

impl PlatformSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from caller input. Keys are trimmed, blanks dropped and
    /// duplicates collapsed.
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            keys.into_iter()
                .map(|k| k.as_ref().trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, platform: &str) -> bool {
        self.0.contains(platform)
    }

    pub fn insert(&mut self, platform: impl Into<String>) -> bool {
        self.0.insert(platform.into())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Whether a record with this supported set may be used on `platform`.
    pub fn allows(&self, platform: &str) -> bool {
        self.is_empty() || self.contains(platform)
    }

    /// Set union, leaving both inputs untouched.
    pub fn union(&self, other: &PlatformSet) -> PlatformSet {
        Self(self.0.union(&other.0).cloned().collect())
    }

    /// Keys in `self` that `supported` does not allow.
    pub fn outside_of<'a>(&'a self, supported: &'a PlatformSet) -> Vec<&'a str> {
        self.iter().filter(|p| !supported.allows(p)).collect()
    }
}

impl<S: AsRef<str>> FromIterator<S> for PlatformSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::from_keys(iter)
    }
}

/// Derive the `used` flag after a mutation.
///
/// An explicit value always wins. Otherwise a non-empty platform history
/// marks the record used, and an empty one leaves the flag as it was.
pub fn derive_used_flag(explicit: Option<bool>, used_platforms: &PlatformSet, current: bool) -> bool {
    match explicit {
        Some(used) => used,
        None if !used_platforms.is_empty() => true,
        None => current,
    }
}

/// Reject a platform history that escapes a non-empty supported set.
pub fn check_used_within_supported(supported: &PlatformSet, used: &PlatformSet) -> Result<()> {
    let outside = used.outside_of(supported);
    if outside.is_empty() {
        Ok(())
    } else {
        Err(StoreError::Invalid(format!(
            "used platforms [{}] are not in supported platforms",
            outside.join(", ")
        )))
    }
}

/// A pooled credential record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: u64,
    /// Primary credential (e.g. the email address). Unique across the pool.
    pub key: String,
    /// Secondary credential (e.g. the password). Stored and returned verbatim.
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub used: bool,
    #[serde(default)]
    pub supported_platforms: PlatformSet,
    #[serde(default)]
    pub used_platforms: PlatformSet,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Input for inserting a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewRecord {
    pub key: String,
    pub secret: String,
    pub note: Option<String>,
    pub supported_platforms: PlatformSet,
    pub used_platforms: PlatformSet,
}

/// A mutation of an existing record outside the lease path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordUpdate {
    /// Explicit used flag. `None` derives it from the platform history.
    pub used: Option<bool>,
    /// Replacement supported set. `None` keeps the current one.
    pub supported: Option<PlatformSet>,
    /// Platforms to union into the used set.
    pub add_used: PlatformSet,
}

impl RecordUpdate {
    fn touches_platforms(&self) -> bool {
        self.supported.is_some() || !self.add_used.is_empty()
    }
}

impl Record {
    /// Build a stored record from insert input.
    pub fn create(id: u64, new: NewRecord, now: u64) -> Result<Self> {
        check_used_within_supported(&new.supported_platforms, &new.used_platforms)?;
        let used = derive_used_flag(None, &new.used_platforms, false);
        Ok(Self {
            id,
            key: new.key,
            secret: new.secret,
            note: new.note,
            used,
            supported_platforms: new.supported_platforms,
            used_platforms: new.used_platforms,
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply an update in place.
    ///
    /// The subset check only runs when the update changes either platform
    /// set; a bare flag flip on a legacy record is still allowed. On error
    /// the record is left untouched.
    pub fn apply(&mut self, update: &RecordUpdate, now: u64) -> Result<()> {
        let supported = update
            .supported
            .clone()
            .unwrap_or_else(|| self.supported_platforms.clone());
        let used_platforms = self.used_platforms.union(&update.add_used);

        if update.touches_platforms() {
            check_used_within_supported(&supported, &used_platforms)?;
        }

        self.used = derive_used_flag(update.used, &used_platforms, self.used);
        self.supported_platforms = supported;
        self.used_platforms = used_platforms;
        self.updated_at = now;
        Ok(())
    }

    /// Mark the record as handed out by a lease. `platform`, when given, is
    /// recorded in the platform history.
    pub fn mark_leased(&mut self, platform: Option<&str>, now: u64) {
        if let Some(platform) = platform {
            self.used_platforms.insert(platform);
        }
        self.used = derive_used_flag(Some(true), &self.used_platforms, self.used);
        self.updated_at = now;
    }
}

/// A named platform tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub id: u64,
    pub key: String,
    pub name: String,
    pub created_at: u64,
}

/// Input for inserting or renaming a platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPlatform {
    pub key: String,
    pub name: String,
}
