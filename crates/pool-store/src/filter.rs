//! Eligibility and listing predicates
//!
//! Both predicates are pure functions of a single record so that any backend
//! can evaluate them, either in memory or translated into a query.

use crate::model::Record;

/// Which records qualify for a lease request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Eligibility {
    /// Target platform. `None` accepts any platform.
    pub platform: Option<String>,
    /// Whether records already marked used may be handed out again.
    pub include_used: bool,
}

impl Eligibility {
    /// Eligibility for `platform` with blank platforms treated as absent.
    pub fn new(platform: Option<&str>, include_used: bool) -> Self {
        let platform = platform
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        Self {
            platform,
            include_used,
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        if !self.include_used && record.used {
            return false;
        }
        match self.platform.as_deref() {
            Some(platform) => {
                record.supported_platforms.allows(platform)
                    && !record.used_platforms.contains(platform)
            }
            None => true,
        }
    }
}

/// An atomic select-and-mark request against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseQuery {
    pub eligibility: Eligibility,
    /// Maximum number of records to hand out.
    pub limit: usize,
    /// Record the requested platform in each leased record's history.
    pub record_platform: bool,
}

impl LeaseQuery {
    /// Platform to write into the history of each leased record, if any.
    pub fn mark_platform(&self) -> Option<&str> {
        if self.record_platform {
            self.eligibility.platform.as_deref()
        } else {
            None
        }
    }
}

/// Admin listing filter with pagination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    /// Substring match on the record key.
    pub search: Option<String>,
    pub used: Option<bool>,
    /// Records whose supported set allows this platform.
    pub platform: Option<String>,
    /// 1-based page number.
    pub page: usize,
    pub page_size: usize,
}

impl Default for RecordQuery {
    fn default() -> Self {
        Self {
            search: None,
            used: None,
            platform: None,
            page: 1,
            page_size: 20,
        }
    }
}

impl RecordQuery {
    pub fn matches(&self, record: &Record) -> bool {
        if let Some(search) = self.search.as_deref()
            && !record.key.contains(search)
        {
            return false;
        }
        if let Some(used) = self.used
            && record.used != used
        {
            return false;
        }
        match self.platform.as_deref() {
            Some(platform) => record.supported_platforms.allows(platform),
            None => true,
        }
    }

    /// Number of matching records to skip before this page.
    pub fn offset(&self) -> usize {
        self.page.max(1).saturating_sub(1).saturating_mul(self.page_size)
    }
}

/// One page of listing results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPage {
    pub records: Vec<Record>,
    /// Matching records across all pages.
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewRecord, PlatformSet};

    fn record(used: bool, supported: &[&str], used_on: &[&str]) -> Record {
        let mut r = Record::create(
            1,
            NewRecord {
                key: "a@x.com".into(),
                secret: "pw".into(),
                supported_platforms: PlatformSet::from_keys(supported),
                ..Default::default()
            },
            0,
        )
        .unwrap();
        r.used_platforms = PlatformSet::from_keys(used_on);
        r.used = used;
        r
    }

    #[test]
    fn unused_only_by_default() {
        let filter = Eligibility::new(None, false);
        assert!(filter.matches(&record(false, &[], &[])));
        assert!(!filter.matches(&record(true, &[], &[])));
        assert!(Eligibility::new(None, true).matches(&record(true, &[], &[])));
    }

    #[test]
    fn platform_already_used_is_excluded_regardless_of_supported() {
        let filter = Eligibility::new(Some("google"), true);
        assert!(!filter.matches(&record(false, &[], &["google"])));
        assert!(!filter.matches(&record(false, &["google"], &["google"])));
        assert!(filter.matches(&record(false, &["google"], &["github"])));
    }

    #[test]
    fn empty_supported_is_open_to_any_platform() {
        let filter = Eligibility::new(Some("anything"), false);
        assert!(filter.matches(&record(false, &[], &[])));
        assert!(!filter.matches(&record(false, &["other"], &[])));
    }

    #[test]
    fn blank_platform_is_no_platform() {
        assert_eq!(Eligibility::new(Some("  "), false).platform, None);
        assert_eq!(
            Eligibility::new(Some(" google "), false).platform.as_deref(),
            Some("google")
        );
    }

    #[test]
    fn mark_platform_follows_flag() {
        let mut query = LeaseQuery {
            eligibility: Eligibility::new(Some("google"), false),
            limit: 1,
            record_platform: true,
        };
        assert_eq!(query.mark_platform(), Some("google"));
        query.record_platform = false;
        assert_eq!(query.mark_platform(), None);
    }

    #[test]
    fn record_query_filters() {
        let r = record(true, &["google"], &[]);
        let mut q = RecordQuery::default();
        assert!(q.matches(&r));
        q.search = Some("@x.".into());
        assert!(q.matches(&r));
        q.used = Some(false);
        assert!(!q.matches(&r));
        q.used = Some(true);
        q.platform = Some("github".into());
        assert!(!q.matches(&r));
        q.platform = Some("google".into());
        assert!(q.matches(&r));
    }

    #[test]
    fn offset_is_one_based() {
        let q = RecordQuery {
            page: 3,
            page_size: 20,
            ..Default::default()
        };
        assert_eq!(q.offset(), 40);
        let q = RecordQuery {
            page: 0,
            ..Default::default()
        };
        assert_eq!(q.offset(), 0);
    }
}
