//! Admin listing and pool statistics

use pool_store::{RecordPage, RecordQuery};
use serde::Serialize;

use crate::context::CallContext;
use crate::error::{Classification, Result};
use crate::pool::EmailPool;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformStats {
    pub key: String,
    pub name: String,
    /// Records whose history contains this platform.
    pub used_count: usize,
    /// Records that may be used on this platform.
    pub supported_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub used: usize,
    pub unused: usize,
    pub platforms: Vec<PlatformStats>,
}

fn normalize_query(mut query: RecordQuery) -> RecordQuery {
    query.page = query.page.max(1);
    query.page_size = if query.page_size == 0 {
        DEFAULT_PAGE_SIZE
    } else {
        query.page_size.min(MAX_PAGE_SIZE)
    };
    query.search = query
        .search
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    query.platform = query
        .platform
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    query
}

impl EmailPool {
    /// Filtered, paginated record listing, newest first.
    pub async fn list_records(&self, ctx: &CallContext, query: RecordQuery) -> Result<RecordPage> {
        let query = normalize_query(query);
        let params = serde_json::json!({
            "search": query.search,
            "used": query.used,
            "platform": query.platform,
            "page": query.page,
            "page_size": query.page_size,
        });
        match self.store.query(&query).await {
            Ok(page) => {
                self.audit(
                    ctx,
                    "list_records",
                    params,
                    Classification::Ok,
                    serde_json::json!({ "total": page.total }),
                );
                Ok(page)
            }
            Err(e) => Err(self.audit_error(ctx, "list_records", params, e.into())),
        }
    }

    /// Totals and per-platform usage over the whole pool.
    pub async fn stats(&self, ctx: &CallContext) -> Result<PoolStats> {
        let loaded = async {
            let records = self.store.records().await?;
            let platforms = self.store.platforms().await?;
            Ok::<_, pool_store::StoreError>((records, platforms))
        };
        let (records, platforms) = match loaded.await {
            Ok(loaded) => loaded,
            Err(e) => return Err(self.audit_error(ctx, "stats", serde_json::json!({}), e.into())),
        };

        let used = records.iter().filter(|r| r.used).count();
        let platforms = platforms
            .into_iter()
            .map(|p| PlatformStats {
                used_count: records
                    .iter()
                    .filter(|r| r.used_platforms.contains(&p.key))
                    .count(),
                supported_count: records
                    .iter()
                    .filter(|r| r.supported_platforms.allows(&p.key))
                    .count(),
                key: p.key,
                name: p.name,
            })
            .collect();

        let stats = PoolStats {
            total: records.len(),
            used,
            unused: records.len() - used,
            platforms,
        };
        self.audit(
            ctx,
            "stats",
            serde_json::json!({}),
            Classification::Ok,
            serde_json::json!({ "total": stats.total, "used": stats.used }),
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::test_support::{ctx, harness};

    #[test]
    fn query_is_clamped() {
        let q = normalize_query(RecordQuery {
            page: 0,
            page_size: 10_000,
            search: Some("  ".into()),
            ..Default::default()
        });
        assert_eq!(q.page, 1);
        assert_eq!(q.page_size, MAX_PAGE_SIZE);
        assert_eq!(q.search, None);

        let q = normalize_query(RecordQuery {
            page_size: 0,
            ..Default::default()
        });
        assert_eq!(q.page_size, DEFAULT_PAGE_SIZE);
    }

    #[tokio::test]
    async fn listing_filters_and_pages() {
        let h = harness();
        h.seed("alice@x.com", &["google"], &[]).await;
        h.seed("bob@x.com", &[], &["github"]).await;
        h.seed("carol@y.com", &["github"], &[]).await;

        let page = h
            .pool
            .list_records(
                &ctx(),
                RecordQuery {
                    search: Some("@x.".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 2);

        let page = h
            .pool
            .list_records(
                &ctx(),
                RecordQuery {
                    used: Some(false),
                    platform: Some("google".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let keys: Vec<&str> = page.records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["alice@x.com"]);
    }

    #[tokio::test]
    async fn stats_count_usage_per_platform() {
        let h = harness();
        h.pool.add_platform(&ctx(), "google", "Google").await.unwrap();
        h.pool.add_platform(&ctx(), "github", "GitHub").await.unwrap();
        h.seed("open@x.com", &[], &["google"]).await;
        h.seed("gh@x.com", &["github"], &[]).await;
        h.seed("both@x.com", &["github", "google"], &["github"]).await;

        let stats = h.pool.stats(&ctx()).await.unwrap();
        assert_eq!((stats.total, stats.used, stats.unused), (3, 2, 1));

        let google = stats.platforms.iter().find(|p| p.key == "google").unwrap();
        assert_eq!(google.used_count, 1);
        assert_eq!(google.supported_count, 2);
        let github = stats.platforms.iter().find(|p| p.key == "github").unwrap();
        assert_eq!(github.used_count, 1);
        assert_eq!(github.supported_count, 3);
    }
}
