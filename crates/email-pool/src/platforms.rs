//! Platform registry

use pool_store::{NewPlatform, Platform};
use tracing::info;

use crate::context::CallContext;
use crate::error::{Classification, Error, Result};
use crate::pool::{EmailPool, required};

fn new_platform(key: &str, name: &str) -> Result<NewPlatform> {
    Ok(NewPlatform {
        key: required(key, "key")?,
        name: required(name, "name")?,
    })
}

impl EmailPool {
    /// All registered platforms, newest first.
    pub async fn list_platforms(&self, ctx: &CallContext) -> Result<Vec<Platform>> {
        match self.store.platforms().await {
            Ok(platforms) => {
                self.audit(
                    ctx,
                    "list_platforms",
                    serde_json::json!({}),
                    Classification::Ok,
                    serde_json::json!({ "count": platforms.len() }),
                );
                Ok(platforms)
            }
            Err(e) => Err(self.audit_error(ctx, "list_platforms", serde_json::json!({}), e.into())),
        }
    }

    pub async fn add_platform(&self, ctx: &CallContext, key: &str, name: &str) -> Result<Platform> {
        let params = serde_json::json!({ "key": key, "name": name });
        let platform = match new_platform(key, name) {
            Ok(platform) => platform,
            Err(e) => return Err(self.audit_error(ctx, "add_platform", params, e)),
        };

        match self.store.insert_platform(platform).await {
            Ok(platform) => {
                info!(request_id = %ctx.request_id, key = %platform.key, id = platform.id, "platform added");
                self.audit(
                    ctx,
                    "add_platform",
                    params,
                    Classification::Ok,
                    serde_json::json!({ "id": platform.id }),
                );
                Ok(platform)
            }
            Err(e) => Err(self.audit_error(ctx, "add_platform", params, Error::from(e))),
        }
    }

    /// Rename a platform. `None` when no platform has that id.
    pub async fn update_platform(
        &self,
        ctx: &CallContext,
        id: u64,
        key: &str,
        name: &str,
    ) -> Result<Option<Platform>> {
        let params = serde_json::json!({ "id": id, "key": key, "name": name });
        let platform = match new_platform(key, name) {
            Ok(platform) => platform,
            Err(e) => return Err(self.audit_error(ctx, "update_platform", params, e)),
        };

        match self.store.update_platform(id, platform).await {
            Ok(updated) => {
                let status = if updated.is_some() {
                    info!(request_id = %ctx.request_id, id, "platform updated");
                    Classification::Ok
                } else {
                    Classification::NotFound
                };
                self.audit(ctx, "update_platform", params, status, serde_json::json!({}));
                Ok(updated)
            }
            Err(e) => Err(self.audit_error(ctx, "update_platform", params, Error::from(e))),
        }
    }

    /// Remove a platform. Records that reference its key keep it.
    pub async fn remove_platform(&self, ctx: &CallContext, id: u64) -> Result<bool> {
        let params = serde_json::json!({ "id": id });
        match self.store.delete_platform(id).await {
            Ok(removed) => {
                let status = if removed {
                    info!(request_id = %ctx.request_id, id, "platform removed");
                    Classification::Ok
                } else {
                    Classification::NotFound
                };
                self.audit(ctx, "remove_platform", params, status, serde_json::json!({}));
                Ok(removed)
            }
            Err(e) => Err(self.audit_error(ctx, "remove_platform", params, Error::from(e))),
        }
    }
}
