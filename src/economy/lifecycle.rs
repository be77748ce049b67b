//! Qtree Lifecycle Manager
//!
//! Create, destroy, look up, list, and grow qtrees. Create and resize run
//! entirely under the pool lock; destroy only renames and starts an async
//! delete, so it does not need it.

use super::capacity::CapacityPlanner;
use super::config::{EconomyConfig, VolumeDefaults};
use super::metrics::EconomyMetrics;
use super::naming::{
    deleted_qtree_name, deleted_suffix, is_deleted_qtree, validate_qtree_name, MIN_QTREE_SIZE_BYTES,
};
use super::pool::{PoolLock, PoolSelector, PoolState};
use super::ECONOMY_DRIVER_NAME;
use crate::domain::ports::{
    ApiReply, OntapApiRef, PoolAttributes, QtreeCreateSpec, QuotaEntry, VolumeInfo, VolumeRequest,
};
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Soft-delete renames tried before giving up on a free name
const MAX_RENAME_ATTEMPTS: usize = 5;

pub struct QtreeManager {
    client: OntapApiRef,
    pool: PoolLock,
    selector: PoolSelector,
    planner: CapacityPlanner,
    flexvol_prefix: String,
    defaults: VolumeDefaults,
    limit_volume_size: Option<u64>,
    metrics: Arc<EconomyMetrics>,
}

impl QtreeManager {
    pub fn new(
        client: OntapApiRef,
        pool: PoolLock,
        selector: PoolSelector,
        planner: CapacityPlanner,
        flexvol_prefix: impl Into<String>,
        config: &EconomyConfig,
        metrics: Arc<EconomyMetrics>,
    ) -> Self {
        Self {
            client,
            pool,
            selector,
            planner,
            flexvol_prefix: flexvol_prefix.into(),
            defaults: config.defaults.clone(),
            limit_volume_size: config.limit_volume_size,
            metrics,
        }
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Provision a qtree on a pooled Flexvol.
    ///
    /// Request validation, duplicate names, and fatal quota errors are
    /// returned as-is. Every other failure is logged and reported as
    /// [`Error::VolumeCreationFailed`].
    pub async fn create(&self, request: &VolumeRequest) -> Result<VolumeInfo> {
        validate_qtree_name(&request.name)?;
        self.check_size(request.size_bytes)?;
        let attributes = self.defaults.resolve(&request.options)?;

        let mut pool = self.pool.lock().await;
        let result = self
            .create_locked(&mut pool, &request.name, request.size_bytes, &attributes)
            .await;
        drop(pool);

        match result {
            Ok(flexvol) => {
                EconomyMetrics::incr(&self.metrics.qtrees_created);
                info!(
                    "Created qtree {} ({} bytes) on Flexvol {}",
                    request.name, request.size_bytes, flexvol
                );
                Ok(VolumeInfo {
                    name: request.name.clone(),
                    container: flexvol,
                    size_bytes: Some(request.size_bytes),
                    driver: ECONOMY_DRIVER_NAME.to_string(),
                })
            }
            Err(e @ Error::ResourceExists { .. }) => Err(e),
            Err(e) if e.is_fatal() => {
                EconomyMetrics::incr(&self.metrics.create_failures);
                error!(qtree = %request.name, error = %e, "Qtree creation aborted");
                Err(e)
            }
            Err(e) => {
                EconomyMetrics::incr(&self.metrics.create_failures);
                error!(qtree = %request.name, error = %e, "Qtree creation failed");
                Err(Error::VolumeCreationFailed {
                    name: request.name.clone(),
                })
            }
        }
    }

    async fn create_locked(
        &self,
        pool: &mut PoolState,
        name: &str,
        size_bytes: u64,
        attributes: &PoolAttributes,
    ) -> Result<String> {
        if let Some(flexvol) = self.locate(name).await? {
            debug!(qtree = name, flexvol = %flexvol, "Qtree already exists");
            return Err(Error::ResourceExists {
                kind: "qtree".into(),
                name: name.to_string(),
            });
        }

        let flexvol = self.selector.ensure_flexvol_for_qtree(pool, attributes).await?;
        self.planner.resize_flexvol(&flexvol, size_bytes).await?;

        let spec = QtreeCreateSpec {
            name: name.to_string(),
            flexvol: flexvol.clone(),
            unix_permissions: self.defaults.unix_permissions.clone(),
            export_policy: self.defaults.export_policy.clone(),
            security_style: self.defaults.security_style.clone(),
        };
        self.client
            .qtree_create(&spec)
            .await?
            .into_result("qtree-create")?;

        let quota = QuotaEntry::for_qtree(&flexvol, name, size_bytes);
        let quota_result = self
            .client
            .quota_set_entry(&quota)
            .await
            .and_then(|reply| reply.into_result("quota-set-entry"));
        if let Err(e) = quota_result {
            self.cleanup_qtree(&flexvol, name).await;
            return Err(e);
        }

        pool.resize_queue.flag(&flexvol);
        Ok(flexvol)
    }

    async fn cleanup_qtree(&self, flexvol: &str, name: &str) {
        match self.client.qtree_destroy_async(flexvol, name).await {
            Ok(reply) if reply.is_passed() => {
                debug!(qtree = name, flexvol, "Removed partially created qtree");
            }
            Ok(reply) => {
                warn!(qtree = name, flexvol, code = ?reply.code(), "Could not remove partially created qtree");
            }
            Err(e) => {
                warn!(qtree = name, flexvol, error = %e, "Could not remove partially created qtree");
            }
        }
    }

    fn check_size(&self, size_bytes: u64) -> Result<()> {
        if size_bytes < MIN_QTREE_SIZE_BYTES {
            return Err(Error::VolumeTooSmall {
                requested: size_bytes,
                minimum: MIN_QTREE_SIZE_BYTES,
            });
        }
        if let Some(limit) = self.limit_volume_size {
            if size_bytes > limit {
                return Err(Error::VolumeTooLarge {
                    requested: size_bytes,
                    limit,
                });
            }
        }
        Ok(())
    }

    // =========================================================================
    // Destroy
    // =========================================================================

    /// Soft-delete a qtree and start its removal. Missing qtrees succeed.
    ///
    /// Backend failures reach the caller as [`Error::VolumeDeletionFailed`];
    /// the cause is logged.
    pub async fn destroy(&self, name: &str) -> Result<()> {
        match self.destroy_qtree(name).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_validation() || e.is_fatal() => Err(e),
            Err(e) => {
                error!(qtree = name, code = ?e.code(), error = %e, "Qtree deletion failed");
                Err(Error::VolumeDeletionFailed {
                    name: name.to_string(),
                })
            }
        }
    }

    async fn destroy_qtree(&self, name: &str) -> Result<()> {
        let flexvol = match self.locate(name).await? {
            Some(flexvol) => flexvol,
            None => {
                warn!("Qtree {} not found, nothing to destroy", name);
                return Ok(());
            }
        };

        let deleted = match self.soft_delete(&flexvol, name).await? {
            Some(deleted) => deleted,
            None => {
                warn!("Qtree {} disappeared before it could be renamed", name);
                return Ok(());
            }
        };

        // A reap pass may already have removed the renamed qtree
        let started = match self.client.qtree_destroy_async(&flexvol, &deleted).await {
            Ok(ApiReply::Failed(failure)) if failure.code.is_not_found() => {
                debug!(qtree = name, deleted = %deleted, "Soft-deleted qtree already removed");
                Ok(())
            }
            Ok(reply) => reply.into_result("qtree-destroy-async"),
            Err(e) => Err(e),
        };

        match started {
            Ok(()) => {
                EconomyMetrics::incr(&self.metrics.qtrees_destroyed);
                info!("Destroying qtree {} on Flexvol {} as {}", name, flexvol, deleted);
                Ok(())
            }
            Err(e) => {
                warn!(qtree = name, flexvol = %flexvol, "Could not start qtree destroy, restoring name");
                self.restore_name(&flexvol, &deleted, name).await;
                Err(e)
            }
        }
    }

    /// Rename `name` to a fresh soft-delete name. `None` means it is gone.
    async fn soft_delete(&self, flexvol: &str, name: &str) -> Result<Option<String>> {
        for attempt in 1..=MAX_RENAME_ATTEMPTS {
            let deleted = deleted_qtree_name(name, &deleted_suffix(&mut rand::thread_rng()));

            match self.client.qtree_rename(flexvol, name, &deleted).await? {
                ApiReply::Passed(()) => return Ok(Some(deleted)),
                ApiReply::Failed(failure) if failure.code.is_duplicate() => {
                    debug!(qtree = name, deleted = %deleted, attempt, "Soft-delete name taken, retrying");
                }
                ApiReply::Failed(failure) if failure.code.is_not_found() => return Ok(None),
                ApiReply::Failed(failure) => {
                    return Err(Error::api("qtree-rename", failure.code, failure.reason));
                }
            }
        }

        Err(Error::Internal(format!(
            "no free soft-delete name for qtree {} after {} attempts",
            name, MAX_RENAME_ATTEMPTS
        )))
    }

    async fn restore_name(&self, flexvol: &str, deleted: &str, name: &str) {
        match self.client.qtree_rename(flexvol, deleted, name).await {
            Ok(reply) if reply.is_passed() => {
                debug!(qtree = name, flexvol, "Restored qtree name");
            }
            Ok(reply) => {
                warn!(qtree = name, flexvol, code = ?reply.code(), "Could not restore qtree name");
            }
            Err(e) => {
                warn!(qtree = name, flexvol, error = %e, "Could not restore qtree name");
            }
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Owning Flexvol of an active qtree
    pub async fn locate(&self, name: &str) -> Result<Option<String>> {
        self.client
            .qtree_exists(name, &self.flexvol_prefix)
            .await?
            .into_result("qtree-exists")
    }

    /// Look up an active qtree with its quota limit
    pub async fn get(&self, name: &str) -> Result<Option<VolumeInfo>> {
        let flexvol = match self.locate(name).await? {
            Some(flexvol) => flexvol,
            None => return Ok(None),
        };

        let size_bytes = self.quota_bytes(&flexvol, name).await?;

        Ok(Some(VolumeInfo {
            name: name.to_string(),
            container: flexvol,
            size_bytes,
            driver: ECONOMY_DRIVER_NAME.to_string(),
        }))
    }

    async fn quota_bytes(&self, flexvol: &str, name: &str) -> Result<Option<u64>> {
        match self.client.quota_get_entry(flexvol, name).await? {
            ApiReply::Passed(entry) => Ok(entry.disk_limit.bytes()),
            ApiReply::Failed(failure) if failure.code.is_not_found() => Ok(None),
            ApiReply::Failed(failure) => {
                Err(Error::api("quota-get-entry", failure.code, failure.reason))
            }
        }
    }

    /// Names of all active qtrees across the pool, sorted
    pub async fn list(&self) -> Result<Vec<String>> {
        let qtrees = self
            .client
            .qtree_list("", &self.flexvol_prefix)
            .await?
            .into_result("qtree-list")?;

        let mut names: Vec<String> = qtrees
            .into_iter()
            .map(|qtree| qtree.name)
            .filter(|name| !name.is_empty() && !is_deleted_qtree(name))
            .collect();
        names.sort();
        names.dedup();

        Ok(names)
    }

    // =========================================================================
    // Resize
    // =========================================================================

    /// Grow a qtree's quota, growing its Flexvol by the difference.
    ///
    /// Backend failures reach the caller as [`Error::VolumeResizeFailed`].
    pub async fn resize(&self, name: &str, size_bytes: u64) -> Result<VolumeInfo> {
        self.check_size(size_bytes)?;

        match self.resize_qtree(name, size_bytes).await {
            Ok(info) => Ok(info),
            Err(e @ Error::ResourceNotFound { .. }) => Err(e),
            Err(e) if e.is_validation() || e.is_fatal() => Err(e),
            Err(e) => {
                error!(qtree = name, code = ?e.code(), error = %e, "Qtree resize failed");
                Err(Error::VolumeResizeFailed {
                    name: name.to_string(),
                })
            }
        }
    }

    async fn resize_qtree(&self, name: &str, size_bytes: u64) -> Result<VolumeInfo> {
        let mut pool = self.pool.lock().await;

        let flexvol = self.locate(name).await?.ok_or_else(|| Error::ResourceNotFound {
            kind: "qtree".into(),
            name: name.to_string(),
        })?;

        let current = self.quota_bytes(&flexvol, name).await?.unwrap_or(0);
        if size_bytes < current {
            return Err(Error::ApiValidation(format!(
                "qtree {} cannot shrink from {} to {} bytes",
                name, current, size_bytes
            )));
        }

        if size_bytes > current {
            self.planner
                .resize_flexvol(&flexvol, size_bytes - current)
                .await?;
            self.client
                .quota_set_entry(&QuotaEntry::for_qtree(&flexvol, name, size_bytes))
                .await?
                .into_result("quota-set-entry")?;
            pool.resize_queue.flag(&flexvol);
            info!(
                "Resized qtree {} on Flexvol {} from {} to {} bytes",
                name, flexvol, current, size_bytes
            );
        }

        Ok(VolumeInfo {
            name: name.to_string(),
            container: flexvol,
            size_bytes: Some(size_bytes),
            driver: ECONOMY_DRIVER_NAME.to_string(),
        })
    }
}
