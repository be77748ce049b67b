//! Qtree Economy Driver
//!
//! Packs many quota-limited qtrees into a small pool of shared Flexvols.
//!
//! ```text
//!   create/destroy/get/list/resize          periodic
//!               │                               │
//!     ┌─────────┴─────────┐           ┌─────────┴─────────┐
//!     │   QtreeManager    │           │    Housekeeper    │
//!     └──┬──────────┬─────┘           └──┬─────────────┬──┘
//!        │          │      pool lock     │             │
//!   PoolSelector  CapacityPlanner ◄──────┼──►  QuotaManager
//!        └──────────┴───────────┬────────┴─────────────┘
//!                               │
//!                           OntapApi
//! ```

pub mod capacity;
pub mod config;
pub mod housekeeping;
pub mod lifecycle;
pub mod metrics;
pub mod naming;
pub mod pool;
pub mod quota;

pub use capacity::{optimal_flexvol_size, CapacityPlanner};
pub use config::{EconomyConfig, HousekeepingConfig, QuotaConfig, VolumeDefaults};
pub use housekeeping::{Housekeeper, HousekeepingTask, PassReport};
pub use lifecycle::QtreeManager;
pub use metrics::{EconomyMetrics, EconomyMetricsSnapshot};
pub use pool::{new_pool_lock, PoolLock, PoolSelector, PoolState};
pub use quota::{QuotaManager, ResizeOutcome, ResizeQueue};

use crate::domain::ports::{
    ApiReply, ContainerStatus, DriverStatus, OntapApiRef, StorageDriver, VolumeInfo, VolumeRequest,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Registered name of the economy driver
pub const ECONOMY_DRIVER_NAME: &str = "ontap-nas-economy";

/// Export rules installed on an empty shared export policy
const DEFAULT_EXPORT_CLIENTS: [&str; 2] = ["0.0.0.0/0", "::/0"];

/// [`StorageDriver`] that hosts each volume as a qtree on a pooled Flexvol
pub struct EconomyDriver {
    config: EconomyConfig,
    client: OntapApiRef,
    /// Read-only view of the resize queue behind `pool`
    pending_resizes: ResizeQueue,
    flexvol_prefix: String,
    qtrees: QtreeManager,
    housekeeper: Arc<Housekeeper>,
    metrics: Arc<EconomyMetrics>,
}

impl EconomyDriver {
    pub fn new(config: EconomyConfig, client: OntapApiRef) -> Result<Self> {
        Self::with_pool_lock(config, client, new_pool_lock())
    }

    /// Build a driver that shares an existing pool lock
    pub fn with_pool_lock(config: EconomyConfig, client: OntapApiRef, pool: PoolLock) -> Result<Self> {
        config.validate()?;

        let pending_resizes = pool
            .try_lock()
            .map(|state| state.resize_queue.clone())
            .map_err(|_| Error::Configuration("pool lock is held while building the driver".into()))?;

        let flexvol_prefix = naming::flexvol_prefix(&config.storage_prefix);
        let metrics = Arc::new(EconomyMetrics::new());
        let quotas = QuotaManager::new(client.clone(), &config.quota);

        let selector = PoolSelector::new(
            client.clone(),
            quotas.clone(),
            flexvol_prefix.clone(),
            config.qtrees_per_flexvol,
            config.defaults.clone(),
            metrics.clone(),
        );
        let qtrees = QtreeManager::new(
            client.clone(),
            pool.clone(),
            selector,
            CapacityPlanner::new(client.clone()),
            flexvol_prefix.clone(),
            &config,
            metrics.clone(),
        );
        let housekeeper = Arc::new(Housekeeper::new(
            client.clone(),
            pool.clone(),
            quotas,
            flexvol_prefix.clone(),
            config.housekeeping.clone(),
            metrics.clone(),
        ));

        Ok(Self {
            config,
            client,
            pending_resizes,
            flexvol_prefix,
            qtrees,
            housekeeper,
            metrics,
        })
    }

    pub fn config(&self) -> &EconomyConfig {
        &self.config
    }

    /// Prefix shared by every Flexvol this driver owns
    pub fn flexvol_prefix(&self) -> &str {
        &self.flexvol_prefix
    }

    pub fn housekeeper(&self) -> &Arc<Housekeeper> {
        &self.housekeeper
    }

    pub fn metrics(&self) -> EconomyMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Create the shared export policy and give it default rules if empty
    async fn ensure_export_policy(&self) -> Result<()> {
        let policy = &self.config.defaults.export_policy;

        match self.client.export_policy_create(policy).await? {
            ApiReply::Passed(()) => info!("Created export policy {}", policy),
            ApiReply::Failed(failure) if failure.code.is_duplicate() => {
                debug!(policy = %policy, "Export policy already exists");
            }
            ApiReply::Failed(failure) => {
                return Err(Error::api("export-policy-create", failure.code, failure.reason));
            }
        }

        let rules = self
            .client
            .export_rule_list(policy)
            .await?
            .into_result("export-rule-list")?;
        if rules.is_empty() {
            for client_match in DEFAULT_EXPORT_CLIENTS {
                self.client
                    .export_rule_create(policy, client_match)
                    .await?
                    .into_result("export-rule-create")?;
            }
            info!("Added default rules to export policy {}", policy);
        }

        Ok(())
    }
}

#[async_trait]
impl StorageDriver for EconomyDriver {
    fn name(&self) -> &str {
        ECONOMY_DRIVER_NAME
    }

    async fn initialize(&self) -> Result<()> {
        self.ensure_export_policy().await?;
        self.housekeeper.flag_all_for_resize().await?;

        info!(
            "Initialized {} driver (prefix {}, {} qtrees per Flexvol)",
            ECONOMY_DRIVER_NAME, self.flexvol_prefix, self.config.qtrees_per_flexvol
        );
        Ok(())
    }

    async fn create(&self, request: VolumeRequest) -> Result<VolumeInfo> {
        self.qtrees.create(&request).await
    }

    async fn destroy(&self, name: &str) -> Result<()> {
        self.qtrees.destroy(name).await
    }

    async fn get(&self, name: &str) -> Result<Option<VolumeInfo>> {
        self.qtrees.get(name).await
    }

    async fn list(&self) -> Result<Vec<String>> {
        self.qtrees.list().await
    }

    async fn resize(&self, name: &str, size_bytes: u64) -> Result<VolumeInfo> {
        self.qtrees.resize(name, size_bytes).await
    }

    async fn status(&self) -> Result<DriverStatus> {
        let flexvols = self
            .client
            .volume_list(&self.flexvol_prefix)
            .await?
            .into_result("volume-list")?;

        let mut containers = Vec::with_capacity(flexvols.len());
        for name in flexvols {
            match self.client.qtree_count(&name).await? {
                ApiReply::Passed(volume_count) => {
                    containers.push(ContainerStatus { name, volume_count })
                }
                // Pruned since it was listed
                ApiReply::Failed(failure) if failure.code.is_not_found() => {
                    debug!(flexvol = %name, "Flexvol vanished while reporting status");
                }
                ApiReply::Failed(failure) => {
                    return Err(Error::api("qtree-count", failure.code, failure.reason));
                }
            }
        }

        let pending_resizes = self.pending_resizes.snapshot();

        Ok(DriverStatus {
            name: ECONOMY_DRIVER_NAME.to_string(),
            containers,
            pending_resizes,
            counters: self.metrics.snapshot().counters(),
        })
    }

    fn start_background(&self, token: CancellationToken) -> Vec<JoinHandle<()>> {
        Arc::clone(&self.housekeeper).spawn(token)
    }
}
