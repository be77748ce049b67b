//! Pool Selector
//!
//! Finds a Flexvol that can host one more qtree with a given attribute set,
//! creating one when every match is full. Callers must hold the pool lock;
//! the [`PoolState`] borrow taken by [`PoolSelector::ensure_flexvol_for_qtree`]
//! is the proof.

use super::config::VolumeDefaults;
use super::metrics::EconomyMetrics;
use super::naming::{new_flexvol_name, FLEXVOL_PLACEHOLDER_BYTES, FLEXVOL_UNIX_PERMISSIONS};
use super::quota::{QuotaManager, ResizeQueue};
use crate::domain::ports::{FlexvolCreateSpec, OntapApiRef, PoolAttributes, QuotaEntry};
use crate::error::Result;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

// =============================================================================
// Pool Lock
// =============================================================================

/// State guarded by the pool lock
#[derive(Debug, Default)]
pub struct PoolState {
    pub resize_queue: ResizeQueue,
}

/// Lock shared by foreground provisioning and housekeeping
pub type PoolLock = Arc<Mutex<PoolState>>;

pub fn new_pool_lock() -> PoolLock {
    Arc::new(Mutex::new(PoolState::default()))
}

// =============================================================================
// Pool Selector
// =============================================================================

#[derive(Clone)]
pub struct PoolSelector {
    client: OntapApiRef,
    quotas: QuotaManager,
    flexvol_prefix: String,
    qtrees_per_flexvol: usize,
    defaults: VolumeDefaults,
    metrics: Arc<EconomyMetrics>,
}

impl PoolSelector {
    pub fn new(
        client: OntapApiRef,
        quotas: QuotaManager,
        flexvol_prefix: impl Into<String>,
        qtrees_per_flexvol: usize,
        defaults: VolumeDefaults,
        metrics: Arc<EconomyMetrics>,
    ) -> Self {
        Self {
            client,
            quotas,
            flexvol_prefix: flexvol_prefix.into(),
            qtrees_per_flexvol,
            defaults,
            metrics,
        }
    }

    /// Name of a Flexvol with room for one more qtree, creating one if needed
    pub async fn ensure_flexvol_for_qtree(
        &self,
        _pool: &PoolState,
        attributes: &PoolAttributes,
    ) -> Result<String> {
        if let Some(flexvol) = self.get_flexvol_for_qtree(attributes).await? {
            debug!(flexvol = %flexvol, "Reusing pooled Flexvol");
            return Ok(flexvol);
        }

        self.create_flexvol_for_qtree(attributes).await
    }

    /// Pick a matching Flexvol below the ceiling, uniformly at random
    pub async fn get_flexvol_for_qtree(&self, attributes: &PoolAttributes) -> Result<Option<String>> {
        let matching = self
            .client
            .volume_list_by_attrs(&self.flexvol_prefix, attributes)
            .await?
            .into_result("volume-list-by-attrs")?;

        let mut eligible = Vec::with_capacity(matching.len());
        for flexvol in matching {
            let count = self
                .client
                .qtree_count(&flexvol)
                .await?
                .into_result("qtree-count")?;
            if count < self.qtrees_per_flexvol {
                eligible.push(flexvol);
            } else {
                debug!(flexvol = %flexvol, count, "Flexvol is full");
            }
        }

        Ok(eligible.choose(&mut rand::thread_rng()).cloned())
    }

    /// Provision a new pooled Flexvol with `attributes`
    pub async fn create_flexvol_for_qtree(&self, attributes: &PoolAttributes) -> Result<String> {
        let name = new_flexvol_name(&self.flexvol_prefix, &mut rand::thread_rng());

        let spec = FlexvolCreateSpec {
            name: name.clone(),
            attributes: attributes.clone(),
            size_bytes: FLEXVOL_PLACEHOLDER_BYTES,
            unix_permissions: FLEXVOL_UNIX_PERMISSIONS.to_string(),
            export_policy: self.defaults.export_policy.clone(),
            security_style: self.defaults.security_style.clone(),
            snapshot_reserve_percent: self.defaults.snapshot_reserve_for(attributes),
        };

        self.client
            .volume_create(&spec)
            .await?
            .into_result("volume-create")?;

        if let Err(e) = self.prepare_flexvol(&name).await {
            error!(flexvol = %name, error = %e, "Failed to prepare new Flexvol");
            self.cleanup_flexvol(&name).await;
            return Err(e);
        }

        EconomyMetrics::incr(&self.metrics.flexvols_created);
        info!(
            "Created Flexvol {} (aggregate {}, snapshot policy {})",
            name, attributes.aggregate, attributes.snapshot_policy
        );

        Ok(name)
    }

    /// Mount, install the default quota rule, and reinitialize quotas
    async fn prepare_flexvol(&self, name: &str) -> Result<()> {
        self.client
            .volume_mount(name, &format!("/{}", name))
            .await?
            .into_result("volume-mount")?;

        self.client
            .quota_set_entry(&QuotaEntry::flexvol_default(name))
            .await?
            .into_result("quota-set-entry")?;

        self.quotas.reinitialize(name).await
    }

    async fn cleanup_flexvol(&self, name: &str) {
        match self.client.volume_destroy(name, true).await {
            Ok(reply) if reply.is_passed() => {
                debug!(flexvol = %name, "Removed partially created Flexvol");
            }
            Ok(reply) => {
                warn!(flexvol = %name, code = ?reply.code(), "Could not remove partially created Flexvol");
            }
            Err(e) => {
                warn!(flexvol = %name, error = %e, "Could not remove partially created Flexvol");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::{Fault, SimulatedArray};
    use crate::domain::ports::{ErrorCode, OntapApi, QuotaStatus};
    use crate::economy::config::QuotaConfig;
    use std::collections::HashSet;

    const PREFIX: &str = "qtree_pool_t_";

    fn selector(array: &Arc<SimulatedArray>, ceiling: usize) -> PoolSelector {
        let quotas = QuotaManager::new(
            array.clone(),
            &QuotaConfig {
                poll_interval_millis: 1,
                transition_timeout_secs: 5,
            },
        );
        PoolSelector::new(
            array.clone(),
            quotas,
            PREFIX,
            ceiling,
            VolumeDefaults::default(),
            Arc::new(EconomyMetrics::new()),
        )
    }

    fn attrs() -> PoolAttributes {
        VolumeDefaults::default()
            .resolve(&Default::default())
            .unwrap()
    }

    #[tokio::test]
    async fn test_creates_when_pool_empty() {
        let array = Arc::new(SimulatedArray::new());
        let selector = selector(&array, 200);
        let pool = PoolState::default();

        let name = selector.ensure_flexvol_for_qtree(&pool, &attrs()).await.unwrap();
        assert!(name.starts_with(PREFIX));

        let info = array.flexvol(&name).unwrap();
        assert_eq!(info.size_bytes, FLEXVOL_PLACEHOLDER_BYTES);
        assert_eq!(info.junction_path.as_deref(), Some(format!("/{}", name).as_str()));
        assert_eq!(
            array.quota_status(&name).await.unwrap(),
            crate::domain::ports::ApiReply::Passed(QuotaStatus::On)
        );
        assert_eq!(array.quota_entries(&name), vec![QuotaEntry::flexvol_default(&name)]);
        assert_eq!(array.calls("quota-off"), 0);
        assert_eq!(array.calls("quota-on"), 1);
    }

    #[tokio::test]
    async fn test_reuses_matching_flexvol() {
        let array = Arc::new(SimulatedArray::new());
        array.seed_flexvol("qtree_pool_t_a", attrs());
        let selector = selector(&array, 200);

        let name = selector
            .ensure_flexvol_for_qtree(&PoolState::default(), &attrs())
            .await
            .unwrap();
        assert_eq!(name, "qtree_pool_t_a");
        assert_eq!(array.calls("volume-create"), 0);
    }

    #[tokio::test]
    async fn test_attribute_mismatch_creates_new() {
        let array = Arc::new(SimulatedArray::new());
        let mut other = attrs();
        other.encryption = true;
        array.seed_flexvol("qtree_pool_t_a", other);
        // Outside the prefix, never considered
        array.seed_flexvol("foreign_volume", attrs());

        let selector = selector(&array, 200);
        let name = selector
            .ensure_flexvol_for_qtree(&PoolState::default(), &attrs())
            .await
            .unwrap();
        assert_ne!(name, "qtree_pool_t_a");
        assert_ne!(name, "foreign_volume");
    }

    #[tokio::test]
    async fn test_full_flexvols_are_skipped() {
        let array = Arc::new(SimulatedArray::new());
        array.seed_flexvol("qtree_pool_t_full", attrs());
        array.seed_qtrees("qtree_pool_t_full", 50);
        array.seed_flexvol("qtree_pool_t_room", attrs());
        array.seed_qtrees("qtree_pool_t_room", 49);

        let selector = selector(&array, 50);
        for _ in 0..10 {
            let picked = selector.get_flexvol_for_qtree(&attrs()).await.unwrap();
            assert_eq!(picked.as_deref(), Some("qtree_pool_t_room"));
        }

        array.seed_qtrees("qtree_pool_t_room", 1);
        assert_eq!(selector.get_flexvol_for_qtree(&attrs()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_selection_spreads_across_eligible() {
        let array = Arc::new(SimulatedArray::new());
        for name in ["qtree_pool_t_a", "qtree_pool_t_b", "qtree_pool_t_c"] {
            array.seed_flexvol(name, attrs());
        }

        let selector = selector(&array, 200);
        let mut seen = HashSet::new();
        for _ in 0..200 {
            seen.insert(selector.get_flexvol_for_qtree(&attrs()).await.unwrap().unwrap());
        }
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_preparation_destroys_flexvol() {
        let array = Arc::new(SimulatedArray::new());
        array.inject("volume-mount", Fault::Api(ErrorCode::ApiError));

        let selector = selector(&array, 200);
        assert!(selector.create_flexvol_for_qtree(&attrs()).await.is_err());
        assert_eq!(array.calls("volume-create"), 1);
        assert_eq!(array.calls("volume-destroy"), 1);
        assert!(array.flexvol_names().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_failure_keeps_original_error() {
        let array = Arc::new(SimulatedArray::new());
        array.inject("quota-set-entry", Fault::Transport);
        array.inject("volume-destroy", Fault::Transport);

        let selector = selector(&array, 200);
        let err = selector.create_flexvol_for_qtree(&attrs()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(array.flexvol_names().len(), 1);
    }
}
