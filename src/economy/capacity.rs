//! Capacity Planner
//!
//! Sizes a Flexvol to hold the hard limits of every qtree on it plus the
//! snapshot reserve.

use crate::domain::ports::{OntapApiRef, QuotaEntry, VolumeSize};
use crate::error::Result;
use tracing::{debug, warn};

/// Sum of all numeric hard limits, in bytes. Unlimited rules are skipped.
pub fn sum_hard_limits(entries: &[QuotaEntry]) -> u64 {
    entries
        .iter()
        .filter_map(|entry| entry.disk_limit.bytes())
        .fold(0u64, |total, bytes| total.saturating_add(bytes))
}

/// `floor((existing + new) * (1 + reserve / 100))`
pub fn optimal_flexvol_size(existing_bytes: u64, new_qtree_bytes: u64, snapshot_reserve_percent: u32) -> u64 {
    let total = existing_bytes as u128 + new_qtree_bytes as u128;
    let sized = total * (100 + snapshot_reserve_percent as u128) / 100;
    u64::try_from(sized).unwrap_or(u64::MAX)
}

/// Computes and applies Flexvol sizes
#[derive(Clone)]
pub struct CapacityPlanner {
    client: OntapApiRef,
}

impl CapacityPlanner {
    pub fn new(client: OntapApiRef) -> Self {
        Self { client }
    }

    /// Size `flexvol` needs to host its current qtrees plus `new_qtree_bytes`
    pub async fn optimal_size_for_flexvol(&self, flexvol: &str, new_qtree_bytes: u64) -> Result<u64> {
        let entries = self
            .client
            .quota_entry_list(flexvol)
            .await?
            .into_result("quota-entry-list")?;
        let info = self
            .client
            .volume_get(flexvol)
            .await?
            .into_result("volume-get")?;

        let existing = sum_hard_limits(&entries);
        let size = optimal_flexvol_size(existing, new_qtree_bytes, info.snapshot_reserve_percent);

        debug!(
            flexvol,
            existing_bytes = existing,
            new_qtree_bytes,
            snapshot_reserve = info.snapshot_reserve_percent,
            size,
            "Computed optimal Flexvol size"
        );

        Ok(size)
    }

    /// Grow `flexvol` to fit another `new_qtree_bytes`.
    ///
    /// Falls back to growing by exactly `new_qtree_bytes` when the optimal
    /// size cannot be computed.
    pub async fn resize_flexvol(&self, flexvol: &str, new_qtree_bytes: u64) -> Result<VolumeSize> {
        let size = match self.optimal_size_for_flexvol(flexvol, new_qtree_bytes).await {
            Ok(bytes) => VolumeSize::Absolute(bytes),
            Err(e) => {
                warn!(
                    flexvol,
                    error = %e,
                    "Could not compute optimal Flexvol size, growing incrementally"
                );
                VolumeSize::Grow(new_qtree_bytes)
            }
        };

        self.client
            .volume_set_size(flexvol, size)
            .await?
            .into_result("volume-set-size")?;

        debug!(flexvol, %size, "Resized Flexvol");
        Ok(size)
    }
}
