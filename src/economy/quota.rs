//! Quota State Machine
//!
//! Drives a Flexvol's quota subsystem between `off` and `on` and starts
//! quota resizes. Tracks which Flexvols have a stale quota configuration in
//! the [`ResizeQueue`].

use super::config::QuotaConfig;
use crate::domain::ports::{ApiReply, OntapApiRef, QuotaStatus};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// Resize Queue
// =============================================================================

/// Flexvols whose quota rules changed since the last resize was started.
///
/// Clones share one set. Writers hold the pool lock; readers that only
/// report the queue use a clone and skip it.
#[derive(Debug, Clone, Default)]
pub struct ResizeQueue {
    flexvols: Arc<Mutex<BTreeSet<String>>>,
}

impl ResizeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag a Flexvol for resize
    pub fn flag(&mut self, flexvol: impl Into<String>) {
        self.flexvols.lock().insert(flexvol.into());
    }

    /// Remove a Flexvol; returns whether it was flagged
    pub fn unflag(&mut self, flexvol: &str) -> bool {
        self.flexvols.lock().remove(flexvol)
    }

    pub fn contains(&self, flexvol: &str) -> bool {
        self.flexvols.lock().contains(flexvol)
    }

    pub fn len(&self) -> usize {
        self.flexvols.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.flexvols.lock().is_empty()
    }

    /// Owned copy of the flagged names, in order
    pub fn snapshot(&self) -> Vec<String> {
        self.flexvols.lock().iter().cloned().collect()
    }
}

/// What happened to a flagged Flexvol when a resize was attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// The array accepted the resize job
    Started,
    /// The Flexvol no longer exists
    FlexvolGone,
}

// =============================================================================
// Quota Manager
// =============================================================================

/// Quota operations against one array
#[derive(Clone)]
pub struct QuotaManager {
    client: OntapApiRef,
    poll_interval: Duration,
    transition_timeout: Duration,
}

impl QuotaManager {
    pub fn new(client: OntapApiRef, config: &QuotaConfig) -> Self {
        Self {
            client,
            poll_interval: config.poll_interval(),
            transition_timeout: config.transition_timeout(),
        }
    }

    /// Current quota status. `corrupt` is reported as an error.
    pub async fn status(&self, flexvol: &str) -> Result<QuotaStatus> {
        let status = self
            .client
            .quota_status(flexvol)
            .await?
            .into_result("quota-status")?;

        if status == QuotaStatus::Corrupt {
            return Err(Error::QuotaCorrupt {
                flexvol: flexvol.to_string(),
            });
        }

        Ok(status)
    }

    /// Turn quotas off, optionally waiting until the array reports `off`
    pub async fn disable_quotas(&self, flexvol: &str, wait: bool) -> Result<()> {
        let status = self.status(flexvol).await?;

        if status != QuotaStatus::Off && status != QuotaStatus::Quitting {
            debug!(flexvol, %status, "Turning quotas off");
            self.client
                .quota_off(flexvol)
                .await?
                .into_result("quota-off")?;
        }

        if wait {
            self.wait_for_status(flexvol, QuotaStatus::Off).await?;
        }

        Ok(())
    }

    /// Turn quotas on, optionally waiting until the array reports `on`
    pub async fn enable_quotas(&self, flexvol: &str, wait: bool) -> Result<()> {
        let mut status = self.status(flexvol).await?;

        if status == QuotaStatus::Quitting {
            self.wait_for_status(flexvol, QuotaStatus::Off).await?;
            status = QuotaStatus::Off;
        }

        if status == QuotaStatus::Off {
            debug!(flexvol, "Turning quotas on");
            self.client
                .quota_on(flexvol)
                .await?
                .into_result("quota-on")?;
        }

        if wait {
            self.wait_for_status(flexvol, QuotaStatus::On).await?;
        }

        Ok(())
    }

    /// Force a full quota scan so that later rule changes only need a resize
    pub async fn reinitialize(&self, flexvol: &str) -> Result<()> {
        self.disable_quotas(flexvol, true).await?;
        self.enable_quotas(flexvol, true).await?;
        info!(flexvol, "Quotas reinitialized");
        Ok(())
    }

    /// Poll until the quota status reaches `target`
    async fn wait_for_status(&self, flexvol: &str, target: QuotaStatus) -> Result<()> {
        let poll = async {
            loop {
                let status = self.status(flexvol).await?;
                let reached = match target {
                    QuotaStatus::On => matches!(status, QuotaStatus::On | QuotaStatus::Resizing),
                    other => status == other,
                };
                if reached {
                    return Ok(());
                }
                debug!(flexvol, %status, %target, "Waiting for quota transition");
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        match tokio::time::timeout(self.transition_timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(Error::QuotaTransitionTimeout {
                flexvol: flexvol.to_string(),
                target: target.to_string(),
                waited: self.transition_timeout,
            }),
        }
    }

    /// Start a quota resize on a flagged Flexvol.
    ///
    /// The Flexvol leaves `queue` once the array accepts the job or reports
    /// the volume missing; any other failure leaves it flagged.
    pub async fn resize(&self, flexvol: &str, queue: &mut ResizeQueue) -> Result<ResizeOutcome> {
        match self.client.quota_resize(flexvol).await? {
            ApiReply::Passed(()) => {
                queue.unflag(flexvol);
                debug!(flexvol, "Started quota resize");
                Ok(ResizeOutcome::Started)
            }
            ApiReply::Failed(failure) if failure.code.is_not_found() => {
                queue.unflag(flexvol);
                warn!(flexvol, "Flexvol flagged for quota resize no longer exists");
                Ok(ResizeOutcome::FlexvolGone)
            }
            ApiReply::Failed(failure) => {
                Err(Error::api("quota-resize", failure.code, failure.reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::{Fault, SimulatedArray, SimulatedArrayConfig};
    use crate::domain::ports::{ErrorCode, OntapApi};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn fast_config() -> QuotaConfig {
        QuotaConfig {
            poll_interval_millis: 1,
            transition_timeout_secs: 5,
        }
    }

    async fn array_with_flexvol(polls: u32) -> Arc<SimulatedArray> {
        let array = Arc::new(SimulatedArray::with_config(SimulatedArrayConfig {
            quota_transition_polls: polls,
            ..Default::default()
        }));
        array.seed_flexvol("qtree_pool_test_a", Default::default());
        array
    }

    #[test]
    fn test_resize_queue() {
        let mut queue = ResizeQueue::new();
        assert!(queue.is_empty());
        queue.flag("b");
        queue.flag("a");
        queue.flag("a");
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.snapshot(), vec!["a".to_string(), "b".to_string()]);
        assert!(queue.unflag("a"));
        assert!(!queue.unflag("a"));
        assert!(!queue.contains("a"));

        let view = queue.clone();
        queue.flag("c");
        assert_eq!(view.snapshot(), vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_reinitialize_waits_for_transitions() {
        let array = array_with_flexvol(3).await;
        let quotas = QuotaManager::new(array.clone(), &fast_config());

        quotas.enable_quotas("qtree_pool_test_a", true).await.unwrap();
        assert_eq!(
            quotas.status("qtree_pool_test_a").await.unwrap(),
            QuotaStatus::On
        );

        quotas.reinitialize("qtree_pool_test_a").await.unwrap();
        assert_eq!(array.calls("quota-off"), 1);
        assert_eq!(array.calls("quota-on"), 2);
        assert_eq!(
            quotas.status("qtree_pool_test_a").await.unwrap(),
            QuotaStatus::On
        );
    }

    #[tokio::test]
    async fn test_disable_when_already_off_is_noop() {
        let array = array_with_flexvol(0).await;
        let quotas = QuotaManager::new(array.clone(), &fast_config());

        quotas.disable_quotas("qtree_pool_test_a", true).await.unwrap();
        assert_eq!(array.calls("quota-off"), 0);
    }

    #[tokio::test]
    async fn test_corrupt_aborts() {
        let array = array_with_flexvol(0).await;
        array.set_quota_status("qtree_pool_test_a", QuotaStatus::Corrupt);
        let quotas = QuotaManager::new(array.clone(), &fast_config());

        let err = quotas.reinitialize("qtree_pool_test_a").await.unwrap_err();
        assert_matches!(err, Error::QuotaCorrupt { .. });
        assert!(err.is_fatal());
        assert_eq!(array.calls("quota-off"), 0);
    }

    #[tokio::test]
    async fn test_corrupt_during_transition_aborts_wait() {
        let array = array_with_flexvol(1_000_000).await;
        let quotas = QuotaManager::new(array.clone(), &fast_config());

        let waiter = {
            let quotas = quotas.clone();
            tokio::spawn(async move { quotas.enable_quotas("qtree_pool_test_a", true).await })
        };

        // Initial status check plus at least one poll of the transition
        while array.calls("quota-status") < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        array.set_quota_status("qtree_pool_test_a", QuotaStatus::Corrupt);

        let err = waiter.await.unwrap().unwrap_err();
        assert_matches!(err, Error::QuotaCorrupt { .. });
        assert_eq!(array.calls("quota-on"), 1);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let array = array_with_flexvol(u32::MAX).await;
        let quotas = QuotaManager::new(
            array.clone(),
            &QuotaConfig {
                poll_interval_millis: 1,
                transition_timeout_secs: 0,
            },
        );

        let err = quotas.enable_quotas("qtree_pool_test_a", true).await.unwrap_err();
        assert_matches!(err, Error::QuotaTransitionTimeout { .. });
    }

    #[tokio::test]
    async fn test_resize_outcomes() {
        let array = array_with_flexvol(0).await;
        let quotas = QuotaManager::new(array.clone(), &fast_config());
        quotas.enable_quotas("qtree_pool_test_a", true).await.unwrap();

        let mut queue = ResizeQueue::new();
        queue.flag("qtree_pool_test_a");
        queue.flag("qtree_pool_test_missing");

        // Failure other than "does not exist" keeps the flag
        array.inject("quota-resize", Fault::Api(ErrorCode::ApiError));
        assert!(quotas.resize("qtree_pool_test_a", &mut queue).await.is_err());
        assert!(queue.contains("qtree_pool_test_a"));

        // Transport failure keeps the flag
        array.inject("quota-resize", Fault::Transport);
        assert!(quotas.resize("qtree_pool_test_a", &mut queue).await.is_err());
        assert!(queue.contains("qtree_pool_test_a"));

        let outcome = quotas.resize("qtree_pool_test_a", &mut queue).await.unwrap();
        assert_eq!(outcome, ResizeOutcome::Started);
        assert!(!queue.contains("qtree_pool_test_a"));

        let outcome = quotas
            .resize("qtree_pool_test_missing", &mut queue)
            .await
            .unwrap();
        assert_eq!(outcome, ResizeOutcome::FlexvolGone);
        assert!(queue.is_empty());

        assert!(array.quota_status("qtree_pool_test_a").await.unwrap().is_passed());
    }
}
