//! Housekeeping Scheduler
//!
//! Three independent periodic passes keep the pool tidy: pruning empty
//! Flexvols, reaping soft-deleted qtrees, and starting quota resizes on
//! flagged Flexvols. Failures are logged and retried on the next tick.

use super::config::HousekeepingConfig;
use super::metrics::EconomyMetrics;
use super::naming::DELETED_QTREE_PREFIX;
use super::pool::PoolLock;
use super::quota::{QuotaManager, ResizeOutcome};
use crate::domain::ports::{ApiReply, OntapApiRef};
use crate::error::{Error, ErrorAction, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A periodic maintenance action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HousekeepingTask {
    PruneFlexvols,
    ReapQtrees,
    ResizeQuotas,
}

impl HousekeepingTask {
    pub const ALL: [HousekeepingTask; 3] = [
        HousekeepingTask::PruneFlexvols,
        HousekeepingTask::ReapQtrees,
        HousekeepingTask::ResizeQuotas,
    ];

    pub fn period(&self, config: &HousekeepingConfig) -> Duration {
        match self {
            HousekeepingTask::PruneFlexvols => config.prune_period(),
            HousekeepingTask::ReapQtrees => config.reap_period(),
            HousekeepingTask::ResizeQuotas => config.resize_period(),
        }
    }
}

impl std::fmt::Display for HousekeepingTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HousekeepingTask::PruneFlexvols => write!(f, "prune-flexvols"),
            HousekeepingTask::ReapQtrees => write!(f, "reap-qtrees"),
            HousekeepingTask::ResizeQuotas => write!(f, "resize-quotas"),
        }
    }
}

/// Outcome of one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub examined: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct Housekeeper {
    client: OntapApiRef,
    pool: PoolLock,
    quotas: QuotaManager,
    flexvol_prefix: String,
    config: HousekeepingConfig,
    metrics: Arc<EconomyMetrics>,
}

impl Housekeeper {
    pub fn new(
        client: OntapApiRef,
        pool: PoolLock,
        quotas: QuotaManager,
        flexvol_prefix: impl Into<String>,
        config: HousekeepingConfig,
        metrics: Arc<EconomyMetrics>,
    ) -> Self {
        Self {
            client,
            pool,
            quotas,
            flexvol_prefix: flexvol_prefix.into(),
            config,
            metrics,
        }
    }

    /// Flag every owned Flexvol for resize. Run once at startup.
    pub async fn flag_all_for_resize(&self) -> Result<usize> {
        let mut pool = self.pool.lock().await;
        let flexvols = self
            .client
            .volume_list(&self.flexvol_prefix)
            .await?
            .into_result("volume-list")?;

        for flexvol in &flexvols {
            pool.resize_queue.flag(flexvol);
        }

        info!("Flagged {} Flexvols for quota resize", flexvols.len());
        Ok(flexvols.len())
    }

    /// Run one pass of `task` and record it
    pub async fn run_pass(&self, task: HousekeepingTask) -> Result<PassReport> {
        let report = match task {
            HousekeepingTask::PruneFlexvols => self.prune_flexvols().await?,
            HousekeepingTask::ReapQtrees => self.reap_qtrees().await?,
            HousekeepingTask::ResizeQuotas => self.resize_quotas().await?,
        };
        self.metrics.record_pass();
        Ok(report)
    }

    // =========================================================================
    // Passes
    // =========================================================================

    /// Destroy every owned Flexvol that holds no qtrees
    pub async fn prune_flexvols(&self) -> Result<PassReport> {
        let mut pool = self.pool.lock().await;
        let flexvols = self
            .client
            .volume_list(&self.flexvol_prefix)
            .await?
            .into_result("volume-list")?;

        let mut report = PassReport::default();
        for flexvol in flexvols {
            report.examined += 1;
            match self.prune_one(&flexvol).await {
                Ok(true) => {
                    report.completed += 1;
                    pool.resize_queue.unflag(&flexvol);
                }
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(flexvol = %flexvol, error = %e, "Could not prune Flexvol");
                }
            }
        }

        Ok(report)
    }

    /// Returns whether the Flexvol is gone
    async fn prune_one(&self, flexvol: &str) -> Result<bool> {
        let count = self
            .client
            .qtree_count(flexvol)
            .await?
            .into_result("qtree-count")?;
        if count > 0 {
            return Ok(false);
        }

        match self.client.volume_destroy(flexvol, true).await? {
            ApiReply::Passed(()) => {
                EconomyMetrics::incr(&self.metrics.flexvols_pruned);
                info!("Pruned empty Flexvol {}", flexvol);
                Ok(true)
            }
            ApiReply::Failed(failure) if failure.code.is_not_found() => {
                debug!(flexvol, "Empty Flexvol already gone");
                Ok(true)
            }
            ApiReply::Failed(failure) => Err(Error::api(
                "volume-destroy",
                failure.code,
                failure.reason,
            )),
        }
    }

    /// Re-issue async destroy for every soft-deleted qtree
    pub async fn reap_qtrees(&self) -> Result<PassReport> {
        let deleted = self
            .client
            .qtree_list(DELETED_QTREE_PREFIX, &self.flexvol_prefix)
            .await?
            .into_result("qtree-list")?;

        let mut report = PassReport::default();
        let mut reaped = 0;
        for qtree in deleted {
            report.examined += 1;
            match self.client.qtree_destroy_async(&qtree.flexvol, &qtree.name).await {
                Ok(ApiReply::Passed(())) => {
                    report.completed += 1;
                    reaped += 1;
                    debug!(qtree = %qtree.name, flexvol = %qtree.flexvol, "Reaping soft-deleted qtree");
                }
                Ok(ApiReply::Failed(failure)) if failure.code.is_not_found() => {
                    report.completed += 1;
                }
                Ok(ApiReply::Failed(failure)) => {
                    report.failed += 1;
                    warn!(qtree = %qtree.name, flexvol = %qtree.flexvol, code = %failure.code, reason = %failure.reason, "Could not reap qtree");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(qtree = %qtree.name, flexvol = %qtree.flexvol, error = %e, "Could not reap qtree");
                }
            }
        }

        EconomyMetrics::add(&self.metrics.qtrees_reaped, reaped);
        if report.examined > 0 {
            info!(
                "Reaped {}/{} soft-deleted qtrees",
                report.completed, report.examined
            );
        }
        Ok(report)
    }

    /// Start a quota resize on every flagged Flexvol
    pub async fn resize_quotas(&self) -> Result<PassReport> {
        let mut pool = self.pool.lock().await;

        let mut report = PassReport::default();
        for flexvol in pool.resize_queue.snapshot() {
            report.examined += 1;
            match self.quotas.resize(&flexvol, &mut pool.resize_queue).await {
                Ok(ResizeOutcome::Started) => {
                    report.completed += 1;
                    EconomyMetrics::incr(&self.metrics.quota_resizes_started);
                }
                Ok(ResizeOutcome::FlexvolGone) => {
                    report.completed += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    EconomyMetrics::incr(&self.metrics.quota_resize_failures);
                    match e.action() {
                        ErrorAction::RetryNextPass => {
                            warn!(flexvol = %flexvol, error = %e, "Quota resize failed, will retry");
                        }
                        ErrorAction::Abandon => {
                            error!(flexvol = %flexvol, error = %e, "Quota resize failed");
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Spawn one ticker per task. Each stops when `token` is cancelled.
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> Vec<JoinHandle<()>> {
        HousekeepingTask::ALL
            .iter()
            .map(|&task| {
                let housekeeper = Arc::clone(&self);
                let token = token.clone();
                tokio::spawn(async move { housekeeper.run_loop(task, token).await })
            })
            .collect()
    }

    async fn run_loop(&self, task: HousekeepingTask, token: CancellationToken) {
        let period = task.period(&self.config);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Started {} housekeeping every {:?}", task, period);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Stopped {} housekeeping", task);
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_pass(task).await {
                        Ok(report) => debug!(task = %task, ?report, "Housekeeping pass finished"),
                        Err(e) => warn!(task = %task, error = %e, "Housekeeping pass failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::{Fault, SimulatedArray};
    use crate::domain::ports::{ErrorCode, OntapApi, QtreeCreateSpec};
    use crate::economy::config::QuotaConfig;
    use crate::economy::pool::new_pool_lock;

    const PREFIX: &str = "qtree_pool_t_";

    fn housekeeper(array: &Arc<SimulatedArray>, pool: &PoolLock, config: HousekeepingConfig) -> Housekeeper {
        let quotas = QuotaManager::new(
            array.clone(),
            &QuotaConfig {
                poll_interval_millis: 1,
                transition_timeout_secs: 5,
            },
        );
        Housekeeper::new(
            array.clone(),
            pool.clone(),
            quotas,
            PREFIX,
            config,
            Arc::new(EconomyMetrics::new()),
        )
    }

    async fn add_qtree(array: &SimulatedArray, flexvol: &str, name: &str) {
        array
            .qtree_create(&QtreeCreateSpec {
                name: name.into(),
                flexvol: flexvol.into(),
                unix_permissions: "0777".into(),
                export_policy: "default".into(),
                security_style: "unix".into(),
            })
            .await
            .unwrap()
            .into_result("qtree-create")
            .unwrap();
    }

    #[tokio::test]
    async fn test_flag_all_on_start() {
        let array = Arc::new(SimulatedArray::new());
        array.seed_flexvol("qtree_pool_t_a", Default::default());
        array.seed_flexvol("qtree_pool_t_b", Default::default());
        array.seed_flexvol("other_volume", Default::default());
        let pool = new_pool_lock();

        let hk = housekeeper(&array, &pool, HousekeepingConfig::default());
        assert_eq!(hk.flag_all_for_resize().await.unwrap(), 2);
        assert_eq!(
            pool.lock().await.resize_queue.snapshot(),
            vec!["qtree_pool_t_a".to_string(), "qtree_pool_t_b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_prune_only_empty_owned_flexvols() {
        let array = Arc::new(SimulatedArray::new());
        array.seed_flexvol("qtree_pool_t_empty", Default::default());
        array.seed_flexvol("qtree_pool_t_used", Default::default());
        array.seed_flexvol("other_empty", Default::default());
        add_qtree(&array, "qtree_pool_t_used", "q1").await;

        let pool = new_pool_lock();
        pool.lock().await.resize_queue.flag("qtree_pool_t_empty");
        let hk = housekeeper(&array, &pool, HousekeepingConfig::default());

        let report = hk.prune_flexvols().await.unwrap();
        assert_eq!(report, PassReport { examined: 2, completed: 1, failed: 0 });
        assert_eq!(
            array.flexvol_names(),
            vec!["other_empty".to_string(), "qtree_pool_t_used".to_string()]
        );
        assert!(pool.lock().await.resize_queue.is_empty());
    }

    #[tokio::test]
    async fn test_prune_failure_does_not_stop_pass() {
        let array = Arc::new(SimulatedArray::new());
        array.seed_flexvol("qtree_pool_t_a", Default::default());
        array.seed_flexvol("qtree_pool_t_b", Default::default());
        array.inject("volume-destroy", Fault::Api(ErrorCode::ApiError));

        let pool = new_pool_lock();
        let hk = housekeeper(&array, &pool, HousekeepingConfig::default());
        let report = hk.prune_flexvols().await.unwrap();
        assert_eq!(report, PassReport { examined: 2, completed: 1, failed: 1 });

        // Next pass picks up the survivor
        let report = hk.prune_flexvols().await.unwrap();
        assert_eq!(report.completed, 1);
        assert!(array.flexvol_names().is_empty());
    }

    #[tokio::test]
    async fn test_reap_reissues_destroys() {
        let array = Arc::new(SimulatedArray::new());
        array.seed_flexvol("qtree_pool_t_a", Default::default());
        add_qtree(&array, "qtree_pool_t_a", "deleted_q1_abcde").await;
        add_qtree(&array, "qtree_pool_t_a", "deleted_q2_fghij").await;
        add_qtree(&array, "qtree_pool_t_a", "live").await;
        array.inject("qtree-destroy-async", Fault::Transport);

        let pool = new_pool_lock();
        let hk = housekeeper(&array, &pool, HousekeepingConfig::default());
        let report = hk.reap_qtrees().await.unwrap();
        assert_eq!(report, PassReport { examined: 2, completed: 1, failed: 1 });

        let report = hk.reap_qtrees().await.unwrap();
        assert_eq!(report, PassReport { examined: 1, completed: 1, failed: 0 });
        assert_eq!(array.qtrees("qtree_pool_t_a"), vec!["live".to_string()]);
        assert_eq!(hk.metrics.snapshot().qtrees_reaped, 2);
    }

    #[tokio::test]
    async fn test_resize_pass_retries_failures() {
        let array = Arc::new(SimulatedArray::new());
        array.seed_flexvol("qtree_pool_t_a", Default::default());
        array.seed_flexvol("qtree_pool_t_b", Default::default());

        let pool = new_pool_lock();
        {
            let mut state = pool.lock().await;
            state.resize_queue.flag("qtree_pool_t_a");
            state.resize_queue.flag("qtree_pool_t_b");
            state.resize_queue.flag("qtree_pool_t_gone");
        }
        array.inject("quota-resize", Fault::Api(ErrorCode::ApiError));

        let hk = housekeeper(&array, &pool, HousekeepingConfig::default());
        let report = hk.run_pass(HousekeepingTask::ResizeQuotas).await.unwrap();
        assert_eq!(report, PassReport { examined: 3, completed: 2, failed: 1 });
        assert_eq!(
            pool.lock().await.resize_queue.snapshot(),
            vec!["qtree_pool_t_a".to_string()]
        );

        let report = hk.run_pass(HousekeepingTask::ResizeQuotas).await.unwrap();
        assert_eq!(report.completed, 1);
        assert!(pool.lock().await.resize_queue.is_empty());
        assert_eq!(hk.metrics.snapshot().housekeeping_passes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tickers_run_until_cancelled() {
        let array = Arc::new(SimulatedArray::new());
        array.seed_flexvol("qtree_pool_t_a", Default::default());
        let pool = new_pool_lock();
        pool.lock().await.resize_queue.flag("qtree_pool_t_a");

        let config = HousekeepingConfig {
            prune_flexvols_period_secs: 600,
            reap_qtrees_period_secs: 600,
            resize_quotas_period_secs: 60,
        };
        let hk = Arc::new(housekeeper(&array, &pool, config));
        let token = CancellationToken::new();
        let handles = Arc::clone(&hk).spawn(token.clone());
        assert_eq!(handles.len(), 3);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(array.calls("quota-resize"), 1);
        assert!(pool.lock().await.resize_queue.is_empty());
        assert_eq!(array.flexvol_names().len(), 1);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(array.flexvol_names().is_empty());

        token.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
