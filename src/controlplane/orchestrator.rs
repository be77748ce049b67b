//! Main Orchestrator
//!
//! Coordinates all control plane operations including:
//! - Building the array client and storage drivers
//! - Routing volume requests to the default driver
//! - Starting and stopping background housekeeping

use crate::controlplane::backends::{BackendConfig, BackendFactory};
use crate::domain::ports::{DriverStatus, StorageDriverRef, VolumeInfo, VolumeRequest};
use crate::economy::ECONOMY_DRIVER_NAME;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// =============================================================================
// Orchestrator Configuration
// =============================================================================

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Backend configurations
    pub backends: BackendConfig,
    /// Array client to build
    pub client: String,
    /// Drivers to register
    pub drivers: Vec<String>,
    /// Driver that serves volume requests
    pub default_driver: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            backends: BackendConfig::default(),
            client: "simulated".to_string(),
            drivers: vec![ECONOMY_DRIVER_NAME.to_string()],
            default_driver: ECONOMY_DRIVER_NAME.to_string(),
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct Orchestrator {
    config: OrchestratorConfig,
    /// Drivers by name
    drivers: RwLock<BTreeMap<String, StorageDriverRef>>,
    /// Running background tasks
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
    ready: AtomicBool,
}

impl Orchestrator {
    /// Create a new orchestrator
    pub fn new(config: OrchestratorConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            drivers: RwLock::new(BTreeMap::new()),
            tasks: parking_lot::Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            ready: AtomicBool::new(false),
        })
    }

    /// Build the array client and initialize every configured driver
    pub async fn initialize(&self) -> Result<()> {
        info!("Initializing orchestrator");

        let client = BackendFactory::client(&self.config.client, &self.config.backends)?;
        for name in &self.config.drivers {
            let driver = BackendFactory::driver(name, &self.config.backends, client.clone())?;
            self.register_driver(driver).await?;
        }

        self.ready.store(true, Ordering::SeqCst);
        info!("Orchestrator initialized successfully");
        Ok(())
    }

    /// Initialize and register a driver
    pub async fn register_driver(&self, driver: StorageDriverRef) -> Result<()> {
        info!("Registering driver: {}", driver.name());

        driver.initialize().await?;
        self.drivers
            .write()
            .await
            .insert(driver.name().to_string(), driver);

        Ok(())
    }

    async fn default_driver(&self) -> Result<StorageDriverRef> {
        self.drivers
            .read()
            .await
            .get(&self.config.default_driver)
            .cloned()
            .ok_or_else(|| Error::BackendUnavailable {
                backend: self.config.default_driver.clone(),
            })
    }

    /// Start housekeeping on every registered driver
    pub async fn start_housekeeping(&self) {
        let drivers = self.drivers.read().await;
        let mut tasks = self.tasks.lock();

        for driver in drivers.values() {
            let handles = driver.start_background(self.shutdown.child_token());
            info!(
                "Started {} background tasks for driver {}",
                handles.len(),
                driver.name()
            );
            tasks.extend(handles);
        }
    }

    /// Cancel background tasks and wait for them to finish
    pub async fn shutdown(&self) {
        info!("Shutting down orchestrator");
        self.ready.store(false, Ordering::SeqCst);
        self.shutdown.cancel();

        let handles: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!("Background task ended abnormally: {}", e);
            }
        }

        info!("Orchestrator stopped");
    }

    /// Token cancelled when the orchestrator shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Volume Operations
    // =========================================================================

    /// Provision a volume
    pub async fn provision(&self, request: VolumeRequest) -> Result<VolumeInfo> {
        info!(
            "Provisioning volume: {} ({} bytes)",
            request.name, request.size_bytes
        );

        let volume = self.default_driver().await?.create(request).await?;

        info!("Provisioned volume: {} -> {}", volume.name, volume.container);
        Ok(volume)
    }

    /// Get a volume by name
    pub async fn get_volume(&self, name: &str) -> Result<Option<VolumeInfo>> {
        self.default_driver().await?.get(name).await
    }

    /// Delete a volume. Deleting a missing volume succeeds.
    pub async fn delete_volume(&self, name: &str) -> Result<()> {
        info!("Deleting volume: {}", name);
        self.default_driver().await?.destroy(name).await
    }

    pub async fn list_volumes(&self) -> Result<Vec<String>> {
        self.default_driver().await?.list().await
    }

    /// Grow a volume
    pub async fn resize_volume(&self, name: &str, size_bytes: u64) -> Result<VolumeInfo> {
        info!("Resizing volume: {} to {} bytes", name, size_bytes);
        self.default_driver().await?.resize(name, size_bytes).await
    }

    /// Pool status of every driver
    pub async fn driver_status(&self) -> Result<Vec<DriverStatus>> {
        let drivers = self.drivers.read().await;
        let mut statuses = Vec::with_capacity(drivers.len());
        for driver in drivers.values() {
            statuses.push(driver.status().await?);
        }
        Ok(statuses)
    }

    /// Get overall orchestrator status
    pub async fn status(&self) -> OrchestratorStatus {
        let drivers: Vec<String> = self.drivers.read().await.keys().cloned().collect();
        let volume_count = match self.list_volumes().await {
            Ok(volumes) => Some(volumes.len() as u64),
            Err(e) => {
                warn!("Could not count volumes: {}", e);
                None
            }
        };

        OrchestratorStatus {
            healthy: volume_count.is_some(),
            ready: self.is_ready(),
            drivers,
            default_driver: self.config.default_driver.clone(),
            volume_count: volume_count.unwrap_or(0),
            background_tasks: self.tasks.lock().len() as u64,
        }
    }
}

/// Orchestrator status summary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    pub healthy: bool,
    pub ready: bool,
    pub drivers: Vec<String>,
    pub default_driver: String,
    pub volume_count: u64,
    pub background_tasks: u64,
}
