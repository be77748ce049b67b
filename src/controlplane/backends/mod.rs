//! Storage Backend Adapters
//!
//! Builds array clients and the storage drivers that run on top of them:
//! - Simulated: in-memory ONTAP array
//! - ontap-nas-economy: qtree pooling driver

pub mod simulated;

pub use simulated::*;

use crate::domain::ports::{OntapApiRef, StorageDriverRef};
use crate::economy::{EconomyConfig, EconomyDriver, ECONOMY_DRIVER_NAME};
use crate::error::{Error, Result};
use std::sync::Arc;

/// Factory for array clients and storage drivers
pub struct BackendFactory;

impl BackendFactory {
    /// Create an array client by name
    pub fn client(name: &str, config: &BackendConfig) -> Result<OntapApiRef> {
        match name.to_lowercase().as_str() {
            "simulated" | "sim" => Ok(Arc::new(SimulatedArray::with_config(config.simulated.clone()))),
            _ => Err(Error::BackendUnavailable {
                backend: name.to_string(),
            }),
        }
    }

    /// Create a storage driver by name on top of `client`
    pub fn driver(name: &str, config: &BackendConfig, client: OntapApiRef) -> Result<StorageDriverRef> {
        match name.to_lowercase().as_str() {
            ECONOMY_DRIVER_NAME | "economy" => {
                Ok(Arc::new(EconomyDriver::new(config.economy.clone(), client)?))
            }
            _ => Err(Error::BackendUnavailable {
                backend: name.to_string(),
            }),
        }
    }
}

/// Combined backend configuration
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    pub economy: EconomyConfig,
    pub simulated: SimulatedArrayConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_names() {
        let config = BackendConfig::default();
        let client = BackendFactory::client("Simulated", &config).unwrap();
        let driver = BackendFactory::driver("economy", &config, client.clone()).unwrap();
        assert_eq!(driver.name(), ECONOMY_DRIVER_NAME);

        assert!(matches!(
            BackendFactory::client("zapi", &config),
            Err(Error::BackendUnavailable { backend }) if backend == "zapi"
        ));
        assert!(matches!(
            BackendFactory::driver("ontap-san", &config, client),
            Err(Error::BackendUnavailable { backend }) if backend == "ontap-san"
        ));
    }
}
