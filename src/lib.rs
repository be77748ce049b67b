//! Qtree Pool Operator
//!
//! Provisions small quota-limited volumes (qtrees) by packing many of them
//! into a shared pool of Flexvols on an ONTAP-style array.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Control Plane (REST)                     │
//! ├──────────────────────────────────────────────────────────────┤
//! │                         Orchestrator                         │
//! │                   routes to StorageDriver                    │
//! ├──────────────────────────────────────────────────────────────┤
//! │                   ontap-nas-economy driver                   │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────┐  │
//! │  │ QtreeManager │  │ PoolSelector │  │    Housekeeper     │  │
//! │  │  lifecycle   │  │ + Capacity   │  │ prune/reap/resize  │  │
//! │  └──────┬───────┘  └──────┬───────┘  └─────────┬──────────┘  │
//! │         └────────── pool lock + QuotaManager ──┘             │
//! ├──────────────────────────────────────────────────────────────┤
//! │                  OntapApi (array client port)                │
//! │                      SimulatedArray                          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: Orchestrator, backend factory, and REST API
//! - [`economy`]: The qtree pooling driver
//! - [`domain`]: Array client and driver ports
//! - [`error`]: Error types and handling

pub mod controlplane;
pub mod domain;
pub mod economy;
pub mod error;

// Re-export commonly used types
pub use controlplane::{
    ApiServer, ApiServerConfig, BackendConfig, BackendFactory, Orchestrator, OrchestratorConfig,
    OrchestratorStatus, SimulatedArray, SimulatedArrayConfig,
};

pub use domain::ports::{
    DriverStatus, OntapApi, OntapApiRef, StorageDriver, StorageDriverRef, VolumeInfo,
    VolumeRequest,
};

pub use economy::{EconomyConfig, EconomyDriver, ECONOMY_DRIVER_NAME};

pub use error::{Error, ErrorAction, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
