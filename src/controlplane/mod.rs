//! Control Plane Module
//!
//! Wires array clients and storage drivers together and exposes them
//! through the REST API.

pub mod orchestrator;
pub mod api;
pub mod backends;

pub use orchestrator::*;
pub use api::*;
pub use backends::*;
