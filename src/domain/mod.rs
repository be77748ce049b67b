//! Domain layer - Core port definitions
//!
//! This module defines the traits (ports) that the array client and the
//! storage drivers implement, following hexagonal architecture principles.

pub mod ports;

pub use ports::*;
