//! API Module
//!
//! REST API for volume provisioning and pool inspection.

pub mod server;
pub mod rest;

pub use server::*;
pub use rest::*;
