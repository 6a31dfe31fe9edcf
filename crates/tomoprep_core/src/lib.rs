//! Tomoprep Core - tomography scan preparation and cluster submission
//!
//! Turns an acquired scan into cluster reconstruction jobs: classifies
//! frames into dark, flat and projection images, lays them out in a
//! processing tree, splits the volume into chunks, submits array jobs to a
//! Grid Engine style batch scheduler and waits for them. The rotation
//! centre can be estimated from the 0 and 180 degree projections.
//!
//! This crate has no UI dependencies. `orchestrator::ScanProcessor` is
//! the usual entry point.

pub mod classify;
pub mod config;
pub mod cor;
pub mod dataset;
pub mod layout;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod planning;
pub mod scheduler;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
