// src/health/mod.rs
mod checker;
mod registry;

pub use checker::{HealthCheckResult, HealthChecker, HealthProbe, HttpProbe};
pub use registry::{BackendHealth, HealthRegistry};
