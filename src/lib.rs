// src/lib.rs
pub mod balancer;
pub mod config;
pub mod health;
pub mod metrics;
pub mod proxy;
pub mod server;

pub use balancer::LoadBalancer;
