// src/config/models.rs
use crate::proxy::Backend;
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Pause between two probe cycles, e.g. `"5s"` or `"250ms"`.
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,

    pub frontend_port: FrontendPort,

    /// Round-robin order follows this list.
    pub backend_urls: Vec<Url>,

    /// Deadline for a single probe. Unset means a probe may wait forever.
    #[serde(default, with = "humantime_serde")]
    pub probe_timeout: Option<Duration>,

    /// Deadline for forwarding a request and reading the backend body.
    #[serde(default, with = "humantime_serde")]
    pub proxy_timeout: Option<Duration>,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Accepts both `"8080"` and `8080`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FrontendPort {
    Number(u16),
    Text(String),
}

impl FrontendPort {
    pub fn port(&self) -> Result<u16, ConfigError> {
        match self {
            FrontendPort::Number(port) => Ok(*port),
            FrontendPort::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(text.clone())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
            path: "/metrics".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("backend_urls must contain at least one backend")]
    NoBackends,

    #[error("backend {0} is listed more than once")]
    DuplicateBackend(String),

    #[error("backend {0} must use http or https")]
    UnsupportedScheme(String),

    #[error("backend {0} must not carry a query or fragment")]
    QueryInBaseUrl(String),

    #[error("health_check_interval must be greater than zero")]
    ZeroInterval,

    #[error("invalid frontend_port: {0:?}")]
    InvalidPort(String),
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend_urls.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        // Keyed like the health registry, so `http://h/api` and `http://h/api/` collide.
        let mut seen = HashSet::new();
        for url in &self.backend_urls {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::UnsupportedScheme(url.to_string()));
            }
            if url.query().is_some() || url.fragment().is_some() {
                return Err(ConfigError::QueryInBaseUrl(url.to_string()));
            }
            if !seen.insert(Backend::new(url.clone()).id) {
                return Err(ConfigError::DuplicateBackend(url.to_string()));
            }
        }

        if self.health_check_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }

        self.frontend_port.port()?;
        Ok(())
    }

    /// Listening address of the frontend on all interfaces.
    pub fn frontend_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(([0, 0, 0, 0], self.frontend_port.port()?).into())
    }
}
