// src/balancer.rs
use crate::config::Config;
use crate::health::{HealthChecker, HealthRegistry, HttpProbe};
use crate::metrics::MetricsCollector;
use crate::proxy::{BackendSet, Proxy};
use crate::server::{RequestHandler, Server, ServerBuilder};
use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// One load-balancer instance: its own registry, prober and frontend.
pub struct LoadBalancer {
    registry: Arc<HealthRegistry>,
    checker: Arc<HealthChecker>,
    server: Server<RequestHandler>,
}

impl LoadBalancer {
    /// Wires the components from `config` and binds the frontend on `addr`.
    /// Nothing is probed or accepted until [`LoadBalancer::run`].
    pub async fn bind(
        config: &Config,
        addr: SocketAddr,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let backends = Arc::new(BackendSet::new(config.backend_urls.iter().cloned()));
        let registry = Arc::new(HealthRegistry::new(backends));

        let probe = HttpProbe::new(config.probe_timeout).context("Failed to create probe client")?;
        let checker = Arc::new(HealthChecker::new(
            registry.clone(),
            Arc::new(probe),
            config.health_check_interval,
            metrics.clone(),
        ));

        let proxy = Arc::new(Proxy::new(registry.clone(), config.proxy_timeout, metrics));
        let server = ServerBuilder::new(addr)
            .with_handler(RequestHandler::new(proxy))
            .bind()
            .await?;

        Ok(Self {
            registry,
            checker,
            server,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.server.local_addr()
    }

    pub fn registry(&self) -> Arc<HealthRegistry> {
        self.registry.clone()
    }

    /// Starts the prober and serves until `shutdown` resolves, then stops the
    /// prober and waits for it.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let prober = self.checker.clone().spawn();
        info!(
            "Load balancer serving {} backends on {}",
            self.registry.backends().len(),
            self.server.local_addr()?
        );

        let result = self.server.serve(shutdown).await;

        self.checker.shutdown();
        if let Err(e) = prober.await {
            error!("Health checker task failed: {}", e);
        }

        result
    }
}
