// src/health/checker.rs
use crate::health::HealthRegistry;
use crate::metrics::MetricsCollector;
use crate::proxy::Backend;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub backend_id: String,
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

/// One out-of-band check against one backend. Never fails: every problem
/// becomes an unhealthy result.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, backend: &Backend) -> HealthCheckResult;
}

/// Plain `GET` on the backend's base URL; only `200 OK` counts as healthy.
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, backend: &Backend) -> HealthCheckResult {
        let start = Instant::now();

        let (healthy, error) = match self.client.get(backend.url.clone()).send().await {
            Ok(response) if response.status() == StatusCode::OK => (true, None),
            Ok(response) => (false, Some(format!("HTTP {}", response.status()))),
            Err(e) if e.is_timeout() => (false, Some("Request timeout".to_string())),
            Err(e) => (false, Some(e.to_string())),
        };

        HealthCheckResult {
            backend_id: backend.id.clone(),
            healthy,
            response_time_ms: start.elapsed().as_millis() as u64,
            error,
        }
    }
}

/// Background task that probes every backend, writes the results into the
/// registry and sleeps for `interval`, until [`HealthChecker::shutdown`].
pub struct HealthChecker {
    registry: Arc<HealthRegistry>,
    probe: Arc<dyn HealthProbe>,
    interval: Duration,
    metrics: Option<Arc<MetricsCollector>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl HealthChecker {
    pub fn new(
        registry: Arc<HealthRegistry>,
        probe: Arc<dyn HealthProbe>,
        interval: Duration,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            registry,
            probe,
            interval,
            metrics,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.start())
    }

    pub async fn start(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(
            "Starting health checker for {} backends with interval: {:?}",
            self.registry.backends().len(),
            self.interval
        );

        loop {
            tokio::select! {
                _ = self.run_cycle() => {}
                _ = stopped(&mut shutdown_rx) => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = stopped(&mut shutdown_rx) => break,
            }
        }

        info!("Health checker shutting down");
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Probes every backend once, in configured order, and records each result.
    pub async fn run_cycle(&self) -> Vec<HealthCheckResult> {
        let backends = self.registry.backends().clone();
        let mut results = Vec::with_capacity(backends.len());

        for backend in backends.iter() {
            let result = self.probe.probe(backend).await;
            let was_healthy = self.registry.is_healthy(&backend.id).await;

            self.registry.set_health(&backend.id, result.healthy).await;

            if let Some(metrics) = &self.metrics {
                metrics.update_backend_health(&backend.id, result.healthy);
            }

            match (was_healthy, result.healthy) {
                (false, true) => info!(
                    backend = %backend.id,
                    response_time_ms = result.response_time_ms,
                    "Backend is now healthy"
                ),
                (true, false) => warn!(
                    backend = %backend.id,
                    error = ?result.error,
                    "Backend is now unhealthy"
                ),
                _ => debug!(
                    backend = %backend.id,
                    healthy = result.healthy,
                    error = ?result.error,
                    "Probe complete"
                ),
            }

            results.push(result);
        }

        let healthy_count = results.iter().filter(|r| r.healthy).count();
        if let Some(metrics) = &self.metrics {
            metrics.update_backend_counts(healthy_count, results.len());
        }

        debug!(
            "Health check complete: {} healthy, {} unhealthy",
            healthy_count,
            results.len() - healthy_count
        );

        results
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn stopped(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
