// ────────────────────────────────
// src/proxy/proxy.rs
// Picks a healthy backend per request and relays the exchange.
// ────────────────────────────────

use crate::health::HealthRegistry;
use crate::metrics::{MetricsCollector, RequestOutcome, Timer};
use crate::proxy::Backend;
use crate::server::ClientAddr;
use hyper::client::HttpConnector;
use hyper::header::{self, HeaderValue};
use hyper::{Body, Client, Request, Response, StatusCode};
use hyper_tls::HttpsConnector;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

pub struct Proxy {
    registry: Arc<HealthRegistry>,
    client: HttpClient,
    timeout: Option<Duration>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Proxy {
    pub fn new(
        registry: Arc<HealthRegistry>,
        timeout: Option<Duration>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let client = Client::builder().build::<_, Body>(HttpsConnector::new());

        Self {
            registry,
            client,
            timeout,
            metrics,
        }
    }

    /// Always produces a response: router failures become 503/500 replies.
    pub async fn serve(&self, req: Request<Body>) -> Response<Body> {
        let timer = Timer::new();
        let request_id = Uuid::new_v4();
        log_request(request_id, &req);

        let (outcome, response) = match self.handle(req).await {
            Ok(response) => {
                debug!(%request_id, status = %response.status(), "Request proxied");
                (RequestOutcome::Proxied, response)
            }
            Err(err @ ProxyError::NoHealthyBackend) => {
                warn!(%request_id, "{}", err);
                (RequestOutcome::Unavailable, err.into())
            }
            Err(err) => {
                warn!(%request_id, error = ?err, "{}", err);
                (RequestOutcome::Error, err.into())
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_request(outcome, timer.elapsed());
        }

        response
    }

    pub async fn handle(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let backend = self
            .registry
            .next_healthy()
            .await
            .ok_or(ProxyError::NoHealthyBackend)?;

        let outbound = build_outbound(&backend, req)?;

        if let Some(metrics) = &self.metrics {
            metrics.record_backend_request(&backend.id);
        }

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.forward(&backend, outbound))
                .await
                .map_err(|_| ProxyError::Timeout)?,
            None => self.forward(&backend, outbound).await,
        }
    }

    /// The backend body is read in full before a response exists, so a failed
    /// read never leaves a half-written reply behind.
    async fn forward(
        &self,
        backend: &Backend,
        outbound: Request<Body>,
    ) -> Result<Response<Body>, ProxyError> {
        let response = self
            .client
            .request(outbound)
            .await
            .map_err(ProxyError::Forward)?;

        let (parts, body) = response.into_parts();
        info!(backend = %backend.id, status = %parts.status, "Response from backend");

        let bytes = hyper::body::to_bytes(body)
            .await
            .map_err(ProxyError::ReadBody)?;

        Ok(Response::from_parts(parts, Body::from(bytes)))
    }
}

/// Same method, headers and body, aimed at `backend` + path-and-query.
/// `Host` stays behind so the client fills it in for the backend.
fn build_outbound(backend: &Backend, req: Request<Body>) -> Result<Request<Body>, ProxyError> {
    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let mut builder = Request::builder()
        .method(parts.method)
        .uri(backend.target_url(path_and_query));

    if let Some(headers) = builder.headers_mut() {
        for (name, value) in parts.headers.iter() {
            if name != header::HOST {
                headers.append(name.clone(), value.clone());
            }
        }
    }

    builder.body(body).map_err(ProxyError::BuildRequest)
}

fn log_request(request_id: Uuid, req: &Request<Body>) {
    let header_str = |name: header::HeaderName| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    let client = req
        .extensions()
        .get::<ClientAddr>()
        .map(|addr| addr.0.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    info!(
        %request_id,
        client = %client,
        method = %req.method(),
        uri = %req.uri(),
        version = ?req.version(),
        host = %header_str(header::HOST),
        user_agent = %header_str(header::USER_AGENT),
        accept = %header_str(header::ACCEPT),
        "Received request"
    );
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No healthy backend available")]
    NoHealthyBackend,

    #[error("Error creating request to backend")]
    BuildRequest(#[source] hyper::http::Error),

    #[error("Error forwarding request to backend")]
    Forward(#[source] hyper::Error),

    #[error("Error forwarding request to backend")]
    Timeout,

    #[error("Error reading response from backend")]
    ReadBody(#[source] hyper::Error),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::NoHealthyBackend => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let mut response = Response::new(Body::from(err.to_string()));
        *response.status_mut() = err.status_code();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}
