// ────────────────────────────────
// src/server/builder.rs
// ────────────────────────────────
use crate::server::listener::bind_tcp;
use crate::server::ClientAddr;
use anyhow::{anyhow, Result};
use hyper::{server::conn::Http, service::service_fn, Body, Request, Response};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::time::Duration;
use tower::{Service, ServiceExt};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Builder pattern so the caller can inject its request handler.
pub struct ServerBuilder<H> {
    addr: SocketAddr,
    handler: Option<H>,
}

impl<H> ServerBuilder<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            handler: None,
        }
    }

    /// Inject your request handler (usually wraps `proxy::Proxy`).
    pub fn with_handler(mut self, handler: H) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Binds the TCP listener without accepting yet.
    pub async fn bind(self) -> Result<Server<H>> {
        let handler = self
            .handler
            .ok_or_else(|| anyhow!("handler must be set via with_handler()"))?;

        let listener = bind_tcp(self.addr).await?;
        tracing::info!("HTTP server listening on {}", listener.local_addr()?);

        Ok(Server { listener, handler })
    }
}

pub struct Server<H> {
    listener: TcpListener,
    handler: H,
}

impl<H> Server<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `shutdown` resolves. Connections already
    /// accepted run to completion on their own tasks.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(err) if is_connection_error(&err) => {
                            tracing::debug!(%err, "accepted connection already closed");
                            continue;
                        }
                        Err(err) => {
                            // Usually EMFILE/ENFILE: back off instead of spinning.
                            tracing::warn!(%err, "accept failed, retrying in {:?}", ACCEPT_ERROR_BACKOFF);
                            tokio::select! {
                                _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => continue,
                                _ = &mut shutdown => {
                                    tracing::info!("HTTP server stopped accepting connections");
                                    return Ok(());
                                }
                            }
                        }
                    };
                    let handler = self.handler.clone();

                    // One Tokio task per connection.
                    tokio::spawn(async move {
                        let svc = service_fn(move |mut req: Request<Body>| {
                            req.extensions_mut().insert(ClientAddr(peer));
                            handler.clone().oneshot(req)
                        });

                        if let Err(err) = Http::new().serve_connection(stream, svc).await {
                            tracing::warn!(%peer, %err, "connection error");
                        }
                    });
                }
                _ = &mut shutdown => {
                    tracing::info!("HTTP server stopped accepting connections");
                    return Ok(());
                }
            }
        }
    }
}

/// Errors that only concern the one connection being accepted.
fn is_connection_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}
