// ────────────────────────────────
// src/server/listener.rs
// Encapsulates low‑level TCP bind so the frontend can bind port 0 in tests.
// ────────────────────────────────
use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::TcpListener;

pub async fn bind_tcp(addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Could not bind frontend on {}", addr))?;
    Ok(listener)
}
