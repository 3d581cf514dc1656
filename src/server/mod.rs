pub mod builder;
pub mod handler;
pub mod listener;

pub use builder::{Server, ServerBuilder};
pub use handler::RequestHandler;

use std::net::SocketAddr;

/// Peer address of the connection a request arrived on, stored in the
/// request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);
