mod backend;
mod proxy;

pub use backend::{Backend, BackendSet};
pub use proxy::{Proxy, ProxyError};
