//! Reverse proxy: listener, request forwarding and per-request usage capture.

pub mod error;
pub(crate) mod forwarder;
pub mod handlers;
pub mod model_mapper;
pub mod provider_router;
pub mod server;
pub mod types;
pub mod usage;

pub use error::ProxyError;
pub use forwarder::Forwarder;
pub use handlers::ProxyContext;
pub use provider_router::{ProviderRouter, RouteTarget};
pub use server::ProxyServer;
pub use types::{ProxyConfig, ProxyMode, ProxyServerInfo, ProxyStatus};
