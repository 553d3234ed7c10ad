//! Path-based authorizing reverse proxy with CONNECT tunnelling.

// Core subsystems
pub mod config;
pub mod error;
pub mod http;
pub mod net;
pub mod routing;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::ProxyConfig;
pub use error::{ProxyError, Result};
pub use http::{ProxyServer, ProxyState};
pub use lifecycle::Shutdown;
