//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper http1, CONNECT split, Axum router)
//!     → request.rs (request ID, pathname/query, identity)
//!     → [routing + security decide route and access]
//!     → forward.rs (rewrite, sanitize, stream to upstream)
//!     → tunnel.rs (CONNECT: dial, 200, splice bytes)
//! ```

pub mod forward;
pub mod request;
pub mod server;
pub mod tunnel;

pub use request::RequestContext;
pub use server::{ProxyServer, ProxyState};
