//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → identity.rs (who is calling)
//!     → [routing decides the route]
//!     → authorize.rs (may this caller use this route and method)
//!     → headers.rs (sanitize before forwarding and before replying)
//! ```
//!
//! # Design Decisions
//! - Fail closed: the first failing check ends the request
//! - No trust in client input: proxy-injected headers never reach the
//!   upstream

pub mod authorize;
pub mod headers;
pub mod identity;

pub use authorize::{authorize, AccessScope, Denial, DenyReason};
