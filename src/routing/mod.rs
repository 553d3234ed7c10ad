//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Compilation (at startup):
//!     ProxyConfig.routes
//!     → table.rs (normalise paths, compute prefixes, keep order)
//!     → Freeze as immutable RouteTable + UserRegistry
//!
//! Incoming Request:
//!     pathname → matcher.rs (longest prefix) → Route or no match
//!     CONNECT host → matcher.rs (upstream hostname) → Route or no match
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route

pub mod matcher;
pub mod table;

pub use matcher::join_paths;
pub use table::{Route, RouteTable, UserRegistry};
