//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML/JSON)
//!     → loader.rs (parse & deserialize)
//!     → env.rs (expand ${NAME} / $NAME placeholders)
//!     → validation.rs (warnings for incomplete routes)
//!     → ProxyConfig (immutable)
//!     → RouteTable + UserRegistry built once at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no hot reload
//! - All fields have defaults to allow minimal configs
//! - Route order follows the document and is significant

pub mod env;
pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{AuditConfig, ListenerConfig, ObservabilityConfig, ProxyConfig, RouteConfig, RouteMap};
pub use validation::{validate_config, ConfigWarning};
